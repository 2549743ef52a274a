//! Prometheus metrics

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Engine-wide counters exported on `/metrics`
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub emails_sent: IntCounter,
    pub emails_failed: IntCounter,
    pub emails_retried: IntCounter,
    pub emails_bounced: IntCounter,
    /// Skipped at send time, by reason
    pub emails_suppressed: IntCounterVec,
    pub batches_processed: IntCounter,
    /// Batch deferrals, by reason
    pub admission_deferrals: IntCounterVec,
    /// Provider webhook events applied, by provider
    pub webhook_events: IntCounterVec,
    /// Tracking hits, by kind
    pub tracking_events: IntCounterVec,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace("mailramp"))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    label: &str,
) -> prometheus::Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help).namespace("mailramp"), &[label])?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            emails_sent: counter(&registry, "emails_sent_total", "Emails accepted by the relay")?,
            emails_failed: counter(&registry, "emails_failed_total", "Emails terminally failed")?,
            emails_retried: counter(&registry, "emails_retried_total", "Send attempts scheduled for retry")?,
            emails_bounced: counter(&registry, "emails_bounced_total", "Recipients rejected during the SMTP dialogue")?,
            emails_suppressed: counter_vec(
                &registry,
                "emails_suppressed_total",
                "Sends skipped for suppressed addresses",
                "reason",
            )?,
            batches_processed: counter(&registry, "batches_processed_total", "Recipient batches admitted")?,
            admission_deferrals: counter_vec(
                &registry,
                "admission_deferrals_total",
                "Batches rescheduled by rate, warm-up or business-hour limits",
                "reason",
            )?,
            webhook_events: counter_vec(
                &registry,
                "webhook_events_total",
                "Provider webhook events applied",
                "provider",
            )?,
            tracking_events: counter_vec(
                &registry,
                "tracking_events_total",
                "Open, click and unsubscribe hits",
                "kind",
            )?,
            registry,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.emails_sent.inc_by(3);
        metrics
            .admission_deferrals
            .with_label_values(&["hourly_limit"])
            .inc();

        let text = metrics.render();
        assert!(text.contains("mailramp_emails_sent_total 3"));
        assert!(text.contains(r#"mailramp_admission_deferrals_total{reason="hourly_limit"} 1"#));
    }
}
