//! Day-by-day volume targets and provider mix

use mailramp_storage::models::{ProviderDistribution, WarmupDay, WarmupPattern};

/// Maximum emails for `day` (1-based) of a `total_days` ramp towards `target`
pub fn daily_target(pattern: WarmupPattern, day: i32, total_days: i32, target: i32) -> i32 {
    let day = day.max(1);
    let total_days = total_days.max(1);

    let raw = match pattern {
        WarmupPattern::Linear => {
            (day as f64 / total_days as f64 * target as f64).round() as i64
        }
        WarmupPattern::Exponential => {
            ((day as f64 / total_days as f64).powf(1.5) * target as f64).round() as i64
        }
        WarmupPattern::Conservative => conservative(day) as i64,
    };

    raw.clamp(1, target.max(1) as i64) as i32
}

fn conservative(day: i32) -> i32 {
    match day {
        1..=7 => 50 + 25 * (day - 1),
        8..=14 => 200 + 50 * (day - 7),
        15..=21 => 550 + 100 * (day - 14),
        22..=30 => 1250 + 150 * (day - 21),
        _ => 2600 + 200 * (day - 30),
    }
}

/// Percentage split across mailbox providers for `day`
pub fn provider_distribution(day: i32) -> ProviderDistribution {
    let (gmail, outlook, yahoo, other) = match day {
        i32::MIN..=7 => (60, 25, 10, 5),
        8..=14 => (50, 30, 15, 5),
        15..=21 => (45, 32, 18, 5),
        _ => (40, 35, 20, 5),
    };

    ProviderDistribution {
        gmail,
        outlook,
        yahoo,
        other,
    }
}

/// Precompute every day of a schedule
pub fn build_days(pattern: WarmupPattern, total_days: i32, target: i32) -> Vec<WarmupDay> {
    (1..=total_days.max(1))
        .map(|day| WarmupDay {
            day,
            max_emails: daily_target(pattern, day, total_days, target),
            distribution: provider_distribution(day),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_conservative_milestones() {
        let target = |day| daily_target(WarmupPattern::Conservative, day, 30, 5000);
        assert_eq!(target(1), 50);
        assert_eq!(target(7), 200);
        assert_eq!(target(8), 250);
        assert_eq!(target(14), 550);
        assert_eq!(target(21), 1250);
        assert_eq!(target(30), 2600);
    }

    #[test]
    fn test_conservative_is_capped_by_target() {
        assert_eq!(daily_target(WarmupPattern::Conservative, 30, 30, 1000), 1000);
        assert_eq!(daily_target(WarmupPattern::Conservative, 1, 30, 20), 20);
    }

    #[test]
    fn test_linear_and_exponential() {
        assert_eq!(daily_target(WarmupPattern::Linear, 1, 10, 1000), 100);
        assert_eq!(daily_target(WarmupPattern::Linear, 10, 10, 1000), 1000);
        assert_eq!(daily_target(WarmupPattern::Exponential, 4, 16, 1000), 125);
        assert_eq!(daily_target(WarmupPattern::Exponential, 1, 30, 100), 1);
    }

    #[test]
    fn test_provider_mix_by_week() {
        assert_eq!(provider_distribution(1).gmail, 60);
        assert_eq!(provider_distribution(10).outlook, 30);
        assert_eq!(provider_distribution(21).yahoo, 18);
        let late = provider_distribution(40);
        assert_eq!((late.gmail, late.outlook, late.yahoo, late.other), (40, 35, 20, 5));
    }

    #[test]
    fn test_build_days_covers_schedule() {
        let days = build_days(WarmupPattern::Conservative, 30, 5000);
        assert_eq!(days.len(), 30);
        assert_eq!(days[0].day, 1);
        assert!(days.windows(2).all(|w| w[0].max_emails <= w[1].max_emails));
    }
}
