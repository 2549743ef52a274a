//! Configuration for MailRamp

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// HTTP surface configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default SMTP relay
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Campaign pacing and worker settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Sending window
    #[serde(default)]
    pub business_hours: BusinessHoursConfig,

    /// Warm-up defaults
    #[serde(default)]
    pub warmup: WarmupConfig,

    /// Suppression policy
    #[serde(default)]
    pub suppression: SuppressionConfig,

    /// Open/click tracking and unsubscribe links
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Content variation
    #[serde(default)]
    pub variation: VariationConfig,

    /// Provider webhook secrets
    #[serde(default)]
    pub webhooks: WebhookConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname, used for Message-ID when the sender domain is unknown
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: "postgres" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// HTTP surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Public base URL used in tracking and unsubscribe links
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Bearer token for the control surface (plain or an argon2 hash)
    pub control_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            public_url: default_public_url(),
            control_token: None,
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// SMTP relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Implicit TLS
    #[serde(default)]
    pub use_tls: bool,

    /// STARTTLS upgrade
    #[serde(default = "default_true")]
    pub use_starttls: bool,

    /// Command timeout in seconds
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            use_tls: false,
            use_starttls: true,
            timeout_secs: default_smtp_timeout(),
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Campaign pacing and worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default recipients admitted per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: i32,

    /// Concurrent send workers
    #[serde(default = "default_send_concurrency")]
    pub send_concurrency: usize,

    /// Queue poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Send attempts before a recipient is terminally failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// Default per-campaign hourly limit
    #[serde(default = "default_hourly_limit")]
    pub default_hourly_limit: i32,

    /// Default per-campaign daily limit
    #[serde(default = "default_daily_limit")]
    pub default_daily_limit: i32,

    /// Default minimum seconds between sends
    #[serde(default = "default_delay_min")]
    pub default_delay_min_secs: i32,

    /// Default maximum seconds between sends
    #[serde(default = "default_delay_max")]
    pub default_delay_max_secs: i32,

    /// Gap after the last send of a batch before the next batch
    #[serde(default = "default_next_batch_gap")]
    pub next_batch_gap_secs: i64,

    /// Recipients between extra pauses inside a batch
    #[serde(default = "default_pause_every")]
    pub pause_every: usize,

    /// Extra pause bounds in seconds
    #[serde(default = "default_pause_min")]
    pub pause_min_secs: i64,

    #[serde(default = "default_pause_max")]
    pub pause_max_secs: i64,

    /// Re-check interval while sends are still in flight
    #[serde(default = "default_drain_check")]
    pub drain_check_secs: i64,

    /// A recipient claimed for sending this long ago without an outcome is
    /// returned to `pending`
    #[serde(default = "default_stale_send")]
    pub stale_send_secs: i64,

    /// Interval of the maintenance task
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            send_concurrency: default_send_concurrency(),
            poll_interval_secs: default_poll_interval(),
            max_attempts: default_max_attempts(),
            default_hourly_limit: default_hourly_limit(),
            default_daily_limit: default_daily_limit(),
            default_delay_min_secs: default_delay_min(),
            default_delay_max_secs: default_delay_max(),
            next_batch_gap_secs: default_next_batch_gap(),
            pause_every: default_pause_every(),
            pause_min_secs: default_pause_min(),
            pause_max_secs: default_pause_max(),
            drain_check_secs: default_drain_check(),
            stale_send_secs: default_stale_send(),
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

fn default_batch_size() -> i32 {
    100
}

fn default_send_concurrency() -> usize {
    10
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_attempts() -> i32 {
    3
}

fn default_hourly_limit() -> i32 {
    100
}

fn default_daily_limit() -> i32 {
    1000
}

fn default_delay_min() -> i32 {
    30
}

fn default_delay_max() -> i32 {
    120
}

fn default_next_batch_gap() -> i64 {
    30
}

fn default_pause_every() -> usize {
    50
}

fn default_pause_min() -> i64 {
    120
}

fn default_pause_max() -> i64 {
    300
}

fn default_drain_check() -> i64 {
    300
}

fn default_stale_send() -> i64 {
    900
}

fn default_maintenance_interval() -> u64 {
    3600
}

/// Sending window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursConfig {
    /// When disabled every instant is inside the window
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// First sending hour (local)
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,

    /// Hour at which sending stops (local, exclusive)
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,

    /// Skip Saturdays and Sundays
    #[serde(default = "default_true")]
    pub weekdays_only: bool,

    /// Offset of the local time zone from UTC
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            weekdays_only: true,
            utc_offset_minutes: 0,
        }
    }
}

fn default_start_hour() -> u32 {
    9
}

fn default_end_hour() -> u32 {
    17
}

/// Warm-up defaults used when a request omits them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    #[serde(default = "default_warmup_pattern")]
    pub default_pattern: String,

    #[serde(default = "default_warmup_days")]
    pub default_total_days: i32,

    #[serde(default = "default_warmup_target")]
    pub default_target_volume: i32,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            default_pattern: default_warmup_pattern(),
            default_total_days: default_warmup_days(),
            default_target_volume: default_warmup_target(),
        }
    }
}

fn default_warmup_pattern() -> String {
    "conservative".to_string()
}

fn default_warmup_days() -> i32 {
    30
}

fn default_warmup_target() -> i32 {
    5000
}

/// Suppression policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionConfig {
    /// Store hard bounces without a tenant so they block every tenant
    #[serde(default = "default_true")]
    pub global_hard_bounces: bool,

    /// Soft bounces inside the window that suppress an address
    #[serde(default = "default_soft_threshold")]
    pub soft_bounce_threshold: i32,

    /// Soft bounce counting window in days
    #[serde(default = "default_soft_window")]
    pub soft_bounce_window_days: i64,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            global_hard_bounces: true,
            soft_bounce_threshold: default_soft_threshold(),
            soft_bounce_window_days: default_soft_window(),
        }
    }
}

fn default_soft_threshold() -> i32 {
    5
}

fn default_soft_window() -> i64 {
    30
}

/// Tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Inject pixels and rewrite links
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HMAC key for signed unsubscribe tokens
    pub unsubscribe_secret: Option<String>,

    /// Lifetime of a signed unsubscribe token
    #[serde(default = "default_token_ttl")]
    pub token_ttl_hours: i64,

    /// Activities older than this are deleted by maintenance
    #[serde(default = "default_retention")]
    pub activity_retention_days: i64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            unsubscribe_secret: None,
            token_ttl_hours: default_token_ttl(),
            activity_retention_days: default_retention(),
        }
    }
}

fn default_token_ttl() -> i64 {
    24
}

fn default_retention() -> i64 {
    365
}

/// Content variation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Renderings per campaign, including the original
    #[serde(default = "default_variation_count")]
    pub count: usize,

    #[serde(default = "default_true")]
    pub synonyms: bool,

    #[serde(default = "default_true")]
    pub whitespace: bool,

    #[serde(default = "default_true")]
    pub tag_swaps: bool,

    /// Zero-width characters are off unless asked for
    #[serde(default)]
    pub invisible_chars: bool,

    /// Per-word insertion probability when invisible characters are on
    #[serde(default = "default_invisible_rate")]
    pub invisible_char_rate: f64,
}

impl Default for VariationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: default_variation_count(),
            synonyms: true,
            whitespace: true,
            tag_swaps: true,
            invisible_chars: false,
            invisible_char_rate: default_invisible_rate(),
        }
    }
}

fn default_variation_count() -> usize {
    3
}

fn default_invisible_rate() -> f64 {
    0.02
}

/// Provider webhook secrets; a missing secret disables verification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub generic_secret: Option<String>,
    pub sendgrid_secret: Option<String>,
    pub ses_secret: Option<String>,
    pub mailgun_signing_key: Option<String>,
    pub postfix_secret: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the first file found, then
    /// `MAILRAMP__SECTION__KEY` environment variables on top.
    pub fn load() -> crate::Result<Self> {
        let path = std::env::var("MAILRAMP_CONFIG")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                [
                    PathBuf::from("./config.toml"),
                    PathBuf::from("/etc/mailramp/config.toml"),
                ]
                .into_iter()
                .find(|p| p.exists())
            });

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            tracing::debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix("MAILRAMP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))
    }
}
