//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `FLEXHUB_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `FLEXHUB_BASE_URL` - Public URL of the back-office API
//! - `TASKFORCE_API_TOKEN` - Bearer token for taskforce endpoints (min 32 chars, high entropy)
//! - `STRIPE_SECRET_KEY` - Stripe secret key (Connect transfers and onboarding)
//! - `EMAIL_FROM` - Sender address for outbound email
//! - at least one of `BREVO_API_KEY` / `RESEND_API_KEY`
//!
//! ## Optional
//! - `APP_ENV` - `production` hides raw error details (default: development)
//! - `FLEXHUB_HOST` - Bind address (default: 127.0.0.1)
//! - `FLEXHUB_PORT` - Listen port (default: 3000)
//! - `EMAIL_FROM_NAME` - Sender display name (default: FlexHub)
//! - `TASKFORCE_NOTIFY_EMAIL` - Inbox notified about new applications
//! - `AGREEMENT_FILE_PATH` - Agreement attached to "send documents" emails
//! - `MAILGUN_SIGNING_KEY` - Enables webhook signature verification
//! - `MAILGUN_API_KEY` - Used to download stored-message attachments
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`
//!
//! ## Optional (Supabase Storage - signed documents)
//! - `SUPABASE_URL` - Project URL
//! - `SUPABASE_SERVICE_ROLE_KEY` - Service role key
//! - `SUPABASE_BUCKET` - Bucket name (default: signed-documents)
//!
//! ## Optional (payouts)
//! - `PAYOUT_SCHEDULER_ENABLED` - Run the weekly payout task (default: true)
//! - `PAYOUT_WEEKDAY` - Day of the weekly run, e.g. `mon` (default: mon)
//! - `PAYOUT_HOUR_UTC` - Hour of the weekly run, 0-23 (default: 10)
//! - `PAYOUT_MINIMUM_CENTS` - Smallest balance worth a transfer (default: 1000)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use chrono::Weekday;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use flexhub_core::Cents;

const MIN_API_TOKEN_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_STORAGE_BUCKET: &str = "signed-documents";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Production,
}

impl AppEnvironment {
    fn from_env() -> Self {
        match get_optional_env("APP_ENV").as_deref() {
            Some("production" | "prod") => Self::Production,
            _ => Self::Development,
        }
    }

    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL of the API
    pub base_url: String,
    /// Deployment environment
    pub environment: AppEnvironment,
    /// Bearer token for taskforce endpoints
    pub taskforce_token: SecretString,
    /// Stripe configuration
    pub stripe: StripeConfig,
    /// Outbound email configuration
    pub email: EmailConfig,
    /// Mailgun inbound configuration
    pub mailgun: MailgunConfig,
    /// Supabase Storage configuration (optional - signed documents are
    /// recorded by filename only without it)
    pub storage: Option<StorageConfig>,
    /// Weekly payout configuration
    pub payouts: PayoutConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Stripe API configuration.
///
/// Implements `Debug` manually to redact the secret key.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret key (`sk_live_...` / `sk_test_...`)
    pub secret_key: SecretString,
    /// API base URL (overridable for tests)
    pub api_base: String,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Outbound email configuration.
///
/// Implements `Debug` manually to redact the API keys.
#[derive(Clone)]
pub struct EmailConfig {
    /// Brevo API key (supports attachments)
    pub brevo_api_key: Option<SecretString>,
    /// Resend API key (preferred when set)
    pub resend_api_key: Option<SecretString>,
    /// Sender address (From header)
    pub from_address: String,
    /// Sender display name
    pub from_name: String,
    /// Inbox notified about new applications
    pub taskforce_notify_address: Option<String>,
    /// Agreement document attached to "send documents" emails
    pub agreement_path: Option<PathBuf>,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("brevo_api_key", &self.brevo_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("resend_api_key", &self.resend_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("from_address", &self.from_address)
            .field("from_name", &self.from_name)
            .field("taskforce_notify_address", &self.taskforce_notify_address)
            .field("agreement_path", &self.agreement_path)
            .finish()
    }
}

/// Mailgun inbound webhook configuration.
///
/// Implements `Debug` manually to redact the keys.
#[derive(Clone, Default)]
pub struct MailgunConfig {
    /// Webhook signing key; signature checks are skipped when unset
    pub signing_key: Option<SecretString>,
    /// API key for fetching stored attachments
    pub api_key: Option<SecretString>,
}

impl std::fmt::Debug for MailgunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailgunConfig")
            .field("signing_key", &self.signing_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Supabase Storage configuration.
///
/// Implements `Debug` manually to redact the service role key.
#[derive(Clone)]
pub struct StorageConfig {
    /// Project URL (e.g., `https://abc.supabase.co`)
    pub url: String,
    /// Service role key
    pub service_role_key: SecretString,
    /// Bucket for signed documents
    pub bucket: String,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("url", &self.url)
            .field("service_role_key", &"[REDACTED]")
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Weekly payout schedule and threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutConfig {
    pub scheduler_enabled: bool,
    pub weekday: Weekday,
    pub hour_utc: u32,
    pub minimum: Cents,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            scheduler_enabled: true,
            weekday: Weekday::Mon,
            hour_utc: 10,
            minimum: Cents::new(1_000),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("FLEXHUB_DATABASE_URL")?;
        let host = get_env_or_default("FLEXHUB_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("FLEXHUB_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("FLEXHUB_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("FLEXHUB_PORT".to_string(), e.to_string()))?;
        let base_url = get_required_env("FLEXHUB_BASE_URL")?;
        let environment = AppEnvironment::from_env();

        let taskforce_token = get_validated_secret("TASKFORCE_API_TOKEN")?;
        validate_token_length(&taskforce_token, "TASKFORCE_API_TOKEN")?;

        let stripe = StripeConfig::from_env()?;
        let email = EmailConfig::from_env()?;
        let mailgun = MailgunConfig::from_env();
        let storage = StorageConfig::from_env()?;
        let payouts = PayoutConfig::from_env()?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.2);

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            environment,
            taskforce_token,
            stripe,
            email,
            mailgun,
            storage,
            payouts,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Returns a reference to the storage configuration (if configured).
    #[must_use]
    pub const fn storage(&self) -> Option<&StorageConfig> {
        self.storage.as_ref()
    }
}

impl StripeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            api_base: get_env_or_default("STRIPE_API_BASE", "https://api.stripe.com/v1"),
        })
    }
}

impl EmailConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let brevo_api_key = get_optional_validated_secret("BREVO_API_KEY")?;
        let resend_api_key = get_optional_validated_secret("RESEND_API_KEY")?;

        if brevo_api_key.is_none() && resend_api_key.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "BREVO_API_KEY or RESEND_API_KEY".to_string(),
            ));
        }

        Ok(Self {
            brevo_api_key,
            resend_api_key,
            from_address: get_required_env("EMAIL_FROM")?,
            from_name: get_env_or_default("EMAIL_FROM_NAME", "FlexHub"),
            taskforce_notify_address: get_optional_env("TASKFORCE_NOTIFY_EMAIL"),
            agreement_path: get_optional_env("AGREEMENT_FILE_PATH").map(PathBuf::from),
        })
    }
}

impl MailgunConfig {
    /// Load Mailgun configuration from environment.
    ///
    /// Both keys are optional; weak keys only produce a warning so a
    /// misconfigured webhook does not take the API down.
    fn from_env() -> Self {
        let load = |key: &str| {
            get_optional_env(key).map(|value| {
                if let Err(e) = validate_secret_strength(&value, key) {
                    tracing::warn!("{key} validation warning: {e}");
                }
                SecretString::from(value)
            })
        };

        Self {
            signing_key: load("MAILGUN_SIGNING_KEY"),
            api_key: load("MAILGUN_API_KEY"),
        }
    }
}

impl StorageConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let url = get_optional_env("SUPABASE_URL");
        let key = get_optional_env("SUPABASE_SERVICE_ROLE_KEY");

        match (url, key) {
            (Some(url), Some(key)) => {
                validate_secret_strength(&key, "SUPABASE_SERVICE_ROLE_KEY")?;
                Ok(Some(Self {
                    url: url.trim_end_matches('/').to_string(),
                    service_role_key: SecretString::from(key),
                    bucket: get_env_or_default("SUPABASE_BUCKET", DEFAULT_STORAGE_BUCKET),
                }))
            }
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "SUPABASE_*".to_string(),
                "Both SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set together".to_string(),
            )),
        }
    }
}

impl PayoutConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let scheduler_enabled = get_optional_env("PAYOUT_SCHEDULER_ENABLED")
            .map_or(Ok(defaults.scheduler_enabled), |v| parse_bool("PAYOUT_SCHEDULER_ENABLED", &v))?;

        let weekday = match get_optional_env("PAYOUT_WEEKDAY") {
            Some(value) => value.parse::<Weekday>().map_err(|_| {
                ConfigError::InvalidEnvVar("PAYOUT_WEEKDAY".to_string(), value.clone())
            })?,
            None => defaults.weekday,
        };

        let hour_utc = match get_optional_env("PAYOUT_HOUR_UTC") {
            Some(value) => value
                .parse::<u32>()
                .ok()
                .filter(|h| *h < 24)
                .ok_or_else(|| {
                    ConfigError::InvalidEnvVar(
                        "PAYOUT_HOUR_UTC".to_string(),
                        format!("{value} is not an hour between 0 and 23"),
                    )
                })?,
            None => defaults.hour_utc,
        };

        let minimum = match get_optional_env("PAYOUT_MINIMUM_CENTS") {
            Some(value) => value
                .parse::<i64>()
                .ok()
                .filter(|c| *c >= 0)
                .map(Cents::new)
                .ok_or_else(|| {
                    ConfigError::InvalidEnvVar("PAYOUT_MINIMUM_CENTS".to_string(), value.clone())
                })?,
            None => defaults.minimum,
        };

        Ok(Self {
            scheduler_enabled,
            weekday,
            hour_utc,
            minimum,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable, treating empty values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("expected a boolean, got {value}"),
        )),
    }
}

/// Validate that an API token meets minimum length requirements.
fn validate_token_length(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_API_TOKEN_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_API_TOKEN_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

fn get_optional_validated_secret(key: &str) -> Result<Option<SecretString>, ConfigError> {
    get_optional_env(key)
        .map(|value| {
            validate_secret_strength(&value, key)?;
            Ok(SecretString::from(value))
        })
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        // "ab" has entropy of 1 bit per char (50% a, 50% b)
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-stripe-key-here", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_token_length() {
        assert!(validate_token_length(&SecretString::from("short"), "T").is_err());
        assert!(validate_token_length(&SecretString::from("a".repeat(32)), "T").is_ok());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_payout_defaults() {
        let defaults = PayoutConfig::default();
        assert_eq!(defaults.weekday, Weekday::Mon);
        assert_eq!(defaults.hour_utc, 10);
        assert_eq!(defaults.minimum, Cents::new(1_000));
    }

    #[test]
    fn test_email_config_debug_redacts_secrets() {
        let config = EmailConfig {
            brevo_api_key: Some(SecretString::from("xkeysib-super-secret-brevo")),
            resend_api_key: None,
            from_address: "hello@flexhub.fit".to_string(),
            from_name: "FlexHub".to_string(),
            taskforce_notify_address: Some("taskforce@flexhub.fit".to_string()),
            agreement_path: None,
        };

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("hello@flexhub.fit"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("xkeysib-super-secret-brevo"));
    }

    #[test]
    fn test_storage_config_debug_redacts_secrets() {
        let config = StorageConfig {
            url: "https://abc.supabase.co".to_string(),
            service_role_key: SecretString::from("service-role-jwt-value"),
            bucket: DEFAULT_STORAGE_BUCKET.to_string(),
        };

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("abc.supabase.co"));
        assert!(!debug_output.contains("service-role-jwt-value"));
    }
}
