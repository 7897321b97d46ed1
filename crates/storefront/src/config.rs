//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STORE_CURRENCY` - ISO 4217 store currency (default: USD)
//! - `TAX_RATE` - Flat tax rate applied to the subtotal (default: 0)
//! - `FREE_SHIPPING_THRESHOLD` - Subtotal at which standard shipping is free (default: 75.00)
//! - `RATE_LIMIT_ENABLED` - Rate limit checkout/payment APIs (default: true)
//! - `PAYMENT_DEFAULT_PROVIDER` - `square` or `stripe` (default: square)
//! - `SQUARE_ACCESS_TOKEN`, `SQUARE_LOCATION_ID`, `SQUARE_APPLICATION_ID`,
//!   `SQUARE_ENVIRONMENT` (sandbox|production), `SQUARE_WEBHOOK_SIGNATURE_KEY`,
//!   `SQUARE_WEBHOOK_URL`
//! - `STRIPE_SECRET_KEY`, `STRIPE_PUBLISHABLE_KEY`, `STRIPE_WEBHOOK_SECRET`
//! - `STORAGE_URL`, `STORAGE_SERVICE_KEY`, `STORAGE_BUCKET` (default: product-images)
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`
//!
//! A payment provider section is only present when its credentials are set.
//! Whether the credentials are usable is decided when the provider is
//! initialized, not here.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;

use meridian_core::{CurrencyCode, ProviderKind};

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
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

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Store-wide pricing settings
    pub store: StoreConfig,
    /// Payment provider configuration
    pub payments: PaymentsConfig,
    /// Object storage for product images
    pub storage: Option<StorageConfig>,
    /// Rate limit checkout and payment APIs
    pub rate_limit_enabled: bool,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 - 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry performance traces sample rate (0.0 - 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Store-wide pricing settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Currency every price is expressed in.
    pub currency: CurrencyCode,
    /// Flat tax rate applied to the subtotal (e.g. 0.0825).
    pub tax_rate: Decimal,
    /// Subtotal at or above which standard shipping is free.
    pub free_shipping_threshold: Decimal,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::USD,
            tax_rate: Decimal::ZERO,
            free_shipping_threshold: Decimal::new(7500, 2),
        }
    }
}

/// Payment provider configuration.
#[derive(Debug, Clone, Default)]
pub struct PaymentsConfig {
    /// Provider used when a request does not name one.
    pub default_provider: Option<ProviderKind>,
    /// Square credentials, if configured.
    pub square: Option<SquareConfig>,
    /// Stripe credentials, if configured.
    pub stripe: Option<StripeConfig>,
}

/// Square API environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SquareEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl SquareEnvironment {
    /// Base URL of the Square REST API for this environment.
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Sandbox => "https://connect.squareupsandbox.com",
            Self::Production => "https://connect.squareup.com",
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }
}

impl FromStr for SquareEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            other => Err(format!("expected sandbox or production, got {other:?}")),
        }
    }
}

/// Square API credentials.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct SquareConfig {
    /// OAuth or personal access token.
    pub access_token: SecretString,
    /// Location all orders and payments are created at.
    pub location_id: String,
    /// Web Payments SDK application id (public).
    pub application_id: Option<String>,
    /// Sandbox or production.
    pub environment: SquareEnvironment,
    /// Webhook subscription signature key.
    pub webhook_signature_key: Option<SecretString>,
    /// Notification URL registered with the webhook subscription.
    pub webhook_url: Option<String>,
    /// API base URL override (tests, proxies).
    pub base_url_override: Option<String>,
}

impl std::fmt::Debug for SquareConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SquareConfig")
            .field("access_token", &"[REDACTED]")
            .field("location_id", &self.location_id)
            .field("application_id", &self.application_id)
            .field("environment", &self.environment)
            .field(
                "webhook_signature_key",
                &self.webhook_signature_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("webhook_url", &self.webhook_url)
            .field("base_url_override", &self.base_url_override)
            .finish()
    }
}

/// Stripe API credentials.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_live_...` or `sk_test_...`).
    pub secret_key: SecretString,
    /// Publishable key handed to the browser.
    pub publishable_key: Option<String>,
    /// Webhook signing secret (`whsec_...`).
    pub webhook_secret: Option<SecretString>,
    /// API base URL override (tests, proxies).
    pub base_url_override: Option<String>,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("publishable_key", &self.publishable_key)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("base_url_override", &self.base_url_override)
            .finish()
    }
}

/// Object storage (hosted backend storage API) configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StorageConfig {
    /// Project URL, e.g. `https://abc.backend.example.co`.
    pub url: String,
    /// Service-role key used for uploads and deletes.
    pub service_key: SecretString,
    /// Bucket product images are stored in.
    pub bucket: String,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("url", &self.url)
            .field("service_key", &"[REDACTED]")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid, or
    /// if a webhook secret fails placeholder/entropy validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = parse_env("STOREFRONT_HOST", "127.0.0.1")?;
        let port = parse_env("STOREFRONT_PORT", "3000")?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?;

        let store = StoreConfig::from_env()?;
        let payments = PaymentsConfig::from_env()?;
        let storage = StorageConfig::from_env()?;
        let rate_limit_enabled = parse_bool_env("RATE_LIMIT_ENABLED", true)?;

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = parse_env("SENTRY_SAMPLE_RATE", "1.0")?;
        let sentry_traces_sample_rate = parse_env("SENTRY_TRACES_SAMPLE_RATE", "0.1")?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            store,
            payments,
            storage,
            rate_limit_enabled,
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

    /// Local configuration with no providers, storage, Sentry or rate limiting.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            database_url: SecretString::from("postgres://localhost/meridian_test"),
            host: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            store: StoreConfig::default(),
            payments: PaymentsConfig::default(),
            storage: None,
            rate_limit_enabled: false,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.0,
        }
    }
}

impl StoreConfig {
    /// Load the store settings alone, for tools that do not serve HTTP.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEnvVar` for an unknown currency or a tax rate outside `[0, 1)`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let currency = get_env_or_default("STORE_CURRENCY", "USD")
            .parse::<CurrencyCode>()
            .map_err(|e| ConfigError::InvalidEnvVar("STORE_CURRENCY".to_string(), e))?;
        let tax_rate: Decimal = parse_env("TAX_RATE", "0")?;
        if tax_rate.is_sign_negative() || tax_rate >= Decimal::ONE {
            return Err(ConfigError::InvalidEnvVar(
                "TAX_RATE".to_string(),
                "must be in [0, 1)".to_string(),
            ));
        }
        let free_shipping_threshold = parse_env("FREE_SHIPPING_THRESHOLD", "75.00")?;

        Ok(Self {
            currency,
            tax_rate,
            free_shipping_threshold,
        })
    }
}

impl PaymentsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let default_provider = get_optional_env("PAYMENT_DEFAULT_PROVIDER")
            .map(|value| {
                value.parse::<ProviderKind>().map_err(|e| {
                    ConfigError::InvalidEnvVar("PAYMENT_DEFAULT_PROVIDER".to_string(), e.to_string())
                })
            })
            .transpose()?;

        let square = match get_optional_env("SQUARE_ACCESS_TOKEN") {
            Some(token) => Some(SquareConfig {
                access_token: SecretString::from(token),
                location_id: get_required_env("SQUARE_LOCATION_ID")?,
                application_id: get_optional_env("SQUARE_APPLICATION_ID"),
                environment: get_env_or_default("SQUARE_ENVIRONMENT", "sandbox")
                    .parse()
                    .map_err(|e| {
                        ConfigError::InvalidEnvVar("SQUARE_ENVIRONMENT".to_string(), e)
                    })?,
                webhook_signature_key: get_optional_validated_secret(
                    "SQUARE_WEBHOOK_SIGNATURE_KEY",
                )?,
                webhook_url: get_optional_env("SQUARE_WEBHOOK_URL"),
                base_url_override: get_optional_env("SQUARE_API_BASE_URL"),
            }),
            None => None,
        };

        let stripe = match get_optional_env("STRIPE_SECRET_KEY") {
            Some(key) => Some(StripeConfig {
                secret_key: SecretString::from(key),
                publishable_key: get_optional_env("STRIPE_PUBLISHABLE_KEY"),
                webhook_secret: get_optional_validated_secret("STRIPE_WEBHOOK_SECRET")?,
                base_url_override: get_optional_env("STRIPE_API_BASE_URL"),
            }),
            None => None,
        };

        Ok(Self {
            default_provider,
            square,
            stripe,
        })
    }

    /// The provider to use when a request does not name one.
    ///
    /// Falls back to the first configured provider (Square before Stripe).
    #[must_use]
    pub fn effective_default(&self) -> Option<ProviderKind> {
        self.default_provider.or_else(|| {
            if self.square.is_some() {
                Some(ProviderKind::Square)
            } else if self.stripe.is_some() {
                Some(ProviderKind::Stripe)
            } else {
                None
            }
        })
    }
}

impl StorageConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(url) = get_optional_env("STORAGE_URL") else {
            return Ok(None);
        };
        url::Url::parse(&url)
            .map_err(|e| ConfigError::InvalidEnvVar("STORAGE_URL".to_string(), e.to_string()))?;

        Ok(Some(Self {
            url: url.trim_end_matches('/').to_string(),
            service_key: get_required_secret("STORAGE_SERVICE_KEY")?,
            bucket: get_env_or_default("STORAGE_BUCKET", "product-images"),
        }))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// The storefront database URL: `STOREFRONT_DATABASE_URL`, then `DATABASE_URL`.
///
/// # Errors
///
/// Returns `MissingEnvVar` if neither is set.
pub fn database_url_from_env() -> Result<SecretString, ConfigError> {
    let _ = dotenvy::dotenv();
    get_database_url("STOREFRONT_DATABASE_URL")
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

/// Parse an environment variable (or its default) with `FromStr`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse a boolean flag (`true/false/1/0/yes/no`).
fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match get_optional_env(key) {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("expected a boolean, got {other:?}"),
            )),
        },
    }
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
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the value issued by the provider."
            ),
        ));
    }

    Ok(())
}

/// Load and validate an optional secret from environment.
fn get_optional_validated_secret(key: &str) -> Result<Option<SecretString>, ConfigError> {
    match get_optional_env(key) {
        Some(value) => {
            validate_secret_strength(&value, key)?;
            Ok(Some(SecretString::from(value)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base_config() -> StorefrontConfig {
        StorefrontConfig {
            database_url: SecretString::from("postgres://localhost/test"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            store: StoreConfig::default(),
            payments: PaymentsConfig::default(),
            storage: None,
            rate_limit_enabled: false,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.1,
        }
    }

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("whsec_your-secret-here", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("whsec_aB3xY9mK2nL5pQ7rT0uW4zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_socket_addr() {
        let addr = base_config().socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_effective_default_provider() {
        let mut payments = PaymentsConfig::default();
        assert_eq!(payments.effective_default(), None);

        payments.stripe = Some(StripeConfig {
            secret_key: SecretString::from("sk_test_123"),
            publishable_key: None,
            webhook_secret: None,
            base_url_override: None,
        });
        assert_eq!(payments.effective_default(), Some(ProviderKind::Stripe));

        payments.default_provider = Some(ProviderKind::Square);
        assert_eq!(payments.effective_default(), Some(ProviderKind::Square));
    }

    #[test]
    fn test_square_environment_parse() {
        assert_eq!(
            "Production".parse::<SquareEnvironment>().unwrap(),
            SquareEnvironment::Production
        );
        assert!("staging".parse::<SquareEnvironment>().is_err());
    }

    #[test]
    fn test_provider_configs_debug_redacts_secrets() {
        let square = SquareConfig {
            access_token: SecretString::from("EAAAl_super_secret_token"),
            location_id: "L8XYZ".to_string(),
            application_id: Some("sandbox-sq0idb-app".to_string()),
            environment: SquareEnvironment::Sandbox,
            webhook_signature_key: Some(SecretString::from("sig_key_value")),
            webhook_url: None,
            base_url_override: None,
        };
        let stripe = StripeConfig {
            secret_key: SecretString::from("sk_test_super_secret"),
            publishable_key: Some("pk_test_visible".to_string()),
            webhook_secret: None,
            base_url_override: None,
        };

        let square_debug = format!("{square:?}");
        assert!(square_debug.contains("L8XYZ"));
        assert!(!square_debug.contains("EAAAl_super_secret_token"));
        assert!(!square_debug.contains("sig_key_value"));

        let stripe_debug = format!("{stripe:?}");
        assert!(stripe_debug.contains("pk_test_visible"));
        assert!(!stripe_debug.contains("sk_test_super_secret"));
    }
}
