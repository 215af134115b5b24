//! Service configuration.

use tresbill_core::VatConfig;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// `SQLite` database URL (default: "sqlite://tresbill.db").
    pub database_url: String,

    /// Secret for signing session JWTs.
    pub jwt_secret: String,

    /// Session token lifetime in hours.
    pub jwt_ttl_hours: i64,

    /// VAT configuration for receipt totals.
    pub vat: VatConfig,

    /// Billing currency code (default: "THB").
    pub currency: String,

    /// Payment provider name (default: "dummy").
    pub payment_provider: String,

    /// Webhook signing secret for the payment provider.
    pub webhook_secret: Option<String>,

    /// HMAC secret for the audit chain and export signatures.
    pub audit_secret: Option<String>,

    /// Key id recorded next to audit signatures.
    pub audit_key_id: String,

    /// Login failures within the window before lockout.
    pub throttle_max_fails: i64,

    /// Rolling failure window in seconds.
    pub throttle_window_sec: i64,

    /// Lockout duration in seconds.
    pub throttle_lock_sec: i64,

    /// Days until an issued receipt is considered due (for aging).
    pub ar_due_days: i64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Bootstrap admin username, created at startup if missing.
    pub bootstrap_admin_username: Option<String>,

    /// Bootstrap admin password.
    pub bootstrap_admin_password: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let vat = VatConfig {
            enabled: env_parse("VAT_ENABLED", true),
            label: std::env::var("VAT_LABEL").unwrap_or_else(|_| "VAT 7%".into()),
            rate_percent: env_parse("VAT_RATE_PCT", 7.0),
            inclusive: env_parse("VAT_INCLUSIVE", true),
        };

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://tresbill.db".into()),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| "dev-jwt-secret".into()),
            jwt_ttl_hours: env_parse("JWT_TTL_HOURS", 12),
            vat,
            currency: std::env::var("CURRENCY").unwrap_or_else(|_| "THB".into()),
            payment_provider: std::env::var("PAYMENT_PROVIDER").unwrap_or_else(|_| "dummy".into()),
            webhook_secret: std::env::var("PAYMENT_WEBHOOK_SECRET").ok(),
            audit_secret: std::env::var("AUDIT_HMAC_SECRET").ok(),
            audit_key_id: std::env::var("AUDIT_KEY_ID").unwrap_or_else(|_| "k1".into()),
            throttle_max_fails: env_parse("LOGIN_MAX_FAILS", 5),
            throttle_window_sec: env_parse("LOGIN_WINDOW_SEC", 300),
            throttle_lock_sec: env_parse("LOGIN_LOCK_SEC", 900),
            ar_due_days: env_parse("AR_DUE_DAYS", 30),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", 1024 * 1024),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS", 30),
            bootstrap_admin_username: std::env::var("BOOTSTRAP_ADMIN_USERNAME").ok(),
            bootstrap_admin_password: std::env::var("BOOTSTRAP_ADMIN_PASSWORD").ok(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: "sqlite://tresbill.db".into(),
            jwt_secret: "dev-jwt-secret".into(),
            jwt_ttl_hours: 12,
            vat: VatConfig::default(),
            currency: "THB".into(),
            payment_provider: "dummy".into(),
            webhook_secret: None,
            audit_secret: None,
            audit_key_id: "k1".into(),
            throttle_max_fails: 5,
            throttle_window_sec: 300,
            throttle_lock_sec: 900,
            ar_due_days: 30,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            bootstrap_admin_username: None,
            bootstrap_admin_password: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
