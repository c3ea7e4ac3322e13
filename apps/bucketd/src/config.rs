//! Environment-driven configuration.
//!
//! Every knob has a default suitable for a single-host deployment behind a
//! TLS-terminating proxy; only the credential pairs are mandatory.

use std::net::IpAddr;

use bucketd_auth::{Credential, Privilege};

/// 5 GiB: the default per-object and per-part size cap.
const DEFAULT_MAX_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Server configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address (`BUCKETD_LISTEN`).
    pub listen: String,
    /// The single served bucket (`BUCKETD_BUCKET`).
    pub bucket: String,
    /// Object store root (`BUCKETD_DATA_DIR`).
    pub data_dir: String,
    /// Multipart staging root (`BUCKETD_MULTIPART_DIR`); defaults to
    /// `<data_dir>/multipart`.
    pub multipart_dir: Option<String>,
    /// Read-only credential pair (`BUCKETD_RO_ACCESS_KEY` / `_SECRET_KEY`).
    pub ro_access_key: Option<String>,
    /// Read-only secret.
    pub ro_secret_key: Option<String>,
    /// Read-write credential pair (`BUCKETD_RW_ACCESS_KEY` / `_SECRET_KEY`).
    pub rw_access_key: Option<String>,
    /// Read-write secret.
    pub rw_secret_key: Option<String>,
    /// Per-object byte cap (`BUCKETD_MAX_OBJECT_SIZE`).
    pub max_object_size: u64,
    /// Per-part byte cap (`BUCKETD_MAX_PART_SIZE`).
    pub max_part_size: u64,
    /// Reclamation sweep period in seconds (`BUCKETD_CLEANUP_INTERVAL_SECS`).
    pub cleanup_interval_secs: u64,
    /// Upload abandonment cutoff in seconds (`BUCKETD_CLEANUP_MAX_AGE_SECS`).
    pub cleanup_max_age_secs: u64,
    /// Basic-auth user for `/metrics` (`BUCKETD_METRICS_USER`).
    pub metrics_user: Option<String>,
    /// Basic-auth password for `/metrics` (`BUCKETD_METRICS_PASS`).
    pub metrics_pass: Option<String>,
    /// Proxies trusted for `X-Forwarded-For` (`BUCKETD_TRUSTED_PROXIES`,
    /// comma-separated).
    pub trusted_proxies: Vec<IpAddr>,
    /// HTTP/1 header read timeout (`BUCKETD_HEADER_TIMEOUT_SECS`).
    pub header_timeout_secs: u64,
    /// Whole-request ceiling (`BUCKETD_REQUEST_TIMEOUT_SECS`).
    pub request_timeout_secs: u64,
    /// Tracing filter (`LOG_LEVEL`, overridden by `RUST_LOG`).
    pub log_level: String,
    /// `text` or `json` (`LOG_FORMAT`).
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5553".to_owned(),
            bucket: "default".to_owned(),
            data_dir: "./data".to_owned(),
            multipart_dir: None,
            ro_access_key: None,
            ro_secret_key: None,
            rw_access_key: None,
            rw_secret_key: None,
            max_object_size: DEFAULT_MAX_SIZE,
            max_part_size: DEFAULT_MAX_SIZE,
            cleanup_interval_secs: 3600,
            cleanup_max_age_secs: 86400,
            metrics_user: None,
            metrics_pass: None,
            trusted_proxies: Vec::new(),
            header_timeout_secs: 10,
            request_timeout_secs: 1800,
            log_level: "info".to_owned(),
            log_format: "text".to_owned(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("BUCKETD_LISTEN") {
            config.listen = v;
        }
        if let Ok(v) = std::env::var("BUCKETD_BUCKET") {
            config.bucket = v;
        }
        if let Ok(v) = std::env::var("BUCKETD_DATA_DIR") {
            config.data_dir = v;
        }
        if let Ok(v) = std::env::var("BUCKETD_MULTIPART_DIR") {
            config.multipart_dir = Some(v);
        }
        config.ro_access_key = std::env::var("BUCKETD_RO_ACCESS_KEY").ok();
        config.ro_secret_key = std::env::var("BUCKETD_RO_SECRET_KEY").ok();
        config.rw_access_key = std::env::var("BUCKETD_RW_ACCESS_KEY").ok();
        config.rw_secret_key = std::env::var("BUCKETD_RW_SECRET_KEY").ok();
        if let Some(v) = env_u64("BUCKETD_MAX_OBJECT_SIZE") {
            config.max_object_size = v;
        }
        if let Some(v) = env_u64("BUCKETD_MAX_PART_SIZE") {
            config.max_part_size = v;
        }
        if let Some(v) = env_u64("BUCKETD_CLEANUP_INTERVAL_SECS") {
            config.cleanup_interval_secs = v;
        }
        if let Some(v) = env_u64("BUCKETD_CLEANUP_MAX_AGE_SECS") {
            config.cleanup_max_age_secs = v;
        }
        config.metrics_user = std::env::var("BUCKETD_METRICS_USER").ok();
        config.metrics_pass = std::env::var("BUCKETD_METRICS_PASS").ok();
        if let Ok(v) = std::env::var("BUCKETD_TRUSTED_PROXIES") {
            config.trusted_proxies = v
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
        }
        if let Some(v) = env_u64("BUCKETD_HEADER_TIMEOUT_SECS") {
            config.header_timeout_secs = v;
        }
        if let Some(v) = env_u64("BUCKETD_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("LOG_FORMAT") {
            config.log_format = v;
        }

        config
    }

    /// The effective multipart staging root.
    #[must_use]
    pub fn multipart_dir(&self) -> String {
        self.multipart_dir
            .clone()
            .unwrap_or_else(|| format!("{}/multipart", self.data_dir))
    }

    /// Assemble the configured credentials.
    ///
    /// # Errors
    ///
    /// Fails when no complete credential pair is configured; the server is
    /// useless without at least one.
    pub fn credentials(&self) -> anyhow::Result<Vec<Credential>> {
        let mut credentials = Vec::new();

        if let (Some(key), Some(secret)) = (&self.ro_access_key, &self.ro_secret_key) {
            credentials.push(Credential::new(key, secret, Privilege::Read));
        }
        if let (Some(key), Some(secret)) = (&self.rw_access_key, &self.rw_secret_key) {
            credentials.push(Credential::new(key, secret, Privilege::ReadWrite));
        }

        if credentials.is_empty() {
            anyhow::bail!(
                "no credentials configured; set BUCKETD_RW_ACCESS_KEY/BUCKETD_RW_SECRET_KEY \
                 and/or BUCKETD_RO_ACCESS_KEY/BUCKETD_RO_SECRET_KEY"
            );
        }
        Ok(credentials)
    }

    /// The `/metrics` basic-auth pair, when both halves are configured.
    #[must_use]
    pub fn metrics_auth(&self) -> Option<(String, String)> {
        match (&self.metrics_user, &self.metrics_pass) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}
