//! Process-wide request counters and the Prometheus scrape endpoint.
//!
//! Counters are additive atomics; there is no lock to hold across an await
//! point. The `/metrics` endpoint renders the Prometheus text exposition
//! format and is guarded by HTTP basic auth configured at startup.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;

/// Lock-free request counters.
#[derive(Debug, Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    auth_failures_total: AtomicU64,
}

impl Metrics {
    /// Count one inbound request.
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one error response.
    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one authentication failure.
    pub fn record_auth_failure(&self) {
        self.auth_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Render the Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "# HELP bucketd_requests_total Total number of requests received.\n\
             # TYPE bucketd_requests_total counter\n\
             bucketd_requests_total {}\n\
             # HELP bucketd_errors_total Total number of error responses.\n\
             # TYPE bucketd_errors_total counter\n\
             bucketd_errors_total {}\n\
             # HELP bucketd_auth_failures_total Total number of failed authentications.\n\
             # TYPE bucketd_auth_failures_total counter\n\
             bucketd_auth_failures_total {}\n",
            self.requests_total.load(Ordering::Relaxed),
            self.errors_total.load(Ordering::Relaxed),
            self.auth_failures_total.load(Ordering::Relaxed),
        )
    }
}

/// Check an `Authorization: Basic …` header against the configured pair.
#[must_use]
pub fn basic_auth_matches(header: Option<&http::HeaderValue>, user: &str, pass: &str) -> bool {
    let Some(value) = header.and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let expected = format!(
        "Basic {}",
        BASE64_STANDARD.encode(format!("{user}:{pass}"))
    );
    value == expected
}
