//! bucketd - single-bucket S3-compatible object storage daemon.
//!
//! Serves a subset of the S3 HTTP/XML protocol over plain TCP (TLS belongs
//! to a fronting proxy), authenticated with AWS Signature Version 4.
//! Objects live on a single local disk; a background task reclaims
//! abandoned multipart uploads.
//!
//! # Usage
//!
//! ```text
//! BUCKETD_BUCKET=assets \
//! BUCKETD_RW_ACCESS_KEY=AKID... BUCKETD_RW_SECRET_KEY=... \
//! BUCKETD_DATA_DIR=/srv/bucketd bucketd
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUCKETD_LISTEN` | `0.0.0.0:5553` | Bind address |
//! | `BUCKETD_BUCKET` | `default` | Served bucket name |
//! | `BUCKETD_DATA_DIR` | `./data` | Object store root |
//! | `BUCKETD_MULTIPART_DIR` | `<data>/multipart` | Multipart staging root |
//! | `BUCKETD_RO_ACCESS_KEY` / `BUCKETD_RO_SECRET_KEY` | *(unset)* | Read-only credential |
//! | `BUCKETD_RW_ACCESS_KEY` / `BUCKETD_RW_SECRET_KEY` | *(unset)* | Read-write credential |
//! | `BUCKETD_MAX_OBJECT_SIZE` / `BUCKETD_MAX_PART_SIZE` | 5 GiB | Upload size caps |
//! | `BUCKETD_CLEANUP_INTERVAL_SECS` | `3600` | Reclamation sweep period |
//! | `BUCKETD_CLEANUP_MAX_AGE_SECS` | `86400` | Upload abandonment cutoff |
//! | `BUCKETD_METRICS_USER` / `BUCKETD_METRICS_PASS` | *(unset)* | `/metrics` basic auth |
//! | `BUCKETD_TRUSTED_PROXIES` | *(empty)* | Proxies trusted for `X-Forwarded-For` |
//! | `LOG_LEVEL` / `LOG_FORMAT` | `info` / `text` | Tracing configuration |
//!
//! Exits 0 on clean shutdown, non-zero on configuration or bind failure.

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bucketd_auth::StaticCredentialProvider;
use bucketd_http::{S3Service, ServiceConfig};
use bucketd_store::Store;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Server version, reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over the configured `LOG_LEVEL`; `LOG_FORMAT=json`
/// switches to the JSON formatter.
fn init_tracing(config: &Config) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level filter: {}", config.log_level))?
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.log_format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

/// Build the HTTP service from configuration.
fn build_service(store: Store, config: &Config) -> Result<S3Service> {
    let credentials = Arc::new(StaticCredentialProvider::new(config.credentials()?));

    Ok(S3Service::new(
        store,
        credentials,
        ServiceConfig {
            bucket: config.bucket.clone(),
            max_object_size: config.max_object_size,
            max_part_size: config.max_part_size,
            auth_failure_delay: Duration::from_millis(100),
            metrics_auth: config.metrics_auth(),
            trusted_proxies: config.trusted_proxies.clone(),
        },
    ))
}

/// Spawn the periodic reclamation of abandoned multipart uploads.
fn spawn_reclamation(store: Store, config: &Config) {
    let period = Duration::from_secs(config.cleanup_interval_secs);
    let max_age = Duration::from_secs(config.cleanup_max_age_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.reclaim_stale_uploads(max_age).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "reclaimed abandoned multipart uploads"),
                Err(e) => warn!(error = %e, "multipart reclamation sweep failed"),
            }
        }
    });
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing the SIGTERM handler should not fail");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

/// Run the accept loop until a shutdown signal, then drain connections.
async fn serve(listener: TcpListener, service: S3Service, config: &Config) -> Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let mut http = HttpConnBuilder::new(TokioExecutor::new());
    http.http1()
        .timer(TokioTimer::new())
        .header_read_timeout(Duration::from_secs(config.header_timeout_secs));

    let request_timeout = Duration::from_secs(config.request_timeout_secs);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let svc = service.for_connection(peer_addr.ip());
                let conn = http.serve_connection(TokioIo::new(stream), svc);
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    match tokio::time::timeout(request_timeout, conn).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(peer_addr = %peer_addr, error = %e, "connection error"),
                        Err(_) => warn!(peer_addr = %peer_addr, "connection exceeded the request timeout"),
                    }
                });
            }

            () = &mut shutdown => {
                info!("received shutdown signal, draining connections");
                break;
            }
        }
    }

    graceful.shutdown().await;
    info!("all connections drained, exiting");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    init_tracing(&config)?;

    info!(
        listen = %config.listen,
        bucket = %config.bucket,
        data_dir = %config.data_dir,
        multipart_dir = %config.multipart_dir(),
        version = VERSION,
        "starting bucketd",
    );

    let store = Store::open(&config.data_dir, config.multipart_dir())
        .await
        .with_context(|| format!("failed to open storage under {}", config.data_dir))?;

    let service = build_service(store.clone(), &config)?;
    spawn_reclamation(store, &config);

    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.listen))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, "listening for connections");

    serve(listener, service, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_should_build_service_with_credentials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("data"), dir.path().join("mp"))
            .await
            .expect("store opens");

        let config = Config {
            rw_access_key: Some("AKID".to_owned()),
            rw_secret_key: Some("secret".to_owned()),
            ..Default::default()
        };
        assert!(build_service(store.clone(), &config).is_ok());

        // No credentials: refuse to start.
        let config = Config::default();
        assert!(build_service(store, &config).is_err());
    }
}
