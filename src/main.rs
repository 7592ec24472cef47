use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::http::HttpServer;
use tollgate::ratelimit::{RateLimitPolicy, RateLimiter};

/// Per-client rate limiting in front of HTTP endpoints.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address from the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TollgateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.http_addr = listen;
    }
    info!(
        http_addr = %config.server.http_addr,
        requests = config.rate_limit.requests,
        duration_minutes = config.rate_limit.duration_minutes,
        protected_prefixes = ?config.rate_limit.protected_prefixes,
        "Configuration loaded"
    );
    if config.rate_limit.trust_forwarded_headers {
        warn!("Client addresses will be taken from X-Forwarded-For / X-Real-IP headers");
    }

    let policy = RateLimitPolicy::from_settings(&config.rate_limit)?;
    let rate_limiter = Arc::new(RateLimiter::new(policy));
    info!("Rate limiter initialized");

    let server = HttpServer::new(config.server.http_addr, rate_limiter, config.rate_limit);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Tollgate stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
