//! WeCard API server binary.
//!
//! Serves the platform callbacks and the login/sync endpoints. Run several
//! instances behind a load balancer; they share state through Redis and
//! PostgreSQL only.

use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use wecard_core::cache::{CredentialCache, MemoryCache, RedisCache};
use wecard_core::config::SuiteConfig;
use wecard_core::store::PgStore;

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "wecard_api_server", about = "WeCard API server")]
struct Args {
    /// Port to listen on (0 = ephemeral).
    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/wecard"
    )]
    database_url: String,

    /// Redis URL for the shared credential cache.
    ///
    /// Without it credentials are cached in process, which is only correct
    /// for a single worker.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,wecard_api=debug,wecard_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    info!(port = args.port, max_connections = args.max_connections, "starting wecard_api_server");

    let config = Arc::new(SuiteConfig::from_env());
    let missing = config.missing_fields();
    if !missing.is_empty() {
        warn!(?missing, "suite configuration incomplete; callbacks and install will fail");
    }

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&args.database_url)
        .await?;

    info!("running database migrations");
    wecard_api::migrate(&pool).await?;

    let cache: Arc<dyn CredentialCache> = match args.redis_url.as_deref() {
        Some(url) if !url.is_empty() => {
            info!("using redis credential cache");
            Arc::new(RedisCache::connect(url).await?)
        }
        _ => {
            warn!("REDIS_URL not set, using in-process credential cache");
            Arc::new(MemoryCache::new())
        }
    };
    let store = Arc::new(PgStore::new(pool));

    let state = wecard_api::AppState::new(config, cache, store)?;
    let app = wecard_api::router(state);

    let bind_addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
