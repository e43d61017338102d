//! `qmand`: serves the per-slave remote quota HTTP API (§6 external interfaces).

mod auth;
mod handlers;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use common::config::EngineConfig;
use docker_inspector::{DockerInspector, Inspector};
use quota_engine::QuotaAggregator;
use std::process::ExitCode;
use std::sync::Arc;

use state::AppState;

/// Serves the Docker disk-quota remote API for this slave host.
#[derive(Parser, Debug)]
#[command(name = "qmand")]
#[command(about = "Serves the per-slave remote quota API")]
struct Args {
    /// Overrides QMAND_BIND_ADDR.
    #[arg(long)]
    bind: Option<String>,

    /// Overrides DOCKER_QUOTA_DB_PATH.
    #[arg(long)]
    db_path: Option<String>,

    /// Emit structured JSON logs instead of plain text.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    common::dotenv_init();
    let args = Args::parse();
    common::logging::init(args.json_logs);

    let mut config = EngineConfig::from_env();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    if config.api_shared_secret.is_empty() {
        tracing::error!("QMAN_API_SECRET must be set; refusing to start with no shared secret");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "qmand exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: EngineConfig) -> Result<()> {
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus metrics recorder")?;

    let inspector = Arc::new(DockerInspector::connect().context("connecting to docker daemon")?);
    let store = attribution_store::AttributionStore::connect(&config.db_path)
        .await
        .context("opening attribution store")?;
    let cache = quota_cache::QuotaCache::connect(config.redis_url.as_deref(), config.cache_ttl_secs).await;
    let aggregator = QuotaAggregator::new(inspector.clone(), store.clone());

    let data_root = match &config.docker_data_root {
        Some(root) => root.clone(),
        None => inspector
            .get_docker_data_root()
            .await
            .unwrap_or_else(|_| "/var/lib/docker".to_string()),
    };

    let state = Arc::new(AppState {
        api_shared_secret: config.api_shared_secret.clone(),
        data_root,
        reserved_bytes: config.docker_quota_reserved_bytes.map(|b| b as i64),
        store,
        cache,
        aggregator,
        metrics_handle,
    });

    let app = handlers::router(state);

    let addr: std::net::SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("parsing bind address '{}'", config.bind_addr))?;
    tracing::info!(%addr, "qmand listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
