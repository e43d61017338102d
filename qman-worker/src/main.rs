//! `qman-worker`: runs the periodic attribution-sync and enforcement passes.

use anyhow::{Context, Result};
use attribution_sync::AttributionSynchroniser;
use audit_reader::AusearchReader;
use clap::Parser;
use common::config::EngineConfig;
use docker_inspector::DockerInspector;
use quota_engine::QuotaEnforcer;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Runs the slave's background sync and enforcement scheduler.
#[derive(Parser, Debug)]
#[command(name = "qman-worker")]
#[command(about = "Runs the periodic Docker attribution-sync and quota-enforcement passes")]
struct Args {
    /// Run one sync pass and one enforcement pass, then exit, instead of looping forever.
    #[arg(long)]
    once: bool,

    /// Emit structured JSON logs instead of plain text.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    common::dotenv_init();
    let args = Args::parse();
    common::logging::init(args.json_logs);

    let config = EngineConfig::from_env();
    if !config.use_docker_quota {
        info!("USE_DOCKER_QUOTA is disabled; qman-worker has nothing to do");
        return ExitCode::SUCCESS;
    }

    match run(config, args.once).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "qman-worker exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: EngineConfig, once: bool) -> Result<()> {
    let inspector = Arc::new(DockerInspector::connect().context("connecting to docker daemon")?);
    let audit: Arc<dyn audit_reader::AuditReader> =
        Arc::new(AusearchReader::new(common::constants::AUDIT_SUBPROCESS_TIMEOUT_SECS));
    let store = attribution_store::AttributionStore::connect(&config.db_path)
        .await
        .context("opening attribution store")?;
    let cache = quota_cache::QuotaCache::connect(config.redis_url.as_deref(), config.cache_ttl_secs).await;

    let synchroniser = AttributionSynchroniser::new(inspector.clone(), audit, store.clone(), cache);
    let enforcer = QuotaEnforcer::new(
        inspector,
        store,
        config.enforcement_order,
        config.slave_host_id.clone(),
        config.master_event_callback_url.clone(),
        config.master_event_callback_secret.clone(),
    );

    if once {
        run_sync_pass(&synchroniser).await;
        run_enforcement_pass(&enforcer).await;
        return Ok(());
    }

    let sync_interval = Duration::from_secs(config.sync_interval_secs.max(1));
    let enforce_interval = Duration::from_secs(config.enforce_interval_secs.max(1));

    let sync_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_sync_pass(&synchroniser).await;
        }
    });

    let enforce_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(enforce_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_enforcement_pass(&enforcer).await;
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal, stopping qman-worker");
        }
        res = sync_task => {
            if let Err(e) = res {
                error!(error = %e, "sync scheduler task panicked");
            }
        }
        res = enforce_task => {
            if let Err(e) = res {
                error!(error = %e, "enforcement scheduler task panicked");
            }
        }
    }

    Ok(())
}

async fn run_sync_pass(synchroniser: &AttributionSynchroniser) {
    let summary = synchroniser.run().await;
    if summary.phase_failures > 0 {
        warn!(phase_failures = summary.phase_failures, "attribution sync pass had phase failures");
    }
    info!(
        containers_from_audit = summary.containers_attributed_from_audit,
        containers_skipped_no_created_ts = summary.containers_skipped_no_created_ts,
        containers_skipped_no_audit_match = summary.containers_skipped_no_audit_match,
        containers_from_events = summary.containers_attributed_from_events,
        images_from_events = summary.images_attributed_from_events,
        images_backfilled = summary.images_backfilled_with_layers,
        "attribution sync pass complete"
    );
}

async fn run_enforcement_pass(enforcer: &QuotaEnforcer) {
    match enforcer.enforce().await {
        Ok(summary) => info!(enforced = summary.enforced, events = summary.events, "enforcement pass complete"),
        Err(e) => warn!(error = %e, "enforcement pass failed"),
    }
}
