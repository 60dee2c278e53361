use anyhow::{Context, Result};
use presence_core::{AttendanceStore, Clock, CommandVerifier, FaceVerifier, SystemClock};
use presence_store::SqliteStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod initializer;
mod scheduler;
mod staging;
#[cfg(test)]
mod test_support;

use config::{BusKind, Config};
use dbus_interface::PresenceService;
use engine::{CheckInEngine, CheckInSettings};
use initializer::DailyInitializer;
use scheduler::DailyScheduler;

const BUS_NAME: &str = "org.presence.Presence1";
const OBJECT_PATH: &str = "/org/presence/Presence1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenced starting");

    let config = Config::from_env().context("invalid configuration")?;
    let classifier = config.classifier()?;
    tracing::info!(
        db = %config.db_path.display(),
        staging = %config.staging_dir.display(),
        work_start = %classifier.start(),
        grace_end = %classifier.grace_end(),
        init_at = %config.init_at,
        skip_weekends = config.skip_weekends,
        "configuration loaded"
    );

    let store: Arc<dyn AttendanceStore> = Arc::new(
        SqliteStore::open(&config.db_path)
            .await
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );
    let verifier: Arc<dyn FaceVerifier> = Arc::new(
        CommandVerifier::new(&config.verifier_program).with_args(config.verifier_args.clone()),
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let engine = CheckInEngine::new(
        Arc::clone(&store),
        verifier,
        Arc::clone(&clock),
        CheckInSettings {
            classifier,
            staging_dir: config.staging_dir.clone(),
            verify_timeout: config.verify_timeout(),
        },
    );
    let initializer = DailyInitializer::new(Arc::clone(&store), Arc::clone(&clock), config.skip_weekends);

    let scheduler = DailyScheduler::new(initializer.clone(), Arc::clone(&clock), config.init_at)
        .run_on_startup(config.init_on_startup)
        .start();

    let bus = config.bus;
    let service = PresenceService::new(engine, initializer, store, config);
    let builder = match bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the {bus:?} bus"))?;

    tracing::info!(bus = ?bus, name = BUS_NAME, "presenced ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("presenced shutting down");
    scheduler.stop().await;

    Ok(())
}
