//! Race control binary for Raceway.
//!
//! Wires the control loop to durable storage and the HTTP server, then
//! runs until `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `raceway-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and `Dragonfly` (if persistence is enabled)
//! 4. Restore the queue and any session in flight
//! 5. Start the control loop
//! 6. Start the persister task
//! 7. Start the HTTP server
//! 8. Wait for `Ctrl-C`, then shut down in reverse order

mod error;
mod persister;
mod restore;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use raceway_core::broadcast::Broadcaster;
use raceway_core::config::{LoggingConfig, VenueConfig};
use raceway_core::control::RaceControl;
use raceway_core::runner::spawn_control_loop;
use raceway_core::sink::{NoOpSink, StateSink};
use raceway_db::{DbError, DragonflyPool, PostgresPool};
use raceway_observer::state::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::persister::{Persister, channel_sink, spawn_persister};
use crate::restore::RestoredState;

/// Config file looked up in the working directory.
const CONFIG_PATH: &str = "raceway-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the HTTP port cannot be
/// bound, or the shutdown signal cannot be installed. Storage or restore
/// failures at startup are logged and the engine runs without
/// persistence.
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        duration_seconds = config.race.duration_seconds,
        tick_interval_ms = config.race.tick_interval_ms,
        broadcast_capacity = config.broadcast.capacity,
        persistence_enabled = config.infrastructure.persistence_enabled,
        "raceway-engine starting"
    );

    // 3. Connect to storage.
    let storage = if config.infrastructure.persistence_enabled {
        match connect_storage(&config).await {
            Ok(pools) => Some(pools),
            Err(e) => {
                warn!(error = %e, "Storage unavailable, running without persistence");
                None
            }
        }
    } else {
        info!("Persistence disabled by configuration");
        None
    };

    // 4. Restore state. Storage stays attached only if restore succeeded.
    let (storage, restored) = match storage {
        Some((postgres, dragonfly)) => {
            let result = restore::load(&postgres, &dragonfly).await;
            restore::keep_storage((postgres, dragonfly), result)
        }
        None => (None, RestoredState::default()),
    };

    // 5. Start the control loop, with the persister's sink when storage is up.
    let restored_session_id = restored.session.as_ref().map(|(s, _)| s.session_id);
    let queue_entries = restored.queue_entries();
    let mut persister = None;
    let sink: Box<dyn StateSink> = match storage {
        Some((postgres, dragonfly)) => {
            let (sink, rx) = channel_sink();
            persister = Some((
                Persister::new(postgres, dragonfly, queue_entries, restored_session_id),
                rx,
            ));
            Box::new(sink)
        }
        None => Box::new(NoOpSink),
    };

    let mut control = RaceControl::new(
        restored.queue,
        config.race.duration_seconds,
        Broadcaster::new(config.broadcast.capacity),
        sink,
    );
    if let Some((session, laps)) = restored.session {
        control.restore_session(session, laps);
    }
    let (handle, control_task) = spawn_control_loop(
        control,
        Duration::from_millis(config.race.tick_interval_ms),
    );

    // 6. Start the persister.
    let persister_task = persister.map(|(persister, rx)| spawn_persister(persister, rx));

    // 7. Start the HTTP server.
    let observer_port = config.infrastructure.observer_port;
    let server = raceway_observer::spawn_observer(
        observer_port,
        Arc::new(AppState::new(handle.clone())),
    )
    .await?;
    info!(port = observer_port, "raceway-engine ready");

    // 8. Run until interrupted.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    server.abort();
    handle.shutdown().await;
    match control_task.await {
        // Dropping the final state drops the sink, which lets the
        // persister drain its channel and stop.
        Ok(control) => drop(control),
        Err(e) => error!(error = %e, "Control loop task failed"),
    }
    if let Some(task) = persister_task
        && let Err(e) = task.await
    {
        error!(error = %e, "Persister task failed");
    }

    info!("raceway-engine shutdown complete");
    Ok(())
}

/// Load `raceway-config.yaml`, or defaults plus environment overrides when
/// the file does not exist.
fn load_config() -> Result<VenueConfig, EngineError> {
    let path = Path::new(CONFIG_PATH);
    if path.exists() {
        return Ok(VenueConfig::from_file(path)?);
    }
    let mut config = VenueConfig::default();
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Connect both stores and bring the schema up to date.
async fn connect_storage(config: &VenueConfig) -> Result<(PostgresPool, DragonflyPool), DbError> {
    let infra = &config.infrastructure;
    let postgres = PostgresPool::connect_url(&infra.postgres_url).await?;
    postgres.run_migrations().await?;
    let dragonfly = DragonflyPool::connect(&infra.dragonfly_url).await?;
    Ok((postgres, dragonfly))
}
