//! Process-level wiring: loads auxiliary files, spawns the actor, the scheduler
//! and the control server, and tears everything down on shutdown.

use super::{Daemon, DaemonHandle};
use crate::config::DaemonConfig;
use crate::core::{ControlActions, FrequencyTable, ScheduleEntry};
use crate::error::AppResult;
use crate::frequencies::load_frequencies;
use crate::network::spawn_control_server;
use crate::scheduler::{load_schedule_file, Clock, Scheduler, SystemClock};
use crate::serial::{NativeSerialConnector, SerialConnector, SerialLink};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Upper bound on each join during shutdown.
pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Frequency table named by `output.frqfile`; empty when unset or unreadable.
pub fn load_frequency_table(config: &DaemonConfig) -> FrequencyTable {
    let Some(path) = &config.output.frqfile else {
        return FrequencyTable::default();
    };
    match load_frequencies(path) {
        Ok(table) => {
            if !table.is_empty() {
                info!(path = %path.display(), channels = table.len(), "Loaded channel frequencies");
            }
            table
        }
        Err(e) => {
            warn!(path = %path.display(), "Failed to read frequency file: {}", e);
            FrequencyTable::default()
        }
    }
}

/// Schedule named by `scheduler.schedule_file`; empty when unset or unreadable.
pub fn load_schedule(config: &DaemonConfig) -> Vec<ScheduleEntry> {
    let Some(path) = &config.scheduler.schedule_file else {
        return Vec::new();
    };
    load_schedule_file(path).unwrap_or_else(|e| {
        warn!(path = %path.display(), "Failed to read schedule file: {}", e);
        Vec::new()
    })
}

/// Runs the daemon against the native serial port and the system clock until
/// `shutdown` is cancelled.
pub async fn serve(config: DaemonConfig, shutdown: CancellationToken) -> AppResult<()> {
    serve_with(
        config,
        Arc::new(NativeSerialConnector),
        Arc::new(SystemClock),
        shutdown,
    )
    .await
}

/// [`serve`] with an explicit transport and clock.
pub async fn serve_with(
    config: DaemonConfig,
    connector: Arc<dyn SerialConnector>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
) -> AppResult<()> {
    info!(
        name = %config.application.name,
        port = %config.receiver.port,
        net_port = config.control.net_port,
        "Starting daemon"
    );

    let table = load_frequency_table(&config);
    let schedule = load_schedule(&config);
    let link = Arc::new(SerialLink::new(connector));

    let (daemon, handle, command_rx) =
        Daemon::with_handle(config.clone(), table, link, shutdown.clone());
    let actor = tokio::spawn(daemon.run(command_rx));
    let actions: Arc<dyn ControlActions> = Arc::new(handle.clone());

    let scheduler = Scheduler::new(
        schedule,
        Duration::from_secs(config.scheduler.check_interval_secs.max(1)),
    )
    .with_clock(clock);
    let scheduler_task = tokio::spawn(scheduler.run(actions.clone(), shutdown.clone()));

    let server_task = match spawn_control_server(
        &config.control,
        &config.application.name,
        actions,
        shutdown.clone(),
    )
    .await
    {
        Ok(task) => task,
        Err(e) => {
            error!("Control server failed to start: {}", e);
            None
        }
    };

    if config.scheduler.autostart {
        match handle.start_recording().await {
            Ok(true) => {}
            Ok(false) => warn!("Autostart failed; waiting for commands"),
            Err(e) => error!("Autostart: {}", e),
        }
    }

    shutdown.cancelled().await;
    info!("Shutting down");

    shutdown_daemon(&handle).await;
    let mut tasks = vec![("daemon actor", actor), ("scheduler", scheduler_task)];
    tasks.extend(server_task.map(|task| ("control server", task)));
    join_all(tasks.into_iter().map(|(name, task)| join_bounded(name, task))).await;
    info!("Daemon stopped");
    Ok(())
}

async fn shutdown_daemon(handle: &DaemonHandle) {
    match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Daemon shutdown: {}", e),
        Err(_) => warn!("Daemon did not acknowledge shutdown in time"),
    }
}

async fn join_bounded(name: &str, task: JoinHandle<()>) {
    let abort = task.abort_handle();
    match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(task = name, "Task failed: {}", e),
        Err(_) => {
            warn!(task = name, "Task did not stop in time, aborting");
            abort.abort();
        }
    }
}
