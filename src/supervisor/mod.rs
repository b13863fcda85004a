mod keepalive;
mod registry;
mod worker;

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::Mutex,
    time,
};
use tracing::{error, info, warn};

use crate::{config::Settings, map, session};
use registry::{WorkerOutput, WorkerRegistry};
use worker::WorkerCommand;

pub type SharedRegistry = Arc<Mutex<WorkerRegistry>>;

const MONITOR_TICK: Duration = Duration::from_secs(1);

/// Runs one `check` worker per account and restarts them when they exit.
pub async fn run(settings: Settings, config_path: PathBuf) -> Result<()> {
    let entries = map::parse_required(&settings.map)?;
    info!(count = entries.len(), "parsed account map");

    session::materialize_from_env(&settings.session);
    if !settings.session.exists() {
        warn!(path = %settings.session.display(), "session file missing, workers will fail until it exists");
    }

    std::fs::create_dir_all(&settings.state_dir)
        .with_context(|| format!("creating {}", settings.state_dir.display()))?;

    let command = WorkerCommand {
        program: std::env::current_exe().context("locating own executable")?,
        config: config_path,
        state_dir: settings.state_dir.clone(),
        session: settings.session.clone(),
        login_user: settings.login_user.clone(),
    };

    let mut registry = WorkerRegistry::new(command);
    for entry in entries {
        registry.insert(entry);
    }
    info!(workers = registry.len(), port = settings.port, "supervising");
    let registry: SharedRegistry = Arc::new(Mutex::new(registry));

    let server = tokio::spawn(keepalive::serve(settings.port, registry.clone()));

    tokio::select! {
        _ = monitor(registry.clone(), settings.restart_delay) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutting down");
        }
    }

    server.abort();
    shutdown(&registry).await;
    Ok(())
}

/// Level-triggered: each tick reaps, schedules due restarts, spawns pending.
async fn monitor(registry: SharedRegistry, restart_delay: Duration) {
    let mut tick = time::interval(MONITOR_TICK);

    loop {
        tick.tick().await;
        let now = Instant::now();

        let outputs = {
            let mut reg = registry.lock().await;
            reg.reap(now);
            reg.schedule_restarts(now, restart_delay);
            reg.start_pending(now)
        };

        for output in outputs {
            spawn_readers(output, registry.clone());
        }
    }
}

fn spawn_readers(output: WorkerOutput, registry: SharedRegistry) {
    let WorkerOutput { account, stdout, stderr } = output;

    if let Some(stdout) = stdout {
        tokio::spawn(forward_lines(account.clone(), stdout, registry.clone()));
    }
    if let Some(stderr) = stderr {
        tokio::spawn(forward_lines(account, stderr, registry));
    }
}

async fn forward_lines<R>(account: String, stream: R, registry: SharedRegistry)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                info!(account = %account, "{line}");
                registry.lock().await.record_output(&account, &line);
            }
            Ok(None) => break,
            Err(e) => {
                error!(account = %account, error = %e, "failed to read worker output");
                break;
            }
        }
    }
}

async fn shutdown(registry: &SharedRegistry) {
    let children = registry.lock().await.take_children();

    join_all(children.into_iter().map(|(account, mut child)| async move {
        if let Err(e) = child.kill().await {
            warn!(account = %account, error = %e, "failed to stop worker");
        }
    }))
    .await;
}
