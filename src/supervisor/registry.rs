use std::{
    collections::BTreeMap,
    process::Stdio,
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{error, info, warn};

use super::worker::{WorkerCommand, WorkerState};
use crate::{map::AccountEntry, session::ENV_SESSION_B64};

struct Worker {
    entry: AccountEntry,
    state: WorkerState,
    child: Option<Child>,
    restarts: u32,
    last_output: Option<String>,
}

/// Pipes of a freshly spawned worker, for the output reader.
pub struct WorkerOutput {
    pub account: String,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub account: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub secs_in_state: Option<u64>,
    pub restarts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_output: Option<String>,
}

/// The session file is already on disk, so workers must not rewrite it from the env.
fn worker_command(command: &WorkerCommand, entry: &AccountEntry, session_exists: bool) -> Command {
    let mut cmd = Command::new(&command.program);
    cmd.args(command.args(entry, session_exists))
        .env_remove(ENV_SESSION_B64)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Every worker the supervisor owns, keyed by account.
pub struct WorkerRegistry {
    command: WorkerCommand,
    workers: BTreeMap<String, Worker>,
}

impl WorkerRegistry {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            workers: BTreeMap::new(),
        }
    }

    /// Adds a worker in `Starting`; it is spawned on the next [`start_pending`](Self::start_pending).
    pub fn insert(&mut self, entry: AccountEntry) {
        let account = entry.account.clone();
        self.workers.insert(
            account,
            Worker {
                entry,
                state: WorkerState::Starting,
                child: None,
                restarts: 0,
                last_output: None,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn state(&self, account: &str) -> Option<WorkerState> {
        self.workers.get(account).map(|w| w.state)
    }

    /// Moves exited workers whose delay has passed back to `Starting`.
    pub fn schedule_restarts(&mut self, now: Instant, delay: Duration) -> Vec<String> {
        let mut due = vec![];
        for (account, worker) in self.workers.iter_mut() {
            if worker.state.restart(now, delay) {
                worker.restarts += 1;
                due.push(account.clone());
            }
        }
        due
    }

    /// Spawns every worker in `Starting`.
    pub fn start_pending(&mut self, now: Instant) -> Vec<WorkerOutput> {
        let session_exists = self.command.session_path().exists();
        let mut outputs = vec![];

        for (account, worker) in self.workers.iter_mut() {
            if worker.state != WorkerState::Starting {
                continue;
            }

            info!(account = %account, args = %worker.entry.extra, "starting worker");

            let spawned = worker_command(&self.command, &worker.entry, session_exists).spawn();

            match spawned {
                Ok(mut child) => {
                    worker.state.spawned(child.id(), now);
                    outputs.push(WorkerOutput {
                        account: account.clone(),
                        stdout: child.stdout.take(),
                        stderr: child.stderr.take(),
                    });
                    worker.child = Some(child);
                }
                Err(e) => {
                    error!(account = %account, error = %e, "failed to spawn worker");
                    worker.state.spawn_failed(now);
                }
            }
        }

        outputs
    }

    /// Checks running children without blocking; exited ones move to `Exited`.
    pub fn reap(&mut self, now: Instant) {
        for (account, worker) in self.workers.iter_mut() {
            let Some(child) = worker.child.as_mut() else {
                continue;
            };

            match child.try_wait() {
                Ok(None) => {}
                Ok(Some(status)) => {
                    let code = status.code();
                    warn!(account = %account, ?code, "worker exited, restarting after delay");
                    worker.state.exited(code, now);
                    worker.child = None;
                }
                Err(e) => {
                    error!(account = %account, error = %e, "failed to poll worker");
                    worker.state.exited(None, now);
                    worker.child = None;
                }
            }
        }
    }

    pub fn record_output(&mut self, account: &str, line: &str) {
        if let Some(worker) = self.workers.get_mut(account) {
            worker.last_output = Some(line.to_string());
        }
    }

    /// Takes every live child out of the registry, for shutdown.
    pub fn take_children(&mut self) -> Vec<(String, Child)> {
        self.workers
            .iter_mut()
            .filter_map(|(account, w)| w.child.take().map(|c| (account.clone(), c)))
            .collect()
    }

    pub fn snapshot(&self, now: Instant) -> Vec<WorkerStatus> {
        self.workers
            .iter()
            .map(|(account, w)| {
                let (pid, exit_code) = match w.state {
                    WorkerState::Running { pid, .. } => (pid, None),
                    WorkerState::Exited { code, .. } => (None, code),
                    WorkerState::Starting => (None, None),
                };
                WorkerStatus {
                    account: account.clone(),
                    state: w.state.name(),
                    pid,
                    exit_code,
                    secs_in_state: w
                        .state
                        .entered_at()
                        .map(|t| now.saturating_duration_since(t).as_secs()),
                    restarts: w.restarts,
                    last_output: w.last_output.clone(),
                }
            })
            .collect()
    }
}
