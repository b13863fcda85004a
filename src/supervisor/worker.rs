use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use crate::map::AccountEntry;

/// Lifecycle of one supervised worker.
///
/// `Starting -> Running -> Exited -> Starting`, the last step only once the
/// restart delay has passed. A failed spawn goes straight to `Exited`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running { pid: Option<u32>, since: Instant },
    Exited { code: Option<i32>, at: Instant },
}

impl WorkerState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Running { .. } => "running",
            WorkerState::Exited { .. } => "exited",
        }
    }

    pub fn due_for_restart(&self, now: Instant, delay: Duration) -> bool {
        match self {
            WorkerState::Exited { at, .. } => now.saturating_duration_since(*at) >= delay,
            _ => false,
        }
    }

    /// Returns false (and stays put) unless currently `Starting`.
    pub fn spawned(&mut self, pid: Option<u32>, now: Instant) -> bool {
        if *self != WorkerState::Starting {
            return false;
        }
        *self = WorkerState::Running { pid, since: now };
        true
    }

    pub fn spawn_failed(&mut self, now: Instant) -> bool {
        if *self != WorkerState::Starting {
            return false;
        }
        *self = WorkerState::Exited { code: None, at: now };
        true
    }

    pub fn exited(&mut self, code: Option<i32>, now: Instant) -> bool {
        if !matches!(self, WorkerState::Running { .. }) {
            return false;
        }
        *self = WorkerState::Exited { code, at: now };
        true
    }

    /// `Exited -> Starting` once `delay` has elapsed.
    pub fn restart(&mut self, now: Instant, delay: Duration) -> bool {
        if !self.due_for_restart(now, delay) {
            return false;
        }
        *self = WorkerState::Starting;
        true
    }

    pub fn entered_at(&self) -> Option<Instant> {
        match self {
            WorkerState::Starting => None,
            WorkerState::Running { since, .. } => Some(*since),
            WorkerState::Exited { at, .. } => Some(*at),
        }
    }
}

/// How a `check` worker for one account is launched.
#[derive(Clone, Debug)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub config: PathBuf,
    pub state_dir: PathBuf,
    pub session: PathBuf,
    pub login_user: Option<String>,
}

impl WorkerCommand {
    /// One state file per worker, so parallel workers never overwrite each other.
    pub fn state_file(&self, account: &str) -> PathBuf {
        let safe: String = account
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
            .collect();
        self.state_dir.join(format!("last_seen-{safe}.json"))
    }

    pub fn args(&self, entry: &AccountEntry, session_exists: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--config".into(),
            self.config.clone().into(),
            "check".into(),
            "--map".into(),
            format!("{}|{}", entry.account, entry.webhook).into(),
            "--state".into(),
            self.state_file(&entry.account).into(),
        ];

        if let Some(user) = &self.login_user {
            args.push("--login-user".into());
            args.push(user.into());
        }

        args.extend(entry.extra.split_whitespace().map(OsString::from));

        if session_exists {
            args.push("--session".into());
            args.push(self.session.clone().into());
        }

        args
    }

    pub fn session_path(&self) -> &Path {
        &self.session
    }
}
