use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::discord::{DEFAULT_CAPTION_LIMIT, DEFAULT_TIMEOUT};

const DEFAULT_SESSION_FILE: &str = "session-igrelay";
const DEFAULT_STATE_FILE: &str = "last_seen.json";
const DEFAULT_DELAY_SECS: u64 = 4;
const DEFAULT_RESTART_DELAY_SECS: u64 = 20;
const DEFAULT_PORT: u16 = 8080;

/// Optional toml file. Every key can be overridden by flag or env.
#[derive(Serialize, Deserialize, Default, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub map: Option<String>,
    pub session: Option<PathBuf>,
    pub login_user: Option<String>,
    pub state: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub delay_secs: Option<u64>,
    /// 0 disables truncation.
    pub caption_limit: Option<usize>,
    pub webhook_timeout_secs: Option<u64>,
    pub restart_delay_secs: Option<u64>,
    pub port: Option<u16>,
}

impl FileConfig {
    /// A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// Account map: `account | webhook | extra` entries, by line or `;;;`.
    #[clap(long, env = "IG_MAP", value_parser, hide_env_values = true)]
    pub map: Option<String>,

    /// Instagram session file (JSON cookie object).
    #[clap(long, env = "IG_SESSIONFILE", value_parser)]
    pub session: Option<PathBuf>,

    /// Instagram user the session belongs to.
    #[clap(long, env = "IG_LOGIN_USER", value_parser)]
    pub login_user: Option<String>,

    /// Last-seen state file.
    #[clap(long, env = "IG_STATE_FILE", value_parser)]
    pub state: Option<PathBuf>,

    /// Directory for per-worker state files (supervise only).
    #[clap(long, env = "IG_STATE_DIR", value_parser)]
    pub state_dir: Option<PathBuf>,

    /// Seconds to wait before each account.
    #[clap(long, env = "IG_DELAY_SECS", value_parser)]
    pub delay: Option<u64>,

    /// Max caption chars in a notification, 0 for no limit.
    #[clap(long, env = "IG_CAPTION_LIMIT", value_parser)]
    pub caption_limit: Option<usize>,

    /// Seconds before an exited worker is restarted (supervise only).
    #[clap(long, value_parser)]
    pub restart_delay: Option<u64>,

    /// Keepalive port (supervise only).
    #[clap(long, env = "PORT", value_parser)]
    pub port: Option<u16>,
}

#[derive(Clone)]
pub struct Settings {
    pub map: String,
    pub session: PathBuf,
    pub login_user: Option<String>,
    pub state: PathBuf,
    pub state_dir: PathBuf,
    pub delay: Duration,
    pub caption_limit: Option<usize>,
    pub webhook_timeout: Duration,
    pub restart_delay: Duration,
    pub port: u16,
}

impl Settings {
    pub fn resolve(args: SettingsArgs, file: FileConfig) -> Result<Self> {
        let map = args
            .map
            .or(file.map)
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| anyhow!("IG_MAP not set (use --map, IG_MAP or `map` in config)"))?;

        let caption_limit = match args.caption_limit.or(file.caption_limit) {
            Some(0) => None,
            Some(n) => Some(n),
            None => Some(DEFAULT_CAPTION_LIMIT),
        };

        Ok(Self {
            map,
            session: args
                .session
                .or(file.session)
                .unwrap_or_else(|| DEFAULT_SESSION_FILE.into()),
            login_user: args.login_user.or(file.login_user).filter(|u| !u.is_empty()),
            state: args.state.or(file.state).unwrap_or_else(|| DEFAULT_STATE_FILE.into()),
            state_dir: args.state_dir.or(file.state_dir).unwrap_or_else(|| ".".into()),
            delay: Duration::from_secs(args.delay.or(file.delay_secs).unwrap_or(DEFAULT_DELAY_SECS)),
            caption_limit,
            webhook_timeout: file
                .webhook_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            restart_delay: Duration::from_secs(
                args.restart_delay
                    .or(file.restart_delay_secs)
                    .unwrap_or(DEFAULT_RESTART_DELAY_SECS),
            ),
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
        })
    }

    pub fn redacted(&self) -> Redacted<'_> {
        Redacted(self)
    }
}

/// Debug view without webhook URLs (they carry tokens).
pub struct Redacted<'a>(&'a Settings);

impl std::fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0;
        f.debug_struct("Settings")
            .field("map_bytes", &s.map.len())
            .field("session", &s.session)
            .field("login_user", &s.login_user)
            .field("state", &s.state)
            .field("state_dir", &s.state_dir)
            .field("delay_secs", &s.delay.as_secs())
            .field("caption_limit", &s.caption_limit)
            .field("webhook_timeout_secs", &s.webhook_timeout.as_secs())
            .field("restart_delay_secs", &s.restart_delay.as_secs())
            .field("port", &s.port)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with_map() -> SettingsArgs {
        SettingsArgs {
            map: Some("a|https://hook/secret".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let s = Settings::resolve(args_with_map(), FileConfig::default()).unwrap();
        assert_eq!(s.session, PathBuf::from("session-igrelay"));
        assert_eq!(s.state, PathBuf::from("last_seen.json"));
        assert_eq!(s.delay, Duration::from_secs(4));
        assert_eq!(s.caption_limit, Some(1000));
        assert_eq!(s.webhook_timeout, Duration::from_secs(15));
        assert_eq!(s.restart_delay, Duration::from_secs(20));
        assert_eq!(s.port, 8080);
        assert!(s.login_user.is_none());
    }

    #[test]
    fn test_args_override_file() {
        let file: FileConfig = toml::from_str(
            r#"
            map = "b|w"
            delay_secs = 9
            caption_limit = 0
            port = 9000
            webhook_timeout_secs = 3
            "#,
        )
        .unwrap();
        let args = SettingsArgs {
            delay: Some(1),
            ..args_with_map()
        };

        let s = Settings::resolve(args, file).unwrap();
        assert_eq!(s.map, "a|https://hook/secret");
        assert_eq!(s.delay, Duration::from_secs(1));
        assert_eq!(s.caption_limit, None);
        assert_eq!(s.port, 9000);
        assert_eq!(s.webhook_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_missing_map() {
        assert!(Settings::resolve(SettingsArgs::default(), FileConfig::default()).is_err());
        let blank = SettingsArgs {
            map: Some("   ".into()),
            ..Default::default()
        };
        assert!(Settings::resolve(blank, FileConfig::default()).is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<FileConfig>("mapp = \"x\"").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = FileConfig::load(&dir.path().join("igrelay.toml")).unwrap();
        assert!(cfg.map.is_none());
    }

    #[test]
    fn test_redacted_hides_webhooks() {
        let s = Settings::resolve(args_with_map(), FileConfig::default()).unwrap();
        assert!(!format!("{:?}", s.redacted()).contains("secret"));
    }
}
