use std::{path::PathBuf, process::exit};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    config::{FileConfig, Settings, SettingsArgs},
    discord::WebhookNotifier,
    poll::Poller,
    session::Session,
    sources::instagram::{InstagramClient, FETCH_TIMEOUT},
};

mod config;
mod discord;
mod map;
mod poll;
mod session;
mod sources;
mod state;
mod supervisor;

#[derive(Parser)]
#[clap(version, about)]
struct Args {
    /// Toml configuration. Flags and env vars take precedence.
    #[clap(short, long, value_parser, default_value = "igrelay.toml", global = true)]
    config: PathBuf,

    /// Debug logging (RUST_LOG overrides).
    #[clap(short, long, value_parser, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check every account once and notify about new posts.
    Check {
        #[clap(flatten)]
        settings: SettingsArgs,
    },
    /// Run one restarting `check` worker per account, with a keepalive endpoint.
    Supervise {
        #[clap(flatten)]
        settings: SettingsArgs,
    },
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("igrelay=debug,info")
        } else {
            EnvFilter::new("igrelay=info,warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn check(settings: Settings) -> Result<()> {
    let entries = map::parse_required(&settings.map)?;
    info!(count = entries.len(), "parsed account map");

    session::materialize_from_env(&settings.session);

    let login_user = settings
        .login_user
        .as_deref()
        .ok_or_else(|| anyhow!("IG_LOGIN_USER not set"))?;
    info!(path = %settings.session.display(), "loading session file");
    let session = Session::load(&settings.session).context("session load failed")?;

    let client = InstagramClient::new(session, FETCH_TIMEOUT)?;
    match client.check_session(login_user) {
        Ok(()) => info!(login_user, "session ok"),
        Err(e) => warn!(login_user, error = %e, "session test: could not fetch own profile"),
    }

    let notifier = WebhookNotifier::new(settings.webhook_timeout)?;
    let poller = Poller::new(client, notifier, settings.delay, settings.caption_limit);

    poller.run(&entries, &settings.state)?;
    Ok(())
}

fn supervise(settings: Settings, config_path: PathBuf) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(supervisor::run(settings, config_path))
}

fn run(args: Args) -> Result<()> {
    let file = FileConfig::load(&args.config)?;

    match args.command {
        Command::Check { settings } => {
            let settings = Settings::resolve(settings, file)?;
            info!(settings = ?settings.redacted(), "starting check");
            check(settings)
        }
        Command::Supervise { settings } => {
            let settings = Settings::resolve(settings, file)?;
            info!(settings = ?settings.redacted(), "starting supervisor");
            supervise(settings, args.config)
        }
    }
}

fn main() {
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args) {
        error!("{e:#}");
        exit(1);
    }

    info!("done");
}
