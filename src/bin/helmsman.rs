//! Helmsman operator CLI.
//!
//! Launches a local Chromium through chromiumoxide, opens the start page and
//! reads natural-language commands from a `> ` prompt until the exit keyword.
//! Configuration comes from the environment (and `.env`); flags override it.
//!
//! Usage:
//!   $ HELMSMAN_CHROME_BIN=/path/to/chrome MODEL_API_KEY=... \
//!     cargo run --bin helmsman -- --start-url https://www.wayfair.com -v

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use helmsman_rs::browser::LaunchPlan;
use helmsman_rs::config::{
    CommandMode, HelmsmanConfig, HelmsmanConfigOverrides, Verbosity,
};
use helmsman_rs::llm::ModelClient;
use helmsman_rs::logging::{HelmsmanLogRecord, HelmsmanLogger, LogCallback, LogLevel};
use helmsman_rs::runtime::ChromiumoxideSession;
use helmsman_rs::session::{SessionLoop, StdinCommands};
use log::info;

#[derive(Parser)]
#[command(
    name = "helmsman",
    author,
    version,
    about = "Drive a browser with natural-language commands"
)]
struct Cli {
    /// Page to open before reading commands.
    #[arg(long)]
    start_url: Option<String>,

    /// Run the browser without a window.
    #[arg(long)]
    headless: bool,

    /// How operator lines are interpreted.
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Enable detailed (DEBUG) logging.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
enum Mode {
    Auto,
    Atomic,
    Paragraph,
}

impl From<Mode> for CommandMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Auto => CommandMode::Auto,
            Mode::Atomic => CommandMode::Atomic,
            Mode::Paragraph => CommandMode::Paragraph,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env_logger();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        log::error!("{err:#}");
        return Err(err);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = HelmsmanConfig::from_env().context("failed to load configuration")?;
    let config = config.with_overrides(overrides_from_cli(&cli));

    let logger = Arc::new(HelmsmanLogger::from_config(&config));
    let client = ModelClient::from_config(&config, None, None)
        .context("failed to construct model client")?;

    let plan = LaunchPlan::from_config(&config).context("invalid browser launch options")?;
    info!("Launching browser (headless: {})", plan.headless);
    let session = ChromiumoxideSession::launch(&plan, Arc::clone(&logger))
        .await
        .context("failed to launch browser")?;

    let mut session_loop = SessionLoop::new(&config, session, client, logger);
    let report = session_loop
        .run_until(&mut StdinCommands::new(), shutdown_signal())
        .await
        .context("session ended with an error")?;

    info!(
        "Session finished: {} command(s), {} step(s) succeeded, {} failed, {} aborted",
        report.commands, report.steps_succeeded, report.steps_failed, report.aborted_commands
    );
    if report.interrupted {
        // A pending stdin read would otherwise hold the runtime open until Enter.
        std::process::exit(130);
    }
    Ok(())
}

/// Completes on Ctrl-C, or SIGTERM on unix. If no handler can be installed
/// the future never completes.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() {
                            sigterm.recv().await;
                        }
                    }
                }
            }
            Err(err) => {
                log::warn!("Failed to install SIGTERM handler: {err}");
                ctrl_c_or_pending().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c_or_pending().await;
}

async fn ctrl_c_or_pending() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}

fn overrides_from_cli(cli: &Cli) -> HelmsmanConfigOverrides {
    let mut overrides = HelmsmanConfigOverrides::default().logger(Some(make_logger_callback()));
    if let Some(url) = &cli.start_url {
        overrides = overrides.start_url(url.clone());
    }
    if cli.headless {
        overrides = overrides.headless(true);
    }
    if let Some(mode) = cli.mode {
        overrides = overrides.command_mode(mode.into());
    }
    if cli.verbose > 0 {
        overrides = overrides.verbose(verbosity_from_count(cli.verbose));
    }
    overrides
}

fn make_logger_callback() -> LogCallback {
    Arc::new(|record: &HelmsmanLogRecord| {
        let target = record.category.as_deref().unwrap_or("helmsman");
        match record.level {
            LogLevel::Error => log::error!(target: target, "{}", record.message),
            LogLevel::Info => log::info!(target: target, "{}", record.message),
            LogLevel::Debug => log::debug!(target: target, "{}", record.message),
        }
        if let Some(aux) = record.auxiliary.as_ref().filter(|aux| !aux.is_null()) {
            log::debug!(target: target, "{aux}");
        }
    })
}

fn verbosity_from_count(count: u8) -> Verbosity {
    match count {
        0 => Verbosity::Medium,
        _ => Verbosity::Detailed,
    }
}

fn init_env_logger() {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
