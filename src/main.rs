//! idlelockd - locks the session after a period of inactivity.
//!
//! Polls X11 idle time, follows the logind session lock state, and asks
//! logind to lock the session once the configured timeout has passed.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use idlelockd::config::Config;
use idlelockd::domain::ConfigChange;
use idlelockd::domain::EngineEvent;
use idlelockd::engine::EngineError;
use idlelockd::engine::IdleLockEngine;
use idlelockd::idle::TickClock;
use idlelockd::idle::X11IdleSampler;
use idlelockd::session::DryRunLock;
use idlelockd::session::LockAction;
use idlelockd::session::LogindLock;
use idlelockd::session::SessionWatcher;
use idlelockd::session::logind;
use idlelockd::settings::FileSettingsStore;
use idlelockd::settings::Settings;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Idle session locker.
///
/// Locks the session after it has been idle for the configured time.
/// Send SIGHUP to a running daemon to reload the lock settings.
#[derive(Parser, Debug)]
#[command(name = "idlelockd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the lock settings file (overrides config).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Enable dry-run mode (log instead of locking).
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Lock after this many idle minutes (5 to 60, in steps of 5).
    #[arg(long, value_parser = parse_timeout_minutes)]
    timeout_minutes: Option<u32>,

    /// Only lock if the screensaver was active during the idle period.
    #[arg(long, value_name = "BOOL")]
    require_screensaver: Option<bool>,

    /// Enable or disable idle locking.
    #[arg(long, value_name = "BOOL")]
    enabled: Option<bool>,

    /// Apply any setting changes, print the lock settings, and exit.
    #[arg(long)]
    status: bool,
}

impl Args {
    /// Setting changes requested on the command line.
    fn requested_changes(&self) -> Vec<ConfigChange> {
        let mut changes = Vec::new();

        if let Some(minutes) = self.timeout_minutes {
            changes.push(ConfigChange::Timeout(minutes * 60_000));
        }
        if let Some(require) = self.require_screensaver {
            changes.push(ConfigChange::RequireScreenSaver(require));
        }
        if let Some(enabled) = self.enabled {
            changes.push(ConfigChange::Enabled(enabled));
        }

        changes
    }
}

/// Parse a lock timeout in minutes: 5 to 60, in steps of 5.
fn parse_timeout_minutes(s: &str) -> Result<u32, String> {
    let minutes: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a number of minutes"))?;

    if !(5..=60).contains(&minutes) || minutes % 5 != 0 {
        return Err(format!(
            "{minutes} minutes is not supported; choose 5, 10, ... 60"
        ));
    }

    Ok(minutes)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level)?;

    info!("idlelockd v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    if args.dry_run {
        config.dry_run = true;
    }
    if let Some(ref path) = args.settings {
        config.settings_path = Some(path.clone());
    }

    let settings_path = config.resolve_settings_path()?;
    info!(
        "Configuration loaded (dry_run={}, settings={})",
        config.dry_run,
        settings_path.display()
    );

    let changes = args.requested_changes();

    if args.status {
        return run_status(&settings_path, &changes);
    }

    run_daemon(config, settings_path, changes).await
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("idlelockd={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Apply setting changes directly to the store and print the result.
fn run_status(settings_path: &Path, changes: &[ConfigChange]) -> Result<()> {
    let mut store = FileSettingsStore::new(settings_path);
    let mut settings = Settings::load(&store);

    if !changes.is_empty() {
        for change in changes {
            settings.apply(*change);
        }
        settings
            .save(&mut store)
            .context("Failed to save lock settings")?;
        info!("Lock settings saved; send SIGHUP to a running idlelockd to apply");
    }

    print!("{}", status_report(&store, &settings));

    Ok(())
}

/// Human-readable summary of the lock settings in `store`.
fn status_report(store: &FileSettingsStore, settings: &Settings) -> String {
    format!(
        "settings: {}\ntimeout: {} minutes\nrequire_screensaver: {}\nenabled: {}\n",
        store.path().display(),
        settings.timeout_minutes(),
        settings.require_screen_saver,
        settings.enabled
    )
}

/// Run daemon event loop.
async fn run_daemon(
    config: Config,
    settings_path: PathBuf,
    changes: Vec<ConfigChange>,
) -> Result<()> {
    let sampler = match X11IdleSampler::connect(TickClock::new()) {
        Ok(sampler) => sampler,
        Err(e) => {
            error!("Idle sampling not available: {}", e);
            for diag in X11IdleSampler::get_diagnostics() {
                error!("  {}", diag);
            }
            anyhow::bail!("X11 idle sampling not available");
        }
    };

    let conn = zbus::Connection::system()
        .await
        .context("Failed to connect to system DBus")?;
    let session_path = logind::resolve_session_path(&conn).await?;
    info!("Resolved session path: {}", session_path);

    let locker: Box<dyn LockAction> = if config.dry_run {
        Box::new(DryRunLock::new())
    } else {
        Box::new(LogindLock::new(conn.clone(), session_path.clone()))
    };

    let mut engine = IdleLockEngine::new(
        Box::new(FileSettingsStore::new(settings_path)),
        Box::new(sampler),
        locker,
    );

    for change in changes {
        dispatch(&mut engine, EngineEvent::ConfigChanged(change));
    }

    let (event_tx, mut event_rx) = mpsc::channel(16);
    let watcher = SessionWatcher::spawn(conn, session_path, event_tx);
    let mut events_open = true;

    let mut poll_timer = tokio::time::interval(config.poll_interval());
    poll_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    info!(
        "Daemon started, checking idle time every {:?}",
        config.poll_interval()
    );

    loop {
        tokio::select! {
            _ = poll_timer.tick() => {
                dispatch(&mut engine, EngineEvent::Poll);
            }

            event = event_rx.recv(), if events_open => {
                if let Some(event) = event {
                    debug!("Session event: {:?}", event);
                    dispatch(&mut engine, event.into());
                } else {
                    warn!("Session lock notifications unavailable; lock state may be stale");
                    events_open = false;
                }
            }

            _ = hangup.recv() => {
                info!("SIGHUP received, reloading lock settings");
                engine.reload();
            }

            _ = terminate.recv() => {
                info!("SIGTERM received");
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    drop(watcher);
    info!("idlelockd stopped");
    Ok(())
}

/// Feed one event to the engine and log the outcome.
fn dispatch(engine: &mut IdleLockEngine, event: EngineEvent) {
    match engine.handle(event) {
        Ok(Some(evaluation)) => trace!("{:?} -> {:?}", event, evaluation),
        Ok(None) => trace!("{:?} -> phase {}", event, engine.phase().as_str()),
        Err(EngineError::IdleSampleUnavailable(e)) => {
            warn!("Skipping idle check: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout_minutes() {
        assert_eq!(parse_timeout_minutes("5"), Ok(5));
        assert_eq!(parse_timeout_minutes("20"), Ok(20));
        assert_eq!(parse_timeout_minutes("60"), Ok(60));

        assert!(parse_timeout_minutes("0").is_err());
        assert!(parse_timeout_minutes("7").is_err());
        assert!(parse_timeout_minutes("65").is_err());
        assert!(parse_timeout_minutes("ten").is_err());
    }

    #[test]
    fn test_requested_changes() {
        let args = Args::try_parse_from([
            "idlelockd",
            "--timeout-minutes",
            "15",
            "--require-screensaver",
            "false",
            "--enabled",
            "true",
        ])
        .unwrap();

        assert_eq!(
            args.requested_changes(),
            vec![
                ConfigChange::Timeout(900_000),
                ConfigChange::RequireScreenSaver(false),
                ConfigChange::Enabled(true),
            ]
        );
    }

    #[test]
    fn test_no_requested_changes() {
        let args = Args::try_parse_from(["idlelockd", "--dry-run"]).unwrap();
        assert!(args.dry_run);
        assert!(args.requested_changes().is_empty());
    }

    #[test]
    fn test_rejects_unsupported_timeout() {
        assert!(Args::try_parse_from(["idlelockd", "--timeout-minutes", "3"]).is_err());
    }

    #[test]
    fn test_status_writes_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        run_status(
            &path,
            &[ConfigChange::Timeout(600_000), ConfigChange::Enabled(false)],
        )
        .unwrap();

        let settings = Settings::load(&FileSettingsStore::new(&path));
        assert_eq!(settings.lock_timeout_ms, 600_000);
        assert!(settings.require_screen_saver);
        assert!(!settings.enabled);
    }

    #[test]
    fn test_status_report_names_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let store = FileSettingsStore::new(&path);
        let settings = Settings {
            lock_timeout_ms: 900_000,
            require_screen_saver: false,
            enabled: true,
        };

        assert_eq!(
            status_report(&store, &settings),
            format!(
                "settings: {}\ntimeout: 15 minutes\nrequire_screensaver: false\nenabled: true\n",
                path.display()
            )
        );
    }

    #[test]
    fn test_status_without_changes_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        run_status(&path, &[]).unwrap();
        assert!(!path.exists());
    }
}
