//! Echelon server entry point.
//!
//! The server runs until SIGINT or SIGTERM. The PID file exists for as
//! long as it does. A fatal error after logging is up is mailed to the
//! operators before the process exits.

mod cli;
mod config;
mod logging;
mod pidfile;
mod seed;
mod selftest;
mod signals;

use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use echelon::EchelonServer;
use echelon_store::{
    DirectoryMapStore, LogNotifier, MapStore, MemoryDatabase, MemoryMapStore, Notifier,
    SendmailNotifier,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::config::{AppConfig, LoggingSettings, NotificationSettings};
use crate::pidfile::PidFile;

/// How long the crash report may take before the process gives up on it.
const CRASH_REPORT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("echelon-server: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    if cli.generate_config {
        AppConfig::write_default(&cli.config).await?;
        println!("Wrote default configuration to {}", cli.config.display());
        return Ok(());
    }

    if cli.self_test {
        logging::setup_logging(&LoggingSettings {
            level: if cli.debug { "debug" } else { "info" }.to_string(),
            json_format: cli.json_logs,
        })?;
        return if selftest::run_all().await {
            Ok(())
        } else {
            Err("self-test failed".into())
        };
    }

    let mut config = AppConfig::load_from_file(&cli.config).await?;
    config.apply_cli(&cli);
    config
        .validate()
        .map_err(|e| format!("Configuration validation failed: {e}"))?;
    logging::setup_logging(&config.logging)?;

    let notifier = build_notifier(&config.notifications);
    if let Err(e) = serve(&config, &cli.pid_file, Arc::clone(&notifier)).await {
        error!(error = %e, "fatal error, shutting down");
        report_crash(notifier.as_ref(), &config, e.as_ref()).await;
        return Err(e);
    }
    Ok(())
}

// ============================================================================
// Server lifecycle
// ============================================================================

async fn serve(
    config: &AppConfig,
    pid_path: &Path,
    notifier: Arc<dyn Notifier>,
) -> Result<(), Box<dyn Error>> {
    let _pid = PidFile::create(pid_path)?;

    let database = Arc::new(MemoryDatabase::new());
    match &config.storage.accounts_file {
        Some(path) => {
            seed::load_accounts(&database, path).await?;
        }
        None => warn!("no accounts_file configured, nobody will be able to log in"),
    }

    let maps: Arc<dyn MapStore> = match &config.storage.maps_directory {
        Some(dir) => Arc::new(DirectoryMapStore::new(dir.clone())),
        None => Arc::new(MemoryMapStore::new()),
    };

    let server = EchelonServer::builder()
        .bind(&config.server.bind_address)
        .config(config.to_echelon_config())
        .build(database, maps, notifier)
        .await?;
    info!(
        name = %config.server.name,
        addr = ?server.local_addr().ok(),
        client_version = %config.server.client_version,
        "Echelon is up"
    );

    let (stop, stop_rx) = watch::channel(false);
    let mut running = tokio::spawn(server.run_until(stop_rx));

    tokio::select! {
        signal = signals::wait_for_shutdown() => {
            let _ = stop.send(true);
            signal?;
            running.await??;
        }
        finished = &mut running => finished??,
    }

    info!("Echelon has shut down without issue");
    Ok(())
}

fn build_notifier(settings: &NotificationSettings) -> Arc<dyn Notifier> {
    if settings.enabled {
        Arc::new(SendmailNotifier::new(
            settings.sendmail_path.clone(),
            settings.sender.clone(),
        ))
    } else {
        Arc::new(LogNotifier)
    }
}

/// Best-effort mail to the operators about a fatal error.
async fn report_crash(notifier: &dyn Notifier, config: &AppConfig, cause: &dyn Error) {
    let name = &config.server.name;
    let subject = format!("{name} Server Crash");
    let body = format!(
        "{name} has crashed with the following error.\n\n{cause}\n\nPlease investigate this issue."
    );
    let recipients = &config.notifications.recipients;

    match tokio::time::timeout(
        CRASH_REPORT_TIMEOUT,
        notifier.notify(&subject, &body, recipients),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "failed to send crash report"),
        Err(_) => error!("crash report timed out"),
    }
}
