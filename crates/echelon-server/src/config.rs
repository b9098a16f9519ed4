//! Configuration management for the Echelon server.
//!
//! The configuration lives in a TOML file with one table per concern.
//! Every key has a default, so a file only needs the keys it changes,
//! except `server.secret`, which has to be set before the server starts.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use echelon::{EchelonConfig, GatewayConfig, TankRules, WatchdogConfig};
use echelon_session::SessionConfig;
use echelon_store::SendmailNotifier;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::Cli;

/// Log levels accepted in `[logging] level`.
const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub sessions: SessionSettings,
    pub game_servers: GameServerSettings,
    pub tanks: TankSettings,
    pub notifications: NotificationSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Listener and identity settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g. "0.0.0.0:31337")
    pub bind_address: String,
    /// Name used in logs and operator notifications
    pub name: String,
    /// Shared secret game servers present when they register
    pub secret: String,
    /// Client version answered to `CheckCurrentVersion`
    pub client_version: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:31337".to_string(),
            name: "Echelon".to_string(),
            secret: String::new(),
            client_version: echelon::auth::DEFAULT_CLIENT_VERSION.to_string(),
        }
    }
}

/// Session lifetimes and sweep cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub player_expiry_secs: u64,
    pub admin_expiry_secs: u64,
    pub map_editor_expiry_secs: u64,
    pub game_server_expiry_secs: u64,
    pub health_monitor_expiry_secs: u64,
    /// Period of both the expiry sweep and the liveness sweep
    pub sweep_interval_secs: u64,
    /// Deadline of every call pushed to a game server
    pub callback_timeout_ms: u64,
    pub max_sessions: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            player_expiry_secs: 30,
            admin_expiry_secs: 300,
            map_editor_expiry_secs: 300,
            game_server_expiry_secs: 1800,
            health_monitor_expiry_secs: 1800,
            sweep_interval_secs: 5,
            callback_timeout_ms: 8000,
            max_sessions: 4096,
        }
    }
}

/// Which game servers may register.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameServerSettings {
    /// Let game servers from hosts outside `approved` register, flagged as unapproved
    pub allow_unapproved: bool,
    /// Hosts whose game servers are approved
    pub approved: Vec<IpAddr>,
}

/// What players may build tanks from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TankSettings {
    /// Known weapon ids; empty accepts any non-negative id
    pub weapons: Vec<i32>,
}

/// Operator e-mail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Send mail at all; when false notifications only go to the log
    pub enabled: bool,
    pub recipients: Vec<String>,
    pub sendmail_path: PathBuf,
    pub sender: String,
    /// How long a player stays quiet after a login notification
    pub watchdog_ttl_secs: u64,
    /// Players whose logins are never reported
    pub watchdog_exclusions: Vec<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            recipients: Vec::new(),
            sendmail_path: PathBuf::from(SendmailNotifier::DEFAULT_PATH),
            sender: "echelon@localhost".to_string(),
            watchdog_ttl_secs: 6 * 60 * 60,
            watchdog_exclusions: Vec::new(),
        }
    }
}

/// Where accounts and maps come from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// TOML file of accounts and tanks loaded into the in-memory database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accounts_file: Option<PathBuf>,
    /// Directory of `.vtmap` files; no maps are offered when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps_directory: Option<PathBuf>,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// A missing file is an error; `--generate-config` creates one.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Err(format!(
                "configuration file {} does not exist (run with --generate-config to create it)",
                path.display()
            )
            .into());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Writes the default configuration with a freshly generated secret.
    ///
    /// Refuses to overwrite an existing file.
    pub async fn write_default(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            return Err(format!("{} already exists, not overwriting it", path.display()).into());
        }
        let mut config = AppConfig::default();
        config.server.secret = echelon::generate_join_token();
        let toml_content = toml::to_string_pretty(&config)?;
        tokio::fs::write(path, toml_content).await?;
        info!("Created default configuration file: {}", path.display());
        Ok(config)
    }

    /// Applies the command-line overrides on top of the file.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(bind) = &cli.bind {
            self.server.bind_address = bind.clone();
        }
        if cli.json_logs {
            self.logging.json_format = true;
        }
        if cli.debug {
            self.logging.level = "debug".to_string();
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        if self.server.secret.is_empty() {
            return Err("server.secret must be set".to_string());
        }

        if !VALID_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LEVELS:?}",
                &self.logging.level
            ));
        }

        if self.sessions.callback_timeout_ms == 0 {
            return Err("sessions.callback_timeout_ms must be greater than zero".to_string());
        }

        if self.server.client_version.trim().is_empty() {
            return Err("server.client_version must not be empty".to_string());
        }

        if self.tanks.weapons.iter().any(|&id| id < 0) {
            return Err("tanks.weapons must not contain negative ids".to_string());
        }

        if self.notifications.enabled && self.notifications.recipients.is_empty() {
            return Err("notifications are enabled but no recipients are configured".to_string());
        }

        Ok(())
    }

    /// Converts the file settings into the core's configuration.
    pub fn to_echelon_config(&self) -> EchelonConfig {
        let sessions = &self.sessions;
        let sweep = Duration::from_secs(sessions.sweep_interval_secs);
        EchelonConfig {
            sessions: SessionConfig {
                player_expiry: Duration::from_secs(sessions.player_expiry_secs),
                admin_expiry: Duration::from_secs(sessions.admin_expiry_secs),
                map_editor_expiry: Duration::from_secs(sessions.map_editor_expiry_secs),
                game_server_expiry: Duration::from_secs(sessions.game_server_expiry_secs),
                health_monitor_expiry: Duration::from_secs(sessions.health_monitor_expiry_secs),
                expiry_sweep_interval: sweep,
                liveness_sweep_interval: sweep,
                max_sessions: sessions.max_sessions,
            },
            gateway: GatewayConfig {
                secret: self.server.secret.clone(),
                approved_hosts: self.game_servers.approved.clone(),
                allow_unapproved_game_servers: self.game_servers.allow_unapproved,
                callback_timeout: Duration::from_millis(sessions.callback_timeout_ms),
                client_version: self.server.client_version.clone(),
            },
            watchdog: WatchdogConfig {
                enabled: self.notifications.enabled,
                recipients: self.notifications.recipients.clone(),
                ttl: Duration::from_secs(self.notifications.watchdog_ttl_secs),
                exclusions: self.notifications.watchdog_exclusions.clone(),
            },
            tanks: TankRules {
                weapons: self.tanks.weapons.clone(),
            },
        }
    }
}
