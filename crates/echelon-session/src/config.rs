use std::time::Duration;

use echelon_protocol::Variant;

/// Timing and capacity settings for the session registry.
///
/// Expiry thresholds are per variant. Interactive clients keep alive
/// every few seconds, so their thresholds are short; game servers and
/// health monitors are long-running processes with long thresholds.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub player_expiry: Duration,
    pub admin_expiry: Duration,
    pub map_editor_expiry: Duration,
    pub game_server_expiry: Duration,
    pub health_monitor_expiry: Duration,

    /// Period of the expiry sweep. Zero disables it.
    pub expiry_sweep_interval: Duration,
    /// Period of the game-server liveness sweep. Zero disables it.
    pub liveness_sweep_interval: Duration,

    /// Upper bound on live sessions; registrations beyond it fail.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            player_expiry: Duration::from_secs(30),
            admin_expiry: Duration::from_secs(300),
            map_editor_expiry: Duration::from_secs(300),
            game_server_expiry: Duration::from_secs(1800),
            health_monitor_expiry: Duration::from_secs(1800),
            expiry_sweep_interval: Duration::from_secs(5),
            liveness_sweep_interval: Duration::from_secs(5),
            max_sessions: 4096,
        }
    }
}

impl SessionConfig {
    /// The inactivity threshold applied to sessions of `variant`.
    pub fn expiry_for(&self, variant: Variant) -> Duration {
        match variant {
            Variant::Player => self.player_expiry,
            Variant::Admin => self.admin_expiry,
            Variant::MapEditor => self.map_editor_expiry,
            Variant::GameServer => self.game_server_expiry,
            Variant::HealthMonitor => self.health_monitor_expiry,
        }
    }
}
