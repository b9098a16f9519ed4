//! Tells operators when a player logs in, at most once per name per TTL.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use echelon_session::ExpiringSet;
use echelon_store::{Notifier, spawn_notify};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub recipients: Vec<String>,
    /// How long a name stays quiet after a notification.
    pub ttl: Duration,
    /// Names never reported, besides `test<digits>`.
    pub exclusions: Vec<String>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            recipients: Vec::new(),
            ttl: Duration::from_secs(6 * 60 * 60),
            exclusions: Vec::new(),
        }
    }
}

pub struct LoginWatchdog {
    config: WatchdogConfig,
    notifier: Arc<dyn Notifier>,
    recent: Mutex<ExpiringSet<String>>,
}

impl LoginWatchdog {
    pub fn new(config: WatchdogConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            notifier,
            recent: Mutex::new(ExpiringSet::new()),
        }
    }

    /// Records a player login and, if the name was not reported recently,
    /// sends a notification in the background. Returns `true` if one was
    /// sent.
    pub async fn observe(&self, name: &str, remote: IpAddr) -> bool {
        if !self.config.enabled || self.config.recipients.is_empty() || self.is_excluded(name) {
            return false;
        }

        {
            let mut recent = self.recent.lock().await;
            if recent.contains(name) {
                return false;
            }
            recent.add(name.to_string(), self.config.ttl);
        }

        tracing::debug!(player = name, "login watchdog notifying operators");
        spawn_notify(
            Arc::clone(&self.notifier),
            format!("{name} logged in"),
            format!("{name} logged in from {remote}."),
            self.config.recipients.clone(),
        );
        true
    }

    fn is_excluded(&self, name: &str) -> bool {
        if self.config.exclusions.iter().any(|e| e == name) {
            return true;
        }
        name.strip_prefix("test")
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    }
}
