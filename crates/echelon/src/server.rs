//! `EchelonServer` builder and accept loop.
//!
//! Ties the layers together: WebSocket transport → JSON codec →
//! per-connection handler → [`Echelon`] context. The registry sweeps run
//! alongside the accept loop and stop with it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use echelon_protocol::{Codec, JsonCodec};
use echelon_store::{Database, MapStore, Notifier};
use echelon_transport::{Transport, WebSocketTransport};
use tokio::sync::watch;

use crate::handler::handle_connection;
use crate::{EchelonConfig, EchelonError, Echelon};

/// Shared state passed to each connection handler task.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) echelon: Arc<Echelon>,
    pub(crate) codec: C,
    pub(crate) handshake_timeout: Duration,
    pub(crate) idle_check_interval: Duration,
}

/// Builder for configuring and starting an Echelon server.
///
/// # Example
///
/// ```rust,ignore
/// let server = EchelonServer::builder()
///     .bind("0.0.0.0:31337")
///     .config(config)
///     .build(database, maps, notifier)
///     .await?;
/// server.run_until(shutdown_rx).await
/// ```
pub struct EchelonServerBuilder {
    bind_addr: String,
    config: EchelonConfig,
    handshake_timeout: Duration,
    idle_check_interval: Duration,
}

impl EchelonServerBuilder {
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:31337".to_string(),
            config: EchelonConfig::default(),
            handshake_timeout: Self::DEFAULT_HANDSHAKE_TIMEOUT,
            idle_check_interval: Self::DEFAULT_IDLE_CHECK_INTERVAL,
        }
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn config(mut self, config: EchelonConfig) -> Self {
        self.config = config;
        self
    }

    /// How long a new connection may take to send its login frame.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// How often an idle connection checks that its session still exists.
    pub fn idle_check_interval(mut self, interval: Duration) -> Self {
        self.idle_check_interval = interval;
        self
    }

    /// Binds the listener and assembles the core around the given
    /// collaborators.
    pub async fn build(
        self,
        database: Arc<dyn Database>,
        maps: Arc<dyn MapStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<EchelonServer<JsonCodec>, EchelonError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let echelon = Arc::new(Echelon::new(self.config, database, maps, notifier));

        let state = Arc::new(ServerState {
            echelon,
            codec: JsonCodec,
            handshake_timeout: self.handshake_timeout,
            idle_check_interval: self.idle_check_interval,
        });

        Ok(EchelonServer { transport, state })
    }
}

impl Default for EchelonServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Echelon server. Nothing is accepted until
/// [`run_until`](Self::run_until) is called.
pub struct EchelonServer<C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<C>>,
}

impl EchelonServer<JsonCodec> {
    pub fn builder() -> EchelonServerBuilder {
        EchelonServerBuilder::new()
    }
}

impl<C> EchelonServer<C>
where
    C: Codec + Clone,
{
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// The core this server fronts.
    pub fn echelon(&self) -> &Arc<Echelon> {
        &self.state.echelon
    }

    /// Accepts connections and runs the registry sweeps until `shutdown`
    /// becomes `true` (or its sender is dropped).
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn run_until(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), EchelonError> {
        let sweeps = self.state.echelon.registry().spawn_sweeps(shutdown.clone());
        tracing::info!(addr = ?self.local_addr().ok(), "Echelon server running");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("shutting down, waiting for sweeps");
        sweeps.join().await;
        Ok(())
    }
}
