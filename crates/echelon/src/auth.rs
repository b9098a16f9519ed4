//! The auth gateway: credentials in, registered session out.
//!
//! ```text
//! Login(variant, user, pw) ──→ validate name ──→ GetAccount ──→ level gate
//!                                                                  │
//!        Session ←── register ←── payload (tanks) ←── verify hash ─┘
//! ```
//!
//! Every rejection after input validation (unknown account, sanctioned
//! account, insufficient level, wrong password) returns the same
//! [`ServiceError::bad_credentials`]. The precise reason only goes to the
//! log.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use echelon_protocol::{Callback, TankAttributes, UserLevel, Variant};
use echelon_session::{
    GameServerState, NewSession, PlayerState, RelayEndpoint, Session, SessionPayload,
    SessionRegistry,
};
use echelon_store::{Database, MapStore, Row, Statement, StoreError};
use echelon_transport::{CallbackHandle, PeerAddresses, PeerCallback};

use crate::accounts::create_account;
use crate::password::{constant_time_eq, verify_password};
use crate::watchdog::LoginWatchdog;
use crate::ServiceError;

/// Format of the last-login timestamp written to storage.
pub const LAST_LOGIN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Announced when no client version is configured.
pub const DEFAULT_CLIENT_VERSION: &str = "0.0.0";

const GAME_SERVER_LOGIN: &str = "game servers register with JoinAsGameServer";

/// Lowest user level each login variant requires.
pub fn min_user_level(variant: Variant) -> UserLevel {
    match variant {
        Variant::Player | Variant::HealthMonitor | Variant::GameServer => UserLevel::MEMBER,
        Variant::MapEditor => UserLevel::DEVELOPER,
        Variant::Admin => UserLevel::ADMINISTRATOR,
    }
}

/// ASCII letters and digits only.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Shared secret game servers present when they register.
    pub secret: String,
    /// Hosts whose game servers are flagged as approved.
    pub approved_hosts: Vec<IpAddr>,
    /// Whether game servers from other hosts may register at all.
    pub allow_unapproved_game_servers: bool,
    /// Deadline of every call pushed to a game server.
    pub callback_timeout: Duration,
    /// Client version announced by `CheckCurrentVersion`.
    pub client_version: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            approved_hosts: Vec::new(),
            allow_unapproved_game_servers: true,
            callback_timeout: CallbackHandle::DEFAULT_TIMEOUT,
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
        }
    }
}

/// What a game server announces when it registers.
#[derive(Debug, Clone)]
pub struct GameServerJoin {
    pub name: String,
    pub secret: String,
    pub port: u16,
    pub relay: Option<RelayEndpoint>,
}

pub struct AuthGateway {
    registry: Arc<SessionRegistry>,
    database: Arc<dyn Database>,
    maps: Arc<dyn MapStore>,
    watchdog: LoginWatchdog,
    config: GatewayConfig,
}

impl AuthGateway {
    pub fn new(
        registry: Arc<SessionRegistry>,
        database: Arc<dyn Database>,
        maps: Arc<dyn MapStore>,
        watchdog: LoginWatchdog,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            database,
            maps,
            watchdog,
            config,
        }
    }

    pub fn client_version(&self) -> &str {
        &self.config.client_version
    }

    /// Self-service registration of a [`UserLevel::MEMBER`] account.
    ///
    /// # Errors
    /// `BadInformation` for a malformed username, password or e-mail
    /// address, or a name that is taken.
    pub async fn create_account(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<(), ServiceError> {
        create_account(
            self.database.as_ref(),
            username,
            password,
            email,
            UserLevel::MEMBER,
        )
        .await
    }

    /// Authenticates an account and registers a session of `variant`.
    ///
    /// # Errors
    /// - `BadInformation` for an empty or malformed username, an empty
    ///   password, or the game-server variant (which registers through
    ///   [`join_as_game_server`](Self::join_as_game_server)).
    /// - `PermissionDenied(BAD_CREDENTIALS)` for every credential failure.
    /// - `Internal` if storage fails.
    pub async fn login(
        &self,
        variant: Variant,
        username: &str,
        password: &str,
        addresses: PeerAddresses,
    ) -> Result<Session, ServiceError> {
        if variant == Variant::GameServer {
            return Err(ServiceError::bad_information(GAME_SERVER_LOGIN));
        }
        if username.is_empty() || password.is_empty() {
            return Err(ServiceError::bad_information("username and password are required"));
        }
        if !is_valid_username(username) {
            return Err(ServiceError::bad_information(
                "usernames contain only letters and digits",
            ));
        }

        let rows = self
            .database
            .query(Statement::GetAccount, &[username.into()])
            .await?;
        let [account] = rows.as_slice() else {
            tracing::info!(user = username, %variant, rows = rows.len(), "login rejected: unknown account");
            return Err(ServiceError::bad_credentials());
        };

        let stored_hash = account.get_text(1)?;
        let user_level = user_level_of(account)?;
        if user_level.is_banned() || user_level.is_suspended() {
            tracing::info!(user = username, %variant, %user_level, "login rejected: account sanctioned");
            return Err(ServiceError::bad_credentials());
        }
        let required = min_user_level(variant);
        if user_level < required {
            tracing::info!(user = username, %variant, %user_level, %required, "login rejected: insufficient level");
            return Err(ServiceError::bad_credentials());
        }
        if !verify_password(password, stored_hash) {
            tracing::info!(user = username, %variant, "login rejected: bad password");
            return Err(ServiceError::bad_credentials());
        }

        let payload = match variant {
            Variant::Player => SessionPayload::Player(PlayerState::new(
                load_tanks(self.database.as_ref(), username).await?,
            )),
            Variant::Admin => SessionPayload::Admin,
            Variant::MapEditor => SessionPayload::MapEditor,
            Variant::HealthMonitor => SessionPayload::HealthMonitor,
            Variant::GameServer => return Err(ServiceError::bad_information(GAME_SERVER_LOGIN)),
        };

        let registration = self
            .registry
            .register(NewSession::new(username, addresses, user_level, payload))
            .await?;

        tokio::spawn(record_last_login(
            Arc::clone(&self.database),
            username.to_string(),
        ));
        if variant == Variant::Player {
            self.watchdog.observe(username, addresses.remote.ip()).await;
        }

        Ok(registration.session)
    }

    /// Registers a game server and pushes the current map list to it in
    /// the background.
    ///
    /// # Errors
    /// - `BadInformation` for an empty name or an incomplete relay endpoint.
    /// - `PermissionDenied` for a wrong secret, or an unapproved host when
    ///   unapproved servers are not allowed.
    pub async fn join_as_game_server(
        &self,
        join: GameServerJoin,
        peer: Arc<dyn PeerCallback>,
        addresses: PeerAddresses,
    ) -> Result<Session, ServiceError> {
        if join.name.trim().is_empty() {
            return Err(ServiceError::bad_information("server name is required"));
        }
        if !constant_time_eq(join.secret.as_bytes(), self.config.secret.as_bytes()) {
            tracing::info!(server = %join.name, remote = %addresses.remote, "game server rejected: bad secret");
            return Err(ServiceError::permission_denied("bad secret"));
        }

        let approved = self.config.approved_hosts.contains(&addresses.remote.ip());
        if !approved && !self.config.allow_unapproved_game_servers {
            tracing::info!(server = %join.name, remote = %addresses.remote, "game server rejected: host not approved");
            return Err(ServiceError::permission_denied("game server host is not approved"));
        }

        let callback = CallbackHandle::new(peer, self.config.callback_timeout);
        let state = GameServerState::new(join.port, approved, join.relay, callback.clone());
        let registration = self
            .registry
            .register(NewSession::new(
                join.name,
                addresses,
                UserLevel::MEMBER,
                SessionPayload::GameServer(state),
            ))
            .await?;
        let session = registration.session;

        tokio::spawn(push_map_list(
            Arc::clone(&self.registry),
            Arc::clone(&self.maps),
            session.clone(),
            callback,
        ));

        Ok(session)
    }

}

/// The tanks `owner` has in storage, in storage order.
pub(crate) async fn load_tanks(
    database: &dyn Database,
    owner: &str,
) -> Result<Vec<TankAttributes>, ServiceError> {
    let rows = database
        .query(Statement::GetTankList, &[owner.into()])
        .await?;
    let tanks = rows.iter().map(tank_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok(tanks)
}

/// Stamps the account's last login. Runs off the login path; a failure
/// is only logged.
async fn record_last_login(database: Arc<dyn Database>, username: String) {
    let stamp = chrono::Utc::now().format(LAST_LOGIN_FORMAT).to_string();
    let result = database
        .execute(
            Statement::UpdateLastLogin,
            &[stamp.into(), username.as_str().into()],
        )
        .await;
    if let Err(e) = result {
        tracing::warn!(user = %username, error = %e, "could not record last login");
    }
}

/// Sends `UpdateMapList` to a game server. A server that cannot be
/// reached is evicted.
pub(crate) async fn push_map_list(
    registry: Arc<SessionRegistry>,
    maps: Arc<dyn MapStore>,
    session: Session,
    callback: CallbackHandle,
) {
    let filenames = match maps.map_list().await {
        Ok(filenames) => filenames,
        Err(e) => {
            tracing::warn!(server = %session.owner_name, error = %e, "could not list maps for game server");
            return;
        }
    };

    match callback.invoke(Callback::UpdateMapList { filenames }).await {
        Ok(()) => tracing::debug!(server = %session.owner_name, "map list pushed"),
        Err(e) if e.is_disconnect() => {
            tracing::warn!(server = %session.owner_name, error = %e, "game server unreachable after registering");
            registry.evict_game_server(session.id).await;
        }
        Err(e) => tracing::warn!(server = %session.owner_name, error = %e, "game server refused map list"),
    }
}

fn user_level_of(row: &Row) -> Result<UserLevel, StoreError> {
    let level = row.get_i64(2)?;
    i32::try_from(level)
        .map(UserLevel)
        .map_err(|_| StoreError::ColumnType {
            index: 2,
            expected: "a 32-bit user level",
        })
}

pub(crate) fn int_column<T: TryFrom<i64>>(
    row: &Row,
    index: usize,
    expected: &'static str,
) -> Result<T, StoreError> {
    T::try_from(row.get_i64(index)?).map_err(|_| StoreError::ColumnType { index, expected })
}

fn factor_column(row: &Row, index: usize) -> Result<f32, StoreError> {
    let value = row.get_f64(index)?;
    if !value.is_finite() || value.abs() > f64::from(f32::MAX) {
        return Err(StoreError::ColumnType {
            index,
            expected: "a finite 32-bit factor",
        });
    }
    Ok(value as f32)
}

fn tank_from_row(row: &Row) -> Result<TankAttributes, StoreError> {
    Ok(TankAttributes {
        name: row.get_text(0)?.to_string(),
        weapon_id: int_column(row, 1, "a 32-bit weapon id")?,
        speed_factor: factor_column(row, 2)?,
        armor_factor: factor_column(row, 3)?,
        color: int_column(row, 4, "a 32-bit color")?,
        points: int_column(row, 5, "non-negative tank points")?,
    })
}

// =========================================================================
// Tests
// =========================================================================
