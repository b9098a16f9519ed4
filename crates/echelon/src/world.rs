//! The [`Echelon`] context: every component of the core behind one value.
//!
//! ```text
//!                    ┌──────────── Echelon ────────────┐
//!  Login ──────────→ │ AuthGateway ──┐                 │
//!  RequestJoin ────→ │ Matchmaking ──┼─→ SessionRegistry
//!  SendStatistics ─→ │ Statistics ───┼─→ Database      │
//!  Upload/Download → │               └─→ MapStore      │
//!                    └─────────────────────────────────┘
//! ```
//!
//! Components receive shared handles at construction; none of them reaches
//! for a global. The front end only ever talks to this type.

use std::sync::Arc;

use echelon_protocol::{
    Callback, GameMode, MatchStatistics, OnlineUser, ServerInfo, SessionId, TankAttributes,
    UserLevel, Variant,
};
use echelon_session::{Session, SessionConfig, SessionRegistry};
use echelon_store::{
    Database, MAX_MAP_SIZE, MapHandle, MapStore, Notifier, Statement, is_map_filename,
};

use crate::auth::{AuthGateway, GatewayConfig, push_map_list};
use crate::matchmaking::MatchmakingBroker;
use crate::rank::{MAX_RANK, points_required_for_rank, rank_from_points};
use crate::statistics::{StatisticsRecorder, StatisticsSummary};
use crate::tanks::TankRules;
use crate::watchdog::{LoginWatchdog, WatchdogConfig};
use crate::ServiceError;

/// Settings of every core component.
#[derive(Debug, Clone, Default)]
pub struct EchelonConfig {
    pub sessions: SessionConfig,
    pub gateway: GatewayConfig,
    pub watchdog: WatchdogConfig,
    pub tanks: TankRules,
}

pub struct Echelon {
    registry: Arc<SessionRegistry>,
    gateway: AuthGateway,
    broker: MatchmakingBroker,
    statistics: StatisticsRecorder,
    database: Arc<dyn Database>,
    maps: Arc<dyn MapStore>,
    tank_rules: TankRules,
}

impl Echelon {
    pub fn new(
        config: EchelonConfig,
        database: Arc<dyn Database>,
        maps: Arc<dyn MapStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.sessions));
        let watchdog = LoginWatchdog::new(config.watchdog, notifier);
        let gateway = AuthGateway::new(
            Arc::clone(&registry),
            Arc::clone(&database),
            Arc::clone(&maps),
            watchdog,
            config.gateway,
        );

        Self {
            broker: MatchmakingBroker::new(Arc::clone(&registry)),
            statistics: StatisticsRecorder::new(Arc::clone(&database)),
            registry,
            gateway,
            database,
            maps,
            tank_rules: config.tanks,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }

    pub fn broker(&self) -> &MatchmakingBroker {
        &self.broker
    }

    pub(crate) fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub(crate) fn tank_rules(&self) -> &TankRules {
        &self.tank_rules
    }

    pub fn client_version(&self) -> &str {
        self.gateway.client_version()
    }

    // -----------------------------------------------------------------------
    // Players
    // -----------------------------------------------------------------------

    pub fn tank_list(&self, session: &Session) -> Vec<TankAttributes> {
        session
            .player()
            .map(|p| p.tanks().to_vec())
            .unwrap_or_default()
    }

    /// # Errors
    /// `BadInformation` if the player owns no tank called `tank_name`.
    pub async fn select_tank(&self, player: SessionId, tank_name: &str) -> Result<(), ServiceError> {
        let selected = self
            .registry
            .update_player(player, |p| p.select_tank(tank_name))
            .await?;
        if !selected {
            return Err(ServiceError::bad_information("unknown tank"));
        }
        tracing::debug!(session_id = %player, tank = tank_name, "tank selected");
        Ok(())
    }

    /// Hands the player to a game server. See
    /// [`MatchmakingBroker::request_join`].
    pub async fn request_join(&self, player: SessionId, server_name: &str) -> Result<String, ServiceError> {
        self.broker.request_join(player, server_name).await
    }

    pub async fn account_points(&self, account: &str) -> Result<u64, ServiceError> {
        let rows = self
            .database
            .query(Statement::GetAccountPoints, &[account.into()])
            .await?;
        let Some(row) = rows.first() else {
            tracing::error!(account, "logged-in account has no points row");
            return Err(ServiceError::Internal);
        };
        Ok(u64::try_from(row.get_i64(0)?).unwrap_or(0))
    }

    pub async fn rank(&self, account: &str) -> Result<u32, ServiceError> {
        Ok(rank_from_points(self.account_points(account).await?))
    }

    /// # Errors
    /// `BadInformation` above [`MAX_RANK`].
    pub fn points_for_rank(&self, rank: u32) -> Result<u64, ServiceError> {
        if rank > MAX_RANK {
            return Err(ServiceError::bad_information(format!(
                "rank must be between 0 and {MAX_RANK}"
            )));
        }
        Ok(points_required_for_rank(rank))
    }

    // -----------------------------------------------------------------------
    // Listings
    // -----------------------------------------------------------------------

    pub async fn game_server_list(&self) -> Vec<ServerInfo> {
        self.registry
            .all_of(Variant::GameServer)
            .await
            .iter()
            .filter_map(|s| {
                s.game_server()
                    .map(|gs| gs.server_info(&s.owner_name, &s.addresses))
            })
            .collect()
    }

    /// Every live session except game servers.
    pub async fn user_list(&self) -> Vec<OnlineUser> {
        self.registry
            .all()
            .await
            .into_iter()
            .filter(|s| s.variant() != Variant::GameServer)
            .map(|s| OnlineUser {
                playing: s.in_game(),
                variant: s.variant(),
                user_level: s.user_level,
                name: s.owner_name,
            })
            .collect()
    }

    pub async fn user_count(&self) -> u64 {
        u64::try_from(self.registry.count().await).unwrap_or(u64::MAX)
    }

    // -----------------------------------------------------------------------
    // Maps
    // -----------------------------------------------------------------------

    pub async fn map_list(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.maps.map_list().await?)
    }

    pub async fn hash_is_valid(&self, filename: &str, hash: &str) -> Result<bool, ServiceError> {
        Ok(self.maps.check_hash(filename, hash).await?)
    }

    /// # Errors
    /// `BadInformation` if there is no such map.
    pub async fn download_map(&self, filename: &str) -> Result<MapHandle, ServiceError> {
        self.maps
            .map_by_filename(filename)
            .await?
            .ok_or_else(|| ServiceError::bad_information(format!("no map named {filename}")))
    }

    /// Stores a new map and tells every game server.
    ///
    /// # Errors
    /// `BadInformation` for a bad filename, a blank title, empty or
    /// oversized data, or a filename already in use.
    pub async fn upload_map(&self, filename: &str, title: &str, data: Vec<u8>) -> Result<(), ServiceError> {
        if !is_map_filename(filename) {
            return Err(ServiceError::bad_information(
                "map filenames are a bare name ending in .vtmap",
            ));
        }
        if title.trim().is_empty() {
            return Err(ServiceError::bad_information("map title cannot be blank"));
        }
        if data.is_empty() {
            return Err(ServiceError::bad_information("map has no data"));
        }
        if data.len() > MAX_MAP_SIZE {
            return Err(ServiceError::bad_information(format!(
                "maps are limited to {MAX_MAP_SIZE} bytes"
            )));
        }

        let bytes = data.len();
        if !self.maps.save(MapHandle::new(filename, title, data)).await? {
            return Err(ServiceError::bad_information("a map with that filename already exists"));
        }
        tracing::info!(map = filename, bytes, "map uploaded");
        self.broadcast_map_list().await;
        Ok(())
    }

    /// # Errors
    /// `BadInformation` if there is no such map.
    pub async fn remove_map(&self, filename: &str) -> Result<(), ServiceError> {
        if !self.maps.remove(filename).await? {
            return Err(ServiceError::bad_information("map does not exist"));
        }
        tracing::info!(map = filename, "map removed");
        self.broadcast_map_list().await;
        Ok(())
    }

    /// Pushes the current map list to every game server, each on its own
    /// task.
    async fn broadcast_map_list(&self) {
        for session in self.registry.all_of(Variant::GameServer).await {
            let Some(callback) = session.game_server().map(|gs| gs.callback().clone()) else {
                continue;
            };
            tokio::spawn(push_map_list(
                Arc::clone(&self.registry),
                Arc::clone(&self.maps),
                session,
                callback,
            ));
        }
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Removes every non-game-server session of `name` and returns how
    /// many there were.
    ///
    /// # Errors
    /// `BadInformation("user is not online")` if there were none.
    pub async fn kick_user(&self, name: &str) -> Result<usize, ServiceError> {
        let removed = self.registry.remove_user(name).await;
        if removed.is_empty() {
            return Err(ServiceError::bad_information("user is not online"));
        }
        Ok(removed.len())
    }

    /// Sets the account to [`UserLevel::BANNED`] and kicks it if online.
    pub async fn ban_user(&self, name: &str) -> Result<(), ServiceError> {
        self.set_user_level(name, UserLevel::BANNED).await?;
        let kicked = self.registry.remove_user(name).await.len();
        tracing::info!(user = name, kicked, "account banned");
        Ok(())
    }

    pub async fn unban_user(&self, name: &str) -> Result<(), ServiceError> {
        self.set_user_level(name, UserLevel::MEMBER).await?;
        tracing::info!(user = name, "account unbanned");
        Ok(())
    }

    async fn set_user_level(&self, name: &str, level: UserLevel) -> Result<(), ServiceError> {
        let affected = self
            .database
            .execute(Statement::SetUserLevel, &[level.0.into(), name.into()])
            .await?;
        if affected == 0 {
            return Err(ServiceError::bad_information(format!("no account named {name}")));
        }
        Ok(())
    }

    /// Locks a game server's player limit and tells the server.
    ///
    /// # Errors
    /// - `BadInformation` if no game server has that name.
    /// - `PermissionDenied("server unavailable")` if the server could not
    ///   be reached; it is evicted.
    pub async fn force_player_limit(&self, server_name: &str, limit: u32) -> Result<(), ServiceError> {
        let server = self
            .registry
            .find_by_name(Variant::GameServer, server_name)
            .await
            .ok_or_else(|| ServiceError::bad_information(format!("no game server named {server_name}")))?;

        let callback = self
            .registry
            .modify_game_server(server.id, |gs| {
                gs.force_player_limit(limit);
                gs.callback().clone()
            })
            .await?;
        tracing::info!(server = server_name, limit, "player limit forced");

        match callback.invoke(Callback::ForceMaxPlayerLimit { limit }).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_disconnect() => {
                tracing::warn!(server = server_name, error = %e, "game server unreachable, evicting");
                self.registry.evict_game_server(server.id).await;
                Err(ServiceError::permission_denied("server unavailable"))
            }
            Err(e) => {
                tracing::warn!(server = server_name, error = %e, "game server refused forced limit");
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Game servers
    // -----------------------------------------------------------------------

    /// A limit announced by the server itself. Ignored while an
    /// administrator has forced one.
    pub async fn set_max_player_limit(&self, server: SessionId, limit: u32) -> Result<(), ServiceError> {
        let applied = self
            .registry
            .update_game_server(server, |gs| gs.set_player_limit(limit))
            .await?;
        if !applied {
            tracing::debug!(session_id = %server, limit, "player limit is forced, request ignored");
        }
        Ok(())
    }

    pub async fn player_left(&self, server: SessionId, tank_name: &str) -> Result<(), ServiceError> {
        if !self.registry.player_left(server, tank_name).await? {
            tracing::debug!(session_id = %server, tank = tank_name, "PlayerLeft for a tank not on the roster");
        }
        Ok(())
    }

    pub async fn set_current_map(&self, server: SessionId, filename: String) -> Result<(), ServiceError> {
        self.registry
            .update_game_server(server, |gs| gs.current_map = Some(filename))
            .await?;
        Ok(())
    }

    pub async fn set_current_game_mode(&self, server: SessionId, mode: GameMode) -> Result<(), ServiceError> {
        self.registry
            .update_game_server(server, |gs| gs.current_mode = mode)
            .await?;
        Ok(())
    }

    pub async fn record_statistics(&self, records: &[MatchStatistics]) -> StatisticsSummary {
        self.statistics.record(records).await
    }
}

#[cfg(test)]
mod tests {
    use echelon_protocol::TankAttributes;
    use echelon_store::{LogNotifier, MemoryDatabase, MemoryMapStore};
    use echelon_transport::PeerAddresses;

    use super::*;
    use crate::password::hash_password;

    fn addresses() -> PeerAddresses {
        PeerAddresses::new("10.0.0.5:50000".parse().unwrap(), "10.0.0.1:31337".parse().unwrap())
    }

    async fn echelon() -> (Echelon, Arc<MemoryDatabase>) {
        let db = Arc::new(MemoryDatabase::new());
        db.insert_account("alice", &hash_password("pw"), UserLevel::MEMBER).await;
        db.insert_tank(
            "alice",
            TankAttributes {
                name: "aliceTank".into(),
                weapon_id: 0,
                speed_factor: 1.0,
                armor_factor: 1.0,
                color: 0,
                points: 0,
            },
        )
        .await;
        let echelon = Echelon::new(
            EchelonConfig::default(),
            db.clone(),
            Arc::new(MemoryMapStore::new()),
            Arc::new(LogNotifier),
        );
        (echelon, db)
    }

    #[tokio::test]
    async fn test_points_for_rank_above_max_is_bad_information() {
        let (echelon, _) = echelon().await;

        assert_eq!(echelon.points_for_rank(2), Ok(400));
        assert!(matches!(
            echelon.points_for_rank(MAX_RANK + 1),
            Err(ServiceError::BadInformation(_))
        ));
    }

    #[tokio::test]
    async fn test_select_tank_unknown_is_bad_information() {
        let (echelon, _) = echelon().await;
        let s = echelon.gateway().login(Variant::Player, "alice", "pw", addresses()).await.unwrap();

        assert!(echelon.select_tank(s.id, "aliceTank").await.is_ok());
        assert!(matches!(
            echelon.select_tank(s.id, "ghost").await,
            Err(ServiceError::BadInformation(_))
        ));
    }

    #[tokio::test]
    async fn test_ban_user_sets_level_and_kicks() {
        let (echelon, db) = echelon().await;
        echelon.gateway().login(Variant::Player, "alice", "pw", addresses()).await.unwrap();

        echelon.ban_user("alice").await.unwrap();

        assert_eq!(db.account("alice").await.unwrap().user_level, UserLevel::BANNED);
        assert_eq!(echelon.user_count().await, 0);
        assert!(echelon.gateway().login(Variant::Player, "alice", "pw", addresses()).await.is_err());

        echelon.unban_user("alice").await.unwrap();
        assert_eq!(db.account("alice").await.unwrap().user_level, UserLevel::MEMBER);
    }

    #[tokio::test]
    async fn test_kick_user_offline_is_bad_information() {
        let (echelon, _) = echelon().await;

        let result = echelon.kick_user("alice").await;

        assert!(matches!(result, Err(ServiceError::BadInformation(m)) if m == "user is not online"));
    }

    #[tokio::test]
    async fn test_upload_map_then_download() {
        let (echelon, _) = echelon().await;

        echelon.upload_map("dunes.vtmap", "Dunes", b"tiles".to_vec()).await.unwrap();

        let map = echelon.download_map("dunes.vtmap").await.unwrap();
        assert_eq!(map.title, "Dunes");
        assert_eq!(echelon.map_list().await.unwrap(), vec!["dunes.vtmap"]);
    }

    #[tokio::test]
    async fn test_upload_map_rejects_bad_input_and_duplicates() {
        let (echelon, _) = echelon().await;
        echelon.upload_map("dunes.vtmap", "Dunes", b"tiles".to_vec()).await.unwrap();

        let cases = [
            ("../dunes.vtmap", "Dunes", b"tiles".to_vec()),
            ("dunes.txt", "Dunes", b"tiles".to_vec()),
            ("other.vtmap", "  ", b"tiles".to_vec()),
            ("other.vtmap", "Other", Vec::new()),
            ("other.vtmap", "Other", vec![0; MAX_MAP_SIZE + 1]),
            ("dunes.vtmap", "Dunes again", b"tiles".to_vec()),
        ];
        for (filename, title, data) in cases {
            let result = echelon.upload_map(filename, title, data).await;
            assert!(matches!(result, Err(ServiceError::BadInformation(_))), "{filename}");
        }
        assert_eq!(echelon.map_list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_map_unknown_is_bad_information() {
        let (echelon, _) = echelon().await;
        echelon.upload_map("dunes.vtmap", "Dunes", b"tiles".to_vec()).await.unwrap();

        echelon.remove_map("dunes.vtmap").await.unwrap();

        assert!(echelon.map_list().await.unwrap().is_empty());
        assert_eq!(
            echelon.remove_map("dunes.vtmap").await,
            Err(ServiceError::bad_information("map does not exist"))
        );
    }

    #[tokio::test]
    async fn test_rank_reads_account_points() {
        let (echelon, db) = echelon().await;
        db.execute(Statement::UpdateAccountPoints, &[450i64.into(), "alice".into()])
            .await
            .unwrap();

        assert_eq!(echelon.account_points("alice").await, Ok(450));
        assert_eq!(echelon.rank("alice").await, Ok(2));
    }
}
