//! The session registry: every live session, keyed by id and by name.
//!
//! All state sits behind one `tokio::sync::RwLock`. Mutations (register,
//! remove, the sweeps, join commits) take the write lock, so they are
//! mutually exclusive; lookups take the read lock and hand back cloned
//! snapshots, so a reader never sees half of a mutation.
//!
//! Calls out to peers (roster notices, liveness probes) are never made
//! while the lock is held. Each mutation collects what has to be sent,
//! releases the lock, then delivers.
//!
//! ```text
//!  register ──┐                     ┌── RemovePlayer ──→ game server
//!  remove   ──┼──→ [ write lock ] ──┤
//!  expire   ──┘    detach sessions  └── (lock released first)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use echelon_protocol::{Callback, SessionId, Variant};
use echelon_transport::CallbackHandle;
use futures_util::future::join_all;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::{
    GameServerState, NewSession, PlayerState, RosterEntry, Session, SessionConfig,
    SessionError, SessionPayload,
};

/// Result of a successful [`SessionRegistry::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    /// The stored session.
    pub session: Session,
    /// The previous holder of the same (variant, name), if one was evicted.
    pub evicted: Option<Session>,
}

/// A roster entry that was dropped on the registry side and still has to
/// be reported to its game server.
struct RosterNotice {
    server: SessionId,
    server_name: String,
    tank_name: String,
    callback: CallbackHandle,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    /// (variant, owner name) → id. One entry per live session.
    names: HashMap<(Variant, String), SessionId>,
}

impl Inner {
    /// Takes a session out of both maps and repairs back-references.
    ///
    /// A player that was in a game loses its roster entry, and the entry
    /// is returned as a notice for the game server. A game server takes
    /// its players' back-references with it.
    fn detach(&mut self, id: SessionId) -> Option<(Session, Option<RosterNotice>)> {
        let session = self.sessions.remove(&id)?;

        let key = (session.variant(), session.owner_name.clone());
        if self.names.get(&key) == Some(&id) {
            self.names.remove(&key);
        }

        let notice = match &session.payload {
            SessionPayload::Player(player) => player
                .game_server
                .and_then(|server| self.drop_roster_entry(server, id)),
            SessionPayload::GameServer(server) => {
                for entry in server.roster.values() {
                    self.clear_game_server(entry.player, id);
                }
                None
            }
            _ => None,
        };

        Some((session, notice))
    }

    fn drop_roster_entry(&mut self, server: SessionId, player: SessionId) -> Option<RosterNotice> {
        let session = self.sessions.get_mut(&server)?;
        let server_name = session.owner_name.clone();
        let state = session.game_server_mut()?;

        let tank_name = state
            .roster
            .iter()
            .find(|(_, entry)| entry.player == player)
            .map(|(tank, _)| tank.clone())?;
        state.roster.remove(&tank_name);

        Some(RosterNotice {
            server,
            server_name,
            tank_name,
            callback: state.callback().clone(),
        })
    }

    /// Clears `player`'s back-reference if it still points at `server`.
    fn clear_game_server(&mut self, player: SessionId, server: SessionId) {
        let state = self.sessions.get_mut(&player).and_then(Session::player_mut);
        if let Some(state) = state.filter(|p| p.game_server == Some(server)) {
            state.game_server = None;
        }
    }

    fn get_mut(&mut self, id: SessionId) -> Result<&mut Session, SessionError> {
        self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))
    }
}

fn wrong_variant(session: &Session, expected: Variant) -> SessionError {
    SessionError::WrongVariant {
        id: session.id,
        expected,
        actual: session.variant(),
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Single source of truth for live sessions.
///
/// Shared as `Arc<SessionRegistry>` between the connection handlers, the
/// matchmaking broker and the two sweep tasks.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    config: SessionConfig,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Stores a new session, evicting any live session with the same
    /// variant and owner name first ("last login wins").
    ///
    /// The evicted session's own callback is not invoked. If it was a
    /// player in a game, its game server is still told to drop the tank.
    ///
    /// # Errors
    /// [`SessionError::RegistryFull`] when `max_sessions` are live and the
    /// registration would not replace one of them.
    pub async fn register(&self, new: NewSession) -> Result<Registration, SessionError> {
        let variant = new.payload.variant();
        let now = Instant::now();

        let (session, evicted, notice) = {
            let mut inner = self.inner.write().await;
            let key = (variant, new.owner_name.clone());
            let existing = inner.names.get(&key).copied();

            let remaining = inner.sessions.len() - usize::from(existing.is_some());
            if remaining >= self.config.max_sessions {
                return Err(SessionError::RegistryFull(self.config.max_sessions));
            }

            let (evicted, notice) = match existing.and_then(|id| inner.detach(id)) {
                Some((old, notice)) => (Some(old), notice),
                None => (None, None),
            };

            let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let session = Session {
                id,
                owner_name: new.owner_name,
                addresses: new.addresses,
                user_level: new.user_level,
                created_at: now,
                expiry_threshold: self.config.expiry_for(variant),
                last_active_at: now,
                payload: new.payload,
            };
            inner.names.insert(key, id);
            inner.sessions.insert(id, session.clone());
            (session, evicted, notice)
        };

        if let Some(old) = &evicted {
            tracing::info!(
                old_id = %old.id,
                new_id = %session.id,
                %variant,
                owner = %session.owner_name,
                "duplicate login, previous session evicted"
            );
        }
        tracing::info!(
            session_id = %session.id,
            %variant,
            owner = %session.owner_name,
            remote = %session.addresses.remote,
            "session registered"
        );

        self.deliver(notice.into_iter().collect()).await;
        Ok(Registration { session, evicted })
    }

    /// Removes a session. Idempotent: returns `false` if it was not live.
    ///
    /// A player in a game is dropped from its game server's roster, and
    /// the game server is told so (best effort).
    pub async fn remove(&self, id: SessionId) -> bool {
        let detached = self.inner.write().await.detach(id);
        let Some((session, notice)) = detached else {
            return false;
        };

        tracing::info!(
            session_id = %id,
            variant = %session.variant(),
            owner = %session.owner_name,
            "session removed"
        );
        self.deliver(notice.into_iter().collect()).await;
        true
    }

    /// Removes every session owned by `name`, except game servers.
    ///
    /// Returns the removed sessions.
    pub async fn remove_user(&self, name: &str) -> Vec<Session> {
        let (removed, notices) = {
            let mut inner = self.inner.write().await;
            let ids: Vec<SessionId> = Variant::ALL
                .iter()
                .filter(|v| **v != Variant::GameServer)
                .filter_map(|v| inner.names.get(&(*v, name.to_string())).copied())
                .collect();

            let mut removed = Vec::new();
            let mut notices = Vec::new();
            for id in ids {
                if let Some((session, notice)) = inner.detach(id) {
                    removed.push(session);
                    notices.extend(notice);
                }
            }
            (removed, notices)
        };

        for session in &removed {
            tracing::info!(
                session_id = %session.id,
                variant = %session.variant(),
                owner = %session.owner_name,
                "session kicked"
            );
        }
        self.deliver(notices).await;
        removed
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub async fn get(&self, id: SessionId) -> Option<Session> {
        self.inner.read().await.sessions.get(&id).cloned()
    }

    pub async fn find_by_name(&self, variant: Variant, name: &str) -> Option<Session> {
        let inner = self.inner.read().await;
        let id = inner.names.get(&(variant, name.to_string()))?;
        inner.sessions.get(id).cloned()
    }

    /// Snapshot of every live session, ordered by id.
    pub async fn all(&self) -> Vec<Session> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Snapshot of the live sessions of one variant, ordered by id.
    pub async fn all_of(&self, variant: Variant) -> Vec<Session> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.variant() == variant)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    // -----------------------------------------------------------------------
    // Mutations on a single session
    // -----------------------------------------------------------------------

    /// Refreshes `last_active_at` and returns the updated snapshot.
    pub async fn touch(&self, id: SessionId) -> Result<Session, SessionError> {
        let mut inner = self.inner.write().await;
        let session = inner.get_mut(id)?;
        session.refresh(Instant::now());
        Ok(session.clone())
    }

    /// Runs `f` on a player's state and refreshes the session.
    pub async fn update_player<R>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut PlayerState) -> R,
    ) -> Result<R, SessionError> {
        let mut inner = self.inner.write().await;
        let session = inner.get_mut(id)?;
        session.refresh(Instant::now());
        let expected = Variant::Player;
        let err = wrong_variant(session, expected);
        session.player_mut().map(f).ok_or(err)
    }

    /// Runs `f` on a game server's state and refreshes the session.
    pub async fn update_game_server<R>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut GameServerState) -> R,
    ) -> Result<R, SessionError> {
        let mut inner = self.inner.write().await;
        let session = inner.get_mut(id)?;
        session.refresh(Instant::now());
        let err = wrong_variant(session, Variant::GameServer);
        session.game_server_mut().map(f).ok_or(err)
    }

    /// Runs `f` on a game server's state on behalf of someone else. The
    /// server's own activity clock is left alone, so this can't keep a
    /// silent server alive.
    pub async fn modify_game_server<R>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut GameServerState) -> R,
    ) -> Result<R, SessionError> {
        let mut inner = self.inner.write().await;
        let session = inner.get_mut(id)?;
        let err = wrong_variant(session, Variant::GameServer);
        session.game_server_mut().map(f).ok_or(err)
    }

    // -----------------------------------------------------------------------
    // Roster
    // -----------------------------------------------------------------------

    /// Records that `player` joined `server` with `tank_name`.
    ///
    /// Every precondition is checked again under the write lock, since
    /// either session may have changed while the caller was talking to the
    /// game server. Nothing is modified unless all of them hold.
    pub async fn commit_join(
        &self,
        player: SessionId,
        server: SessionId,
        tank_name: &str,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.write().await;

        let player_session = inner.get_mut(player)?;
        let player_name = player_session.owner_name.clone();
        let user_level = player_session.user_level;
        match player_session.player() {
            None => return Err(wrong_variant(player_session, Variant::Player)),
            Some(state) if state.in_game() => {
                return Err(SessionError::AlreadyInGame(player_name));
            }
            Some(_) => {}
        }

        let server_session = inner.get_mut(server)?;
        let server_name = server_session.owner_name.clone();
        let err = wrong_variant(server_session, Variant::GameServer);
        let state = server_session.game_server_mut().ok_or(err)?;
        if state.has_tank(tank_name) {
            return Err(SessionError::AlreadyInGame(tank_name.to_string()));
        }
        if state.is_full() {
            return Err(SessionError::ServerFull {
                server: server_name,
                limit: state.player_limit(),
            });
        }
        state.roster.insert(
            tank_name.to_string(),
            RosterEntry {
                player,
                player_name: player_name.clone(),
                user_level,
            },
        );

        // Checked above; the session cannot have changed under the lock.
        if let Ok(session) = inner.get_mut(player) {
            session.refresh(Instant::now());
            if let Some(state) = session.player_mut() {
                state.game_server = Some(server);
            }
        }

        tracing::info!(
            player = %player_name,
            tank = tank_name,
            server = %server_name,
            "player joined game server"
        );
        Ok(())
    }

    /// Drops `tank_name` from `server`'s roster and clears the owning
    /// player's back-reference. Returns `false` if the tank was not on
    /// the roster.
    pub async fn player_left(&self, server: SessionId, tank_name: &str) -> Result<bool, SessionError> {
        let mut inner = self.inner.write().await;

        let session = inner.get_mut(server)?;
        session.refresh(Instant::now());
        let server_name = session.owner_name.clone();
        let err = wrong_variant(session, Variant::GameServer);
        let state = session.game_server_mut().ok_or(err)?;
        let Some(entry) = state.roster.remove(tank_name) else {
            return Ok(false);
        };

        inner.clear_game_server(entry.player, server);

        tracing::info!(
            player = %entry.player_name,
            tank = tank_name,
            server = %server_name,
            "player left game server"
        );
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Sweeps
    // -----------------------------------------------------------------------

    /// Removes every session idle for longer than its threshold.
    ///
    /// Returns the expired sessions. Failing to notify a game server about
    /// an expired player is logged and does not stop the sweep.
    pub async fn expire_stale(&self) -> Vec<Session> {
        let now = Instant::now();

        let (expired, notices) = {
            let mut inner = self.inner.write().await;
            let stale: Vec<SessionId> = inner
                .sessions
                .values()
                .filter(|s| s.is_stale(now))
                .map(|s| s.id)
                .collect();

            let mut expired = Vec::new();
            let mut notices = Vec::new();
            for id in stale {
                if let Some((session, notice)) = inner.detach(id) {
                    expired.push(session);
                    notices.extend(notice);
                }
            }
            // No point telling a game server that expired in the same pass.
            notices.retain(|n| inner.sessions.contains_key(&n.server));
            (expired, notices)
        };

        for session in &expired {
            tracing::info!(
                session_id = %session.id,
                variant = %session.variant(),
                owner = %session.owner_name,
                idle = ?now.saturating_duration_since(session.last_active_at),
                "session expired"
            );
        }
        self.deliver(notices).await;
        expired
    }

    /// Sends a keep-alive to every game server and removes each one whose
    /// probe fails, for whatever reason.
    ///
    /// Probes run concurrently and outside the lock. A successful probe
    /// does not count as activity of the game server. Returns the ids of
    /// the removed servers.
    pub async fn probe_game_servers(&self) -> Vec<SessionId> {
        let targets: Vec<(SessionId, String, CallbackHandle)> = {
            let inner = self.inner.read().await;
            inner
                .sessions
                .values()
                .filter_map(|s| {
                    s.game_server()
                        .map(|gs| (s.id, s.owner_name.clone(), gs.callback().clone()))
                })
                .collect()
        };
        if targets.is_empty() {
            return Vec::new();
        }

        let probes = targets.into_iter().map(|(id, name, callback)| async move {
            let result = callback.invoke(Callback::KeepAlive).await;
            (id, name, result)
        });

        let mut dead = Vec::new();
        for (id, name, result) in join_all(probes).await {
            match result {
                Ok(()) => tracing::trace!(session_id = %id, server = %name, "liveness probe ok"),
                Err(e) => {
                    tracing::warn!(session_id = %id, server = %name, error = %e, "liveness probe failed, evicting game server");
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut inner = self.inner.write().await;
            for id in &dead {
                inner.detach(*id);
            }
        }
        dead
    }

    /// Evicts a game server that failed a call. Returns `false` if it was
    /// already gone.
    pub async fn evict_game_server(&self, id: SessionId) -> bool {
        let detached = self.inner.write().await.detach(id);
        match detached {
            Some((session, _)) => {
                tracing::info!(session_id = %id, server = %session.owner_name, "game server evicted");
                true
            }
            None => false,
        }
    }

    /// Sends `RemovePlayer` for every notice, concurrently.
    ///
    /// A game server that turns out to be unreachable is evicted.
    async fn deliver(&self, notices: Vec<RosterNotice>) {
        if notices.is_empty() {
            return;
        }

        let calls = notices.into_iter().map(|notice| async move {
            let call = Callback::RemovePlayer {
                tank_name: notice.tank_name.clone(),
            };
            let result = notice.callback.invoke(call).await;
            (notice, result)
        });

        for (notice, result) in join_all(calls).await {
            match result {
                Ok(()) => tracing::debug!(
                    server = %notice.server_name,
                    tank = %notice.tank_name,
                    "game server dropped player"
                ),
                Err(e) if e.is_disconnect() => {
                    tracing::warn!(
                        server = %notice.server_name,
                        tank = %notice.tank_name,
                        error = %e,
                        "could not notify game server, evicting it"
                    );
                    self.evict_game_server(notice.server).await;
                }
                Err(e) => tracing::warn!(
                    server = %notice.server_name,
                    tank = %notice.tank_name,
                    error = %e,
                    "game server refused RemovePlayer"
                ),
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
