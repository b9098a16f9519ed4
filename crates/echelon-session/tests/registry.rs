//! Integration tests for the session registry: dedup, sweeps, the roster
//! invariant, and roster notices to game servers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use echelon_protocol::{Callback, UserLevel, Variant};
use echelon_session::{
    GameServerState, NewSession, PlayerState, SessionConfig, SessionPayload, SessionRegistry,
};
use echelon_transport::{CallError, CallbackHandle, PeerAddresses, PeerCallback};
use tokio::sync::watch;

// =========================================================================
// Helpers
// =========================================================================

/// Records every call; fails all of them once `fail` is set.
#[derive(Default)]
struct RecordingPeer {
    calls: Mutex<Vec<Callback>>,
    probes: AtomicUsize,
    fail: std::sync::atomic::AtomicBool,
}

impl RecordingPeer {
    fn calls(&self) -> Vec<Callback> {
        self.calls.lock().unwrap().clone()
    }

    fn set_failing(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerCallback for RecordingPeer {
    async fn invoke(&self, call: Callback) -> Result<(), CallError> {
        if matches!(call, Callback::KeepAlive) {
            self.probes.fetch_add(1, Ordering::SeqCst);
        }
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::Disconnected("connection reset".into()));
        }
        Ok(())
    }
}

fn addresses() -> PeerAddresses {
    PeerAddresses::new(
        "10.0.0.5:50000".parse().unwrap(),
        "10.0.0.1:31337".parse().unwrap(),
    )
}

fn player(name: &str) -> NewSession {
    NewSession::new(
        name,
        addresses(),
        UserLevel::MEMBER,
        SessionPayload::Player(PlayerState::default()),
    )
}

fn game_server(name: &str, peer: Arc<RecordingPeer>) -> NewSession {
    let state = GameServerState::new(
        31340,
        true,
        None,
        CallbackHandle::new(peer, CallbackHandle::DEFAULT_TIMEOUT),
    );
    NewSession::new(
        name,
        addresses(),
        UserLevel::MEMBER,
        SessionPayload::GameServer(state),
    )
}

fn config() -> SessionConfig {
    SessionConfig::default()
}

// =========================================================================
// Dedup
// =========================================================================

#[tokio::test]
async fn test_register_duplicate_keeps_latest_and_reports_evicted() {
    let registry = SessionRegistry::new(config());

    let first = registry.register(player("alice")).await.unwrap();
    let second = registry.register(player("alice")).await.unwrap();

    let evicted = second.evicted.expect("first session evicted");
    assert_eq!(evicted.id, first.session.id);

    let all = registry.all().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, second.session.id);
    assert!(registry.get(first.session.id).await.is_none());
}

#[tokio::test]
async fn test_register_duplicate_player_in_game_notifies_server() {
    let registry = SessionRegistry::new(config());
    let peer = Arc::new(RecordingPeer::default());
    let arena = registry
        .register(game_server("Arena1", peer.clone()))
        .await
        .unwrap()
        .session
        .id;
    let alice = registry.register(player("alice")).await.unwrap().session.id;
    registry.commit_join(alice, arena, "aliceTank").await.unwrap();

    registry.register(player("alice")).await.unwrap();

    assert_eq!(
        peer.calls(),
        vec![Callback::RemovePlayer {
            tank_name: "aliceTank".into()
        }]
    );
    let server = registry.get(arena).await.unwrap();
    assert_eq!(server.game_server().unwrap().player_count(), 0);
}

// =========================================================================
// Expiry sweep
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_expire_stale_removes_idle_player() {
    let registry = SessionRegistry::new(config());
    registry.register(player("alice")).await.unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;
    let expired = registry.expire_stale().await;

    assert_eq!(expired.len(), 1);
    assert!(registry.find_by_name(Variant::Player, "alice").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_expire_stale_at_threshold_keeps_session() {
    let registry = SessionRegistry::new(config());
    registry.register(player("alice")).await.unwrap();

    tokio::time::advance(Duration::from_secs(30)).await;

    assert!(registry.expire_stale().await.is_empty());
    assert_eq!(registry.count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweeps_keep_refreshed_session_alive() {
    let registry = Arc::new(SessionRegistry::new(config()));
    let id = registry.register(player("alice")).await.unwrap().session.id;
    let (tx, rx) = watch::channel(false);
    let sweeps = registry.spawn_sweeps(rx);

    // Two minutes of sweeps, with a keep-alive every 10s.
    for _ in 0..12 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        registry.touch(id).await.unwrap();
    }

    assert!(registry.get(id).await.is_some());
    tx.send(true).unwrap();
    sweeps.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_sweeps_remove_idle_session() {
    let registry = Arc::new(SessionRegistry::new(config()));
    let id = registry.register(player("alice")).await.unwrap().session.id;
    let (tx, rx) = watch::channel(false);
    let sweeps = registry.spawn_sweeps(rx);

    tokio::time::sleep(Duration::from_secs(40)).await;

    assert!(registry.get(id).await.is_none());
    tx.send(true).unwrap();
    sweeps.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_expire_player_in_game_removes_roster_entry() {
    let registry = SessionRegistry::new(config());
    let peer = Arc::new(RecordingPeer::default());
    let arena = registry
        .register(game_server("Arena1", peer.clone()))
        .await
        .unwrap()
        .session
        .id;
    let alice = registry.register(player("alice")).await.unwrap().session.id;
    registry.commit_join(alice, arena, "aliceTank").await.unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;
    let expired = registry.expire_stale().await;

    assert_eq!(expired.len(), 1);
    let server = registry.get(arena).await.unwrap();
    assert!(!server.game_server().unwrap().has_tank("aliceTank"));
    assert!(peer.calls().contains(&Callback::RemovePlayer {
        tank_name: "aliceTank".into()
    }));
}

// =========================================================================
// Liveness sweep
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_probe_game_servers_evicts_only_failing_server() {
    let registry = SessionRegistry::new(config());
    let healthy = Arc::new(RecordingPeer::default());
    let broken = Arc::new(RecordingPeer::default());
    broken.set_failing();
    registry.register(game_server("Arena1", healthy.clone())).await.unwrap();
    registry.register(game_server("Arena2", broken.clone())).await.unwrap();

    let evicted = registry.probe_game_servers().await;

    assert_eq!(evicted.len(), 1);
    assert!(registry.find_by_name(Variant::GameServer, "Arena1").await.is_some());
    assert!(registry.find_by_name(Variant::GameServer, "Arena2").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_liveness_sweep_evicts_server_that_stops_answering() {
    let registry = Arc::new(SessionRegistry::new(config()));
    let peer = Arc::new(RecordingPeer::default());
    let arena = registry
        .register(game_server("Arena1", peer.clone()))
        .await
        .unwrap()
        .session
        .id;
    let (tx, rx) = watch::channel(false);
    let sweeps = registry.spawn_sweeps(rx);

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert!(registry.get(arena).await.is_some());
    assert!(peer.probes.load(Ordering::SeqCst) >= 2);

    peer.set_failing();
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(registry.get(arena).await.is_none());
    tx.send(true).unwrap();
    sweeps.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_success_does_not_refresh_game_server() {
    let registry = SessionRegistry::new(config());
    let peer = Arc::new(RecordingPeer::default());
    let before = registry
        .register(game_server("Arena1", peer))
        .await
        .unwrap()
        .session;

    tokio::time::advance(Duration::from_secs(60)).await;
    registry.probe_game_servers().await;

    let after = registry.get(before.id).await.unwrap();
    assert_eq!(after.last_active_at(), before.last_active_at());
}

// =========================================================================
// Roster invariant
// =========================================================================

#[tokio::test]
async fn test_commit_join_sets_both_sides() {
    let registry = SessionRegistry::new(config());
    let peer = Arc::new(RecordingPeer::default());
    let arena = registry
        .register(game_server("Arena1", peer))
        .await
        .unwrap()
        .session
        .id;
    let alice = registry.register(player("alice")).await.unwrap().session.id;

    registry.commit_join(alice, arena, "aliceTank").await.unwrap();

    let alice = registry.get(alice).await.unwrap();
    assert_eq!(alice.player().unwrap().game_server(), Some(arena));
    let server = registry.get(arena).await.unwrap();
    let entry = &server.game_server().unwrap().roster()["aliceTank"];
    assert_eq!(entry.player, alice.id);
    assert_eq!(entry.player_name, "alice");
}

#[tokio::test]
async fn test_commit_join_duplicate_tank_leaves_roster_unchanged() {
    let registry = SessionRegistry::new(config());
    let peer = Arc::new(RecordingPeer::default());
    let arena = registry
        .register(game_server("Arena1", peer))
        .await
        .unwrap()
        .session
        .id;
    let alice = registry.register(player("alice")).await.unwrap().session.id;
    let bob = registry.register(player("bob")).await.unwrap().session.id;
    registry.commit_join(alice, arena, "sharedTank").await.unwrap();

    let result = registry.commit_join(bob, arena, "sharedTank").await;

    assert!(result.is_err());
    let server = registry.get(arena).await.unwrap();
    assert_eq!(server.game_server().unwrap().player_count(), 1);
    assert!(!registry.get(bob).await.unwrap().in_game());
}

#[tokio::test]
async fn test_commit_join_after_server_evicted_fails() {
    let registry = SessionRegistry::new(config());
    let peer = Arc::new(RecordingPeer::default());
    let arena = registry
        .register(game_server("Arena1", peer))
        .await
        .unwrap()
        .session
        .id;
    let alice = registry.register(player("alice")).await.unwrap().session.id;
    registry.evict_game_server(arena).await;

    assert!(registry.commit_join(alice, arena, "aliceTank").await.is_err());
    assert!(!registry.get(alice).await.unwrap().in_game());
}

#[tokio::test]
async fn test_remove_player_in_game_notifies_server() {
    let registry = SessionRegistry::new(config());
    let peer = Arc::new(RecordingPeer::default());
    let arena = registry
        .register(game_server("Arena1", peer.clone()))
        .await
        .unwrap()
        .session
        .id;
    let alice = registry.register(player("alice")).await.unwrap().session.id;
    registry.commit_join(alice, arena, "aliceTank").await.unwrap();

    assert!(registry.remove(alice).await);

    assert_eq!(
        peer.calls(),
        vec![Callback::RemovePlayer {
            tank_name: "aliceTank".into()
        }]
    );
}

#[tokio::test]
async fn test_remove_player_unreachable_server_is_evicted() {
    let registry = SessionRegistry::new(config());
    let peer = Arc::new(RecordingPeer::default());
    let arena = registry
        .register(game_server("Arena1", peer.clone()))
        .await
        .unwrap()
        .session
        .id;
    let alice = registry.register(player("alice")).await.unwrap().session.id;
    registry.commit_join(alice, arena, "aliceTank").await.unwrap();
    peer.set_failing();

    assert!(registry.remove(alice).await, "removal itself still succeeds");

    assert!(registry.get(arena).await.is_none());
}
