//! Integration tests for the WebSocket front end: login handshake,
//! request/response, server-initiated calls, and connection teardown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use echelon::password::hash_password;
use echelon::prelude::*;
use echelon_protocol::{AuthRequest, CallOutcome, Callback, MatchStatistics, TankAttributes};
use echelon_store::{MapHandle, Row, Statement, StoreError, Value};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    addr: String,
    echelon: Arc<Echelon>,
    _shutdown: watch::Sender<bool>,
}

/// Holds every tank-statistics read until the test hands out a permit.
struct GatedDatabase {
    inner: Arc<MemoryDatabase>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl Database for GatedDatabase {
    async fn query(&self, statement: Statement, args: &[Value]) -> Result<Vec<Row>, StoreError> {
        if statement == Statement::GetTankStatistics {
            let permit = self.gate.acquire().await.expect("gate open");
            permit.forget();
        }
        self.inner.query(statement, args).await
    }

    async fn execute(&self, statement: Statement, args: &[Value]) -> Result<u64, StoreError> {
        self.inner.execute(statement, args).await
    }
}

/// Starts a server on a random port with alice, root and one map.
async fn start_server() -> TestServer {
    start_server_with(seeded_database().await).await
}

async fn seeded_database() -> Arc<MemoryDatabase> {
    let database = Arc::new(MemoryDatabase::new());
    database
        .insert_account("alice", &hash_password("pw"), UserLevel::MEMBER)
        .await;
    database
        .insert_account("root", &hash_password("pw"), UserLevel::ADMINISTRATOR)
        .await;
    database
        .insert_tank(
            "alice",
            TankAttributes {
                name: "aliceTank".into(),
                weapon_id: 1,
                speed_factor: 1.0,
                armor_factor: 1.0,
                color: 0xff0000,
                points: 0,
            },
        )
        .await;
    database
}

async fn start_server_with(database: Arc<dyn Database>) -> TestServer {
    let maps = Arc::new(MemoryMapStore::new());
    maps.insert(MapHandle::new("arena.vtmap", "Arena", b"tiles".to_vec()))
        .await;

    let config = EchelonConfig {
        gateway: GatewayConfig {
            secret: "s3cret".into(),
            ..GatewayConfig::default()
        },
        ..EchelonConfig::default()
    };
    let server = EchelonServer::builder()
        .bind("127.0.0.1:0")
        .config(config)
        .idle_check_interval(Duration::from_millis(50))
        .build(database, maps, Arc::new(LogNotifier))
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let echelon = Arc::clone(server.echelon());
    let (shutdown, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let _ = server.run_until(shutdown_rx).await;
    });

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    TestServer {
        addr,
        echelon,
        _shutdown: shutdown,
    }
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, msg: &ClientMessage) {
    let bytes = serde_json::to_vec(msg).expect("encode");
    ws.send(Message::Binary(bytes.into())).await.expect("send");
}

async fn recv(ws: &mut ClientWs) -> ServerMessage {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("frame within 5s")
        .expect("stream open")
        .expect("frame ok");
    serde_json::from_slice(&msg.into_data()).expect("decode")
}

async fn login(ws: &mut ClientWs, variant: Variant, name: &str, password: &str) -> ServerMessage {
    send(
        ws,
        &ClientMessage::Login {
            variant,
            username: name.into(),
            password: password.into(),
        },
    )
    .await;
    recv(ws).await
}

async fn request(ws: &mut ClientWs, call_id: u64, request: Request) -> ServerMessage {
    send(ws, &ClientMessage::Request { call_id, request }).await;
    recv(ws).await
}

async fn join_as_game_server(addr: &str) -> (ClientWs, SessionId) {
    let mut ws = connect(addr).await;
    send(
        &mut ws,
        &ClientMessage::JoinAsGameServer {
            name: "Arena1".into(),
            secret: "s3cret".into(),
            port: 31340,
            using_relay: false,
            relay_host: None,
            relay_port: None,
        },
    )
    .await;
    let session_id = match recv(&mut ws).await {
        ServerMessage::LoginAck { session_id } => session_id,
        other => panic!("expected LoginAck first, got {other:?}"),
    };
    (ws, session_id)
}

/// Reads the next server-initiated call and answers it with `Ok`.
async fn answer_call(ws: &mut ClientWs) -> Callback {
    match recv(ws).await {
        ServerMessage::Call { call_id, call } => {
            send(
                ws,
                &ClientMessage::Reply {
                    call_id,
                    outcome: CallOutcome::Ok,
                },
            )
            .await;
            call
        }
        other => panic!("expected Call, got {other:?}"),
    }
}

/// Runs a game server client that accepts every call and reports it.
async fn spawn_game_server(addr: &str) -> (SessionId, mpsc::UnboundedReceiver<Callback>) {
    let (mut ws, session_id) = join_as_game_server(addr).await;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(Ok(frame)) = ws.next().await {
            let Ok(ServerMessage::Call { call_id, call }) = serde_json::from_slice(&frame.into_data())
            else {
                continue;
            };
            let _ = tx.send(call);
            send(
                &mut ws,
                &ClientMessage::Reply {
                    call_id,
                    outcome: CallOutcome::Ok,
                },
            )
            .await;
        }
    });
    (session_id, rx)
}

// =========================================================================
// Login
// =========================================================================

#[tokio::test]
async fn test_login_success_acks_session() {
    let server = start_server().await;
    let mut ws = connect(&server.addr).await;

    match login(&mut ws, Variant::Player, "alice", "pw").await {
        ServerMessage::LoginAck { session_id } => {
            assert!(server.echelon.registry().get(session_id).await.is_some());
        }
        other => panic!("expected LoginAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_login_bad_password_gets_unified_error() {
    let server = start_server().await;
    let mut ws = connect(&server.addr).await;

    match login(&mut ws, Variant::Player, "alice", "wrong").await {
        ServerMessage::Error {
            call_id,
            kind,
            message,
        } => {
            assert_eq!(call_id, None);
            assert_eq!(kind, ErrorKind::PermissionDenied);
            assert_eq!(message, echelon::BAD_CREDENTIALS);
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_request_before_login_is_bad_information() {
    let server = start_server().await;
    let mut ws = connect(&server.addr).await;

    match request(&mut ws, 1, Request::KeepAlive).await {
        ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::BadInformation),
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_game_server_bad_secret_is_refused() {
    let server = start_server().await;
    let mut ws = connect(&server.addr).await;

    send(
        &mut ws,
        &ClientMessage::JoinAsGameServer {
            name: "Arena1".into(),
            secret: "guess".into(),
            port: 31340,
            using_relay: false,
            relay_host: None,
            relay_port: None,
        },
    )
    .await;

    match recv(&mut ws).await {
        ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::PermissionDenied),
        other => panic!("expected Error, got {other:?}"),
    }
}

async fn auth(ws: &mut ClientWs, call_id: u64, request: AuthRequest) -> ServerMessage {
    send(ws, &ClientMessage::Auth { call_id, request }).await;
    recv(ws).await
}

#[tokio::test]
async fn test_auth_create_account_then_login_same_connection() {
    let server = start_server().await;
    let mut ws = connect(&server.addr).await;

    let created = auth(
        &mut ws,
        1,
        AuthRequest::CreateAccount {
            username: "carol".into(),
            password: "pw".into(),
            email: "carol@example.org".into(),
        },
    )
    .await;
    assert_eq!(
        created,
        ServerMessage::Response {
            call_id: 1,
            response: Response::Done
        }
    );

    match login(&mut ws, Variant::Player, "carol", "pw").await {
        ServerMessage::LoginAck { session_id } => {
            assert!(server.echelon.registry().get(session_id).await.is_some());
        }
        other => panic!("expected LoginAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_auth_create_account_taken_name_keeps_connection_open() {
    let server = start_server().await;
    let mut ws = connect(&server.addr).await;

    let taken = auth(
        &mut ws,
        4,
        AuthRequest::CreateAccount {
            username: "alice".into(),
            password: "pw".into(),
            email: "alice@example.org".into(),
        },
    )
    .await;
    match taken {
        ServerMessage::Error { call_id, kind, .. } => {
            assert_eq!(call_id, Some(4));
            assert_eq!(kind, ErrorKind::BadInformation);
        }
        other => panic!("expected Error, got {other:?}"),
    }

    assert!(matches!(
        login(&mut ws, Variant::Player, "alice", "pw").await,
        ServerMessage::LoginAck { .. }
    ));
}

#[tokio::test]
async fn test_check_current_version_before_and_after_login() {
    let server = start_server().await;
    let mut ws = connect(&server.addr).await;
    let expected = Response::Version {
        version: echelon::auth::DEFAULT_CLIENT_VERSION.into(),
    };

    assert_eq!(
        auth(&mut ws, 1, AuthRequest::CheckCurrentVersion).await,
        ServerMessage::Response {
            call_id: 1,
            response: expected.clone()
        }
    );
    login(&mut ws, Variant::Player, "alice", "pw").await;
    assert_eq!(
        request(&mut ws, 2, Request::CheckCurrentVersion).await,
        ServerMessage::Response {
            call_id: 2,
            response: expected
        }
    );

    match auth(&mut ws, 3, AuthRequest::CheckMaxMapSize).await {
        ServerMessage::Error { call_id, message, .. } => {
            assert_eq!(call_id, Some(3));
            assert_eq!(message, "already logged in");
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

// =========================================================================
// Requests and calls
// =========================================================================

#[tokio::test]
async fn test_request_join_over_websocket_reaches_game_server() {
    let server = start_server().await;
    let (_, mut calls) = spawn_game_server(&server.addr).await;

    let pushed = calls.recv().await.expect("map list pushed");
    assert_eq!(
        pushed,
        Callback::UpdateMapList {
            filenames: vec!["arena.vtmap".into()]
        }
    );

    let mut ws = connect(&server.addr).await;
    login(&mut ws, Variant::Player, "alice", "pw").await;
    let selected = request(
        &mut ws,
        1,
        Request::SelectTank {
            tank_name: "aliceTank".into(),
        },
    )
    .await;
    assert_eq!(
        selected,
        ServerMessage::Response {
            call_id: 1,
            response: Response::Done
        }
    );

    let token = match request(
        &mut ws,
        2,
        Request::RequestJoin {
            server_name: "Arena1".into(),
        },
    )
    .await
    {
        ServerMessage::Response {
            call_id: 2,
            response: Response::Token { token },
        } => token,
        other => panic!("expected Token, got {other:?}"),
    };

    match calls.recv().await.expect("AddPlayer delivered") {
        Callback::AddPlayer {
            token: sent,
            player_name,
            ..
        } => {
            assert_eq!(sent, token);
            assert_eq!(player_name, "alice");
        }
        other => panic!("expected AddPlayer, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reply_is_routed_while_a_request_is_still_running() {
    let gate = Arc::new(Semaphore::new(0));
    let database = Arc::new(GatedDatabase {
        inner: seeded_database().await,
        gate: Arc::clone(&gate),
    });
    let server = start_server_with(database).await;
    let (mut gs, _) = join_as_game_server(&server.addr).await;
    assert!(matches!(answer_call(&mut gs).await, Callback::UpdateMapList { .. }));

    // Parked on the gate until the end of the test.
    send(
        &mut gs,
        &ClientMessage::Request {
            call_id: 1,
            request: Request::SendStatistics {
                records: vec![MatchStatistics {
                    tank_name: "aliceTank".into(),
                    kills: 2,
                    ..MatchStatistics::default()
                }],
            },
        },
    )
    .await;

    let mut player = connect(&server.addr).await;
    login(&mut player, Variant::Player, "alice", "pw").await;
    request(
        &mut player,
        1,
        Request::SelectTank {
            tank_name: "aliceTank".into(),
        },
    )
    .await;
    let joining = tokio::spawn(async move {
        request(
            &mut player,
            2,
            Request::RequestJoin {
                server_name: "Arena1".into(),
            },
        )
        .await
    });

    assert!(matches!(answer_call(&mut gs).await, Callback::AddPlayer { .. }));
    match joining.await.expect("join task") {
        ServerMessage::Response {
            call_id: 2,
            response: Response::Token { .. },
        } => {}
        other => panic!("expected Token, got {other:?}"),
    }

    gate.add_permits(1);
    assert_eq!(
        recv(&mut gs).await,
        ServerMessage::Response {
            call_id: 1,
            response: Response::Done
        }
    );
}

#[tokio::test]
async fn test_download_map_returns_bytes() {
    let server = start_server().await;
    let mut ws = connect(&server.addr).await;
    login(&mut ws, Variant::Player, "alice", "pw").await;

    let reply = request(
        &mut ws,
        7,
        Request::DownloadMap {
            filename: "arena.vtmap".into(),
        },
    )
    .await;

    match reply {
        ServerMessage::Response {
            call_id: 7,
            response: Response::Map { title, data, .. },
        } => {
            assert_eq!(title, "Arena");
            assert_eq!(data, b"tiles".to_vec());
        }
        other => panic!("expected Map, got {other:?}"),
    }
}

#[tokio::test]
async fn test_wrong_variant_request_gets_error_with_call_id() {
    let server = start_server().await;
    let mut ws = connect(&server.addr).await;
    login(&mut ws, Variant::Admin, "root", "pw").await;

    match request(&mut ws, 3, Request::GetTankList).await {
        ServerMessage::Error { call_id, kind, .. } => {
            assert_eq!(call_id, Some(3));
            assert_eq!(kind, ErrorKind::PermissionDenied);
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

// =========================================================================
// Teardown
// =========================================================================

#[tokio::test]
async fn test_closed_connection_removes_session() {
    let server = start_server().await;
    let mut ws = connect(&server.addr).await;
    let session_id = match login(&mut ws, Variant::Player, "alice", "pw").await {
        ServerMessage::LoginAck { session_id } => session_id,
        other => panic!("expected LoginAck, got {other:?}"),
    };

    ws.close(None).await.expect("close");
    drop(ws);

    let registry = server.echelon.registry();
    for _ in 0..50 {
        if registry.get(session_id).await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session still registered after the connection closed");
}

#[tokio::test]
async fn test_removed_session_closes_connection() {
    let server = start_server().await;
    let mut ws = connect(&server.addr).await;
    let session_id = match login(&mut ws, Variant::Player, "alice", "pw").await {
        ServerMessage::LoginAck { session_id } => session_id,
        other => panic!("expected LoginAck, got {other:?}"),
    };

    server.echelon.registry().remove(session_id).await;

    let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("server closes within the idle check");
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}
