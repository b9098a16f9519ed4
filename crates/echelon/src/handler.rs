//! Per-connection handler: login handshake, request routing, and replies
//! to server-initiated calls.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Answer any `Auth` frames, then receive `Login` or
//!      `JoinAsGameServer` → register a session
//!   2. Send `LoginAck` (or `Error` and close)
//!   3. Loop: answer `Request`s, route `Reply`s to waiting calls, and
//!      close once the session has been removed elsewhere
//!
//! Requests are answered on their own tasks, so the read loop is always
//! free to route a `Reply`. Responses carry the request's `call_id` and
//! may go out in a different order than the requests came in.

use std::sync::Arc;

use tokio::task::JoinSet;

use echelon_protocol::{
    AuthRequest, ClientMessage, Codec, ErrorKind, ProtocolError, Request, Response,
    ServerMessage, SessionId,
};
use echelon_session::{RelayEndpoint, Session};
use echelon_store::MAX_MAP_SIZE;
use echelon_transport::{Connection, WebSocketConnection};

use crate::auth::GameServerJoin;
use crate::remote::{PendingCalls, RemotePeer};
use crate::server::ServerState;
use crate::{EchelonError, ServiceError};

/// Drop guard that removes the connection's session when the handler
/// exits, and fails the calls still waiting on this connection.
///
/// Since `Drop` is synchronous, the removal runs on a spawned task.
struct SessionGuard<C: Codec> {
    session_id: SessionId,
    pending: Arc<PendingCalls>,
    state: Arc<ServerState<C>>,
}

impl<C: Codec> Drop for SessionGuard<C> {
    fn drop(&mut self) {
        self.pending.close();
        let session_id = self.session_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            if state.echelon.registry().remove(session_id).await {
                tracing::debug!(%session_id, "session removed with its connection");
            }
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
) -> Result<(), EchelonError>
where
    C: Codec + Clone,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, addresses = %conn.addresses(), "handling new connection");

    // --- Step 1: Login ---
    let pending = Arc::new(PendingCalls::new());
    let Some(session) = perform_handshake(&conn, &state, &pending).await? else {
        return Ok(());
    };
    let session_id = session.id;
    let _guard = SessionGuard {
        session_id,
        pending: Arc::clone(&pending),
        state: Arc::clone(&state),
    };

    send_message(&conn, &state.codec, &ServerMessage::LoginAck { session_id }).await?;
    pending.open();
    tracing::info!(%conn_id, %session_id, variant = %session.variant(), owner = %session.owner_name, "peer logged in");

    // --- Step 2: Message loop ---
    let mut idle_check = tokio::time::interval(state.idle_check_interval);
    idle_check.tick().await;
    let mut in_flight: JoinSet<Result<bool, EchelonError>> = JoinSet::new();

    loop {
        tokio::select! {
            received = conn.recv() => {
                let data = match received {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(%session_id, "connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(%session_id, error = %e, "recv error");
                        break;
                    }
                };
                handle_frame(&conn, &state, &pending, &mut in_flight, session_id, &data).await?;
            }
            Some(answered) = in_flight.join_next() => {
                match answered {
                    Ok(Ok(true)) => {}
                    Ok(Ok(false)) => break,
                    Ok(Err(e)) => {
                        tracing::debug!(%session_id, error = %e, "could not answer request");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(%session_id, error = %e, "request task failed");
                        break;
                    }
                }
            }
            _ = idle_check.tick() => {
                if state.echelon.registry().get(session_id).await.is_none() {
                    tracing::info!(%session_id, "session is gone, closing connection");
                    let _ = conn.close().await;
                    break;
                }
            }
        }
    }

    // Requests still running finish on their own; their answers go nowhere.
    in_flight.detach_all();
    // _guard drops here → session removal fires.
    Ok(())
}

/// Answers `Auth` frames until the login frame arrives, then registers
/// the session. The whole exchange shares one deadline.
///
/// Returns `Ok(None)` when the peer was refused; it has already been sent
/// the error.
async fn perform_handshake<C>(
    conn: &Arc<WebSocketConnection>,
    state: &Arc<ServerState<C>>,
    pending: &Arc<PendingCalls>,
) -> Result<Option<Session>, EchelonError>
where
    C: Codec + Clone,
{
    let deadline = tokio::time::Instant::now() + state.handshake_timeout;
    let addresses = conn.addresses();

    let message = loop {
        let data = match tokio::time::timeout_at(deadline, conn.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                return Err(ProtocolError::InvalidMessage("connection closed before login".into()).into());
            }
            Ok(Err(e)) => return Err(EchelonError::Transport(e)),
            Err(_) => {
                return Err(ProtocolError::InvalidMessage("login timed out".into()).into());
            }
        };

        match state.codec.decode::<ClientMessage>(&data) {
            Ok(ClientMessage::Auth { call_id, request }) => {
                match answer_auth(state, request).await {
                    Ok(response) => {
                        send_message(conn, &state.codec, &ServerMessage::Response { call_id, response })
                            .await?;
                    }
                    Err(e) => send_error(conn, &state.codec, Some(call_id), &e).await?,
                }
            }
            decoded => break decoded,
        }
    };

    let result = match message {
        Ok(ClientMessage::Login {
            variant,
            username,
            password,
        }) => {
            state
                .echelon
                .gateway()
                .login(variant, &username, &password, addresses)
                .await
        }
        Ok(ClientMessage::JoinAsGameServer {
            name,
            secret,
            port,
            using_relay,
            relay_host,
            relay_port,
        }) => match relay_endpoint(using_relay, relay_host, relay_port) {
            Ok(relay) => {
                let peer = Arc::new(RemotePeer::new(
                    Arc::clone(conn),
                    state.codec.clone(),
                    Arc::clone(pending),
                ));
                let join = GameServerJoin {
                    name,
                    secret,
                    port,
                    relay,
                };
                state
                    .echelon
                    .gateway()
                    .join_as_game_server(join, peer, addresses)
                    .await
            }
            Err(e) => Err(e),
        },
        Ok(_) => Err(ServiceError::bad_information(
            "first frame must be Login or JoinAsGameServer",
        )),
        Err(e) => {
            tracing::debug!(remote = %addresses.remote, error = %e, "undecodable login frame");
            Err(ServiceError::bad_information("malformed login frame"))
        }
    };

    match result {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            send_error(conn, &state.codec, None, &e).await?;
            let _ = conn.close().await;
            Ok(None)
        }
    }
}

/// The operations a connection may use before it logs in.
async fn answer_auth<C: Codec>(
    state: &ServerState<C>,
    request: AuthRequest,
) -> Result<Response, ServiceError> {
    match request {
        AuthRequest::CreateAccount {
            username,
            password,
            email,
        } => {
            state
                .echelon
                .gateway()
                .create_account(&username, &password, &email)
                .await?;
            Ok(Response::Done)
        }
        AuthRequest::CheckCurrentVersion => Ok(Response::Version {
            version: state.echelon.client_version().to_string(),
        }),
        AuthRequest::CheckMaxMapSize => Ok(Response::Size {
            bytes: u64::try_from(MAX_MAP_SIZE).unwrap_or(u64::MAX),
        }),
    }
}

fn relay_endpoint(
    using_relay: bool,
    host: Option<String>,
    port: Option<u16>,
) -> Result<Option<RelayEndpoint>, ServiceError> {
    if !using_relay {
        return Ok(None);
    }
    match (host, port) {
        (Some(host), Some(port)) if !host.is_empty() => Ok(Some(RelayEndpoint { host, port })),
        _ => Err(ServiceError::bad_information(
            "a relay needs relay_host and relay_port",
        )),
    }
}

/// Handles one frame after login. Requests are spawned onto `in_flight`;
/// everything else is dealt with before returning.
async fn handle_frame<C>(
    conn: &Arc<WebSocketConnection>,
    state: &Arc<ServerState<C>>,
    pending: &PendingCalls,
    in_flight: &mut JoinSet<Result<bool, EchelonError>>,
    session_id: SessionId,
    data: &[u8],
) -> Result<(), EchelonError>
where
    C: Codec + Clone,
{
    let message: ClientMessage = match state.codec.decode(data) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(%session_id, error = %e, "failed to decode frame");
            send_error(conn, &state.codec, None, &ServiceError::bad_information("malformed frame"))
                .await?;
            return Ok(());
        }
    };

    match message {
        ClientMessage::Request { call_id, request } => {
            in_flight.spawn(answer_request(
                Arc::clone(conn),
                Arc::clone(state),
                session_id,
                call_id,
                request,
            ));
        }
        ClientMessage::Reply { call_id, outcome } => {
            if !pending.resolve(call_id, outcome) {
                tracing::debug!(%session_id, call_id, "reply for unknown or abandoned call");
            }
        }
        ClientMessage::Login { .. } | ClientMessage::JoinAsGameServer { .. } => {
            send_error(conn, &state.codec, None, &ServiceError::bad_information("already logged in"))
                .await?;
        }
        ClientMessage::Auth { call_id, .. } => {
            send_error(
                conn,
                &state.codec,
                Some(call_id),
                &ServiceError::bad_information("already logged in"),
            )
            .await?;
        }
    }
    Ok(())
}

/// Dispatches one request and sends the answer. Returns `false` once the
/// session has logged out.
async fn answer_request<C>(
    conn: Arc<WebSocketConnection>,
    state: Arc<ServerState<C>>,
    session_id: SessionId,
    call_id: u64,
    request: Request,
) -> Result<bool, EchelonError>
where
    C: Codec + Clone,
{
    let logout = matches!(request, Request::Logout);
    match state.echelon.dispatch(session_id, request).await {
        Ok(response) => {
            send_message(&conn, &state.codec, &ServerMessage::Response { call_id, response }).await?;
            Ok(!logout)
        }
        Err(e) => {
            send_error(&conn, &state.codec, Some(call_id), &e).await?;
            Ok(true)
        }
    }
}

async fn send_message(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    message: &ServerMessage,
) -> Result<(), EchelonError> {
    let bytes = codec.encode(message)?;
    conn.send(&bytes).await?;
    Ok(())
}

/// Sends a `ServerMessage::Error` carrying the client-visible part of `err`.
async fn send_error(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    call_id: Option<u64>,
    err: &ServiceError,
) -> Result<(), EchelonError> {
    let kind: ErrorKind = err.kind();
    let message = ServerMessage::Error {
        call_id,
        kind,
        message: err.client_message(),
    };
    send_message(conn, codec, &message).await
}
