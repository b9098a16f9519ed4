//! Integration tests for the WebSocket transport.
//!
//! A real listener on an OS-assigned port and a real `tokio-tungstenite`
//! client on the other end.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use echelon_transport::{Connection, Transport, WebSocketTransport};
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Binds on port 0, connects one client, and returns both ends.
    async fn connected_pair() -> (echelon_transport::WebSocketConnection, ClientWs) {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("bound address");

        let server =
            tokio::spawn(async move { transport.accept().await.expect("should accept") });
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        let conn = server.await.expect("accept task");
        (conn, client)
    }

    #[tokio::test]
    async fn test_websocket_send_and_receive_both_directions() {
        let (conn, mut client) = connected_pair().await;

        client
            .send(Message::Binary(b"hello".to_vec().into()))
            .await
            .unwrap();
        let received = conn.recv().await.unwrap();
        assert_eq!(received.as_deref(), Some(&b"hello"[..]));

        conn.send(b"world").await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply.into_data().as_ref(), b"world");
    }

    #[tokio::test]
    async fn test_websocket_text_frames_are_delivered_as_bytes() {
        let (conn, mut client) = connected_pair().await;

        client.send(Message::Text("{}".into())).await.unwrap();

        assert_eq!(conn.recv().await.unwrap(), Some(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn test_websocket_reports_peer_addresses() {
        let (conn, _client) = connected_pair().await;

        let addrs = conn.addresses();
        assert!(addrs.remote.ip().is_loopback());
        assert!(addrs.local.ip().is_loopback());
        assert_ne!(addrs.remote.port(), addrs.local.port());
    }

    #[tokio::test]
    async fn test_websocket_send_not_blocked_by_pending_recv() {
        let (conn, mut client) = connected_pair().await;
        let conn = Arc::new(conn);

        // Park a reader on the connection.
        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Sending must still go through while the reader waits.
        tokio::time::timeout(Duration::from_secs(2), conn.send(b"ping-from-server"))
            .await
            .expect("send should not wait for recv")
            .unwrap();
        let got = client.next().await.unwrap().unwrap();
        assert_eq!(got.into_data().as_ref(), b"ping-from-server");

        client.close(None).await.unwrap();
        assert_eq!(reader.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_websocket_close_reported_as_none() {
        let (conn, mut client) = connected_pair().await;

        client.close(None).await.unwrap();

        assert_eq!(conn.recv().await.unwrap(), None);
    }
}
