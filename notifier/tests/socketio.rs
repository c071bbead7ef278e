//! Socket.IO transport tests against a scripted loopback server

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use openapi_client::models::VersionDescriptor;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use upnotifier::channel::socketio::SocketIoConnector;
use upnotifier::channel::{ChannelConnector, ChannelEvent};
use upnotifier::errors::UpdateError;

const OPEN: &str =
    r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

async fn send(ws: &mut WebSocketStream<TcpStream>, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

async fn recv_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
            Some(Ok(_)) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

fn connector(addr: SocketAddr) -> SocketIoConnector {
    SocketIoConnector::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_handshake_events_and_close() {
    let (listener, addr) = listen().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send(&mut ws, OPEN).await;
        assert_eq!(recv_text(&mut ws).await, "40");
        send(&mut ws, r#"40{"sid":"n1"}"#).await;

        send(&mut ws, r#"42["app-updated",{"version":"Build #3","commit":"abc"}]"#).await;
        send(&mut ws, r#"42["stats",{"clients":4}]"#).await;
        send(&mut ws, r#"42["app-updated",{"project":"missing version"}]"#).await;
        send(&mut ws, "2").await;
        assert_eq!(recv_text(&mut ws).await, "3");
        send(&mut ws, r#"42["deployment-history",[{"version":"Build #2"},{"version":"Build #3"}]]"#)
            .await;
        send(&mut ws, "41").await;
    });

    let mut session = connector(addr).connect().await.unwrap();

    match session.next_event().await.unwrap() {
        Some(ChannelEvent::AppUpdated(d)) => {
            assert_eq!(d.version, "Build #3");
            assert_eq!(d.commit.as_deref(), Some("abc"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // unknown and malformed events are skipped
    assert_eq!(
        session.next_event().await.unwrap(),
        Some(ChannelEvent::DeploymentHistory(vec![
            VersionDescriptor::new("Build #2"),
            VersionDescriptor::new("Build #3"),
        ]))
    );

    assert_eq!(session.next_event().await.unwrap(), None);
    session.close().await;

    server.await.unwrap();
}

#[tokio::test]
async fn test_client_sends_disconnect_on_close() {
    let (listener, addr) = listen().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send(&mut ws, OPEN).await;
        assert_eq!(recv_text(&mut ws).await, "40");
        send(&mut ws, "40").await;
        recv_text(&mut ws).await
    });

    let mut session = connector(addr).connect().await.unwrap();
    session.close().await;
    session.close().await;

    assert_eq!(server.await.unwrap(), "41");
}

#[tokio::test]
async fn test_connect_error_is_handshake_failure() {
    let (listener, addr) = listen().await;

    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send(&mut ws, OPEN).await;
        let _ = recv_text(&mut ws).await;
        send(&mut ws, r#"44{"message":"Not authorized"}"#).await;
        let _ = ws.next().await;
    });

    match connector(addr).connect().await {
        Err(UpdateError::Handshake(message)) => assert!(message.contains("Not authorized")),
        Err(e) => panic!("unexpected error: {:?}", e),
        Ok(_) => panic!("handshake should fail"),
    }
}

#[tokio::test]
async fn test_refused_connection_is_connectivity_error() {
    let (listener, addr) = listen().await;
    drop(listener);

    match connector(addr).connect().await {
        Err(e) => assert!(e.is_connectivity(), "{:?}", e),
        Ok(_) => panic!("connection should fail"),
    }
}
