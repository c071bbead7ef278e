//! Socket.IO client over the Engine.IO WebSocket transport

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use http::header::{HeaderValue, USER_AGENT};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::packet::{self, EnginePacket, Handshake, SocketPacket};
use crate::channel::{ChannelConnector, ChannelEvent, ChannelSession};
use crate::errors::UpdateError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for a Socket.IO server
#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    url: Url,
    connect_timeout: Duration,
}

impl SocketIoConnector {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, UpdateError> {
        Ok(Self {
            url: build_socket_url(base_url)?,
            connect_timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn open(&self) -> Result<SocketIoSession, UpdateError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| UpdateError::ConfigError(e.to_string()))?;
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static("upnotifier"));

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| UpdateError::Connectivity(format!("{}: {}", self.url, e)))?;

        let mut session = SocketIoSession {
            ws,
            handshake: None,
            closed: false,
        };
        session.handshake().await?;
        Ok(session)
    }
}

#[async_trait]
impl ChannelConnector for SocketIoConnector {
    async fn connect(&self) -> Result<Box<dyn ChannelSession>, UpdateError> {
        info!("Connecting to Socket.IO: {}", self.url);

        let session = tokio::time::timeout(self.connect_timeout, self.open())
            .await
            .map_err(|_| {
                UpdateError::Connectivity(format!(
                    "connection timed out after {:?}",
                    self.connect_timeout
                ))
            })??;

        Ok(Box::new(session))
    }
}

/// Derive the Engine.IO WebSocket endpoint from the server base URL
pub fn build_socket_url(base_url: &str) -> Result<Url, UpdateError> {
    let mut url = Url::parse(base_url).map_err(|e| UpdateError::ConfigError(e.to_string()))?;

    // Change http/https to ws/wss
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(UpdateError::ConfigError("Invalid socket URL scheme".to_string())),
    };

    url.set_scheme(scheme)
        .map_err(|_| UpdateError::ConfigError("Failed to set scheme".to_string()))?;

    url.set_path(&format!("{}/socket.io/", url.path().trim_end_matches('/')));
    url.set_query(Some("EIO=4&transport=websocket"));

    Ok(url)
}

/// An open Socket.IO session on the default namespace
pub struct SocketIoSession {
    ws: WsStream,
    handshake: Option<Handshake>,
    closed: bool,
}

impl SocketIoSession {
    async fn send(&mut self, packet: EnginePacket) -> Result<(), UpdateError> {
        let text = packet::encode(&packet);
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| UpdateError::Connectivity(e.to_string()))
    }

    /// Read the next text frame, answering pings along the way
    async fn recv(&mut self) -> Result<Option<EnginePacket>, UpdateError> {
        loop {
            let frame = match self.liveness_timeout() {
                Some(limit) => tokio::time::timeout(limit, self.ws.next())
                    .await
                    .map_err(|_| UpdateError::Connectivity("ping timeout".to_string()))?,
                None => self.ws.next().await,
            };

            let text = match frame {
                None => return Ok(None),
                Some(Err(e)) => return Err(UpdateError::Connectivity(e.to_string())),
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue,
            };

            match packet::decode(text.as_str()) {
                Ok(EnginePacket::Ping(data)) => {
                    self.send(EnginePacket::Pong(data)).await?;
                }
                Ok(packet) => return Ok(Some(packet)),
                Err(e) => warn!("Ignoring undecodable frame: {}", e),
            }
        }
    }

    /// The server pings every `pingInterval`; silence beyond
    /// `pingInterval + pingTimeout` means the connection is dead.
    fn liveness_timeout(&self) -> Option<Duration> {
        self.handshake
            .as_ref()
            .map(|h| Duration::from_millis(h.ping_interval + h.ping_timeout))
    }

    async fn handshake(&mut self) -> Result<(), UpdateError> {
        match self.recv().await? {
            Some(EnginePacket::Open(handshake)) => {
                debug!("Engine.IO session {} opened", handshake.sid);
                self.handshake = Some(handshake);
            }
            Some(other) => {
                return Err(UpdateError::Handshake(format!(
                    "expected open packet, got {:?}",
                    other
                )))
            }
            None => return Err(UpdateError::Handshake("closed during handshake".to_string())),
        }

        self.send(EnginePacket::Message(SocketPacket::connect())).await?;

        loop {
            match self.recv().await? {
                Some(EnginePacket::Message(SocketPacket::Connect { data, .. })) => {
                    debug!("Socket.IO namespace connected: {:?}", data);
                    return Ok(());
                }
                Some(EnginePacket::Message(SocketPacket::ConnectError { data, .. })) => {
                    return Err(UpdateError::Handshake(format!("connect refused: {:?}", data)));
                }
                Some(EnginePacket::Close) | None => {
                    return Err(UpdateError::Handshake("closed during handshake".to_string()));
                }
                Some(other) => debug!("Ignoring {:?} during handshake", other),
            }
        }
    }
}

#[async_trait]
impl ChannelSession for SocketIoSession {
    async fn next_event(&mut self) -> Result<Option<ChannelEvent>, UpdateError> {
        if self.closed {
            return Ok(None);
        }

        loop {
            let packet = match self.recv().await? {
                Some(packet) => packet,
                None => {
                    self.closed = true;
                    return Ok(None);
                }
            };

            match packet {
                EnginePacket::Close | EnginePacket::Message(SocketPacket::Disconnect { .. }) => {
                    self.closed = true;
                    return Ok(None);
                }
                EnginePacket::Message(SocketPacket::Event { name, args, .. }) => {
                    match ChannelEvent::from_named(&name, &args) {
                        Ok(Some(event)) => return Ok(Some(event)),
                        Ok(None) => debug!("Ignoring event {}", name),
                        Err(e) => warn!("Ignoring malformed event: {}", e),
                    }
                }
                other => debug!("Ignoring {:?}", other),
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let _ = self
            .send(EnginePacket::Message(SocketPacket::disconnect()))
            .await;
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_socket_url() {
        let url = build_socket_url("http://192.168.11.7:3010").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://192.168.11.7:3010/socket.io/?EIO=4&transport=websocket"
        );

        let url = build_socket_url("https://example.com/realtime/").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://example.com/realtime/socket.io/?EIO=4&transport=websocket"
        );

        assert!(build_socket_url("ftp://example.com").is_err());
        assert!(build_socket_url("not a url").is_err());
    }
}
