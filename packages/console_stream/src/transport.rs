use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use panel_client::{PanelClient, StreamCredential};

use crate::error::StreamError;
use crate::protocol::{InboundEvent, WireFrame};

/// Issues the short-lived endpoint + token for one instance's console
/// stream. The panel client is the production implementation.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, instance_id: &str) -> Result<StreamCredential, StreamError>;
}

#[async_trait]
impl CredentialIssuer for PanelClient {
    async fn issue(&self, instance_id: &str) -> Result<StreamCredential, StreamError> {
        self.fetch_stream_credential(instance_id)
            .await
            .map_err(|e| StreamError::Credential(e.to_string()))
    }
}

/// Opens one live connection to a fetched streaming endpoint.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(
        &self,
        credential: &StreamCredential,
    ) -> Result<Box<dyn StreamConn>, StreamError>;
}

/// One live transport connection. `next_event` returning `None` means the
/// remote end hung up cleanly.
#[async_trait]
pub trait StreamConn: Send {
    async fn send(&mut self, frame: WireFrame) -> Result<(), StreamError>;
    async fn next_event(&mut self) -> Option<Result<InboundEvent, StreamError>>;
}

/// Production transport over `tokio-tungstenite`.
pub struct WebSocketTransport;

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn connect(
        &self,
        credential: &StreamCredential,
    ) -> Result<Box<dyn StreamConn>, StreamError> {
        let (socket, _) = tokio_tungstenite::connect_async(credential.endpoint.as_str())
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        Ok(Box::new(WebSocketConn { socket }))
    }
}

struct WebSocketConn {
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl StreamConn for WebSocketConn {
    async fn send(&mut self, frame: WireFrame) -> Result<(), StreamError> {
        let json =
            serde_json::to_string(&frame).map_err(|e| StreamError::Transport(e.to_string()))?;
        self.socket
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<Result<InboundEvent, StreamError>> {
        loop {
            match self.socket.next().await? {
                Ok(tungstenite::Message::Text(text)) => match InboundEvent::parse(&text) {
                    Some(event) => return Some(Ok(event)),
                    // Malformed frame: drop and keep reading.
                    None => continue,
                },
                Ok(tungstenite::Message::Close(_)) => return None,
                // Ping/pong/binary are transport noise here.
                Ok(_) => continue,
                Err(e) => return Some(Err(StreamError::Transport(e.to_string()))),
            }
        }
    }
}
