use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::RealtimeError;
use crate::protocol::ControlMessage;

/// one live transport session.
///
/// The inbound receiver yields raw text frames in delivery order and closes
/// when the transport is lost.
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<ControlMessage>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// opens transport sessions for the distribution manager
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Connection, RealtimeError>;
}

/// websocket transport to the server's `/ws` endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection, RealtimeError> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;
        debug!("Websocket connected to {}", self.url);

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ControlMessage>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    control = outbound_rx.recv() => {
                        let Some(control) = control else {
                            let _ = sink.close().await;
                            break;
                        };
                        let text = match serde_json::to_string(&control) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to encode control message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            debug!("Websocket write failed: {}", e);
                            break;
                        }
                    }
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(other)) => trace!("Ignoring non-text frame: {:?}", other),
                        Some(Err(e)) => {
                            debug!("Websocket read failed: {}", e);
                            break;
                        }
                    }
                }
            }
            trace!("Websocket pump finished");
        });

        Ok(Connection { outbound, inbound })
    }
}
