//! Chat-gateway sidecar connector.
//!
//! The sidecar process owns the actual game protocol session and exposes
//! it over a local TCP socket as newline-delimited JSON frames. This
//! keeps the bridge independent of game client internals.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use crate::common::error::ConnectionError;
use crate::common::types::{BotIdentity, ProtocolVersion};
use crate::game::protocol::{ChatPosition, GameConnection, GameConnector, GameEvent};

/// Frames sent by the gateway sidecar.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GatewayFrame {
    Spawned {
        ign: String,
        uuid: String,
        #[serde(default)]
        legacy: bool,
    },
    Chat {
        content: String,
        #[serde(default)]
        position: GatewayPosition,
        #[serde(default)]
        profile_id: Option<String>,
    },
    Disconnected {
        reason: String,
    },
    Kicked {
        reason: String,
        #[serde(default)]
        fatal: bool,
    },
}

#[derive(Debug, Default, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum GatewayPosition {
    #[default]
    Chat,
    System,
    ActionBar,
}

impl From<GatewayPosition> for ChatPosition {
    fn from(position: GatewayPosition) -> Self {
        match position {
            GatewayPosition::Chat => ChatPosition::Chat,
            GatewayPosition::System => ChatPosition::System,
            GatewayPosition::ActionBar => ChatPosition::ActionBar,
        }
    }
}

/// Frames sent to the gateway sidecar.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GatewayCommand<'a> {
    Chat { message: &'a str },
    Disconnect,
}

/// Connects to a chat-gateway sidecar address.
pub struct GatewayConnector {
    addr: String,
}

impl GatewayConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl GameConnector for GatewayConnector {
    async fn connect(&self) -> Result<Arc<dyn GameConnection>, ConnectionError> {
        let stream =
            TcpStream::connect(&self.addr)
                .await
                .map_err(|e| ConnectionError::ConnectFailed {
                    addr: self.addr.clone(),
                    source: e,
                })?;
        debug!(addr = %self.addr, "Connected to chat gateway");
        Ok(Arc::new(GatewayConnection::start(stream)))
    }
}

type LineSink = FramedWrite<tokio::net::tcp::OwnedWriteHalf, LinesCodec>;

/// One live sidecar session.
pub struct GatewayConnection {
    writer: Mutex<LineSink>,
    events: broadcast::Sender<GameEvent>,
}

impl GatewayConnection {
    fn start(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let writer = Mutex::new(FramedWrite::new(write_half, LinesCodec::new()));
        let (events, _) = broadcast::channel(256);

        let events_tx = events.clone();
        tokio::spawn(async move {
            let mut reader = FramedRead::new(read_half, LinesCodec::new());
            while let Some(line) = reader.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        let _ = events_tx.send(GameEvent::Disconnected {
                            reason: format!("read error: {}", e),
                        });
                        return;
                    }
                };
                match serde_json::from_str::<GatewayFrame>(&line) {
                    Ok(frame) => {
                        let _ = events_tx.send(frame.into_event());
                    }
                    Err(e) => warn!("Dropping malformed gateway frame: {}", e),
                }
            }
            let _ = events_tx.send(GameEvent::Disconnected {
                reason: "gateway closed the connection".to_string(),
            });
        });

        Self { writer, events }
    }

    async fn send_frame(&self, command: GatewayCommand<'_>) -> Result<(), ConnectionError> {
        let frame = serde_json::to_string(&command)
            .map_err(|e| ConnectionError::InvalidFrame(e.to_string()))?;
        self.writer
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|e| ConnectionError::WriteFailed(e.to_string()))
    }
}

impl GatewayFrame {
    fn into_event(self) -> GameEvent {
        match self {
            Self::Spawned { ign, uuid, legacy } => GameEvent::Spawned {
                identity: BotIdentity { ign, uuid },
                version: if legacy {
                    ProtocolVersion::Legacy
                } else {
                    ProtocolVersion::Modern
                },
            },
            Self::Chat {
                content,
                position,
                profile_id,
            } => GameEvent::Chat {
                content,
                position: position.into(),
                profile_id,
            },
            Self::Disconnected { reason } => GameEvent::Disconnected { reason },
            Self::Kicked { reason, fatal } => GameEvent::Kicked { reason, fatal },
        }
    }
}

#[async_trait]
impl GameConnection for GatewayConnection {
    async fn write_chat(&self, line: &str) -> Result<(), ConnectionError> {
        self.send_frame(GatewayCommand::Chat { message: line }).await
    }

    fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        if let Err(e) = self.send_frame(GatewayCommand::Disconnect).await {
            debug!("Disconnect frame not delivered: {}", e);
        }
    }
}
