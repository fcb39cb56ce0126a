//! `CommandService` over WebSocket.
//!
//! Every `dispatch` uses its own short-lived connection; every
//! `open_stream` opens a connection that lives as long as the stream's
//! writer. Dropping the writer closes the connection, and the gateway closes
//! the matching server-side stream.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use super::message::{ClientFrame, ServerFrame};
use crate::config::ConnectionConfig;
use crate::gateway::{Command, CommandResponse, CommandService, CommandStream, OutboundFrame};
use crate::utils::{GatewayError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsCommandClient {
    url: String,
}

impl WsCommandClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// `ws://host:port/path`, or `wss://` when the scheme carries a `tls`
    /// extension.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        let scheme = if config.scheme_extensions.iter().any(|e| e == "tls") {
            "wss"
        } else {
            "ws"
        };
        let path = config.path.as_deref().unwrap_or("");
        Self::new(format!("{scheme}://{}{path}", config.endpoint()))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<WsStream> {
        let (ws, _response) = connect_async(self.url.as_str()).await?;
        debug!(url = %self.url, "connected to gateway");
        Ok(ws)
    }
}

fn encode(frame: &ClientFrame) -> Result<WsMessage> {
    Ok(WsMessage::Text(serde_json::to_string(frame)?.into()))
}

#[async_trait]
impl CommandService for WsCommandClient {
    async fn dispatch(&self, command: Command) -> Result<Option<CommandResponse>> {
        let mut ws = self.connect().await?;
        let request_id = command.message_identifier.clone();
        ws.send(encode(&ClientFrame::Dispatch {
            request_id: request_id.clone(),
            command,
        })?)
        .await?;

        while let Some(msg) = ws.next().await {
            let msg = msg?;
            if !msg.is_text() {
                continue;
            }
            match serde_json::from_str::<ServerFrame>(msg.to_text()?)? {
                ServerFrame::DispatchReply {
                    request_id: id,
                    response,
                } if id == request_id => {
                    let _ = ws.close(None).await;
                    return Ok(response);
                }
                ServerFrame::Error { message } => {
                    return Err(GatewayError::Communication(message));
                }
                other => debug!("ignoring frame while dispatching: {other:?}"),
            }
        }

        Err(GatewayError::Communication(
            "connection closed before dispatch reply".to_string(),
        ))
    }

    async fn open_stream(&self) -> Result<CommandStream> {
        let ws = self.connect().await?;
        let (mut sink, source) = ws.split();
        sink.send(encode(&ClientFrame::OpenStream {})?).await?;

        let (writer, mut outbound) = mpsc::unbounded_channel::<OutboundFrame>();
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let msg = match encode(&ClientFrame::from(frame)) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("failed to encode stream frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(msg).await {
                    warn!("stream write failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let inbound = source
            .filter_map(|msg| async move {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<ServerFrame>(text.as_str()) {
                            Ok(ServerFrame::Command { command }) => Some(Ok(command)),
                            Ok(ServerFrame::Error { message }) => {
                                Some(Err(GatewayError::Communication(message)))
                            }
                            Ok(other) => {
                                debug!("ignoring frame on command stream: {other:?}");
                                None
                            }
                            Err(e) => Some(Err(e.into())),
                        }
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(e.into())),
                }
            })
            .boxed();

        Ok(CommandStream { writer, inbound })
    }
}
