//! WebSocket gateway server
//!
//! Exposes an `InMemoryCommandBus` to remote clients. Responsibilities:
//! - accept TCP/WebSocket connections and spawn one task per connection
//! - answer `dispatch` frames with a `dispatch_reply` once the bus replies;
//!   several dispatches may be outstanding on one connection
//! - after `open_stream`, forward bus commands to the client as `command`
//!   frames and apply the client's flow-control, subscribe and respond frames
//!   to the bus stream
//!
//! Closing the connection closes its bus stream, which fails any dispatch
//! still waiting on it. A bus stream that ends closes the connection.

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use super::message::{ClientFrame, ServerFrame};
use crate::gateway::{CommandService, CommandStream, InMemoryCommandBus, OutboundFrame};
use crate::utils::{GatewayError, Result};

pub async fn start_gateway_server(addr: &str, bus: InMemoryCommandBus) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Communication(format!("can't bind {addr}: {e}")))?;
    info!("gateway listening on ws://{addr}");
    serve(listener, bus).await
}

/// Accept connections on `listener` until it fails.
pub async fn serve(listener: TcpListener, bus: InMemoryCommandBus) -> Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| GatewayError::Communication(format!("accept failed: {e}")))?;
        let bus = bus.clone();

        tokio::spawn(async move {
            match handle_connection(stream, bus).await {
                Ok(()) => debug!(%peer, "connection closed"),
                Err(e) => warn!(%peer, "connection ended: {e}"),
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, bus: InMemoryCommandBus) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!("send loop stopped: {e}");
                break;
            }
        }
    });

    let mut stream_writer: Option<UnboundedSender<OutboundFrame>> = None;

    while let Some(msg) = ws_receiver.next().await {
        let msg = msg?;
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }

        match serde_json::from_str::<ClientFrame>(msg.to_text()?) {
            Ok(ClientFrame::Dispatch {
                request_id,
                command,
            }) => {
                let bus = bus.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let frame = match bus.dispatch(command).await {
                        Ok(response) => ServerFrame::DispatchReply {
                            request_id,
                            response,
                        },
                        Err(e) => ServerFrame::Error {
                            message: e.to_string(),
                        },
                    };
                    send_frame(&tx, &frame);
                });
            }
            Ok(ClientFrame::OpenStream {}) => {
                if stream_writer.is_some() {
                    send_error(&tx, "stream already open on this connection");
                    continue;
                }
                let CommandStream {
                    writer,
                    mut inbound,
                } = bus.open_stream().await?;
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Some(next) = inbound.next().await {
                        let frame = match next {
                            Ok(command) => ServerFrame::Command { command },
                            Err(e) => ServerFrame::Error {
                                message: e.to_string(),
                            },
                        };
                        if !send_frame(&tx, &frame) {
                            return;
                        }
                    }
                    let _ = tx.send(WsMessage::Close(None));
                });
                stream_writer = Some(writer);
            }
            Ok(frame) => match (frame.into_outbound(), &stream_writer) {
                (Some(outbound), Some(writer)) => {
                    if writer.send(outbound).is_err() {
                        send_error(&tx, "command stream closed");
                    }
                }
                _ => send_error(&tx, "no open command stream"),
            },
            Err(e) => {
                let text = msg.to_text().unwrap_or_default();
                warn!(
                    "invalid client frame: {e} | {}",
                    text.chars().take(100).collect::<String>()
                );
                send_error(&tx, &format!("invalid frame: {e}"));
            }
        }
    }

    Ok(())
}

fn send_frame(tx: &UnboundedSender<WsMessage>, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => tx.send(WsMessage::Text(json.into())).is_ok(),
        Err(e) => {
            error!("failed to encode server frame: {e}");
            false
        }
    }
}

fn send_error(tx: &UnboundedSender<WsMessage>, message: &str) {
    send_frame(
        tx,
        &ServerFrame::Error {
            message: message.to_string(),
        },
    );
}
