//! JSON frames exchanged with the gateway over WebSocket.
//!
//! Every frame is an object tagged by `type`. A connection either carries
//! unary `dispatch` calls or, after `open_stream`, one command stream.

use serde::{Deserialize, Serialize};

use crate::gateway::{Command, CommandResponse, OutboundFrame};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "dispatch")]
    Dispatch { request_id: String, command: Command },
    #[serde(rename = "open_stream")]
    OpenStream {},
    #[serde(rename = "flow_control")]
    FlowControl { client_id: String, permits: u64 },
    #[serde(rename = "subscribe")]
    Subscribe {
        client_id: String,
        component_name: String,
        command: String,
    },
    #[serde(rename = "respond")]
    Respond { response: CommandResponse },
}

impl ClientFrame {
    /// The stream frame this carries, if it belongs on an open stream.
    pub fn into_outbound(self) -> Option<OutboundFrame> {
        match self {
            ClientFrame::FlowControl { client_id, permits } => {
                Some(OutboundFrame::FlowControl { client_id, permits })
            }
            ClientFrame::Subscribe {
                client_id,
                component_name,
                command,
            } => Some(OutboundFrame::Subscribe {
                client_id,
                component_name,
                command,
            }),
            ClientFrame::Respond { response } => Some(OutboundFrame::Response(response)),
            ClientFrame::Dispatch { .. } | ClientFrame::OpenStream {} => None,
        }
    }
}

impl From<OutboundFrame> for ClientFrame {
    fn from(frame: OutboundFrame) -> Self {
        match frame {
            OutboundFrame::FlowControl { client_id, permits } => {
                ClientFrame::FlowControl { client_id, permits }
            }
            OutboundFrame::Subscribe {
                client_id,
                component_name,
                command,
            } => ClientFrame::Subscribe {
                client_id,
                component_name,
                command,
            },
            OutboundFrame::Response(response) => ClientFrame::Respond { response },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "dispatch_reply")]
    DispatchReply {
        request_id: String,
        response: Option<CommandResponse>,
    },
    #[serde(rename = "command")]
    Command { command: Command },
    #[serde(rename = "error")]
    Error { message: String },
}
