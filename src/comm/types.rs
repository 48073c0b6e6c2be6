use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::sync::oneshot;

/// Datagram kind, the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Client → server: a tool call
    Request = 0x01,
    /// Server → client: the call was received
    RequestAck = 0x02,
    /// Server → client: the tool result
    Response = 0x03,
}

impl TryFrom<u8> for MsgType {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        match byte {
            0x01 => Ok(Self::Request),
            0x02 => Ok(Self::RequestAck),
            0x03 => Ok(Self::Response),
            other => Err(other),
        }
    }
}

/// Body of a REQUEST datagram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Tool name
    pub tool: String,
    /// Named tool arguments
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Body of a RESPONSE datagram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// Tool result text
    pub content: String,
    /// Whether this is an error response
    pub is_error: bool,
}

/// Tool call sent from Comm to the dispatcher
#[derive(Debug)]
pub struct ToolRequest {
    /// Tool name
    pub tool: String,
    /// Named tool arguments
    pub arguments: serde_json::Value,
    /// Channel to send the result back to Comm
    pub reply: oneshot::Sender<ToolResponse>,
    /// Client source address
    pub source_addr: SocketAddr,
}

/// Tool result sent from the dispatcher to Comm
#[derive(Debug)]
pub struct ToolResponse {
    /// Response content
    pub content: String,
    /// Whether this is an error response
    pub is_error: bool,
}

impl ToolResponse {
    pub fn new(content: String) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(content: String) -> Self {
        Self {
            content,
            is_error: true,
        }
    }
}
