//! Protocol errors

use thiserror::Error;

use crate::message::MessageType;

/// Failures while framing, encoding or exchanging messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Peer speaks protocol version {actual}, expected {expected}")]
    VersionMismatch { expected: u8, actual: u8 },

    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// Peer closed the channel before the exchange finished
    #[error("Connection closed before a reply was received")]
    ConnectionClosed,

    /// Agent rejected the presented token
    #[error("Agent refused authentication: {0}")]
    Unauthorized(String),

    /// Peer answered with a message that does not fit the exchange
    #[error("Unexpected message: {0:?}")]
    UnexpectedMessage(MessageType),

    #[error("Malformed payload: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
