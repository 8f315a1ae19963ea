//! Message types for the tunnel launch protocol
//!
//! Every exchange happens on its own connection:
//!
//! 1. The controller sends `Authenticate` with the agent's token and waits
//!    for `Authenticated` (`Ping` needs no token and skips this step)
//! 2. The controller sends one request (`StageBinary`, `StartTunnel`,
//!    `StopTunnel` or `Ping`)
//! 3. The agent streams zero or more `Output` messages carrying tunnel log
//!    lines destined for the job log
//! 4. The agent sends exactly one terminal reply (`BinaryStaged`,
//!    `TunnelStarted`, `TunnelStopped`, `Pong` or `Error`)
//!
//! Shutting down the controller's write half before the reply arrives
//! aborts an in-flight start. The agent still sends the terminal reply if
//! the start had already finished, so the controller can close that tunnel.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::tunnel::{StartRequest, TunnelHandle};

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Ship the tunnel binary to the node
    StageBinary = 0x01,
    /// Binary written on the node
    BinaryStaged = 0x02,
    /// Open a tunnel
    StartTunnel = 0x03,
    /// Tunnel is ready
    TunnelStarted = 0x04,
    /// Close a tunnel plan
    StopTunnel = 0x05,
    /// Plan closed
    TunnelStopped = 0x06,
    /// Tunnel log line
    Output = 0x07,
    /// Liveness probe
    Ping = 0x08,
    /// Liveness answer
    Pong = 0x09,
    /// Present the agent token
    Authenticate = 0x0A,
    /// Token accepted
    Authenticated = 0x0B,
    /// Error response
    Error = 0xFF,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::StageBinary),
            0x02 => Some(Self::BinaryStaged),
            0x03 => Some(Self::StartTunnel),
            0x04 => Some(Self::TunnelStarted),
            0x05 => Some(Self::StopTunnel),
            0x06 => Some(Self::TunnelStopped),
            0x07 => Some(Self::Output),
            0x08 => Some(Self::Ping),
            0x09 => Some(Self::Pong),
            0x0A => Some(Self::Authenticate),
            0x0B => Some(Self::Authenticated),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Error codes for error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown error
    Unknown = 0,
    /// No tunnel manager could be bound for the requested generation
    ManagerUnavailable = 1,
    /// Writing the tunnel binary failed
    StagingFailed = 2,
    /// The tunnel process did not come up
    StartFailed = 3,
    /// Closing the plan failed
    StopFailed = 4,
    /// Invalid message
    InvalidMessage = 5,
    /// Missing or wrong agent token
    Unauthorized = 6,
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Write a tunnel binary into the node's staging directory
    StageBinary {
        /// File name (no directory components are honoured)
        file_name: String,
        /// Binary contents
        contents: Bytes,
    },

    /// Binary was written
    BinaryStaged {
        /// Absolute path of the staged file on the node
        path: String,
    },

    /// Open a tunnel
    StartTunnel(StartRequest),

    /// Tunnel opened
    TunnelStarted(TunnelHandle),

    /// Close the plan described by the handle
    StopTunnel(TunnelHandle),

    /// Plan closed
    TunnelStopped,

    /// One line of tunnel output for the job log
    Output {
        /// Line without terminator
        line: String,
    },

    /// Liveness probe
    Ping,

    /// Liveness answer
    Pong {
        /// Hostname of the answering node
        hostname: String,
    },

    /// Present the agent token before a request
    Authenticate {
        /// Token configured on the agent
        token: String,
    },

    /// Token accepted, the request may follow
    Authenticated,

    /// Error response
    Error {
        /// Error code
        code: ErrorCode,
        /// Human-readable message
        message: String,
    },
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::StageBinary { .. } => MessageType::StageBinary,
            Message::BinaryStaged { .. } => MessageType::BinaryStaged,
            Message::StartTunnel(_) => MessageType::StartTunnel,
            Message::TunnelStarted(_) => MessageType::TunnelStarted,
            Message::StopTunnel(_) => MessageType::StopTunnel,
            Message::TunnelStopped => MessageType::TunnelStopped,
            Message::Output { .. } => MessageType::Output,
            Message::Ping => MessageType::Ping,
            Message::Pong { .. } => MessageType::Pong,
            Message::Authenticate { .. } => MessageType::Authenticate,
            Message::Authenticated => MessageType::Authenticated,
            Message::Error { .. } => MessageType::Error,
        }
    }

    /// Whether this message ends an exchange
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Message::Output { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        for msg_type in [
            MessageType::StageBinary,
            MessageType::BinaryStaged,
            MessageType::StartTunnel,
            MessageType::TunnelStarted,
            MessageType::StopTunnel,
            MessageType::TunnelStopped,
            MessageType::Output,
            MessageType::Ping,
            MessageType::Pong,
            MessageType::Authenticate,
            MessageType::Authenticated,
            MessageType::Error,
        ] {
            let byte = msg_type.as_u8();
            let recovered = MessageType::from_u8(byte).unwrap();
            assert_eq!(recovered, msg_type);
        }
    }

    #[test]
    fn test_only_output_is_non_terminal() {
        assert!(!Message::Output { line: "x".into() }.is_terminal());
        assert!(Message::TunnelStopped.is_terminal());
        assert!(Message::Ping.is_terminal());
    }
}
