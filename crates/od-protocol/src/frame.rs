//! Frame header
//!
//! Every frame starts with a 10-byte header followed by a bincode payload:
//!
//! ```text
//! +---------+------+------------+----------------+---------+
//! | version | type | request id | payload length | payload |
//! |   u8    |  u8  |  u32 (BE)  |    u32 (BE)    |   ...   |
//! +---------+------+------------+----------------+---------+
//! ```
//!
//! A staged tunnel binary travels in one frame, which is why the payload
//! limit is generous.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::MessageType;
use crate::request::RequestId;

/// Version byte written by this build
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 10;

/// Default payload limit (64 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub request_id: RequestId,
    pub message_type: MessageType,
    pub payload_length: u32,
}

impl FrameHeader {
    pub fn new(request_id: RequestId, message_type: MessageType, payload_length: u32) -> Self {
        Self {
            request_id,
            message_type,
            payload_length,
        }
    }

    /// Append the header to `dst`
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(PROTOCOL_VERSION);
        dst.put_u8(self.message_type.as_u8());
        dst.put_u32(self.request_id.as_u32());
        dst.put_u32(self.payload_length);
    }

    /// Take a header off the front of `src`
    ///
    /// `Ok(None)` while fewer than [`HEADER_SIZE`] bytes are buffered. A bad
    /// version or type byte is an error and leaves `src` untouched.
    pub fn read_from(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let version = src[0];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: version,
            });
        }
        let message_type = MessageType::from_u8(src[1]).ok_or(ProtocolError::UnknownMessageType(src[1]))?;

        src.advance(2);
        let request_id = RequestId::new(src.get_u32());
        let payload_length = src.get_u32();

        Ok(Some(Self::new(request_id, message_type, payload_length)))
    }
}
