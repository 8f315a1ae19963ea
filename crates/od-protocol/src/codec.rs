//! Tokio codec turning a byte stream into [`Frame`]s

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};
use crate::message::Message;
use crate::request::RequestId;

/// One message together with the request it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub request_id: RequestId,
    pub message: Message,
}

impl Frame {
    pub fn new(request_id: RequestId, message: Message) -> Self {
        Self {
            request_id,
            message,
        }
    }
}

/// Length-prefixed bincode codec
///
/// Both directions enforce the same payload limit, so an oversized frame is
/// refused before its payload is buffered.
#[derive(Debug)]
pub struct FrameCodec {
    max_payload: usize,
    awaiting: Option<FrameHeader>,
}

impl FrameCodec {
    /// Codec with the default payload limit
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    /// Codec refusing payloads above `max_payload` bytes
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            max_payload,
            awaiting: None,
        }
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                max: self.max_payload,
            });
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let header = match self.awaiting.take() {
            Some(header) => header,
            None => {
                let Some(header) = FrameHeader::read_from(src)? else {
                    return Ok(None);
                };
                self.check_size(header.payload_length as usize)?;
                header
            }
        };

        let len = header.payload_length as usize;
        if src.len() < len {
            src.reserve(len - src.len());
            self.awaiting = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(len);
        let message = bincode::deserialize(&payload)?;
        Ok(Some(Frame::new(header.request_id, message)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload = bincode::serialize(&frame.message)?;
        self.check_size(payload.len())?;

        FrameHeader::new(frame.request_id, frame.message.message_type(), payload.len() as u32).write_to(dst);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
