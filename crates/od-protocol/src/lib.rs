//! od-protocol: Wire protocol for remote tunnel launches
//!
//! This crate defines the binary protocol spoken between the build
//! controller and an execution-node agent when a tunnel has to be started,
//! stopped or staged on a machine other than the controller.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod request;
pub mod tunnel;

pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
pub use message::{ErrorCode, Message, MessageType};
pub use request::RequestId;
pub use tunnel::{StartRequest, TunnelGeneration, TunnelHandle};
