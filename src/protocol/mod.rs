//! Test host wire protocol
//!
//! - **Framing**: 7-bit length-prefixed UTF-8 frames
//! - **Message**: JSON envelopes tagged with a message type
//! - **Channel**: typed send/receive over a framed transport
//! - **Types**: payloads exchanged with the host

pub mod channel;
pub mod framing;
pub mod message;
pub mod run_settings;
pub mod types;

pub use channel::{ChannelError, MessageChannel};
pub use framing::{FrameCodec, FrameCodecError, FramingError, MessageFraming};
pub use message::{HostEvent, Message, MessageType, PROTOCOL_VERSION};
pub use run_settings::RunSettings;
pub use types::{TestCase, TestMessageLevel, TestMessagePayload, TestOutcome, TestResult};
