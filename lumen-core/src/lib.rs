//! # lumen-core
//!
//! Adaptive streaming control for a remote-desktop / cloud-gaming host.
//!
//! This crate contains:
//! - **Wire protocol**: `WireHeader`, `WireMessage`, `MessageType`, `ControlKind`
//!   and the `WireCodec` for framed TCP I/O via `tokio_util`
//! - **Payloads**: stream head, frames, control messages, auth, notices
//! - **Predictor**: `NetworkPredictor`, turning client delay feedback into a
//!   target frame size
//! - **Pacing**: `FramePacingQueue`, the single-slot capture → encode handoff
//! - **Session**: `StreamSession`, control-message handling over a
//!   `VideoEncoder`
//! - **Network**: `Connection` for framed TCP peers
//! - **Error**: `LumenError`, a typed `thiserror` hierarchy

pub mod codec;
pub mod encoder;
pub mod error;
pub mod flags;
pub mod header;
pub mod message;
pub mod network;
pub mod pacing;
pub mod packet;
pub mod predictor;
pub mod protocol;
pub mod session;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::WireCodec;
pub use encoder::ZstdEncoder;
pub use error::{EncoderError, LumenError};
pub use flags::{EncoderFlags, FrameFlags};
pub use header::{HEADER_SIZE, MAGIC, WireHeader};
pub use message::{ControlKind, MessageType};
pub use network::{Connection, ConnectionInfo, ConnectionSender};
pub use pacing::{FramePacingQueue, FramePacket, FrameReader, FrameSender, PacedRead, PacingConfig, PacingHandle};
pub use packet::{MAX_CONTROL_PAYLOAD, MAX_PAYLOAD_SIZE, WireMessage};
pub use predictor::{NetworkPredictor, PredictorConfig, PredictorStats};
pub use protocol::{
    AuthRequest, AuthResult, Codec, ControlAck, ControlMessage, FrameInfo, FramePayload, Notice,
    Resolution, StreamHead, VideoFormat,
};
pub use session::{
    AuthGate, EncodedFrame, EncoderParam, SessionPhase, StreamConfig, StreamSession, VideoEncoder,
};
