//! Payload definitions for each wire message type.
//!
//! Each sub-module defines the structured payloads for one exchange.
//! Payloads are serialized with `serde` + `bincode` and carried inside
//! [`WireMessage`] bodies.
//!
//! [`WireMessage`]: crate::packet::WireMessage

pub mod auth;
pub mod control;
pub mod frame;
pub mod head;
pub mod notice;

pub use auth::{AuthRequest, AuthResult};
pub use control::{ControlAck, ControlMessage, DumpTarget, Profile, RirKind};
pub use frame::{FrameInfo, FramePayload};
pub use head::{Codec, Resolution, StreamHead, VideoFormat};
pub use notice::{Notice, NoticeKind};
