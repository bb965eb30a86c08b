//! Fixed 16-byte wire header shared by every Lumen message.
//!
//! ```text
//! magic: u32  "LMN0"
//! type:  u32  MessageType discriminant
//! size:  u32  payload length in bytes
//! value: u32  type-specific scalar (control kind, frame number, status)
//! ```
//!
//! All fields are little-endian.

use crate::error::LumenError;

/// Framing sentinel, `b"LMN0"` read as a little-endian `u32`.
pub const MAGIC: u32 = u32::from_le_bytes(*b"LMN0");

/// Encoded header length.
pub const HEADER_SIZE: usize = 16;

pub type WireHeaderBytes = [u8; HEADER_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    magic: u32,
    message_type: u32,
    size: u32,
    value: u32,
}

impl WireHeader {
    pub fn new(message_type: u32, size: u32, value: u32) -> Self {
        Self {
            magic: MAGIC,
            message_type,
            size,
            value,
        }
    }

    pub fn to_bytes(&self) -> WireHeaderBytes {
        let mut buf: WireHeaderBytes = [0; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.message_type.to_le_bytes());
        buf[8..12].copy_from_slice(&self.size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.value.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &WireHeaderBytes) -> Result<Self, LumenError> {
        let field = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        let magic = field(0);
        if magic != MAGIC {
            return Err(LumenError::InvalidMagic);
        }
        Ok(Self {
            magic,
            message_type: field(4),
            size: field(8),
            value: field(12),
        })
    }

    /// Parse the first [`HEADER_SIZE`] bytes of `src`, if present.
    pub fn peek(src: &[u8]) -> Option<Result<Self, LumenError>> {
        let bytes: &WireHeaderBytes = src.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self::from_bytes(bytes))
    }

    pub fn message_type(&self) -> u32 {
        self.message_type
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn value(&self) -> u32 {
        self.value
    }
}
