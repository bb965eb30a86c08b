use std::fmt::Debug;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::LumenError;
use crate::header::{HEADER_SIZE, WireHeader};
use crate::message::MessageType;

/// Largest payload any message may carry (an encoded frame).
pub const MAX_PAYLOAD_SIZE: usize = 8 * 1024 * 1024;

/// Largest payload for non-frame messages (control, auth, head, ...).
pub const MAX_CONTROL_PAYLOAD: usize = 4 * 1024;

/// Payload limit for a raw `type` field. Unknown types get the control limit
/// so their payload can still be skipped without desynchronising the stream.
pub fn max_payload_for(message_type: u32) -> usize {
    match MessageType::try_from(message_type) {
        Ok(MessageType::Frame) => MAX_PAYLOAD_SIZE,
        _ => MAX_CONTROL_PAYLOAD,
    }
}

/// A framed wire message: 16-byte header followed by `size` payload bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct WireMessage {
    header: WireHeader,
    payload: Bytes,
}

impl WireMessage {
    pub fn new(message_type: MessageType, value: u32, payload: impl Into<Bytes>) -> Result<Self, LumenError> {
        let payload = payload.into();
        let max = max_payload_for(message_type as u32);
        if payload.len() > max {
            return Err(LumenError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        Ok(Self {
            header: WireHeader::new(message_type as u32, payload.len() as u32, value),
            payload,
        })
    }

    /// Empty-payload message (acks, simple notifications).
    pub fn signal(message_type: MessageType, value: u32) -> Self {
        Self {
            header: WireHeader::new(message_type as u32, 0, value),
            payload: Bytes::new(),
        }
    }

    /// Assemble from an already validated header and its payload.
    pub(crate) fn from_parts(header: WireHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    pub fn header(&self) -> &WireHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Decoded message type. Unknown tags survive framing and are rejected
    /// here, at the message layer.
    pub fn message_type(&self) -> Result<MessageType, LumenError> {
        MessageType::try_from(self.header.message_type())
    }

    pub fn value(&self) -> u32 {
        self.header.value()
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.to_vec()
    }

    /// Parse exactly one message from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LumenError> {
        let header = WireHeader::peek(bytes).ok_or(LumenError::InvalidLength {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        })??;

        let size = header.size() as usize;
        let max = max_payload_for(header.message_type());
        if size > max {
            return Err(LumenError::PayloadTooLarge { size, max });
        }
        if bytes.len() != HEADER_SIZE + size {
            return Err(LumenError::InvalidLength {
                expected: HEADER_SIZE + size,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }
}

impl Debug for WireMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireMessage")
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_payload_limit() {
        let too_big = vec![0u8; MAX_CONTROL_PAYLOAD + 1];
        assert!(matches!(
            WireMessage::new(MessageType::Control, 1, too_big.clone()),
            Err(LumenError::PayloadTooLarge { .. })
        ));
        // Frames may carry much more.
        assert!(WireMessage::new(MessageType::Frame, 1, too_big).is_ok());
    }

    #[test]
    fn from_bytes_rejects_trailing_garbage() {
        let msg = WireMessage::new(MessageType::Auth, 0, vec![1, 2, 3]).unwrap();
        let mut bytes = msg.to_bytes();
        assert_eq!(WireMessage::from_bytes(&bytes).unwrap(), msg);

        bytes.push(0);
        assert!(matches!(
            WireMessage::from_bytes(&bytes),
            Err(LumenError::InvalidLength { .. })
        ));
    }

    #[test]
    fn unknown_type_is_framed_but_not_typed() {
        let raw = WireMessage::from_parts(WireHeader::new(0x77, 0, 0), Bytes::new());
        assert!(raw.message_type().is_err());
    }
}
