//! `tokio_util` codec for [`WireMessage`] framing.
//!
//! Framing faults are recovered inside the decoder so one bad message never
//! desynchronises the connection:
//!
//! - bad magic: bytes are dropped up to the next `LMN0` sentinel;
//! - payload above the per-type limit: header and payload are skipped;
//! - payload above [`MAX_PAYLOAD_SIZE`]: the header is treated as corrupt and
//!   the decoder resynchronises on the next sentinel.
//!
//! Unknown message types are framed normally and rejected by the caller.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::LumenError;
use crate::header::{HEADER_SIZE, WireHeader};
use crate::packet::{MAX_PAYLOAD_SIZE, WireMessage, max_payload_for};

const MAGIC_BYTES: &[u8; 4] = b"LMN0";

#[derive(Debug, Default)]
pub struct WireCodec {
    /// Payload bytes of a rejected message still to be skipped.
    discarding: usize,
    /// Framing faults recovered so far.
    faults: u64,
}

impl WireCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of framing faults the decoder has recovered from.
    pub fn faults(&self) -> u64 {
        self.faults
    }

    fn resync(&mut self, src: &mut BytesMut) {
        // Keep a possible partial sentinel at the tail.
        let skip = src[1..]
            .windows(MAGIC_BYTES.len())
            .position(|w| w == MAGIC_BYTES)
            .map(|at| at + 1)
            .unwrap_or_else(|| src.len().saturating_sub(MAGIC_BYTES.len() - 1).max(1));
        warn!(skipped = skip, "bad magic; resynchronising");
        self.faults += 1;
        src.advance(skip);
    }
}

impl Decoder for WireCodec {
    type Item = WireMessage;
    type Error = LumenError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.discarding > 0 {
                let n = self.discarding.min(src.len());
                src.advance(n);
                self.discarding -= n;
                if self.discarding > 0 {
                    return Ok(None);
                }
            }

            let header = match WireHeader::peek(src) {
                None => return Ok(None),
                Some(Ok(header)) => header,
                Some(Err(_)) => {
                    self.resync(src);
                    continue;
                }
            };

            let size = header.size() as usize;
            if size > MAX_PAYLOAD_SIZE {
                self.resync(src);
                continue;
            }

            let max = max_payload_for(header.message_type());
            if size > max {
                warn!(
                    message_type = header.message_type(),
                    size, max, "oversized payload; skipping message"
                );
                self.faults += 1;
                src.advance(HEADER_SIZE);
                self.discarding = size;
                continue;
            }

            if src.len() < HEADER_SIZE + size {
                src.reserve(HEADER_SIZE + size - src.len());
                return Ok(None);
            }

            let mut frame = src.split_to(HEADER_SIZE + size);
            frame.advance(HEADER_SIZE);
            return Ok(Some(WireMessage::from_parts(header, frame.freeze())));
        }
    }
}

impl Encoder<WireMessage> for WireCodec {
    type Error = LumenError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use crate::packet::MAX_CONTROL_PAYLOAD;

    fn encoded(msg: &WireMessage) -> Vec<u8> {
        msg.to_bytes()
    }

    #[test]
    fn decodes_partial_input_incrementally() {
        let msg = WireMessage::new(MessageType::Auth, 3, vec![9u8; 40]).unwrap();
        let bytes = encoded(&msg);
        let mut codec = WireCodec::new();
        let mut buf = BytesMut::from(&bytes[..20]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[20..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn resynchronises_after_garbage() {
        let msg = WireMessage::signal(MessageType::HeadAck, 1);
        let mut buf = BytesMut::from(&b"garbage-bytes-before-the-header!"[..]);
        buf.extend_from_slice(&encoded(&msg));

        let mut codec = WireCodec::new();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(codec.faults() >= 1);
    }

    #[test]
    fn oversized_control_is_skipped() {
        let bogus = WireHeader::new(MessageType::Control as u32, (MAX_CONTROL_PAYLOAD + 10) as u32, 1);
        let mut buf = BytesMut::from(&bogus.to_bytes()[..]);
        buf.extend_from_slice(&vec![0xEE; MAX_CONTROL_PAYLOAD + 10]);
        let good = WireMessage::signal(MessageType::ControlAck, 7);
        buf.extend_from_slice(&encoded(&good));

        let mut codec = WireCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), good);
        assert_eq!(codec.faults(), 1);
    }

    #[test]
    fn skip_spans_multiple_reads() {
        let bogus = WireHeader::new(MessageType::Auth as u32, (MAX_CONTROL_PAYLOAD + 100) as u32, 0);
        let mut buf = BytesMut::from(&bogus.to_bytes()[..]);
        buf.extend_from_slice(&[0u8; 50]);

        let mut codec = WireCodec::new();
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(&vec![0u8; MAX_CONTROL_PAYLOAD + 50]);
        let good = WireMessage::signal(MessageType::FrameAck, 2);
        buf.extend_from_slice(&encoded(&good));
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), good);
    }

    #[test]
    fn encoder_writes_header_and_payload() {
        let msg = WireMessage::new(MessageType::Message, 1, vec![1, 2]).unwrap();
        let mut codec = WireCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(msg.clone(), &mut dst).unwrap();
        assert_eq!(dst.len(), HEADER_SIZE + 2);
        assert_eq!(WireMessage::from_bytes(&dst).unwrap(), msg);
    }
}
