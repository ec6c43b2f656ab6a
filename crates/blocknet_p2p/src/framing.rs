//! Length-prefixed envelope framing codec.
//!
//! Envelopes are framed as:
//! - 4 bytes: big-endian body length
//! - N bytes: envelope body (see [`Envelope::encode`])
//!
//! Frame errors (oversize length, I/O) are terminal for the stream. A frame
//! whose body fails to decode is yielded as `Ok(Err(..))` so the reader can
//! drop it and keep going.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::config::DEFAULT_MAX_FRAME_LEN;
use crate::error::{EnvelopeError, NetworkError};
use crate::message::Envelope;

/// Codec for length-prefixed envelope framing.
#[derive(Debug)]
pub struct EnvelopeCodec {
    frames: LengthDelimitedCodec,
}

impl EnvelopeCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .big_endian()
                .max_frame_length(max_frame_len)
                .new_codec(),
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Result<Envelope, EnvelopeError>;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.frames.decode(src)? else {
            return Ok(None);
        };
        Ok(Some(Envelope::decode(frame.freeze())))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = NetworkError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.frames.encode(envelope.encode(), dst)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EnvelopeKind, WIRE_VERSION};
    use bytes::BufMut;

    #[test]
    fn test_multiple_frames_in_one_buffer() {
        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::new();

        let first = Envelope::new(EnvelopeKind::Transaction, r#"{"id":1}"#);
        let second = Envelope::new(EnvelopeKind::Chain, r#"[{"height":0}]"#);
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_length_prefix_layout() {
        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Envelope::new(EnvelopeKind::ClearPool, "[]"), &mut buf)
            .unwrap();

        assert_eq!(&buf[..4], &4u32.to_be_bytes());
        assert_eq!(buf[4], WIRE_VERSION);
        assert_eq!(buf[5], EnvelopeKind::ClearPool.tag());
        assert_eq!(&buf[6..], b"[]");
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = EnvelopeCodec::default();
        let mut full = BytesMut::new();
        codec
            .encode(Envelope::new(EnvelopeKind::Transaction, "abcdef"), &mut full)
            .unwrap();

        let mut buf = BytesMut::from(&full[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[5..]);
        let env = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(env.payload.as_ref(), b"abcdef");
    }

    #[test]
    fn test_bad_body_does_not_poison_stream() {
        let mut codec = EnvelopeCodec::default();
        let mut buf = BytesMut::new();

        // A well-framed body with an unknown kind tag.
        buf.put_u32(2);
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(99);
        codec
            .encode(Envelope::new(EnvelopeKind::Transaction, "ok"), &mut buf)
            .unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, Err(EnvelopeError::UnknownKind(99)));
        let second = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(second.payload.as_ref(), b"ok");
    }

    #[test]
    fn test_oversize_frame_is_an_error() {
        let mut codec = EnvelopeCodec::new(16);
        let mut buf = BytesMut::new();
        buf.put_u32(1024);
        buf.put_slice(&[0u8; 8]);

        assert!(matches!(codec.decode(&mut buf), Err(NetworkError::Io(_))));
    }
}
