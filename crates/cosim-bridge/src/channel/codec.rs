//! Framed codec for the TCP transport.
//!
//! Uses LengthDelimitedCodec for framing. Each frame body is a 1-byte kind,
//! a 4-byte little-endian tag and the message body:
//!
//! | kind | meaning     | tag/body      |
//! |------|-------------|---------------|
//! | 0    | message     | as sent       |
//! | 1    | barrier     | 0 / empty     |
//! | 2    | disconnect  | 0 / empty     |

use std::io;

use tokio_util::bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

const KIND_MESSAGE: u8 = 0;
const KIND_BARRIER: u8 = 1;
const KIND_DISCONNECT: u8 = 2;
const HEADER_LEN: usize = 1 + 4;

/// Largest message body; a payload of 8M doubles.
pub const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

/// Largest accepted frame: a full body plus header.
pub const MAX_FRAME_LEN: usize = MAX_BODY_LEN + HEADER_LEN;

#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Message { tag: i32, body: Bytes },
    Barrier,
    Disconnect,
}

pub struct EnvelopeCodec {
    inner: LengthDelimitedCodec,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
        }
    }
}

impl Decoder for EnvelopeCodec {
    type Item = WireFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(mut frame) = self.inner.decode(src)? else {
            return Ok(None);
        };
        if frame.len() < HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes is shorter than its header", frame.len()),
            ));
        }
        let kind = frame.get_u8();
        let tag = frame.get_i32_le();
        let item = match kind {
            KIND_MESSAGE => WireFrame::Message {
                tag,
                body: frame.freeze(),
            },
            KIND_BARRIER => WireFrame::Barrier,
            KIND_DISCONNECT => WireFrame::Disconnect,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown frame kind {other}"),
                ));
            }
        };
        Ok(Some(item))
    }
}

impl Encoder<WireFrame> for EnvelopeCodec {
    type Error = io::Error;

    fn encode(&mut self, item: WireFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (kind, tag, body) = match item {
            WireFrame::Message { tag, body } => (KIND_MESSAGE, tag, body),
            WireFrame::Barrier => (KIND_BARRIER, 0, Bytes::new()),
            WireFrame::Disconnect => (KIND_DISCONNECT, 0, Bytes::new()),
        };
        let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
        frame.put_u8(kind);
        frame.put_i32_le(tag);
        frame.put_slice(&body);
        tracing::trace!(kind, tag, body_bytes = body.len(), "Encoding frame");
        self.inner.encode(frame.freeze(), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn message_frame_layout() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                WireFrame::Message {
                    tag: 1,
                    body: Bytes::from_static(&[0xaa, 0xbb]),
                },
                &mut buf,
            )
            .unwrap();
        // 4-byte big-endian length prefix, kind, LE tag, body
        insta::assert_snapshot!(hex(&buf), @"000000070001000000aabb");
    }

    #[test]
    fn roundtrip_control_frames() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(WireFrame::Barrier, &mut buf).unwrap();
        codec.encode(WireFrame::Disconnect, &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(WireFrame::Barrier));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(WireFrame::Disconnect));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let mut codec = EnvelopeCodec::new();
        let mut full = BytesMut::new();
        codec
            .encode(
                WireFrame::Message {
                    tag: 0,
                    body: Bytes::from_static(b"12345678"),
                },
                &mut full,
            )
            .unwrap();

        let mut partial = full.split_to(6);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        partial.unsplit(full);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(
            decoded,
            WireFrame::Message {
                tag: 0,
                body: Bytes::from_static(b"12345678")
            }
        );
    }

    #[test]
    fn unknown_kind_is_invalid_data() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&[0, 0, 0, 5, 9, 0, 0, 0, 0][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_header_is_invalid_data() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&[0, 0, 0, 2, 0, 0][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
