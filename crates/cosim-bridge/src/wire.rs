//! Message bodies of the framed exchange.
//!
//! A DATA frame is three messages: the time window (2 x f64), the payload
//! length (1 x i32) and the payload (n x f64). All values are little-endian
//! IEEE-754 / two's complement. The ready/accept token is an empty body.

use tokio_util::bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolViolation;
use crate::protocol::TimeWindow;

pub const WINDOW_BYTES: usize = 2 * 8;
pub const LENGTH_BYTES: usize = 4;
pub const VALUE_BYTES: usize = 8;

pub fn encode_window(window: &TimeWindow) -> Bytes {
    let mut buf = BytesMut::with_capacity(WINDOW_BYTES);
    buf.put_f64_le(window.start);
    buf.put_f64_le(window.end);
    buf.freeze()
}

pub fn decode_window(body: &[u8]) -> Result<TimeWindow, ProtocolViolation> {
    check_size("time window", WINDOW_BYTES, body)?;
    let mut body = body;
    let start = body.get_f64_le();
    let end = body.get_f64_le();
    Ok(TimeWindow::new(start, end))
}

pub fn encode_length(length: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(LENGTH_BYTES);
    buf.put_i32_le(length);
    buf.freeze()
}

/// Decode the length field. Negative counts are rejected here so callers never
/// allocate from an untrusted sign.
pub fn decode_length(body: &[u8]) -> Result<usize, ProtocolViolation> {
    check_size("length", LENGTH_BYTES, body)?;
    let mut body = body;
    let raw = body.get_i32_le();
    usize::try_from(raw).map_err(|_| ProtocolViolation::NegativeLength(raw))
}

pub fn encode_payload(values: &[f64]) -> Bytes {
    let mut buf = BytesMut::with_capacity(values.len() * VALUE_BYTES);
    for value in values {
        buf.put_f64_le(*value);
    }
    buf.freeze()
}

pub fn decode_payload(body: &[u8], expected: usize) -> Result<Vec<f64>, ProtocolViolation> {
    if expected.checked_mul(VALUE_BYTES) != Some(body.len()) {
        return Err(ProtocolViolation::PayloadLength {
            expected,
            actual_bytes: body.len(),
        });
    }
    let mut body = body;
    let mut values = Vec::with_capacity(expected);
    while body.has_remaining() {
        values.push(body.get_f64_le());
    }
    Ok(values)
}

/// Readiness token. Its content is never inspected; only tag and source matter.
pub fn ready_token() -> Bytes {
    Bytes::new()
}

fn check_size(
    message: &'static str,
    expected: usize,
    body: &[u8],
) -> Result<(), ProtocolViolation> {
    if body.len() != expected {
        return Err(ProtocolViolation::BodySize {
            message,
            expected,
            actual: body.len(),
        });
    }
    Ok(())
}
