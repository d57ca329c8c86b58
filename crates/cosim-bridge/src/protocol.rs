//! Protocol types shared by both coupled peers.
//!
//! Every exchange cycle moves one [`ExchangeFrame`] from the sender role to
//! the receiver role:
//! - **DATA** frames carry a time window, a length and the payload, as three
//!   separate messages on the same tag.
//! - **TERMINATE** frames carry only the sentinel window `(0, 0)`.

use std::fmt;

use crate::error::ProtocolViolation;

/// Message tag, deciding receiver behaviour independent of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Data,
    Terminate,
}

impl Tag {
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Data => 0,
            Self::Terminate => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Terminate => "TERMINATE",
        }
    }
}

impl TryFrom<i32> for Tag {
    type Error = ProtocolViolation;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Data),
            1 => Ok(Self::Terminate),
            other => Err(ProtocolViolation::UnknownTag(other)),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rank of an endpoint within its side of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerHandle(u32);

impl PeerHandle {
    /// The fixed upstream peer a receiver signals readiness to.
    pub const UPSTREAM: PeerHandle = PeerHandle(0);

    pub const fn new(rank: u32) -> Self {
        Self(rank)
    }

    pub const fn rank(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank {}", self.0)
    }
}

/// Simulated time interval covered by one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    /// Window carried by the termination frame.
    pub const SENTINEL: TimeWindow = TimeWindow {
        start: 0.0,
        end: 0.0,
    };

    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// `start <= end`; false for NaN bounds.
    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

impl From<(f64, f64)> for TimeWindow {
    fn from((start, end): (f64, f64)) -> Self {
        Self::new(start, end)
    }
}

/// One unit of exchanged data for one coupling interval.
///
/// The wire length field is derived from `payload`, so it can never disagree
/// with the payload on the sending side.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeFrame {
    pub window: TimeWindow,
    pub payload: Vec<f64>,
}

impl ExchangeFrame {
    pub fn new(window: impl Into<TimeWindow>, payload: Vec<f64>) -> Self {
        Self {
            window: window.into(),
            payload,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Which half of the exchange this peer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier for one co-simulation run, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_raw_values_are_wire_contract() {
        assert_eq!(Tag::Data.as_raw(), 0);
        assert_eq!(Tag::Terminate.as_raw(), 1);
        assert_eq!(Tag::try_from(0), Ok(Tag::Data));
        assert_eq!(Tag::try_from(1), Ok(Tag::Terminate));
    }

    #[test]
    fn unknown_tag_is_violation() {
        assert_eq!(Tag::try_from(2), Err(ProtocolViolation::UnknownTag(2)));
        assert_eq!(Tag::try_from(-1), Err(ProtocolViolation::UnknownTag(-1)));
    }

    #[test]
    fn window_ordering() {
        assert!(TimeWindow::new(10.0, 10.1).is_ordered());
        assert!(TimeWindow::new(3.0, 3.0).is_ordered());
        assert!(!TimeWindow::new(2.0, 1.0).is_ordered());
        assert!(!TimeWindow::new(f64::NAN, 1.0).is_ordered());
        assert!(TimeWindow::SENTINEL.is_ordered());
    }

    #[test]
    fn frame_length_follows_payload() {
        let frame = ExchangeFrame::new((0.0, 1.0), vec![1.0, 2.0]);
        assert_eq!(frame.len(), 2);
        assert!(!frame.is_empty());
        assert!(ExchangeFrame::new((0.0, 1.0), vec![]).is_empty());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
