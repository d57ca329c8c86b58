//! Error types for the coupling protocol.

use std::path::PathBuf;
use std::time::Duration;

use crate::channel::ChannelError;

/// Violations of the framed exchange contract.
///
/// These are fatal for the session: the peer sent something this side cannot
/// interpret, and guessing would risk silently corrupting the coupled run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("unknown tag {0} (expected 0=DATA or 1=TERMINATE)")]
    UnknownTag(i32),

    #[error("negative payload length {0}")]
    NegativeLength(i32),

    #[error(
        "payload length mismatch: header announced {expected} values, \
         body carried {actual_bytes} bytes"
    )]
    PayloadLength { expected: usize, actual_bytes: usize },

    #[error("{message} body has {actual} bytes, expected {expected}")]
    BodySize {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The accept signal came from a different endpoint than the one
    /// recorded at the first handshake of the session.
    #[error("accept signal from peer {actual}, session is bound to peer {expected}")]
    PeerChanged { expected: u32, actual: u32 },

    #[error("{message} arrived with tag {actual}, expected {expected}")]
    UnexpectedTag {
        message: &'static str,
        expected: i32,
        actual: i32,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("descriptor I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("port descriptor {} is missing", path.display())]
    DescriptorMissing { path: PathBuf },

    #[error("invalid port address '{0}'")]
    InvalidAddress(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("{stage} did not complete within {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("invalid time window ({start}, {end}): start must not exceed end")]
    InvalidWindow { start: f64, end: f64 },

    /// Too many values for the i32 length field or for the transport's
    /// largest message.
    #[error("payload of {0} values is too large to send")]
    PayloadTooLarge(usize),

    /// The receiver already observed TERMINATE; the caller must stop asking.
    #[error("exchange stream already ended by peer")]
    StreamEnded,

    #[error("invalid session state: {0}")]
    InvalidState(String),
}

impl BridgeError {
    pub fn timeout(stage: &'static str, after: Duration) -> Self {
        Self::Timeout { stage, after }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Whether this failure came from the surrounding process rather than the
    /// protocol, i.e. the peer went away or the transport broke.
    pub fn is_peer_loss(&self) -> bool {
        matches!(
            self,
            Self::Channel(ChannelError::PeerClosed | ChannelError::PeerDisconnected)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
