//! Tag-addressable point-to-point channel between the two coupled peers.
//!
//! # Architecture
//!
//! - **Channel**: blocking send/recv, non-blocking receive, two-party barrier,
//!   disconnect and port release
//! - **Mailbox**: arrival-ordered matching by source and tag, shared by all
//!   transports
//! - **memory**: in-process transport for deterministic tests
//! - **tcp**: length-delimited frames over a TCP stream

mod mailbox;

pub mod codec;
pub mod memory;
pub mod tcp;

use std::io;

use async_trait::async_trait;
use tokio_util::bytes::Bytes;

use crate::protocol::PeerHandle;
use crate::rendezvous::PortAddress;

pub(crate) use mailbox::{Inbound, Mailbox};

/// One message as delivered to the owner of a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub source: PeerHandle,
    pub tag: i32,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMatch {
    Any,
    Peer(PeerHandle),
}

impl SourceMatch {
    pub fn matches(&self, source: PeerHandle) -> bool {
        match self {
            Self::Any => true,
            Self::Peer(peer) => *peer == source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMatch {
    Any,
    Exact(i32),
}

impl TagMatch {
    pub fn matches(&self, tag: i32) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => *expected == tag,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Connection dropped without an orderly disconnect.
    #[error("peer closed the connection")]
    PeerClosed,

    /// Peer disconnected while this side still expected traffic.
    #[error("peer disconnected")]
    PeerDisconnected,

    #[error("channel already disconnected")]
    Disconnected,

    #[error("no endpoint with {0}")]
    UnknownPeer(PeerHandle),

    #[error("no open port at {0}")]
    NoSuchPort(PortAddress),

    #[error("invalid channel address '{0}'")]
    InvalidAddress(String),

    #[error("corrupt transport frame: {0}")]
    Corrupt(String),

    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// An opened connection, exclusively owned by one side of the session.
#[async_trait]
pub trait Channel: Send {
    /// Hand `body` to the transport. Returns once the message is fully
    /// written; no partial message is left pending.
    async fn send(&mut self, dest: PeerHandle, tag: i32, body: Bytes) -> Result<(), ChannelError>;

    /// Block until a message matching `source` and `tag` arrives.
    async fn recv(&mut self, source: SourceMatch, tag: TagMatch) -> Result<Envelope, ChannelError>;

    /// Consume a matching message if one has already arrived.
    fn try_recv(
        &mut self,
        source: SourceMatch,
        tag: TagMatch,
    ) -> Result<Option<Envelope>, ChannelError>;

    /// Block until both endpoints have entered the barrier.
    async fn barrier(&mut self) -> Result<(), ChannelError>;

    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    /// Release the rendezvous address. Safe to call more than once.
    async fn close_port(&mut self, address: &PortAddress) -> Result<(), ChannelError>;

    /// Address this channel was opened through.
    fn address(&self) -> &PortAddress;

    /// Largest message body the transport can carry, if it has a limit.
    fn max_message_len(&self) -> Option<usize> {
        None
    }
}

/// Listening side of a rendezvous: an opened address awaiting one peer.
#[async_trait]
pub trait Port: Send {
    type Channel: Channel;

    fn address(&self) -> &PortAddress;

    async fn accept(self) -> Result<Self::Channel, ChannelError>;
}

/// Connecting side of a rendezvous.
#[async_trait]
pub trait Connector: Send + Sync {
    type Channel: Channel;

    async fn connect(&self, address: &PortAddress) -> Result<Self::Channel, ChannelError>;
}
