//! Receive-side matching shared by every transport.
//!
//! Transports push [`Inbound`] items into an unbounded queue as they arrive.
//! The mailbox drains that queue into a pending list and hands out the first
//! envelope matching a source/tag filter, so messages that are not asked for
//! yet keep their arrival order.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use super::{ChannelError, Envelope, SourceMatch, TagMatch};

#[derive(Debug)]
pub(crate) enum Inbound {
    Message(Envelope),
    /// Peer entered the barrier.
    Barrier,
    /// Peer released the connection in order.
    Disconnect,
    /// Transport could not decode what arrived; nothing after it is trusted.
    Fault(String),
}

#[derive(Debug, Clone, PartialEq)]
enum PeerState {
    Open,
    Disconnected,
    Closed,
    Faulted(String),
}

pub(crate) struct Mailbox {
    rx: mpsc::UnboundedReceiver<Inbound>,
    pending: VecDeque<Envelope>,
    barrier_tokens: usize,
    peer: PeerState,
}

impl Mailbox {
    pub fn new(rx: mpsc::UnboundedReceiver<Inbound>) -> Self {
        Self {
            rx,
            pending: VecDeque::new(),
            barrier_tokens: 0,
            peer: PeerState::Open,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn try_recv(
        &mut self,
        source: SourceMatch,
        tag: TagMatch,
    ) -> Result<Option<Envelope>, ChannelError> {
        self.drain_ready();
        if let Some(envelope) = self.take(source, tag) {
            return Ok(Some(envelope));
        }
        match self.terminal_error() {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    pub async fn recv(
        &mut self,
        source: SourceMatch,
        tag: TagMatch,
    ) -> Result<Envelope, ChannelError> {
        loop {
            if let Some(envelope) = self.take(source, tag) {
                return Ok(envelope);
            }
            if let Some(e) = self.terminal_error() {
                return Err(e);
            }
            self.wait_next().await;
        }
    }

    pub async fn wait_barrier(&mut self) -> Result<(), ChannelError> {
        loop {
            self.drain_ready();
            if self.barrier_tokens > 0 {
                self.barrier_tokens -= 1;
                return Ok(());
            }
            if let Some(e) = self.terminal_error() {
                return Err(e);
            }
            self.wait_next().await;
        }
    }

    async fn wait_next(&mut self) {
        match self.rx.recv().await {
            Some(inbound) => self.absorb(inbound),
            None => self.mark_closed(),
        }
    }

    fn drain_ready(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(inbound) => self.absorb(inbound),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.mark_closed();
                    break;
                }
            }
        }
    }

    fn absorb(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Message(envelope) => self.pending.push_back(envelope),
            Inbound::Barrier => self.barrier_tokens += 1,
            Inbound::Disconnect => {
                if self.peer == PeerState::Open {
                    self.peer = PeerState::Disconnected;
                }
            }
            Inbound::Fault(reason) => self.peer = PeerState::Faulted(reason),
        }
    }

    fn mark_closed(&mut self) {
        if self.peer == PeerState::Open {
            self.peer = PeerState::Closed;
        }
    }

    fn take(&mut self, source: SourceMatch, tag: TagMatch) -> Option<Envelope> {
        let index = self
            .pending
            .iter()
            .position(|e| source.matches(e.source) && tag.matches(e.tag))?;
        self.pending.remove(index)
    }

    fn terminal_error(&self) -> Option<ChannelError> {
        match &self.peer {
            PeerState::Open => None,
            PeerState::Disconnected => Some(ChannelError::PeerDisconnected),
            PeerState::Closed => Some(ChannelError::PeerClosed),
            PeerState::Faulted(reason) => Some(ChannelError::Corrupt(reason.clone())),
        }
    }
}
