//! Symmetric shutdown of a coupled session.
//!
//! Flow, run once by each peer:
//! 1. Read the address from the descriptor (it must still exist)
//! 2. Role handshake: the sender answers one more accept with the sentinel
//!    window tagged TERMINATE; the receiver sends a TERMINATE ready token
//! 3. Barrier, so neither side closes while the other still expects traffic
//! 4. Disconnect, close the port, remove the descriptor

use std::path::Path;
use std::sync::Arc;

use crate::channel::{Channel, SourceMatch, TagMatch};
use crate::config::BridgeConfig;
use crate::connection::bounded;
use crate::error::Result;
use crate::exchange::{ExchangeReceiver, ExchangeSender};
use crate::log_sink::LogSink;
use crate::protocol::{Role, Tag, TimeWindow};
use crate::rendezvous::PortDescriptorStore;
use crate::wire;

/// The side being shut down, carrying the exchange state it built up.
///
/// The sender's state records the bound peer and whether the receiver has
/// already asked to end the stream; shutdown must continue from it.
pub enum ShutdownRole<'a> {
    Sender(&'a mut ExchangeSender),
    Receiver(&'a ExchangeReceiver),
}

impl ShutdownRole<'_> {
    pub fn role(&self) -> Role {
        match self {
            Self::Sender(_) => Role::Sender,
            Self::Receiver(_) => Role::Receiver,
        }
    }
}

pub struct TerminationCoordinator {
    config: BridgeConfig,
    log: Arc<dyn LogSink>,
}

impl TerminationCoordinator {
    pub fn new(config: BridgeConfig, log: Arc<dyn LogSink>) -> Self {
        Self { config, log }
    }

    /// Shut down `channel` for `role` and release the rendezvous at `path`.
    ///
    /// Consumes the channel: after return it is disconnected and the port is
    /// closed. Returns only after the peer has reached the barrier too.
    pub async fn terminate<C: Channel>(
        &self,
        channel: C,
        path: impl AsRef<Path>,
        role: ShutdownRole<'_>,
    ) -> Result<()> {
        let store = PortDescriptorStore::new(path.as_ref());
        self.run(channel, &store, role).await
    }

    pub(crate) async fn run<C: Channel>(
        &self,
        mut channel: C,
        store: &PortDescriptorStore,
        role: ShutdownRole<'_>,
    ) -> Result<()> {
        // read before the handshake: after the barrier the peer may remove it
        let address = store.read_address()?;
        if &address != channel.address() {
            self.log.warn(&format!(
                "descriptor address {address} differs from channel address {}",
                channel.address()
            ));
        }

        let is_sender = role.role() == Role::Sender;
        match role {
            ShutdownRole::Sender(sender) => {
                self.log.info(&format!("close connection send {address}"));
                self.send_sentinel(&mut channel, sender).await?;
            }
            ShutdownRole::Receiver(receiver) => {
                self.log.info(&format!("close connection receive {address}"));
                channel
                    .send(receiver.upstream(), Tag::Terminate.as_raw(), wire::ready_token())
                    .await?;
            }
        }

        self.log.info("Barrier");
        bounded("termination barrier", self.config.barrier_timeout, async {
            Ok(channel.barrier().await?)
        })
        .await?;

        if is_sender {
            // the receiver's own TERMINATE token, sent before its barrier; the
            // peer may already have disconnected past the barrier
            let terminate = TagMatch::Exact(Tag::Terminate.as_raw());
            match channel.try_recv(SourceMatch::Any, terminate) {
                Ok(Some(_)) => self.log.debug("receiver acknowledged termination"),
                Ok(None) => {}
                Err(e) => self.log.debug(&format!("no termination ack: {e}")),
            }
        }

        self.log.info("disconnect communication");
        channel.disconnect().await?;

        self.log.info(&format!("close {address}"));
        channel.close_port(&address).await?;
        store.remove()?;
        self.log.info(&format!("close connection {address}"));
        Ok(())
    }

    async fn send_sentinel<C: Channel>(
        &self,
        channel: &mut C,
        sender: &mut ExchangeSender,
    ) -> Result<()> {
        if sender.peer_terminated() {
            self.log.info("receiver already ended the stream");
            return Ok(());
        }
        self.log.info("send check");
        let accept = sender.accept(channel).await?;
        if accept.tag == Tag::Terminate {
            // receiver is shutting down itself and waits for no frame
            self.log.info("receiver already ended the stream");
            return Ok(());
        }
        self.log.info("send end simulation");
        channel
            .send(
                accept.source,
                Tag::Terminate.as_raw(),
                wire::encode_window(&TimeWindow::SENTINEL),
            )
            .await?;
        Ok(())
    }
}
