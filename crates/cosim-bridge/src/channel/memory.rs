//! In-process transport.
//!
//! Deterministic stand-in for the network: each direction is a tokio
//! unbounded queue feeding the receiving end's [`Mailbox`]. A [`MemoryHub`]
//! plays the role of the port namespace so the rendezvous and connection code
//! can be exercised without sockets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::bytes::Bytes;

use super::{
    Channel, ChannelError, Connector, Envelope, Inbound, Mailbox, Port, SourceMatch, TagMatch,
};
use crate::protocol::PeerHandle;
use crate::rendezvous::PortAddress;

pub struct MemoryChannel {
    address: PortAddress,
    local: PeerHandle,
    remote: PeerHandle,
    tx: mpsc::UnboundedSender<Inbound>,
    mailbox: Mailbox,
    hub: Option<MemoryHub>,
    disconnected: bool,
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("address", &self.address)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("disconnected", &self.disconnected)
            .finish_non_exhaustive()
    }
}

/// Two connected endpoints, both seeing the other as rank 0.
pub fn pair() -> (MemoryChannel, MemoryChannel) {
    pair_with_ranks(PeerHandle::UPSTREAM, PeerHandle::UPSTREAM)
}

/// Two connected endpoints; envelopes sent by `a` carry `a_rank` as source and
/// envelopes sent by `b` carry `b_rank`.
pub fn pair_with_ranks(a_rank: PeerHandle, b_rank: PeerHandle) -> (MemoryChannel, MemoryChannel) {
    wire(PortAddress::new("mem://direct"), a_rank, b_rank, None)
}

fn wire(
    address: PortAddress,
    a_rank: PeerHandle,
    b_rank: PeerHandle,
    hub: Option<MemoryHub>,
) -> (MemoryChannel, MemoryChannel) {
    let (to_b, b_rx) = mpsc::unbounded_channel();
    let (to_a, a_rx) = mpsc::unbounded_channel();
    let a = MemoryChannel {
        address: address.clone(),
        local: a_rank,
        remote: b_rank,
        tx: to_b,
        mailbox: Mailbox::new(a_rx),
        hub: hub.clone(),
        disconnected: false,
    };
    let b = MemoryChannel {
        address,
        local: b_rank,
        remote: a_rank,
        tx: to_a,
        mailbox: Mailbox::new(b_rx),
        hub,
        disconnected: false,
    };
    (a, b)
}

impl MemoryChannel {
    fn ensure_connected(&self) -> Result<(), ChannelError> {
        if self.disconnected {
            return Err(ChannelError::Disconnected);
        }
        Ok(())
    }

    fn post(&self, inbound: Inbound) -> Result<(), ChannelError> {
        self.tx.send(inbound).map_err(|_| ChannelError::PeerClosed)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&mut self, dest: PeerHandle, tag: i32, body: Bytes) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        if dest != self.remote {
            return Err(ChannelError::UnknownPeer(dest));
        }
        self.post(Inbound::Message(Envelope {
            source: self.local,
            tag,
            body,
        }))
    }

    async fn recv(&mut self, source: SourceMatch, tag: TagMatch) -> Result<Envelope, ChannelError> {
        self.ensure_connected()?;
        self.mailbox.recv(source, tag).await
    }

    fn try_recv(
        &mut self,
        source: SourceMatch,
        tag: TagMatch,
    ) -> Result<Option<Envelope>, ChannelError> {
        self.ensure_connected()?;
        self.mailbox.try_recv(source, tag)
    }

    async fn barrier(&mut self) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        self.post(Inbound::Barrier)?;
        self.mailbox.wait_barrier().await
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        self.disconnected = true;
        // the peer may already be gone; that is the point of disconnecting
        let _ = self.tx.send(Inbound::Disconnect);
        if self.mailbox.pending_len() > 0 {
            tracing::warn!(
                pending = self.mailbox.pending_len(),
                "Disconnecting with unread messages"
            );
        }
        Ok(())
    }

    async fn close_port(&mut self, address: &PortAddress) -> Result<(), ChannelError> {
        if let Some(hub) = &self.hub {
            hub.close(address);
        }
        Ok(())
    }

    fn address(&self) -> &PortAddress {
        &self.address
    }
}

#[derive(Default)]
struct HubInner {
    next_port: u64,
    ports: HashMap<PortAddress, mpsc::UnboundedSender<MemoryChannel>>,
}

/// Port namespace shared by the peers of one test.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_port(&self) -> MemoryPort {
        let (tx, incoming) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.next_port += 1;
        let address = PortAddress::new(format!("mem://{}", inner.next_port));
        inner.ports.insert(address.clone(), tx);
        tracing::trace!(%address, "Opened memory port");
        MemoryPort { address, incoming }
    }

    pub fn is_open(&self, address: &PortAddress) -> bool {
        self.lock().ports.contains_key(address)
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { hub: self.clone() }
    }

    fn close(&self, address: &PortAddress) {
        if self.lock().ports.remove(address).is_some() {
            tracing::trace!(%address, "Closed memory port");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct MemoryPort {
    address: PortAddress,
    incoming: mpsc::UnboundedReceiver<MemoryChannel>,
}

#[async_trait]
impl Port for MemoryPort {
    type Channel = MemoryChannel;

    fn address(&self) -> &PortAddress {
        &self.address
    }

    async fn accept(mut self) -> Result<MemoryChannel, ChannelError> {
        self.incoming
            .recv()
            .await
            .ok_or(ChannelError::NoSuchPort(self.address))
    }
}

#[derive(Clone)]
pub struct MemoryConnector {
    hub: MemoryHub,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Channel = MemoryChannel;

    async fn connect(&self, address: &PortAddress) -> Result<MemoryChannel, ChannelError> {
        let acceptor = self
            .hub
            .lock()
            .ports
            .get(address)
            .cloned()
            .ok_or_else(|| ChannelError::NoSuchPort(address.clone()))?;

        let (local, remote) = wire(
            address.clone(),
            PeerHandle::UPSTREAM,
            PeerHandle::UPSTREAM,
            Some(self.hub.clone()),
        );
        acceptor
            .send(remote)
            .map_err(|_| ChannelError::NoSuchPort(address.clone()))?;
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_recv() {
        let (mut a, mut b) = pair();
        a.send(PeerHandle::UPSTREAM, 0, Bytes::from_static(b"hi"))
            .await
            .unwrap();
        let got = b.recv(SourceMatch::Any, TagMatch::Exact(0)).await.unwrap();
        assert_eq!(got.body, Bytes::from_static(b"hi"));
        assert_eq!(got.source, PeerHandle::UPSTREAM);
    }

    #[tokio::test]
    async fn ranks_are_stamped_on_envelopes() {
        let (mut a, mut b) = pair_with_ranks(PeerHandle::new(0), PeerHandle::new(3));
        b.send(PeerHandle::new(0), 0, Bytes::new()).await.unwrap();
        let got = a.try_recv(SourceMatch::Any, TagMatch::Any).unwrap().unwrap();
        assert_eq!(got.source, PeerHandle::new(3));

        let err = a.send(PeerHandle::new(1), 0, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, ChannelError::UnknownPeer(p) if p == PeerHandle::new(1)));
    }

    #[tokio::test]
    async fn barrier_waits_for_both() {
        let (mut a, mut b) = pair();
        let waiter = tokio::spawn(async move {
            a.barrier().await.unwrap();
            a
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        b.barrier().await.unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn use_after_disconnect() {
        let (mut a, mut b) = pair();
        a.disconnect().await.unwrap();
        assert!(matches!(
            a.send(PeerHandle::UPSTREAM, 0, Bytes::new()).await,
            Err(ChannelError::Disconnected)
        ));
        assert!(matches!(
            b.recv(SourceMatch::Any, TagMatch::Any).await,
            Err(ChannelError::PeerDisconnected)
        ));
    }

    #[tokio::test]
    async fn dropped_peer_is_closed() {
        let (mut a, b) = pair();
        drop(b);
        assert!(matches!(
            a.send(PeerHandle::UPSTREAM, 0, Bytes::new()).await,
            Err(ChannelError::PeerClosed)
        ));
    }

    #[tokio::test]
    async fn hub_connect_accept_and_close() {
        let hub = MemoryHub::new();
        let port = hub.open_port();
        let address = port.address().clone();
        assert_eq!(address.as_str(), "mem://1");

        let accept = tokio::spawn(port.accept());
        let mut client = hub.connector().connect(&address).await.unwrap();
        let mut server = accept.await.unwrap().unwrap();

        client
            .send(PeerHandle::UPSTREAM, 1, Bytes::from_static(b"x"))
            .await
            .unwrap();
        let got = server.recv(SourceMatch::Any, TagMatch::Any).await.unwrap();
        assert_eq!(got.tag, 1);

        assert!(hub.is_open(&address));
        server.close_port(&address).await.unwrap();
        client.close_port(&address).await.unwrap();
        assert!(!hub.is_open(&address));
        assert!(matches!(
            hub.connector().connect(&address).await,
            Err(ChannelError::NoSuchPort(_))
        ));
    }
}
