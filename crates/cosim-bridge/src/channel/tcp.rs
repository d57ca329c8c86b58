//! TCP transport.
//!
//! - **TcpPort**: listening side, address format `tcp://{ip}:{port}`
//! - **TcpConnector**: connecting side, resolves `host:port` from the address
//! - **TcpChannel**: one accepted/connected stream; a reader task decodes
//!   frames into the channel's [`Mailbox`]
//!
//! Both sides of a connection are groups of one, so the remote endpoint is
//! always rank 0.

use std::io;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::{EnvelopeCodec, MAX_BODY_LEN, WireFrame};
use super::{
    Channel, ChannelError, Connector, Envelope, Inbound, Mailbox, Port, SourceMatch, TagMatch,
};
use crate::protocol::PeerHandle;
use crate::rendezvous::PortAddress;

const SCHEME: &str = "tcp";

pub struct TcpPort {
    listener: TcpListener,
    address: PortAddress,
}

impl TcpPort {
    /// Bind a listener on `addr` (e.g. `127.0.0.1:0`).
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let address = PortAddress::new(format!("{SCHEME}://{local}"));
        tracing::debug!(%address, "Opened TCP port");
        Ok(Self { listener, address })
    }

    /// Advertise `host` instead of the bound IP, keeping the bound port.
    /// Needed when binding a wildcard address for peers on other machines.
    pub fn with_advertised_host(mut self, host: &str) -> io::Result<Self> {
        let port = self.listener.local_addr()?.port();
        self.address = PortAddress::new(format!("{SCHEME}://{host}:{port}"));
        Ok(self)
    }
}

#[async_trait]
impl Port for TcpPort {
    type Channel = TcpChannel;

    fn address(&self) -> &PortAddress {
        &self.address
    }

    async fn accept(self) -> Result<TcpChannel, ChannelError> {
        tracing::trace!(address = %self.address, "Waiting for peer connection");
        let (stream, peer_addr) = self.listener.accept().await?;
        tracing::debug!(address = %self.address, %peer_addr, "Peer connected");
        TcpChannel::from_stream(stream, self.address, Some(self.listener))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    fn target(address: &PortAddress) -> Result<&str, ChannelError> {
        match address.split_scheme() {
            Some((SCHEME, target)) if !target.is_empty() => Ok(target),
            _ => Err(ChannelError::InvalidAddress(address.to_string())),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Channel = TcpChannel;

    async fn connect(&self, address: &PortAddress) -> Result<TcpChannel, ChannelError> {
        let target = Self::target(address)?;
        tracing::trace!(%address, "Connecting to TCP port");
        let stream = TcpStream::connect(target).await?;
        TcpChannel::from_stream(stream, address.clone(), None)
    }
}

pub struct TcpChannel {
    address: PortAddress,
    writer: FramedWrite<OwnedWriteHalf, EnvelopeCodec>,
    mailbox: Mailbox,
    reader: JoinHandle<()>,
    /// Held on the listening side until the port is closed.
    listener: Option<TcpListener>,
    disconnected: bool,
}

impl TcpChannel {
    fn from_stream(
        stream: TcpStream,
        address: PortAddress,
        listener: Option<TcpListener>,
    ) -> Result<Self, ChannelError> {
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(reader_task(
            FramedRead::new(read_half, EnvelopeCodec::new()),
            tx,
        ));
        Ok(Self {
            address,
            writer: FramedWrite::new(write_half, EnvelopeCodec::new()),
            mailbox: Mailbox::new(rx),
            reader,
            listener,
            disconnected: false,
        })
    }

    fn ensure_connected(&self) -> Result<(), ChannelError> {
        if self.disconnected {
            return Err(ChannelError::Disconnected);
        }
        Ok(())
    }

    async fn write(&mut self, frame: WireFrame) -> Result<(), ChannelError> {
        self.writer.send(frame).await.map_err(write_error)
    }
}

fn write_error(e: io::Error) -> ChannelError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => ChannelError::PeerClosed,
        _ => ChannelError::Io(e),
    }
}

async fn reader_task(
    mut reader: FramedRead<OwnedReadHalf, EnvelopeCodec>,
    tx: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        let inbound = match reader.next().await {
            Some(Ok(WireFrame::Message { tag, body })) => Inbound::Message(Envelope {
                source: PeerHandle::UPSTREAM,
                tag,
                body,
            }),
            Some(Ok(WireFrame::Barrier)) => Inbound::Barrier,
            Some(Ok(WireFrame::Disconnect)) => {
                tracing::trace!("Peer disconnected");
                let _ = tx.send(Inbound::Disconnect);
                break;
            }
            Some(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                tracing::error!(error = %e, "Undecodable frame from peer");
                let _ = tx.send(Inbound::Fault(e.to_string()));
                break;
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Peer stream failed");
                break;
            }
            None => {
                tracing::trace!("Peer stream closed");
                break;
            }
        };
        if tx.send(inbound).is_err() {
            break;
        }
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn send(&mut self, dest: PeerHandle, tag: i32, body: Bytes) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        if dest != PeerHandle::UPSTREAM {
            return Err(ChannelError::UnknownPeer(dest));
        }
        self.write(WireFrame::Message { tag, body }).await
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
        self.write(WireFrame::Barrier).await?;
        self.mailbox.wait_barrier().await
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.ensure_connected()?;
        self.disconnected = true;
        if let Err(e) = self.write(WireFrame::Disconnect).await {
            tracing::debug!(error = %e, "Peer gone before disconnect notice");
        }
        if let Err(e) = self.writer.close().await {
            tracing::debug!(error = %e, "Failed to shut down write half");
        }
        self.reader.abort();
        if self.mailbox.pending_len() > 0 {
            tracing::warn!(
                pending = self.mailbox.pending_len(),
                "Disconnecting with unread messages"
            );
        }
        Ok(())
    }

    async fn close_port(&mut self, address: &PortAddress) -> Result<(), ChannelError> {
        if *address == self.address && self.listener.take().is_some() {
            tracing::debug!(%address, "Closed TCP port");
        }
        Ok(())
    }

    fn address(&self) -> &PortAddress {
        &self.address
    }

    fn max_message_len(&self) -> Option<usize> {
        Some(MAX_BODY_LEN)
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
