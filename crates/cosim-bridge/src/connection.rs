//! Opening a channel through the filesystem rendezvous.
//!
//! Flow on the connecting side:
//! 1. Poll for `<path>.unlock`, sleeping `poll_interval` between misses
//! 2. Consume the lock (exactly one establisher wins per publication)
//! 3. Read the address from `<path>`
//! 4. Connect
//!
//! The listening side mirrors it with [`publish_and_accept`].

use std::path::Path;
use std::sync::Arc;

use crate::channel::{Connector, Port};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::log_sink::LogSink;
use crate::rendezvous::PortDescriptorStore;

/// Run `fut`, failing with a timeout error for `stage` when `limit` is set and
/// expires first.
pub(crate) async fn bounded<T>(
    stage: &'static str,
    limit: Option<std::time::Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BridgeError::timeout(stage, limit))?,
        None => fut.await,
    }
}

pub struct ConnectionEstablisher<C: Connector> {
    connector: C,
    config: BridgeConfig,
    log: Arc<dyn LogSink>,
}

impl<C: Connector> ConnectionEstablisher<C> {
    pub fn new(connector: C, config: BridgeConfig, log: Arc<dyn LogSink>) -> Self {
        Self {
            connector,
            config,
            log,
        }
    }

    /// Wait for the peer to publish at `path`, then open the channel.
    ///
    /// Without `connect_timeout` this waits as long as the peer takes to
    /// start. When the bound expires after the lock was consumed, the
    /// publication is spent and the peer must publish again.
    pub async fn establish(&self, path: impl AsRef<Path>) -> Result<C::Channel> {
        let store = PortDescriptorStore::new(path.as_ref());
        bounded(
            "connection establishment",
            self.config.connect_timeout,
            self.discover_and_connect(&store),
        )
        .await
    }

    async fn discover_and_connect(&self, store: &PortDescriptorStore) -> Result<C::Channel> {
        self.wait_for_lock(store).await?;
        let address = store.read_address()?;
        self.log.info(&format!("wait connection {address}"));
        let channel = self.connector.connect(&address).await?;
        self.log.info(&format!("connect to {address}"));
        Ok(channel)
    }

    async fn wait_for_lock(&self, store: &PortDescriptorStore) -> Result<()> {
        loop {
            if store.try_consume_lock()? {
                return Ok(());
            }
            self.log.info(&format!(
                "{} not found yet, retry in {:?}",
                store.lock_path().display(),
                self.config.poll_interval
            ));
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// Listening side: publish the port's address at `path` and accept one peer.
pub async fn publish_and_accept<P: Port>(
    port: P,
    path: impl AsRef<Path>,
    config: &BridgeConfig,
    log: &dyn LogSink,
) -> Result<P::Channel> {
    let store = PortDescriptorStore::new(path.as_ref());
    let address = port.address().clone();
    store.publish(&address)?;
    log.info(&format!("wait connection {address}"));
    let channel = bounded("peer accept", config.connect_timeout, async {
        Ok(port.accept().await?)
    })
    .await?;
    log.info(&format!("accepted connection on {address}"));
    Ok(channel)
}
