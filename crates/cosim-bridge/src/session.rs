//! One side of a coupled run, from connection to shutdown.
//!
//! State machine:
//! ```text
//! Connected --send/receive--> Exchanging --None--> Terminating --terminate--> Closed
//!     \___________________________terminate__________________________________/
//! ```

use std::path::Path;
use std::sync::Arc;

use crate::channel::{Channel, Connector, Port};
use crate::config::BridgeConfig;
use crate::connection::{ConnectionEstablisher, publish_and_accept};
use crate::error::{BridgeError, Result};
use crate::exchange::{ExchangeReceiver, ExchangeSender};
use crate::log_sink::LogSink;
use crate::protocol::{ExchangeFrame, PeerHandle, Role, SessionId, TimeWindow};
use crate::rendezvous::PortDescriptorStore;
use crate::termination::{ShutdownRole, TerminationCoordinator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Exchanging,
    /// The stream has ended; only `terminate` is allowed.
    Terminating,
    Closed,
}

/// What a finished session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub role: Role,
    pub frames: u64,
    pub state: SessionState,
}

enum Driver {
    Sender(ExchangeSender),
    Receiver(ExchangeReceiver),
}

pub struct CouplingSession<C: Channel> {
    id: SessionId,
    role: Role,
    channel: C,
    store: PortDescriptorStore,
    state: SessionState,
    driver: Driver,
    config: BridgeConfig,
    log: Arc<dyn LogSink>,
}

impl<C: Channel> CouplingSession<C> {
    /// Connecting side: wait for the descriptor at `path` and connect.
    pub async fn connect<K>(
        connector: K,
        path: impl AsRef<Path>,
        role: Role,
        config: BridgeConfig,
        log: Arc<dyn LogSink>,
    ) -> Result<Self>
    where
        K: Connector<Channel = C>,
    {
        let establisher = ConnectionEstablisher::new(connector, config.clone(), Arc::clone(&log));
        let channel = establisher.establish(path.as_ref()).await?;
        Ok(Self::from_channel(channel, path, role, config, log))
    }

    /// Listening side: publish `port` at `path` and accept the peer.
    pub async fn accept<P>(
        port: P,
        path: impl AsRef<Path>,
        role: Role,
        config: BridgeConfig,
        log: Arc<dyn LogSink>,
    ) -> Result<Self>
    where
        P: Port<Channel = C>,
    {
        let channel = publish_and_accept(port, path.as_ref(), &config, log.as_ref()).await?;
        Ok(Self::from_channel(channel, path, role, config, log))
    }

    /// Wrap an already opened channel whose descriptor lives at `path`.
    pub fn from_channel(
        channel: C,
        path: impl AsRef<Path>,
        role: Role,
        config: BridgeConfig,
        log: Arc<dyn LogSink>,
    ) -> Self {
        let id = SessionId::new();
        let driver = match role {
            Role::Sender => Driver::Sender(ExchangeSender::new(&config, Arc::clone(&log))),
            Role::Receiver => Driver::Receiver(ExchangeReceiver::new(Arc::clone(&log))),
        };
        log.info(&format!("session {id} connected as {role} on {}", channel.address()));
        Self {
            id,
            role,
            channel,
            store: PortDescriptorStore::new(path.as_ref()),
            state: SessionState::Connected,
            driver,
            config,
            log,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The peer bound by the first accept, for the sending role.
    pub fn peer(&self) -> Option<PeerHandle> {
        match &self.driver {
            Driver::Sender(sender) => sender.peer(),
            Driver::Receiver(receiver) => Some(receiver.upstream()),
        }
    }

    pub fn frames(&self) -> u64 {
        match &self.driver {
            Driver::Sender(sender) => sender.frames_sent(),
            Driver::Receiver(receiver) => receiver.frames_received(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub async fn send_frame(&mut self, window: TimeWindow, payload: &[f64]) -> Result<()> {
        self.ensure_open("send_frame")?;
        let Driver::Sender(sender) = &mut self.driver else {
            return Err(BridgeError::invalid_state(format!(
                "send_frame on {} session {}",
                self.role, self.id
            )));
        };
        self.state = SessionState::Exchanging;
        match sender.send_frame(&mut self.channel, window, payload).await {
            Err(BridgeError::StreamEnded) => {
                self.state = SessionState::Terminating;
                Err(BridgeError::StreamEnded)
            }
            other => other,
        }
    }

    pub async fn send(&mut self, frame: &ExchangeFrame) -> Result<()> {
        self.send_frame(frame.window, &frame.payload).await
    }

    /// Receive the next frame; `None` once the sender has terminated.
    pub async fn receive_frame(&mut self) -> Result<Option<ExchangeFrame>> {
        self.ensure_open("receive_frame")?;
        let Driver::Receiver(receiver) = &mut self.driver else {
            return Err(BridgeError::invalid_state(format!(
                "receive_frame on {} session {}",
                self.role, self.id
            )));
        };
        self.state = SessionState::Exchanging;
        let frame = receiver.receive_frame(&mut self.channel).await?;
        if frame.is_none() {
            self.state = SessionState::Terminating;
        }
        Ok(frame)
    }

    /// Run the shutdown handshake and release the channel and descriptor.
    pub async fn terminate(mut self) -> Result<SessionSummary> {
        self.log
            .info(&format!("session {} terminating from {:?}", self.id, self.state));
        let frames = self.frames();
        let coordinator = TerminationCoordinator::new(self.config.clone(), Arc::clone(&self.log));
        let role = match &mut self.driver {
            Driver::Sender(sender) => ShutdownRole::Sender(sender),
            Driver::Receiver(receiver) => ShutdownRole::Receiver(receiver),
        };
        coordinator.run(self.channel, &self.store, role).await?;
        Ok(SessionSummary {
            id: self.id,
            role: self.role,
            frames,
            state: SessionState::Closed,
        })
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        match self.state {
            SessionState::Connected | SessionState::Exchanging => Ok(()),
            state => Err(BridgeError::invalid_state(format!(
                "{operation} in state {state:?} of session {}",
                self.id
            ))),
        }
    }
}
