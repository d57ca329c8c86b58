//! cosim-bridge: point-to-point data coupling between two co-simulation peers.

mod connection;
mod termination;

pub mod channel;
pub mod config;
pub mod error;
pub mod exchange;
pub mod log_sink;
pub mod logging;
pub mod protocol;
pub mod rendezvous;
pub mod session;
pub mod wire;

pub use channel::memory::{MemoryChannel, MemoryConnector, MemoryHub, MemoryPort};
pub use channel::tcp::{TcpChannel, TcpConnector, TcpPort};
pub use channel::{Channel, ChannelError, Connector, Envelope, Port, SourceMatch, TagMatch};
pub use config::{BridgeConfig, ConfigError};
pub use connection::{ConnectionEstablisher, publish_and_accept};
pub use error::{BridgeError, ProtocolViolation, Result};
pub use exchange::{ExchangeReceiver, ExchangeSender};
pub use log_sink::{LogRecord, LogSink, MemorySink, TracingSink};
pub use protocol::{ExchangeFrame, PeerHandle, Role, SessionId, Tag, TimeWindow};
pub use rendezvous::{PortAddress, PortDescriptor, PortDescriptorStore};
pub use session::{CouplingSession, SessionState, SessionSummary};
pub use termination::{ShutdownRole, TerminationCoordinator};
