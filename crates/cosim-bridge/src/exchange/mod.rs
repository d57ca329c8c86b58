//! Per-interval exchange of framed data.
//!
//! The receiver asks for each frame with a ready token; the sender waits for
//! that token before writing anything. This lock-step keeps the sender from
//! running ahead of the receiver and keeps every frame's three messages
//! contiguous on the channel.

mod receiver;
mod sender;

use std::time::Duration;

pub use receiver::ExchangeReceiver;
pub use sender::ExchangeSender;

use crate::channel::{Channel, SourceMatch, TagMatch};
use crate::connection::bounded;
use crate::error::Result;
use crate::protocol::{PeerHandle, Tag};

/// A readiness token observed by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Accept {
    pub source: PeerHandle,
    pub tag: Tag,
}

/// Busy-poll for the next readiness token from any peer.
///
/// Checks with `try_recv` and yields to the runtime between attempts, so a
/// peer still finishing its previous step never deadlocks against us.
pub(crate) async fn await_accept<C: Channel + ?Sized>(
    channel: &mut C,
    limit: Option<Duration>,
) -> Result<Accept> {
    bounded("accept-wait", limit, async {
        loop {
            if let Some(envelope) = channel.try_recv(SourceMatch::Any, TagMatch::Any)? {
                let tag = Tag::try_from(envelope.tag)?;
                return Ok(Accept {
                    source: envelope.source,
                    tag,
                });
            }
            tokio::task::yield_now().await;
        }
    })
    .await
}
