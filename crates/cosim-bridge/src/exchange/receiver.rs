use std::sync::Arc;

use crate::channel::{Channel, Envelope, SourceMatch, TagMatch};
use crate::error::{BridgeError, ProtocolViolation, Result};
use crate::log_sink::LogSink;
use crate::protocol::{ExchangeFrame, PeerHandle, Tag, TimeWindow};
use crate::wire;

/// Requests and receives one frame per coupling interval from the upstream
/// peer.
pub struct ExchangeReceiver {
    upstream: PeerHandle,
    ended: bool,
    frames_received: u64,
    log: Arc<dyn LogSink>,
}

impl ExchangeReceiver {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self::with_upstream(PeerHandle::UPSTREAM, log)
    }

    pub fn with_upstream(upstream: PeerHandle, log: Arc<dyn LogSink>) -> Self {
        Self {
            upstream,
            ended: false,
            frames_received: 0,
            log,
        }
    }

    pub fn upstream(&self) -> PeerHandle {
        self.upstream
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Ask for the next frame and wait for it.
    ///
    /// Returns `None` once the sender has terminated the stream; length and
    /// payload are not awaited in that case. Calling again after `None` fails
    /// with [`BridgeError::StreamEnded`].
    pub async fn receive_frame<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
    ) -> Result<Option<ExchangeFrame>> {
        if self.ended {
            return Err(BridgeError::StreamEnded);
        }
        self.log.info("start receive");
        let upstream = SourceMatch::Peer(self.upstream);

        channel
            .send(self.upstream, Tag::Data.as_raw(), wire::ready_token())
            .await?;

        let header = channel.recv(upstream, TagMatch::Any).await?;
        let tag = Tag::try_from(header.tag)?;
        let window = wire::decode_window(&header.body)?;

        if tag == Tag::Terminate {
            self.ended = true;
            if window != TimeWindow::SENTINEL {
                self.log
                    .warn(&format!("termination frame carried window {window}"));
            }
            self.log.info("end receive: sender terminated");
            return Ok(None);
        }

        // the next two messages from upstream belong to this frame
        let length = channel.recv(upstream, TagMatch::Any).await?;
        expect_tag("length", tag, &length)?;
        let expected = wire::decode_length(&length.body)?;

        let body = channel.recv(upstream, TagMatch::Any).await?;
        expect_tag("payload", tag, &body)?;
        let payload = wire::decode_payload(&body.body, expected)?;

        self.frames_received += 1;
        self.log.info(&format!("end receive {window}"));
        Ok(Some(ExchangeFrame { window, payload }))
    }
}

fn expect_tag(message: &'static str, expected: Tag, envelope: &Envelope) -> Result<()> {
    if envelope.tag != expected.as_raw() {
        return Err(ProtocolViolation::UnexpectedTag {
            message,
            expected: expected.as_raw(),
            actual: envelope.tag,
        }
        .into());
    }
    Ok(())
}
