use std::sync::Arc;
use std::time::Duration;

use super::{Accept, await_accept};
use crate::channel::Channel;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ProtocolViolation, Result};
use crate::log_sink::LogSink;
use crate::protocol::{ExchangeFrame, PeerHandle, Tag, TimeWindow};
use crate::wire;

/// Publishes one frame per coupling interval.
///
/// The peer that answers the first accept-wait becomes the session's
/// [`PeerHandle`]; every later frame goes to the same peer.
pub struct ExchangeSender {
    peer: Option<PeerHandle>,
    peer_terminated: bool,
    accept_timeout: Option<Duration>,
    frames_sent: u64,
    log: Arc<dyn LogSink>,
}

impl ExchangeSender {
    pub fn new(config: &BridgeConfig, log: Arc<dyn LogSink>) -> Self {
        Self {
            peer: None,
            peer_terminated: false,
            accept_timeout: config.accept_timeout,
            frames_sent: 0,
            log,
        }
    }

    pub fn peer(&self) -> Option<PeerHandle> {
        self.peer
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// The receiver asked to end the stream instead of requesting a frame.
    pub fn peer_terminated(&self) -> bool {
        self.peer_terminated
    }

    /// Send one frame, after the receiver signals it is ready for it.
    ///
    /// On return all three messages (window, length, payload) have been handed
    /// to the channel. Fails with [`BridgeError::StreamEnded`] if the receiver
    /// requested termination instead.
    pub async fn send_frame<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        window: TimeWindow,
        payload: &[f64],
    ) -> Result<()> {
        if !window.is_ordered() {
            return Err(BridgeError::InvalidWindow {
                start: window.start,
                end: window.end,
            });
        }
        let too_large = || BridgeError::PayloadTooLarge(payload.len());
        let length = i32::try_from(payload.len()).map_err(|_| too_large())?;
        if let Some(limit) = channel.max_message_len() {
            let bytes = payload.len().checked_mul(wire::VALUE_BYTES).ok_or_else(too_large)?;
            if bytes > limit {
                return Err(too_large());
            }
        }
        if self.peer_terminated {
            return Err(BridgeError::StreamEnded);
        }

        self.log.info("start send");
        let accept = self.accept(channel).await?;
        if accept.tag == Tag::Terminate {
            self.log.info("receiver requested termination");
            return Err(BridgeError::StreamEnded);
        }
        let peer = accept.source;

        let tag = Tag::Data.as_raw();
        channel.send(peer, tag, wire::encode_window(&window)).await?;
        channel.send(peer, tag, wire::encode_length(length)).await?;
        channel.send(peer, tag, wire::encode_payload(payload)).await?;

        self.frames_sent += 1;
        self.log.info(&format!("end send {window}"));
        Ok(())
    }

    pub async fn send<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        frame: &ExchangeFrame,
    ) -> Result<()> {
        self.send_frame(channel, frame.window, &frame.payload).await
    }

    /// Wait for the next readiness token and bind or check the peer.
    pub(crate) async fn accept<C: Channel + ?Sized>(&mut self, channel: &mut C) -> Result<Accept> {
        let accept = await_accept(channel, self.accept_timeout).await?;
        self.log.info("receive accept");
        match self.peer {
            None => {
                self.peer = Some(accept.source);
                self.log.info(&format!("get source : {}", accept.source));
            }
            Some(bound) if bound != accept.source => {
                return Err(ProtocolViolation::PeerChanged {
                    expected: bound.rank(),
                    actual: accept.source.rank(),
                }
                .into());
            }
            Some(_) => {}
        }
        if accept.tag == Tag::Terminate {
            self.peer_terminated = true;
        }
        Ok(accept)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio_util::bytes::Bytes;

    use super::*;
    use crate::channel::memory::{pair, pair_with_ranks};
    use crate::channel::{ChannelError, Envelope, SourceMatch, TagMatch};
    use crate::log_sink::{MemorySink, drain_records};
    use crate::rendezvous::PortAddress;

    /// Channel that serves scripted ready tokens and records every send.
    struct ScriptedChannel {
        address: PortAddress,
        readies: VecDeque<Envelope>,
        sent: Vec<(PeerHandle, i32, Bytes)>,
        limit: Option<usize>,
    }

    impl ScriptedChannel {
        fn new(ready_ranks: &[u32]) -> Self {
            let readies = ready_ranks
                .iter()
                .map(|rank| Envelope {
                    source: PeerHandle::new(*rank),
                    tag: Tag::Data.as_raw(),
                    body: Bytes::new(),
                })
                .collect();
            Self {
                address: PortAddress::new("scripted://1"),
                readies,
                sent: Vec::new(),
                limit: None,
            }
        }

        fn with_limit(mut self, limit: usize) -> Self {
            self.limit = Some(limit);
            self
        }
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        async fn send(
            &mut self,
            dest: PeerHandle,
            tag: i32,
            body: Bytes,
        ) -> std::result::Result<(), ChannelError> {
            if self.limit.is_some_and(|limit| body.len() > limit) {
                return Err(ChannelError::Corrupt("message over transport limit".into()));
            }
            self.sent.push((dest, tag, body));
            Ok(())
        }

        async fn recv(
            &mut self,
            _source: SourceMatch,
            _tag: TagMatch,
        ) -> std::result::Result<Envelope, ChannelError> {
            Err(ChannelError::PeerClosed)
        }

        fn try_recv(
            &mut self,
            _source: SourceMatch,
            _tag: TagMatch,
        ) -> std::result::Result<Option<Envelope>, ChannelError> {
            Ok(self.readies.pop_front())
        }

        async fn barrier(&mut self) -> std::result::Result<(), ChannelError> {
            Ok(())
        }

        async fn disconnect(&mut self) -> std::result::Result<(), ChannelError> {
            Ok(())
        }

        async fn close_port(
            &mut self,
            _address: &PortAddress,
        ) -> std::result::Result<(), ChannelError> {
            Ok(())
        }

        fn address(&self) -> &PortAddress {
            &self.address
        }

        fn max_message_len(&self) -> Option<usize> {
            self.limit
        }
    }

    fn sender() -> ExchangeSender {
        ExchangeSender::new(&BridgeConfig::default(), Arc::new(MemorySink::new().0))
    }

    #[tokio::test]
    async fn nothing_is_sent_before_accept() {
        let (mut tx_side, mut rx_side) = pair();
        let mut sender = sender();

        let handle = tokio::spawn(async move {
            sender
                .send_frame(&mut tx_side, TimeWindow::new(0.0, 1.0), &[4.0])
                .await
                .unwrap();
            (sender, tx_side)
        });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_finished());
        assert!(
            rx_side
                .try_recv(SourceMatch::Any, TagMatch::Any)
                .unwrap()
                .is_none(),
            "frame bytes leaked before the accept signal"
        );

        rx_side
            .send(PeerHandle::UPSTREAM, Tag::Data.as_raw(), wire::ready_token())
            .await
            .unwrap();
        let (sender, _tx_side) = handle.await.unwrap();
        assert_eq!(sender.frames_sent(), 1);

        let window = rx_side.recv(SourceMatch::Any, TagMatch::Any).await.unwrap();
        assert_eq!(
            wire::decode_window(&window.body).unwrap(),
            TimeWindow::new(0.0, 1.0)
        );
    }

    #[tokio::test]
    async fn peer_is_discovered_from_first_accept() {
        let (mut tx_side, mut rx_side) = pair_with_ranks(PeerHandle::new(0), PeerHandle::new(4));
        let (sink, mut records) = MemorySink::new();
        let mut sender = ExchangeSender::new(&BridgeConfig::default(), Arc::new(sink));

        rx_side
            .send(PeerHandle::new(0), Tag::Data.as_raw(), Bytes::new())
            .await
            .unwrap();
        sender
            .send_frame(&mut tx_side, TimeWindow::new(1.0, 2.0), &[])
            .await
            .unwrap();

        assert_eq!(sender.peer(), Some(PeerHandle::new(4)));
        let messages: Vec<String> = drain_records(&mut records)
            .into_iter()
            .map(|r| r.message)
            .collect();
        assert!(messages.contains(&"get source : rank 4".to_string()));
    }

    #[tokio::test]
    async fn invalid_window_rejected_without_consuming_accept() {
        let (mut tx_side, mut rx_side) = pair();
        let mut sender = sender();
        rx_side
            .send(PeerHandle::UPSTREAM, Tag::Data.as_raw(), Bytes::new())
            .await
            .unwrap();

        let err = sender
            .send_frame(&mut tx_side, TimeWindow::new(2.0, 1.0), &[1.0])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidWindow { .. }));

        // the pending accept still serves the next valid frame
        sender
            .send_frame(&mut tx_side, TimeWindow::new(1.0, 2.0), &[1.0])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn terminate_ready_ends_stream() {
        let (mut tx_side, mut rx_side) = pair();
        let mut sender = sender();
        rx_side
            .send(PeerHandle::UPSTREAM, Tag::Terminate.as_raw(), Bytes::new())
            .await
            .unwrap();

        let err = sender
            .send_frame(&mut tx_side, TimeWindow::new(0.0, 1.0), &[1.0])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::StreamEnded));
        assert!(sender.peer_terminated());
        assert!(matches!(
            sender
                .send_frame(&mut tx_side, TimeWindow::new(0.0, 1.0), &[1.0])
                .await,
            Err(BridgeError::StreamEnded)
        ));
    }

    #[tokio::test]
    async fn unknown_tag_in_accept_is_violation() {
        let (mut tx_side, mut rx_side) = pair();
        let mut sender = sender();
        rx_side
            .send(PeerHandle::UPSTREAM, 9, Bytes::new())
            .await
            .unwrap();
        let err = sender
            .send_frame(&mut tx_side, TimeWindow::new(0.0, 1.0), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Protocol(ProtocolViolation::UnknownTag(9))
        ));
    }

    #[tokio::test]
    async fn accept_timeout_is_opt_in() {
        let (mut tx_side, _rx_side) = pair();
        let config = BridgeConfig::default().with_accept_timeout(Duration::from_millis(50));
        let mut sender = ExchangeSender::new(&config, Arc::new(MemorySink::new().0));
        let err = sender
            .send_frame(&mut tx_side, TimeWindow::new(0.0, 1.0), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Timeout {
                stage: "accept-wait",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn accept_from_another_rank_is_violation() {
        let mut channel = ScriptedChannel::new(&[2, 5]);
        let mut sender = sender();
        sender
            .send_frame(&mut channel, TimeWindow::new(0.0, 1.0), &[1.0])
            .await
            .unwrap();
        assert_eq!(sender.peer(), Some(PeerHandle::new(2)));

        let err = sender
            .send_frame(&mut channel, TimeWindow::new(1.0, 2.0), &[2.0])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Protocol(ProtocolViolation::PeerChanged {
                expected: 2,
                actual: 5
            })
        ));
        // only the first frame's three messages went out, all to rank 2
        assert_eq!(channel.sent.len(), 3);
        assert!(channel.sent.iter().all(|(dest, _, _)| *dest == PeerHandle::new(2)));
    }

    #[tokio::test]
    async fn payload_over_transport_limit_sends_nothing() {
        let limit = 3 * wire::VALUE_BYTES;
        let mut channel = ScriptedChannel::new(&[0]).with_limit(limit);
        let mut sender = sender();

        let err = sender
            .send_frame(&mut channel, TimeWindow::new(0.0, 1.0), &[1.0; 4])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::PayloadTooLarge(4)));
        assert!(channel.sent.is_empty());
        assert_eq!(channel.readies.len(), 1, "ready token must stay unconsumed");

        // exactly at the limit is fine
        sender
            .send_frame(&mut channel, TimeWindow::new(0.0, 1.0), &[1.0; 3])
            .await
            .unwrap();
        assert_eq!(channel.sent.len(), 3);
        assert_eq!(channel.sent[2].2.len(), limit);
    }
}
