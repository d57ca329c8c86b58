//! Full listening/connecting sessions over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use cosim_bridge::{
    BridgeConfig, BridgeError, CouplingSession, LogSink, MemorySink, PortDescriptorStore, Role,
    SessionState, TcpConnector, TcpPort, TimeWindow,
};

fn config() -> BridgeConfig {
    BridgeConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_connect_timeout(Duration::from_secs(10))
        .with_barrier_timeout(Duration::from_secs(10))
}

fn sink() -> Arc<dyn LogSink> {
    Arc::new(MemorySink::new().0)
}

#[tokio::test]
async fn sender_connects_receiver_listens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coupling.txt");

    let port = TcpPort::bind("127.0.0.1:0").await.unwrap();
    let receiving = tokio::spawn({
        let path = path.clone();
        async move {
            let mut session = CouplingSession::accept(port, &path, Role::Receiver, config(), sink())
                .await
                .unwrap();
            let mut frames = Vec::new();
            while let Some(frame) = session.receive_frame().await.unwrap() {
                frames.push(frame);
            }
            let summary = session.terminate().await.unwrap();
            (frames, summary)
        }
    });

    let mut sender =
        CouplingSession::connect(TcpConnector, &path, Role::Sender, config(), sink())
            .await
            .unwrap();
    sender
        .send_frame(TimeWindow::new(10.0, 10.1), &[1.5, -2.25, 3.0])
        .await
        .unwrap();
    sender
        .send_frame(TimeWindow::new(10.1, 10.2), &[])
        .await
        .unwrap();
    let sender_summary = sender.terminate().await.unwrap();

    let (frames, receiver_summary) = receiving.await.unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].window, TimeWindow::new(10.0, 10.1));
    assert_eq!(frames[0].payload, vec![1.5, -2.25, 3.0]);
    assert!(frames[1].is_empty());

    assert_eq!(sender_summary.frames, 2);
    assert_eq!(receiver_summary.frames, 2);
    assert_eq!(receiver_summary.state, SessionState::Closed);

    let store = PortDescriptorStore::new(&path);
    assert!(!store.path().exists());
    assert!(!store.lock_path().exists());
}

#[tokio::test]
async fn receiver_connects_sender_listens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coupling.txt");

    let port = TcpPort::bind("127.0.0.1:0").await.unwrap();
    let sending = tokio::spawn({
        let path = path.clone();
        async move {
            let mut session = CouplingSession::accept(port, &path, Role::Sender, config(), sink())
                .await
                .unwrap();
            for step in 0..20 {
                let t = f64::from(step) * 0.5;
                session
                    .send_frame(TimeWindow::new(t, t + 0.5), &vec![t; 64])
                    .await
                    .unwrap();
            }
            session.terminate().await.unwrap()
        }
    });

    let mut receiver =
        CouplingSession::connect(TcpConnector, &path, Role::Receiver, config(), sink())
            .await
            .unwrap();
    let mut starts = Vec::new();
    while let Some(frame) = receiver.receive_frame().await.unwrap() {
        assert_eq!(frame.len(), 64);
        starts.push(frame.window.start);
    }
    receiver.terminate().await.unwrap();
    sending.await.unwrap();

    let expected: Vec<f64> = (0..20).map(|s| f64::from(s) * 0.5).collect();
    assert_eq!(starts, expected);
    assert!(!path.exists());
}

#[tokio::test]
async fn early_receiver_shutdown_ends_sender_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coupling.txt");

    let port = TcpPort::bind("127.0.0.1:0").await.unwrap();
    let receiving = tokio::spawn({
        let path = path.clone();
        async move {
            let mut session = CouplingSession::accept(port, &path, Role::Receiver, config(), sink())
                .await
                .unwrap();
            let first = session.receive_frame().await.unwrap();
            assert!(first.is_some());
            session.terminate().await.unwrap()
        }
    });

    let mut sender =
        CouplingSession::connect(TcpConnector, &path, Role::Sender, config(), sink())
            .await
            .unwrap();
    sender
        .send_frame(TimeWindow::new(0.0, 1.0), &[1.0])
        .await
        .unwrap();
    let err = sender
        .send_frame(TimeWindow::new(1.0, 2.0), &[2.0])
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::StreamEnded));
    assert_eq!(sender.state(), SessionState::Terminating);

    sender.terminate().await.unwrap();
    let summary = receiving.await.unwrap();
    assert_eq!(summary.frames, 1);
}
