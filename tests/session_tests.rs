mod common;

use common::{start_listener_session, SharedBuf};
use quic_duplex::{Config, EndReport, Error, Mode, Session, SessionState};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Payload 100, duration 1s, reachable listener: both sides finish cleanly
/// and both markers appear.
#[tokio::test]
async fn test_short_session_against_local_listener() {
    let (addr, listener) = start_listener_session().await;

    let markers = SharedBuf::default();
    let config = Config::connect(addr.to_string())
        .with_payload_size(100)
        .with_duration(Duration::from_secs(1));
    let session = Session::new(config)
        .unwrap()
        .with_marker_output(markers.clone());

    let report = session.run().await.unwrap();
    assert_eq!(report.mode, Mode::Connect);
    assert_eq!(report.peer, Some(addr));
    assert!(report.counters.writes >= 1, "no successful writes");
    assert!(report.counters.reads >= 1, "no successful reads");
    assert_eq!(session.state(), SessionState::Done);

    let printed = markers.contents();
    assert!(printed.contains('s'));
    assert!(printed.contains('r'));
    assert!(printed.ends_with('\n'));
    assert!(!printed.contains('.'));

    let listener_report = timeout(Duration::from_secs(5), listener)
        .await
        .expect("listener did not finish after the peer left")
        .unwrap()
        .unwrap();
    assert_eq!(listener_report.mode, Mode::Listen);
    assert!(listener_report.counters.echoes >= 1);
    assert!(matches!(
        listener_report.echo_end,
        Some(EndReport::PeerClosed(_))
    ));
}

#[tokio::test]
async fn test_duration_is_honored() {
    let (addr, _listener) = start_listener_session().await;

    let config = Config::connect(addr.to_string())
        .with_duration(Duration::from_secs(1))
        .with_quiet(true);
    let session = Session::new(config).unwrap();

    let start = Instant::now();
    let report = session.run().await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(1));
    assert!(
        elapsed < Duration::from_millis(2500),
        "session took {:?}",
        elapsed
    );
    assert!(report.elapsed >= Duration::from_secs(1));
    assert!(!report.write_end.unwrap().is_failure());
}

#[tokio::test]
async fn test_quiet_session_prints_no_markers() {
    let (addr, _listener) = start_listener_session().await;

    let markers = SharedBuf::default();
    let config = Config::connect(addr.to_string())
        .with_duration(Duration::from_millis(500))
        .with_quiet(true);
    let session = Session::new(config)
        .unwrap()
        .with_marker_output(markers.clone());

    let report = session.run().await.unwrap();
    assert!(report.counters.writes >= 1);
    assert!(markers.contents().is_empty());
}

#[tokio::test]
async fn test_unreachable_target_aborts_before_traffic() {
    let config = Config::connect("127.0.0.1:9")
        .with_connect_timeout(Duration::from_millis(500))
        .with_quiet(true);
    let session = Session::new(config).unwrap();

    let start = Instant::now();
    let result = session.run().await;

    assert!(matches!(
        result,
        Err(Error::ConnectTimeout { .. }) | Err(Error::Connection(_))
    ));
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(session.counters().writes, 0);
    assert_eq!(session.counters().reads, 0);
}

#[tokio::test]
async fn test_second_listener_on_same_address_fails_to_bind() {
    let (addr, first) = start_listener_session().await;

    let second = Session::new(Config::listen(addr).with_quiet(true)).unwrap();
    let result = timeout(Duration::from_secs(5), second.run())
        .await
        .expect("second listener hung instead of failing");

    match result {
        Err(e @ Error::Bind { .. }) => assert!(e.to_string().contains(&addr.to_string())),
        other => panic!("expected bind failure, got {:?}", other),
    }

    first.abort();
}

#[tokio::test]
async fn test_cancellation_ends_session_early() {
    let (addr, _listener) = start_listener_session().await;

    let config = Config::connect(addr.to_string())
        .with_duration(Duration::from_secs(30))
        .with_quiet(true);
    let session = Session::new(config).unwrap();
    let token = session.cancellation_token().clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();
    });

    let report = timeout(Duration::from_secs(5), session.run())
        .await
        .expect("cancellation did not end the session")
        .unwrap();
    assert_eq!(report.write_end, Some(EndReport::Cancelled));
    assert_eq!(report.read_end, Some(EndReport::Cancelled));
}

#[tokio::test]
async fn test_listener_ends_cleanly_after_each_session() {
    for _ in 0..3 {
        let (addr, listener) = start_listener_session().await;

        let config = Config::connect(addr.to_string())
            .with_payload_size(100)
            .with_duration(Duration::from_millis(500))
            .with_quiet(true);
        Session::new(config).unwrap().run().await.unwrap();

        let start = Instant::now();
        let report = timeout(Duration::from_secs(3), listener)
            .await
            .expect("listener outlived its peer")
            .unwrap()
            .expect("normal session ended the listener with a fault");
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(matches!(report.echo_end, Some(EndReport::PeerClosed(_))));
    }
}

#[tokio::test]
async fn test_cancel_while_connecting() {
    // Bound but never read, so the handshake gets no answer
    let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let config = Config::connect(silent.local_addr().unwrap().to_string())
        .with_connect_timeout(Duration::from_secs(30))
        .with_quiet(true);
    let session = Session::new(config).unwrap();
    let token = session.cancellation_token().clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let report = timeout(Duration::from_secs(2), session.run())
        .await
        .expect("cancellation did not interrupt the handshake")
        .unwrap();
    assert!(report.peer.is_none());
    assert_eq!(report.write_end, Some(EndReport::Cancelled));
    assert_eq!(report.counters.writes, 0);
}

#[tokio::test]
async fn test_cancelled_listener_without_peer_returns() {
    let session = Session::new(Config::listen("127.0.0.1:0".parse().unwrap()).with_quiet(true))
        .unwrap();
    session.cancellation_token().cancel();

    let report = timeout(Duration::from_secs(5), session.run())
        .await
        .expect("cancelled listener did not return")
        .unwrap();
    assert!(report.peer.is_none());
    assert_eq!(report.echo_end, Some(EndReport::Cancelled));
}
