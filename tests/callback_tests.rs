mod common;

use common::start_listener_session;
use quic_duplex::{Config, ProgressCallback, ProgressEvent, Session};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

/// Records every event it receives
struct RecordingCallback {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingCallback {
    fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ProgressCallback for RecordingCallback {
    fn on_progress(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn test_initiator_event_order() {
    let (addr, _listener) = start_listener_session().await;

    let callback = RecordingCallback::new();
    let events_ref = callback.events.clone();

    let config = Config::connect(addr.to_string())
        .with_duration(Duration::from_millis(500))
        .with_quiet(true);
    let session = Session::new(config).unwrap().with_callback(callback);
    let report = session.run().await.unwrap();

    let events = events_ref.lock().unwrap();
    assert_eq!(events.first(), Some(&ProgressEvent::Connected { peer: addr }));
    assert_eq!(events.last(), Some(&ProgressEvent::Finished));

    let sent = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Sent { .. }))
        .count() as u64;
    let received = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Received { .. }))
        .count() as u64;
    assert_eq!(sent, report.counters.writes);
    assert_eq!(received, report.counters.reads);
    assert!(events
        .iter()
        .all(|e| !matches!(e, ProgressEvent::Echoed { .. })));
}

#[tokio::test]
async fn test_listener_event_order() {
    let callback = RecordingCallback::new();
    let events_ref = callback.events.clone();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let listener = Session::new(Config::listen("127.0.0.1:0".parse().unwrap()).with_quiet(true))
        .unwrap()
        .with_callback(callback)
        .with_callback(move |event: ProgressEvent| {
            if let ProgressEvent::Listening { local_addr } = event {
                let _ = tx.send(local_addr);
            }
        });
    let listener = tokio::spawn(async move { listener.run().await });
    let addr = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();

    let config = Config::connect(addr.to_string())
        .with_duration(Duration::from_millis(300))
        .with_quiet(true);
    Session::new(config).unwrap().run().await.unwrap();

    let report = timeout(Duration::from_secs(5), listener)
        .await
        .expect("listener did not finish")
        .unwrap()
        .unwrap();

    let events = events_ref.lock().unwrap();
    assert_eq!(events[0], ProgressEvent::Listening { local_addr: addr });
    assert!(matches!(events[1], ProgressEvent::Connected { .. }));
    assert_eq!(events.last(), Some(&ProgressEvent::Finished));

    let echoed: u64 = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Echoed { bytes } => Some(*bytes as u64),
            _ => None,
        })
        .sum();
    assert_eq!(echoed, report.counters.bytes_echoed);
}

#[tokio::test]
async fn test_closure_callback_sees_markers() {
    let (addr, _listener) = start_listener_session().await;

    let markers = Arc::new(Mutex::new(String::new()));
    let markers_ref = markers.clone();

    let config = Config::connect(addr.to_string())
        .with_duration(Duration::from_millis(300))
        .with_quiet(true);
    let session = Session::new(config)
        .unwrap()
        .with_callback(move |event: ProgressEvent| {
            if let Some(marker) = event.marker() {
                markers.lock().unwrap().push(marker);
            }
        });
    session.run().await.unwrap();

    let markers = markers_ref.lock().unwrap();
    assert!(markers.contains('s'));
    assert!(markers.contains('r'));
}
