#![allow(dead_code)]

use quic_duplex::credential::generate_credential;
use quic_duplex::{transport, Config, EchoResponder, EchoSummary, KeyAlgorithm};
use quic_duplex::{ProgressEvent, Result, Session, SessionReport};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Writer that keeps everything written to it for later inspection.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Starts a quiet listener session on an ephemeral port and waits until it
/// is bound.
pub async fn start_listener_session() -> (SocketAddr, JoinHandle<Result<SessionReport>>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = Config::listen("127.0.0.1:0".parse().unwrap()).with_quiet(true);
    let session = Session::new(config)
        .unwrap()
        .with_callback(move |event: ProgressEvent| {
            if let ProgressEvent::Listening { local_addr } = event {
                let _ = tx.send(local_addr);
            }
        });

    let handle = tokio::spawn(async move { session.run().await });
    let addr = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("listener did not start")
        .expect("listener exited before binding");
    (addr, handle)
}

/// Binds an echo responder on an ephemeral port and serves it in the
/// background.
pub fn start_responder() -> (SocketAddr, JoinHandle<Result<EchoSummary>>) {
    let credential = generate_credential(KeyAlgorithm::EcdsaP256).unwrap();
    let responder = EchoResponder::bind("127.0.0.1:0".parse().unwrap(), &credential).unwrap();
    let addr = responder.local_addr().unwrap();
    let handle = tokio::spawn(async move { responder.serve().await });
    (addr, handle)
}

/// Connects a raw QUIC client to `addr`.
pub async fn connect(addr: SocketAddr) -> (quinn::Endpoint, quinn::Connection) {
    let endpoint = transport::client_endpoint(addr).unwrap();
    let connection = endpoint
        .connect(addr, "localhost")
        .unwrap()
        .await
        .unwrap();
    (endpoint, connection)
}
