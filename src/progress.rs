use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Progress event types reported during a session.
///
/// Lifecycle events are emitted once; data events are emitted once per
/// successful loop iteration.
///
/// # Examples
///
/// ```no_run
/// use quic_duplex::{Config, ProgressEvent, Session};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::connect("127.0.0.1:4242").with_quiet(true);
/// let session = Session::new(config)?.with_callback(|event: ProgressEvent| {
///     if let ProgressEvent::Connected { peer } = event {
///         println!("connected to {}", peer);
///     }
/// });
/// session.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The listener endpoint is bound.
    Listening { local_addr: SocketAddr },
    /// A connection with the peer is established.
    Connected { peer: SocketAddr },
    /// The echo responder copied a chunk back to the peer.
    Echoed { bytes: usize },
    /// The write loop completed a full payload write.
    Sent { bytes: usize },
    /// The read loop filled its buffer.
    Received { bytes: usize },
    /// The session has ended.
    Finished,
}

impl ProgressEvent {
    /// Console marker for data events, `None` for lifecycle events.
    pub fn marker(&self) -> Option<char> {
        match self {
            ProgressEvent::Echoed { .. } => Some('.'),
            ProgressEvent::Sent { .. } => Some('s'),
            ProgressEvent::Received { .. } => Some('r'),
            _ => None,
        }
    }
}

/// Callback trait for receiving progress updates.
///
/// Implemented automatically for any `Fn(ProgressEvent) + Send + Sync`.
/// Callbacks run on the loop's task, so they should return quickly.
pub trait ProgressCallback: Send + Sync {
    /// Called when a progress event occurs.
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressCallback for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

pub(crate) type CallbackRef = Arc<dyn ProgressCallback>;

/// Iteration and byte counters for one session.
///
/// Each field is written by a single loop, so the write loop and the read
/// loop never contend.
#[derive(Debug, Default)]
pub struct Counters {
    writes: AtomicU64,
    reads: AtomicU64,
    echoes: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_echoed: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub writes: u64,
    pub reads: u64,
    pub echoes: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bytes_echoed: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: &ProgressEvent) {
        let (count, bytes_total, bytes) = match *event {
            ProgressEvent::Echoed { bytes } => (&self.echoes, &self.bytes_echoed, bytes),
            ProgressEvent::Sent { bytes } => (&self.writes, &self.bytes_sent, bytes),
            ProgressEvent::Received { bytes } => (&self.reads, &self.bytes_received, bytes),
            _ => return,
        };
        count.fetch_add(1, Ordering::Relaxed);
        bytes_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            echoes: self.echoes.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_echoed: self.bytes_echoed.load(Ordering::Relaxed),
        }
    }
}

/// Prints a single character per data event: `.` echoed, `s` sent, `r` received.
pub struct MarkerPrinter {
    out: Mutex<Box<dyn Write + Send>>,
    printed: AtomicBool,
}

impl MarkerPrinter {
    /// Prints markers to stdout.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Prints markers to an arbitrary writer.
    pub fn new<W: Write + Send + 'static>(out: W) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            printed: AtomicBool::new(false),
        }
    }

    /// Terminates the marker line if anything was printed.
    pub fn finish(&self) {
        if self.printed.swap(false, Ordering::Relaxed) {
            let mut out = self.out.lock();
            let _ = out.write_all(b"\n");
            let _ = out.flush();
        }
    }
}

impl ProgressCallback for MarkerPrinter {
    fn on_progress(&self, event: ProgressEvent) {
        if let Some(marker) = event.marker() {
            let mut buf = [0u8; 4];
            let mut out = self.out.lock();
            // Write errors on the marker stream are ignored
            let _ = out.write_all(marker.encode_utf8(&mut buf).as_bytes());
            let _ = out.flush();
            self.printed.store(true, Ordering::Relaxed);
        }
    }
}

/// Fan-out of one event to the counters and every registered callback.
#[derive(Clone)]
pub(crate) struct Progress {
    counters: Arc<Counters>,
    callbacks: Vec<CallbackRef>,
}

impl Progress {
    pub(crate) fn new(counters: Arc<Counters>) -> Self {
        Self {
            counters,
            callbacks: Vec::new(),
        }
    }

    pub(crate) fn with_callback(mut self, callback: CallbackRef) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub(crate) fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub(crate) fn notify(&self, event: ProgressEvent) {
        self.counters.record(&event);
        for callback in &self.callbacks {
            callback.on_progress(event.clone());
        }
    }
}
