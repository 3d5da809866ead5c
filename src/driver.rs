//! Duplex traffic driver
//!
//! Runs a write loop and a read loop concurrently over the two halves of one
//! stream. The loops share nothing but the counters, each of which only one
//! loop writes. Neither loop is time-bounded: the owner decides when to stop
//! them through the cancellation token.

use crate::outcome::{classify_io, EndReport, StreamEnd};
use crate::progress::{CounterSnapshot, Counters, Progress, ProgressCallback, ProgressEvent};
use crate::{Error, Result};
use log::{debug, error, info};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Filler byte for the write payload. Content is never checked.
const PAYLOAD_FILL: u8 = b'q';

/// Builder for a write/read loop pair.
///
/// # Examples
///
/// ```
/// use quic_duplex::DuplexDriver;
///
/// # #[tokio::main]
/// # async fn main() {
/// let (ours, theirs) = tokio::io::duplex(4096);
/// let (reader, writer) = tokio::io::split(ours);
/// let handle = DuplexDriver::new(100).spawn(reader, writer);
///
/// drop(theirs);
/// let outcome = handle.shutdown().await;
/// assert!(!outcome.write.is_failure());
/// # }
/// ```
pub struct DuplexDriver {
    payload_size: usize,
    progress: Progress,
    cancellation_token: CancellationToken,
}

/// Running write and read loops.
pub struct DuplexHandle {
    write_task: JoinHandle<Result<StreamEnd>>,
    read_task: JoinHandle<Result<StreamEnd>>,
    progress: Progress,
    cancellation_token: CancellationToken,
}

/// Final state of both loops.
#[derive(Debug, Clone, Serialize)]
pub struct DuplexOutcome {
    pub write: EndReport,
    pub read: EndReport,
    pub counters: CounterSnapshot,
}

impl DuplexDriver {
    /// Creates a driver that writes and reads `payload_size` bytes per call.
    ///
    /// A zero size is raised to one byte.
    pub fn new(payload_size: usize) -> Self {
        Self {
            payload_size: payload_size.max(1),
            progress: Progress::new(Arc::new(Counters::new())),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Attaches a progress callback.
    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.progress = self.progress.with_callback(Arc::new(callback));
        self
    }

    /// Stops both loops when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub(crate) fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Starts the write loop on `writer` and the read loop on `reader`.
    ///
    /// Each loop runs as its own task, so a loop blocked on flow control
    /// never holds the other back.
    pub fn spawn<R, W>(self, reader: R, writer: W) -> DuplexHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let payload = vec![PAYLOAD_FILL; self.payload_size];
        let buffer = vec![0u8; self.payload_size];

        let write_task = tokio::spawn(write_loop(
            writer,
            payload,
            self.progress.clone(),
            self.cancellation_token.child_token(),
        ));
        let read_task = tokio::spawn(read_loop(
            reader,
            buffer,
            self.progress.clone(),
            self.cancellation_token.child_token(),
        ));

        DuplexHandle {
            write_task,
            read_task,
            progress: self.progress,
            cancellation_token: self.cancellation_token,
        }
    }
}

impl DuplexHandle {
    /// Signals both loops to stop.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    /// Returns `true` once both loops have stopped on their own.
    pub fn is_finished(&self) -> bool {
        self.write_task.is_finished() && self.read_task.is_finished()
    }

    /// Returns the current counters.
    pub fn counters(&self) -> CounterSnapshot {
        self.progress.counters().snapshot()
    }

    /// Cancels both loops and waits for them to exit.
    pub async fn shutdown(self) -> DuplexOutcome {
        self.cancellation_token.cancel();

        let write = joined(self.write_task.await);
        let read = joined(self.read_task.await);

        DuplexOutcome {
            write: EndReport::from_result(&write),
            read: EndReport::from_result(&read),
            counters: self.progress.counters().snapshot(),
        }
    }
}

fn joined(
    result: std::result::Result<Result<StreamEnd>, tokio::task::JoinError>,
) -> Result<StreamEnd> {
    result.map_err(Error::from).and_then(|end| end)
}

fn report(direction: &str, result: &Result<StreamEnd>) {
    match result {
        Ok(StreamEnd::Cancelled) => debug!("{} loop cancelled", direction),
        Ok(end) => info!("{} loop ended: {}", direction, end),
        Err(e) => error!("{} loop failed: {}", direction, e),
    }
}

async fn write_loop<W>(
    mut writer: W,
    payload: Vec<u8>,
    progress: Progress,
    cancel: CancellationToken,
) -> Result<StreamEnd>
where
    W: AsyncWrite + Unpin,
{
    let result = loop {
        let written = tokio::select! {
            _ = cancel.cancelled() => break Ok(StreamEnd::Cancelled),
            written = writer.write_all(&payload) => written,
        };

        match written {
            Ok(()) => progress.notify(ProgressEvent::Sent {
                bytes: payload.len(),
            }),
            Err(e) => break classify_io(e),
        }

        // Stream writes can complete without ever returning Pending
        task::yield_now().await;
    };

    report("Send", &result);
    result
}

async fn read_loop<R>(
    mut reader: R,
    mut buffer: Vec<u8>,
    progress: Progress,
    cancel: CancellationToken,
) -> Result<StreamEnd>
where
    R: AsyncRead + Unpin,
{
    let result = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break Ok(StreamEnd::Cancelled),
            read = reader.read_exact(&mut buffer) => read,
        };

        match read {
            Ok(n) => progress.notify(ProgressEvent::Received { bytes: n }),
            Err(e) => break classify_io(e),
        }

        task::yield_now().await;
    };

    report("Receive", &result);
    result
}
