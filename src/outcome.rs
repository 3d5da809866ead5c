//! How a stream loop ended
//!
//! A peer closing the stream or connection is the normal way for a session to
//! end, so it is reported as a [`StreamEnd`] rather than an [`Error`]. Only
//! genuine transport faults surface as errors.

use crate::{Error, Result};
use quinn::{ConnectionError, ReadError, TransportErrorCode, WriteError};
use serde::Serialize;
use std::fmt;
use std::io;

/// Non-error termination of a stream loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The peer finished, reset or stopped the stream, closed the connection
    /// without an error code, or answered with a stateless reset.
    PeerClosed(String),
    /// The session owner cancelled the loop.
    Cancelled,
}

impl fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEnd::PeerClosed(reason) => write!(f, "peer closed: {}", reason),
            StreamEnd::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Serializable summary of a loop's final state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "kebab-case")]
pub enum EndReport {
    PeerClosed(String),
    Cancelled,
    Failed(String),
}

impl EndReport {
    pub fn from_result(result: &Result<StreamEnd>) -> Self {
        match result {
            Ok(StreamEnd::PeerClosed(reason)) => EndReport::PeerClosed(reason.clone()),
            Ok(StreamEnd::Cancelled) => EndReport::Cancelled,
            Err(e) => EndReport::Failed(e.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, EndReport::Failed(_))
    }
}

/// Classifies a connection-level error.
pub fn classify_connection(err: ConnectionError) -> Result<StreamEnd> {
    match err {
        ConnectionError::ApplicationClosed(close) => Ok(StreamEnd::PeerClosed(format!(
            "connection closed by peer ({})",
            close
        ))),
        ConnectionError::ConnectionClosed(close)
            if close.error_code == TransportErrorCode::NO_ERROR =>
        {
            Ok(StreamEnd::PeerClosed("connection closed by peer".to_string()))
        }
        ConnectionError::LocallyClosed => {
            Ok(StreamEnd::PeerClosed("connection closed locally".to_string()))
        }
        // A stateless reset is what a peer that already dropped the
        // connection sends back
        ConnectionError::Reset => Ok(StreamEnd::PeerClosed(
            "connection reset by peer".to_string(),
        )),
        other => Err(Error::Connection(other)),
    }
}

fn classify_read(err: &ReadError) -> Option<std::result::Result<StreamEnd, ConnectionError>> {
    match err {
        ReadError::Reset(code) => Some(Ok(StreamEnd::PeerClosed(format!(
            "stream reset by peer (code {})",
            code
        )))),
        ReadError::ConnectionLost(e) => Some(Err(e.clone())),
        _ => None,
    }
}

fn classify_write(err: &WriteError) -> Option<std::result::Result<StreamEnd, ConnectionError>> {
    match err {
        WriteError::Stopped(code) => Some(Ok(StreamEnd::PeerClosed(format!(
            "stream stopped by peer (code {})",
            code
        )))),
        WriteError::ConnectionLost(e) => Some(Err(e.clone())),
        _ => None,
    }
}

/// Classifies an I/O error raised by a stream read or write.
///
/// QUIC stream errors arrive wrapped in [`io::Error`] when the stream is used
/// through the tokio I/O traits; they are unwrapped and judged on the QUIC
/// cause. Plain I/O errors are judged on their kind.
pub fn classify_io(err: io::Error) -> Result<StreamEnd> {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        return Ok(StreamEnd::PeerClosed("stream finished".to_string()));
    }

    let quic = err.get_ref().and_then(|inner| {
        if let Some(read) = inner.downcast_ref::<ReadError>() {
            classify_read(read)
        } else if let Some(write) = inner.downcast_ref::<WriteError>() {
            classify_write(write)
        } else {
            None
        }
    });

    match quic {
        Some(Ok(end)) => Ok(end),
        Some(Err(connection)) => classify_connection(connection),
        None => match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Ok(StreamEnd::PeerClosed(err.to_string())),
            _ => Err(Error::Io(err)),
        },
    }
}
