use crate::credential::Credential;
use crate::outcome::{classify_connection, classify_io, StreamEnd};
use crate::progress::{CounterSnapshot, Counters, Progress, ProgressCallback, ProgressEvent};
use crate::transport;
use crate::{Error, Result};
use log::{debug, info};
use quinn::{Endpoint, SendStream};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::{task, time};
use tokio_util::sync::CancellationToken;

/// Size of the copy buffer used by the responder.
pub const ECHO_BUFFER_SIZE: usize = 32 * 1024;

/// Upper bound on waiting for the peer to acknowledge the echoed tail.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-session echo responder.
///
/// Accepts exactly one inbound connection, takes the first bidirectional
/// stream the peer opens on it and writes every byte it reads back onto that
/// stream. Further connections and streams are never accepted. `serve`
/// returns when the session ends.
///
/// # Examples
///
/// ```no_run
/// use quic_duplex::credential::generate_credential;
/// use quic_duplex::{EchoResponder, KeyAlgorithm};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let credential = generate_credential(KeyAlgorithm::EcdsaP256)?;
/// let responder = EchoResponder::bind("0.0.0.0:4242".parse()?, &credential)?;
/// let summary = responder.serve().await?;
/// println!("session ended: {}", summary.end);
/// # Ok(())
/// # }
/// ```
pub struct EchoResponder {
    endpoint: Endpoint,
    buffer_size: usize,
    progress: Progress,
    cancellation_token: CancellationToken,
}

/// How a responder session ended.
#[derive(Debug, Clone)]
pub struct EchoSummary {
    /// Address of the accepted peer, if a connection arrived
    pub peer: Option<SocketAddr>,
    /// Terminal state of the copy loop
    pub end: StreamEnd,
    /// Echo counters at the end of the session
    pub counters: CounterSnapshot,
}

impl EchoResponder {
    /// Binds a listening endpoint on `addr` presenting `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address is unavailable.
    pub fn bind(addr: SocketAddr, credential: &Credential) -> Result<Self> {
        let endpoint = transport::bind_listener(addr, credential)?;
        Ok(Self {
            endpoint,
            buffer_size: ECHO_BUFFER_SIZE,
            progress: Progress::new(Arc::new(Counters::new())),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Returns the address the endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Attaches a progress callback.
    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.progress = self.progress.with_callback(Arc::new(callback));
        self
    }

    /// Sets the copy buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Uses `token` to stop the responder.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub(crate) fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Returns the token that stops `serve`.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Returns the current echo counters.
    pub fn counters(&self) -> CounterSnapshot {
        self.progress.counters().snapshot()
    }

    /// Serves one session.
    ///
    /// Blocks until a connection arrives, then until it yields its first
    /// stream, then echoes until the stream or connection ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails or the session ends with a
    /// transport fault. A peer closing the stream or connection is reported
    /// as [`StreamEnd::PeerClosed`] in the summary, not as an error.
    pub async fn serve(&self) -> Result<EchoSummary> {
        let incoming = tokio::select! {
            _ = self.cancellation_token.cancelled() => {
                return Ok(self.summary(None, StreamEnd::Cancelled));
            }
            incoming = self.endpoint.accept() => incoming.ok_or(Error::EndpointClosed)?,
        };

        let connecting = incoming.accept()?;
        let connection = tokio::select! {
            _ = self.cancellation_token.cancelled() => {
                return Ok(self.summary(None, StreamEnd::Cancelled));
            }
            connection = connecting => connection?,
        };
        let peer = connection.remote_address();
        info!("Connect from {}", peer);
        self.progress.notify(ProgressEvent::Connected { peer });

        let streams = tokio::select! {
            _ = self.cancellation_token.cancelled() => None,
            streams = connection.accept_bi() => Some(streams),
        };

        let end = match streams {
            None => Ok(StreamEnd::Cancelled),
            Some(Err(e)) => classify_connection(e),
            Some(Ok((mut send, recv))) => {
                debug!("Accepted stream {} from {}", send.id(), peer);
                let end = echo_stream(
                    recv,
                    &mut send,
                    self.buffer_size,
                    &self.progress,
                    &self.cancellation_token,
                )
                .await;
                if matches!(end, Ok(StreamEnd::PeerClosed(_))) {
                    self.flush(&mut send).await;
                }
                end
            }
        };

        transport::close_connection(&self.endpoint, &connection, b"echo finished").await;
        self.progress.notify(ProgressEvent::Finished);

        let end = end?;
        info!("Session with {} ended: {}", peer, end);
        Ok(self.summary(Some(peer), end))
    }

    /// Waits until the peer has received everything queued on `send`, so
    /// closing the connection does not discard echoed bytes.
    async fn flush(&self, send: &mut SendStream) {
        tokio::select! {
            _ = self.cancellation_token.cancelled() => {}
            stopped = time::timeout(FLUSH_TIMEOUT, send.stopped()) => match stopped {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!("Echo stream closed before flushing: {}", e),
                Err(_) => debug!("Echo stream not acknowledged within {:?}", FLUSH_TIMEOUT),
            },
        }
    }

    fn summary(&self, peer: Option<SocketAddr>, end: StreamEnd) -> EchoSummary {
        EchoSummary {
            peer,
            end,
            counters: self.counters(),
        }
    }
}

/// Copies everything read from `reader` back to `writer` until either side
/// ends or `cancel` fires.
pub(crate) async fn echo_stream<R, W>(
    mut reader: R,
    writer: &mut W,
    buffer_size: usize,
    progress: &Progress,
    cancel: &CancellationToken,
) -> Result<StreamEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                if let Err(e) = writer.shutdown().await {
                    return classify_io(e);
                }
                return Ok(StreamEnd::PeerClosed("stream finished".to_string()));
            }
            Ok(n) => n,
            Err(e) => return classify_io(e),
        };

        let written = tokio::select! {
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            written = writer.write_all(&buf[..n]) => written,
        };

        if let Err(e) = written {
            return classify_io(e);
        }

        progress.notify(ProgressEvent::Echoed { bytes: n });
        task::yield_now().await;
    }
}
