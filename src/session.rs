use crate::config::{Config, Mode};
use crate::credential::generate_credential;
use crate::driver::DuplexDriver;
use crate::echo::EchoResponder;
use crate::outcome::EndReport;
use crate::progress::{
    CallbackRef, CounterSnapshot, Counters, MarkerPrinter, Progress, ProgressCallback,
    ProgressEvent,
};
use crate::transport;
use crate::{Error, Result};
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a session.
///
/// The connecting role moves `Idle → Connecting → StreamOpen → Running →
/// Done`; the listening role moves `Idle → Listening → Done`.
/// There are no transitions back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Listening,
    Connecting,
    StreamOpen,
    Running,
    Done,
}

/// Summary of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Role this process played
    pub mode: Mode,
    /// Remote address, if a connection was established
    pub peer: Option<SocketAddr>,
    /// Wall-clock time from start of traffic to teardown
    pub elapsed: Duration,
    /// Iteration and byte counts
    pub counters: CounterSnapshot,
    /// Final state of the write loop (connecting role)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_end: Option<EndReport>,
    /// Final state of the read loop (connecting role)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_end: Option<EndReport>,
    /// Final state of the echo loop (listening role)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo_end: Option<EndReport>,
}

/// One listener or initiator session.
///
/// The role comes from [`Config::mode`]. The initiator drives traffic for
/// [`Config::duration`] and then tears the stream down; the listener serves a
/// single connection until it closes.
///
/// # Examples
///
/// ```no_run
/// use quic_duplex::{Config, Session};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::connect("127.0.0.1:4242")
///     .with_duration(Duration::from_secs(5))
///     .with_payload_size(1000);
///
/// let session = Session::new(config)?;
/// let report = session.run().await?;
/// println!("{} writes, {} reads", report.counters.writes, report.counters.reads);
/// # Ok(())
/// # }
/// ```
pub struct Session {
    config: Config,
    callbacks: Vec<CallbackRef>,
    markers: Option<Arc<MarkerPrinter>>,
    counters: Arc<Counters>,
    cancellation_token: CancellationToken,
    state: Mutex<SessionState>,
}

impl Session {
    /// Creates a session from a validated configuration.
    ///
    /// Progress markers go to stdout unless the configuration is quiet or
    /// asks for a JSON report, which owns stdout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is not runnable.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let markers = if config.quiet || config.json {
            None
        } else {
            Some(Arc::new(MarkerPrinter::stdout()))
        };

        Ok(Self {
            config,
            callbacks: Vec::new(),
            markers,
            counters: Arc::new(Counters::new()),
            cancellation_token: CancellationToken::new(),
            state: Mutex::new(SessionState::Idle),
        })
    }

    /// Attaches a progress callback.
    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// Sends progress markers to `out` instead of stdout.
    ///
    /// Has no effect in quiet or JSON mode.
    pub fn with_marker_output<W: Write + Send + 'static>(mut self, out: W) -> Self {
        if !self.config.quiet && !self.config.json {
            self.markers = Some(Arc::new(MarkerPrinter::new(out)));
        }
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Returns the current counters.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Returns the token that ends the session early.
    ///
    /// Cancelling stops the initiator's loops before the duration elapses and
    /// stops the listener whether or not a peer has connected.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Runs the session to completion.
    ///
    /// # Errors
    ///
    /// Setup failures (credential generation, bind, resolve, connect, stream
    /// open) are returned immediately. On the listening side a transport
    /// fault during the session is also returned. Failures of the
    /// initiator's loops are recorded in the report, not returned.
    pub async fn run(&self) -> Result<SessionReport> {
        let result = match self.config.mode {
            Mode::Listen => self.run_listener().await,
            Mode::Connect => self.run_initiator().await,
        };

        if let Some(markers) = &self.markers {
            markers.finish();
        }
        self.transition(SessionState::Done);
        result
    }

    fn transition(&self, next: SessionState) {
        let mut state = self.state.lock();
        debug!("Session state {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn progress(&self) -> Progress {
        let mut progress = Progress::new(self.counters.clone());
        for callback in &self.callbacks {
            progress = progress.with_callback(callback.clone());
        }
        if let Some(markers) = &self.markers {
            progress = progress.with_callback(markers.clone());
        }
        progress
    }

    async fn run_listener(&self) -> Result<SessionReport> {
        let addr = self
            .config
            .listen_addr
            .ok_or_else(|| Error::Config("Listen address not set".to_string()))?;

        let credential = generate_credential(self.config.key_algorithm)?;
        let progress = self.progress();
        let responder = EchoResponder::bind(addr, &credential)?
            .with_progress(progress.clone())
            .with_cancellation(self.cancellation_token.child_token());

        let local_addr = responder.local_addr()?;
        info!("Started listening on {}", local_addr);
        self.transition(SessionState::Listening);
        progress.notify(ProgressEvent::Listening { local_addr });

        let start = Instant::now();
        let summary = responder.serve().await?;

        Ok(SessionReport {
            mode: Mode::Listen,
            peer: summary.peer,
            elapsed: start.elapsed(),
            counters: summary.counters,
            write_end: None,
            read_end: None,
            echo_end: Some(EndReport::from_result(&Ok(summary.end))),
        })
    }

    fn cancelled_before_traffic(&self) -> SessionReport {
        SessionReport {
            mode: Mode::Connect,
            peer: None,
            elapsed: Duration::ZERO,
            counters: self.counters.snapshot(),
            write_end: Some(EndReport::Cancelled),
            read_end: Some(EndReport::Cancelled),
            echo_end: None,
        }
    }

    async fn run_initiator(&self) -> Result<SessionReport> {
        let target = self
            .config
            .connect_addr
            .as_deref()
            .ok_or_else(|| Error::Config("Connect address not set".to_string()))?;

        self.transition(SessionState::Connecting);
        let addr = transport::resolve(target).await?;
        let endpoint = transport::client_endpoint(addr)?;
        let connecting = endpoint.connect(addr, &self.config.server_name)?;

        let connection = tokio::select! {
            _ = self.cancellation_token.cancelled() => {
                info!("Session cancelled while connecting to {}", addr);
                return Ok(self.cancelled_before_traffic());
            }
            connected = time::timeout(self.config.connect_timeout, connecting) => {
                connected.map_err(|_| Error::ConnectTimeout {
                    addr,
                    timeout: self.config.connect_timeout,
                })??
            }
        };
        info!("Connected to {}", addr);

        let progress = self.progress();
        let peer = connection.remote_address();
        progress.notify(ProgressEvent::Connected { peer });

        let (send, recv) = connection.open_bi().await?;
        self.transition(SessionState::StreamOpen);
        debug!("Opened stream {}", send.id());

        let handle = DuplexDriver::new(self.config.payload_size)
            .with_progress(progress.clone())
            .with_cancellation(self.cancellation_token.child_token())
            .spawn(recv, send);
        self.transition(SessionState::Running);
        let start = Instant::now();

        tokio::select! {
            _ = time::sleep(self.config.duration) => {}
            _ = self.cancellation_token.cancelled() => info!("Session cancelled"),
        }

        let outcome = handle.shutdown().await;
        let elapsed = start.elapsed();
        info!("send/receive ended, time is up");

        transport::close_connection(&endpoint, &connection, b"time is up").await;
        progress.notify(ProgressEvent::Finished);

        info!(
            "{} writes, {} reads in {:.2}s",
            outcome.counters.writes,
            outcome.counters.reads,
            elapsed.as_secs_f64()
        );

        Ok(SessionReport {
            mode: Mode::Connect,
            peer: Some(peer),
            elapsed,
            counters: outcome.counters,
            write_end: Some(outcome.write),
            read_end: Some(outcome.read),
            echo_end: None,
        })
    }
}
