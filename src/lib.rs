//! quic-duplex - QUIC echo responder and duplex stream exerciser
//!
//! One process listens and echoes everything received on the first stream a
//! peer opens. The other connects, opens one bidirectional stream and drives
//! it with concurrent writes and reads for a fixed duration, counting each
//! successful call.
//!
//! # Features
//!
//! - Single-session echo responder with an in-memory self-signed credential
//! - Concurrent write and read loops over the two halves of one stream
//! - Explicit cancellation of every blocking call when the session ends
//! - Graceful peer close reported separately from transport faults
//! - Progress callbacks, counters and console markers

pub mod config;
pub mod credential;
pub mod driver;
pub mod echo;
pub mod error;
pub mod outcome;
pub mod progress;
pub mod session;
pub mod transport;

pub use config::{Config, KeyAlgorithm, Mode};
pub use driver::{DuplexDriver, DuplexHandle, DuplexOutcome};
pub use echo::{EchoResponder, EchoSummary};
pub use error::{Error, Result};
pub use outcome::{EndReport, StreamEnd};
pub use progress::{CounterSnapshot, MarkerPrinter, ProgressCallback, ProgressEvent};
pub use session::{Session, SessionReport, SessionState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
