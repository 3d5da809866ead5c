use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default session duration for the connecting role.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);

/// Default payload size in bytes for each write and read.
pub const DEFAULT_PAYLOAD_SIZE: usize = 1000;

/// Default time allowed for the QUIC handshake to complete.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default TLS server name presented by the connecting role.
pub const DEFAULT_SERVER_NAME: &str = "localhost";

/// Role selected for this process.
///
/// The two roles are mutually exclusive: a process either listens and echoes,
/// or connects and drives traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Accept a single connection and echo its first stream
    Listen,
    /// Connect, open one stream and drive duplex traffic over it
    Connect,
}

/// Key algorithm used for the listener's self-signed credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    /// ECDSA over NIST P-256 with SHA-256
    #[default]
    EcdsaP256,
    /// ECDSA over NIST P-384 with SHA-384
    EcdsaP384,
    /// Ed25519
    Ed25519,
}

/// Configuration for a quic-duplex session.
///
/// Build one with [`Config::listen`] or [`Config::connect`] and refine it with
/// the `with_*` methods.
///
/// # Examples
///
/// ## Listener
///
/// ```
/// use quic_duplex::Config;
///
/// let config = Config::listen("127.0.0.1:4242".parse().unwrap());
/// assert!(config.validate().is_ok());
/// ```
///
/// ## Initiator
///
/// ```
/// use quic_duplex::Config;
/// use std::time::Duration;
///
/// let config = Config::connect("127.0.0.1:4242")
///     .with_duration(Duration::from_secs(2))
///     .with_payload_size(100)
///     .with_quiet(true);
/// assert_eq!(config.payload_size, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listener or initiator
    pub mode: Mode,

    /// Address to listen on (listener only)
    pub listen_addr: Option<SocketAddr>,

    /// `host:port` to connect to (initiator only)
    pub connect_addr: Option<String>,

    /// How long the initiator drives traffic
    pub duration: Duration,

    /// Size of the reused write and read buffers
    pub payload_size: usize,

    /// Suppress per-iteration progress markers
    pub quiet: bool,

    /// Handshake deadline for the initiator
    pub connect_timeout: Duration,

    /// TLS server name sent by the initiator
    pub server_name: String,

    /// Key algorithm for the listener credential
    pub key_algorithm: KeyAlgorithm,

    /// Print the final session report as JSON
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Connect,
            listen_addr: None,
            connect_addr: None,
            duration: DEFAULT_DURATION,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            quiet: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            key_algorithm: KeyAlgorithm::default(),
            json: false,
        }
    }
}

impl Config {
    /// Creates a listener configuration bound to `addr`.
    pub fn listen(addr: SocketAddr) -> Self {
        Self {
            mode: Mode::Listen,
            listen_addr: Some(addr),
            ..Default::default()
        }
    }

    /// Creates an initiator configuration targeting `addr`.
    ///
    /// The address may be a literal socket address or a `host:port` pair that
    /// is resolved when the session starts.
    pub fn connect(addr: impl Into<String>) -> Self {
        Self {
            mode: Mode::Connect,
            connect_addr: Some(addr.into()),
            ..Default::default()
        }
    }

    /// Sets how long the initiator drives traffic.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the payload buffer size in bytes.
    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = size;
        self
    }

    /// Enables or disables quiet mode.
    ///
    /// In quiet mode no `.`, `s` or `r` markers are printed; log messages
    /// are unaffected.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Sets the handshake deadline for the initiator.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the TLS server name the initiator presents.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Sets the key algorithm for the listener credential.
    pub fn with_key_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.key_algorithm = algorithm;
        self
    }

    /// Enables or disables the JSON session report.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Checks that the configuration describes a runnable session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the address for the selected mode is
    /// missing, the payload size is zero, or (for the initiator) the duration
    /// or connect timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.payload_size == 0 {
            return Err(Error::Config(
                "payload size must be at least 1 byte".to_string(),
            ));
        }

        match self.mode {
            Mode::Listen => {
                if self.listen_addr.is_none() {
                    return Err(Error::Config(
                        "listen address is required in listen mode".to_string(),
                    ));
                }
            }
            Mode::Connect => {
                if self.connect_addr.as_deref().map_or(true, str::is_empty) {
                    return Err(Error::Config(
                        "connect address is required in connect mode".to_string(),
                    ));
                }
                if self.duration.is_zero() {
                    return Err(Error::Config("duration must be non-zero".to_string()));
                }
                if self.connect_timeout.is_zero() {
                    return Err(Error::Config(
                        "connect timeout must be non-zero".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Parses a listen address.
///
/// Accepts a full socket address or a bare `:PORT`, which binds to every IPv4
/// interface.
///
/// ```
/// use quic_duplex::config::parse_listen_addr;
/// use std::net::SocketAddr;
///
/// let addr = parse_listen_addr(":4242").unwrap();
/// assert_eq!(addr, "0.0.0.0:4242".parse::<SocketAddr>().unwrap());
/// ```
pub fn parse_listen_addr(s: &str) -> Result<SocketAddr> {
    let candidate = if s.starts_with(':') {
        format!("0.0.0.0{}", s)
    } else {
        s.to_string()
    };
    candidate
        .parse()
        .map_err(|e| Error::Config(format!("invalid listen address '{}': {}", s, e)))
}
