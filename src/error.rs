use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Credential error: {0}")]
    Credential(#[from] rcgen::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("QUIC crypto error: {0}")]
    Crypto(String),

    #[error("Connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("Connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("Timed out after {timeout:?} connecting to {addr}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("Cannot resolve address: {0}")]
    Resolve(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Endpoint closed before a connection arrived")]
    EndpointClosed,

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
