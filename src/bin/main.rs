use clap::{ArgGroup, Parser, ValueEnum};
use log::info;
use quic_duplex::config::parse_listen_addr;
use quic_duplex::{Config, KeyAlgorithm, Session};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "quic-duplex")]
#[command(about = "QUIC echo responder and duplex stream exerciser", long_about = None)]
#[command(version)]
#[command(group(ArgGroup::new("role").required(true).args(["listen", "connect"])))]
struct Cli {
    /// Listen mode. Address and port to listen on (e.g. 0.0.0.0:4242 or :4242)
    #[arg(short = 's', long)]
    listen: Option<String>,

    /// Connect mode. Address and port to connect to
    #[arg(short = 'c', long)]
    connect: Option<String>,

    /// Send for this many seconds
    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,

    /// Payload buffer size in bytes
    #[arg(short = 'p', long, default_value = "1000")]
    payload_size: usize,

    /// Quiet, suppress progress markers
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Seconds to wait for the handshake to complete
    #[arg(long, default_value = "5")]
    connect_timeout: u64,

    /// TLS server name to present when connecting
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Key algorithm for the listener's self-signed certificate
    #[arg(long, value_enum, default_value_t = KeyArg::EcdsaP256)]
    key_algorithm: KeyArg,

    /// Print the session report as JSON
    #[arg(short = 'J', long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyArg {
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl From<KeyArg> for KeyAlgorithm {
    fn from(arg: KeyArg) -> Self {
        match arg {
            KeyArg::EcdsaP256 => KeyAlgorithm::EcdsaP256,
            KeyArg::EcdsaP384 => KeyAlgorithm::EcdsaP384,
            KeyArg::Ed25519 => KeyAlgorithm::Ed25519,
        }
    }
}

impl Cli {
    fn into_config(self) -> anyhow::Result<Config> {
        let config = match (self.listen, self.connect) {
            (Some(listen), _) => Config::listen(parse_listen_addr(&listen)?),
            (None, Some(connect)) => Config::connect(connect),
            (None, None) => anyhow::bail!("either --listen or --connect is required"),
        };

        Ok(config
            .with_duration(Duration::from_secs(self.duration))
            .with_payload_size(self.payload_size)
            .with_quiet(self.quiet)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_server_name(self.server_name)
            .with_key_algorithm(self.key_algorithm.into())
            .with_json(self.json))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.into_config()?;
    let json = config.json;

    let session = Session::new(config)?;

    let cancel = session.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, ending session");
            cancel.cancel();
        }
    });

    let report = session.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
