use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;
use tunnel_core::supervisor::Supervisor;

const DEFAULT_PORT: u16 = 9000;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "tunnel-client",
    about = "Multiplexes local TCP/UDP listeners over one upstream tunnel connection."
)]
struct Opt {
    /// Path to a JSON metadata document sent at handshake; defaults to `{}`.
    #[structopt(short = "j", long = "json-metadata", parse(from_os_str))]
    json_metadata: Option<PathBuf>,

    /// Enable verbose logging.
    #[structopt(short, long)]
    debug: bool,

    /// Upstream tunnel server, as `host` or `host:port`.
    #[structopt(short, long, default_value = "127.0.0.1:9000")]
    connect: String,
}

fn parse_connect(spec: &str) -> Result<SocketAddr> {
    let resolved = match spec.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid port in --connect {spec:?}"))?;
            (host, port)
                .to_socket_addrs()
                .with_context(|| format!("could not resolve --connect {spec:?}"))?
                .next()
        }
        None => (spec.as_str(), DEFAULT_PORT)
            .to_socket_addrs()
            .with_context(|| format!("could not resolve --connect {spec:?}"))?
            .next(),
    };
    resolved.with_context(|| format!("--connect {spec:?} resolved to no addresses"))
}

fn load_metadata(path: Option<&PathBuf>) -> Result<serde_json::Value> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {path:?} as JSON"))
        }
        None => Ok(serde_json::json!({})),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let opt = Opt::from_args();

    let default_filter = if opt.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let addr = parse_connect(&opt.connect)?;
    let metadata = load_metadata(opt.json_metadata.as_ref())?;

    log::info!("starting tunnel client, upstream {addr}");

    let supervisor = Supervisor::new(addr, metadata);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    supervisor.run(shutdown).await;

    Ok(())
}
