use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use rtsp_relay::RelayConfig;

#[derive(Parser)]
#[command(name = "rtsp-relay")]
#[command(about = "Relay RTSP cameras as MJPEG streams", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "rtsp-relay.json")]
    config: PathBuf,

    /// Listen address, overriding the configuration file
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    rtsp_relay::init_logging();

    let cli = Cli::parse();
    let mut config = RelayConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    rtsp_relay::run(config).await
}
