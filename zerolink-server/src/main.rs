use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Bootstrap rendezvous server for ZeroLink.
#[derive(Parser, Debug)]
#[command(name = "zerolink-server")]
struct Args {
    /// TCP port to listen on (0.0.0.0).
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("zerolink_server=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let server = zerolink_server::Server::bind(&format!("0.0.0.0:{}", args.port)).await?;
    server.run().await
}
