use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use meeting_relay::{Config, Server, Signaling};
use tracing::{error, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// Server port
  #[arg(short, long, env, default_value_t = 3000, value_parser = clap::value_parser!(u16).range(1025..))]
  port: u16,

  /// Seconds between liveness pings
  #[arg(long, env, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
  heartbeat_secs: u64,

  /// Seconds between sweeps for empty rooms
  #[arg(long, env, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
  sweep_secs: u64,

  /// Only origin allowed by CORS; any origin when unset
  #[arg(long, env)]
  allowed_origin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  let filter = |level: Level| -> Result<EnvFilter> {
    Ok(
      EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
        .add_directive("hyper=off".parse()?)
        .add_directive("tungstenite=off".parse()?),
    )
  };

  if cfg!(not(debug_assertions)) {
    tracing_subscriber::fmt().with_env_filter(filter(Level::INFO)?).init();
  } else {
    tracing_subscriber::fmt().with_env_filter(filter(Level::DEBUG)?).without_time().init();
  }

  let args = Args::parse();
  let config = Config {
    heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
    sweep_interval: Duration::from_secs(args.sweep_secs),
  };
  let signaling = Signaling::new(config);

  let mut server = Server::new(args.port, signaling.clone());
  if let Some(origin) = &args.allowed_origin {
    server = server.with_allowed_origin(origin)?;
  }

  tokio::spawn(async move {
    if let Err(e) = signaling.run().await {
      error!("{e}");
    }
  });
  server.listen().await
}
