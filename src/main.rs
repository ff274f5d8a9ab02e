use clap::Parser;
use color_eyre::Result;
use offline_relay::{app, config, logging};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "offline-relay")]
#[command(about = "An offline-first caching relay speaking JSON lines on stdin/stdout")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-relay/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin to front, e.g. https://app.example.com
  #[arg(short, long)]
  origin: Option<String>,

  /// Log level or filter directive (RUST_LOG takes precedence)
  #[arg(long)]
  log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Command line wins over file and environment
  if let Some(origin) = args.origin {
    config.origin = origin;
    config.origin_url()?;
  }
  if let Some(level) = args.log_level {
    config.logging.level = level;
  }

  let _guard = logging::init(&config.logging)?;

  // Initialize and run the app
  let app = app::App::new(config).await?;
  app.run().await?;

  Ok(())
}
