mod commands;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use trendcache::config::Config;
use trendcache::logging;

#[derive(Parser, Debug)]
#[command(name = "trendcache")]
#[command(about = "Keep a local cache of trending GIFs in sync with Giphy")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/trendcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also print log output to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch the trending list and update the cache
  Refresh {
    /// Number of items to request (overrides request_limit from config)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    limit: Option<u32>,
  },
  /// Print the cached list without contacting the API
  Show {
    /// Print as JSON
    #[arg(long)]
    json: bool,
  },
  /// Remove every cached item
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let _log_guard = logging::init(&config.log_dir()?, args.verbose)?;
  tracing::debug!(command = ?args.command, "Starting");

  match args.command {
    Command::Refresh { limit } => commands::refresh(&config, limit).await,
    Command::Show { json } => commands::show(&config, json),
    Command::Clear => commands::clear(&config),
  }
}
