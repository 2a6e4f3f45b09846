use clap::Parser;
use std::path::PathBuf;

/// Bounded media ingestion server.
#[derive(Parser, Debug)]
#[command(name = "reel", version, about, long_about = None)]
pub struct Args {
    /// Configuration file (TOML, YAML or JSON). Defaults to `config.toml` in
    /// the platform config directory, if it exists.
    #[arg(short, long, env = "REEL_CONFIG")]
    pub config: Option<PathBuf>,
    /// Validate the configuration and exit.
    #[arg(long)]
    pub check: bool,
}
