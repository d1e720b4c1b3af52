use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "playnite-gate", version, about = "Rule enforcement gateway for PlayNite")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP gateway (the default)
    Serve {
        /// Listen address (overrides config file setting)
        #[arg(long)]
        listen: Option<String>,

        /// Log level filter (overrides config file setting; RUST_LOG wins over both)
        #[arg(long)]
        log_level: Option<String>,

        /// Additional YAML rule pack to load; may be repeated
        #[arg(short, long = "rules")]
        rules: Vec<PathBuf>,
    },
    /// Validate YAML rule pack files and print a summary
    Check {
        #[arg(required = true)]
        packs: Vec<PathBuf>,
    },
}

impl Command {
    pub fn serve_defaults() -> Self {
        Command::Serve {
            listen: None,
            log_level: None,
            rules: Vec::new(),
        }
    }
}
