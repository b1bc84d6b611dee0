//! HARealm CLI
//!
//! Command-line tools for HARealm files.
//!
//! # Commands
//!
//! - `inspect` - Display schema version, types and row counts
//! - `verify` - Check stored metadata against the table layout
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// HARealm command-line tools.
#[derive(Parser)]
#[command(name = "harealm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the realm file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display schema version, types and row counts
    Inspect {
        /// Show the properties of every type
        #[arg(short, long)]
        schema: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check stored metadata against the table layout
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { schema, format } => {
            let path = cli.path.ok_or("Realm path required for inspect")?;
            commands::inspect::run(&path, schema, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Realm path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("HARealm CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
