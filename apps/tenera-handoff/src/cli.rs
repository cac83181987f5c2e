use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "tenera-handoff",
    about = "Drive and inspect Tenera checkout handoffs from the command line",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a full checkout handoff and print the redirect plan.
    Checkout {
        /// JSON file holding the cart lines to hand off. Without it the
        /// handoff resumes from the mirrored storage state.
        #[arg(long)]
        cart_file: Option<PathBuf>,
        /// Skip the order gate entirely and exercise the degraded path.
        #[arg(long)]
        offline: bool,
        /// Directory holding the mirrored storage state.
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Print the mirrored cart state for every storage key.
    Inspect {
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Remove every mirrored storage key.
    Clear {
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}
