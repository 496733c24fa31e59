//! CLI argument definitions using clap
//!
//! Commands:
//! - crossquery run --fixture <path>
//! - crossquery resolve

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// crossquery - cross-partition query coordinator
#[derive(Parser, Debug)]
#[command(name = "crossquery")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a fixture's query against an in-memory container, one JSON line per page
    Run {
        /// Path to the fixture file
        #[arg(long)]
        fixture: PathBuf,

        /// Override the fixture's page size
        #[arg(long)]
        max_item_count: Option<usize>,

        /// Resume from a continuation printed by an earlier run
        #[arg(long)]
        continuation: Option<String>,

        /// Stop after this many pages
        #[arg(long)]
        pages: Option<usize>,
    },

    /// Resolve continuation tokens against ranges read from stdin
    Resolve,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
