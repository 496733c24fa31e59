//! CLI module for crossquery
//!
//! Provides command-line interface for:
//! - run: Execute a fixture's query page by page
//! - resolve: Map continuation tokens onto a topology

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{resolve, resolve_mapping, run, run_command, run_fixture};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_request, write_error, write_line, write_response};
