//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Resumable, mount-backed transfers of large content packages.
///
/// Items are tracked in a local queue; `start` mounts the remote source,
/// copies it into the download root and resumes from partial files.
#[derive(Parser, Debug)]
#[command(name = "mountfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/mountfetch/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Queue database file (default: $XDG_DATA_HOME/mountfetch/queue.db)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add an item to the queue
    Add {
        /// Release/package key
        key: String,

        /// Declared total size, e.g. "2 GB" (enables the disk-space check)
        #[arg(short, long)]
        size: Option<String>,

        /// Destination directory (default: <download_root>/<key>)
        #[arg(short, long, value_name = "DIR")]
        destination: Option<PathBuf>,
    },

    /// Start (or retry) the transfer of an item
    Start {
        key: String,

        /// Speed cap in KB/s for this run (0 = unthrottled)
        #[arg(short = 'l', long, value_name = "KBPS")]
        speed_limit: Option<u64>,
    },

    /// Resume a paused item from the bytes already on disk
    Resume {
        key: String,

        /// Speed cap in KB/s for this run (0 = unthrottled)
        #[arg(short = 'l', long, value_name = "KBPS")]
        speed_limit: Option<u64>,
    },

    /// Show queue items
    Status {
        /// Only this item
        key: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Remove an item from the queue (files on disk are kept)
    Remove { key: String },
}
