use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Минимальный CLI для GeodeDB (page-гранулярный стор блобов)
#[derive(Parser, Debug)]
#[command(name = "geodedb", version, about = "GeodeDB blob store CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Initialize a new store file (header page + empty trunk free table)
    Init {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = 4096)]
        page_size: u32,
    },
    /// Print store header, free-table stats and process metrics
    Status {
        #[arg(long)]
        path: PathBuf,
        /// JSON output (single object)
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Run the consistency check (blob walk + free-table reachability)
    Check {
        #[arg(long)]
        path: PathBuf,
        /// JSON output (full report)
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Allocate blob(s) of a given payload size, print first page numbers
    Alloc {
        #[arg(long)]
        path: PathBuf,
        /// Payload size in bytes
        #[arg(long)]
        size: u32,
        /// How many blobs to allocate in one transaction
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Free blob(s) by first page, single transaction
    Free {
        #[arg(long)]
        path: PathBuf,
        /// First page(s) of blobs to free
        #[arg(long, required = true)]
        page: Vec<u32>,
    },
}
