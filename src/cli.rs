use std::path::PathBuf;

use clap::Parser;

/// Walk a directory the way a viewer would and report cache behaviour.
#[derive(Parser, Debug)]
#[command(name = "idxd-loader", version, about)]
pub struct Args {
    /// Directory to scan for media
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Decode worker threads (overrides IDXD_LOAD_WORKERS)
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Decoded cache budget in MiB (overrides IDXD_CACHE_MB)
    #[arg(short = 'c', long = "cache-mb", value_name = "N")]
    pub cache_mb: Option<usize>,

    /// Neighbours to prefetch on each side of the current file
    #[arg(short = 'p', long = "prefetch", value_name = "N", default_value_t = 1)]
    pub prefetch: usize,

    /// Descend into subdirectories
    #[arg(short = 'r', long = "recursive")]
    pub recursive: bool,
}
