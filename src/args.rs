use clap::Parser;
use std::path::PathBuf;

/// Recursively carve a kernel image and root filesystem out of a firmware
/// blob (or a directory of them).
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Firmware file, or a directory containing several.
    pub input: PathBuf,

    /// Output directory for `<tag>.kernel` / `<tag>.tar.gz` artifacts.
    #[arg(default_value = "images")]
    pub output: PathBuf,

    /// Metadata sink host (requires the `metadata-sink` build feature).
    #[arg(long = "sql")]
    pub sql: Option<String>,

    /// Metadata sink port.
    #[arg(short = 'p', long = "port", default_value_t = 5432)]
    pub port: u16,

    /// Disable rootfs extraction.
    #[arg(long = "nf")]
    pub no_rootfs: bool,

    /// Disable kernel extraction.
    #[arg(long = "nk")]
    pub no_kernel: bool,

    /// Disable the parallel worker pool; process inputs one at a time.
    #[arg(long = "np")]
    pub no_parallel: bool,

    /// Brand name used for metadata sink tag generation.
    #[arg(short = 'b', long = "brand")]
    pub brand: Option<String>,

    /// Suppress per-item progress logging.
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Timeout for each signature-scanner invocation, in seconds.
    #[arg(long, default_value_t = 20)]
    pub timeout: u64,

    /// Enable loud (verbose) output - shows all extraction and processing steps.
    #[arg(long)]
    pub loud: bool,

    /// Create a file showing all the devices removed from any of the extractions.
    #[arg(long)]
    pub log_devices: bool,
}
