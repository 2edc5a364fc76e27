use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide error type. CLI-facing variants come first; the remainder is the
/// engine's internal error taxonomy, each of which the cascade is expected to
/// absorb rather than propagate (see `extraction::ExtractionItem::run_cascade`).
#[derive(Error, Debug)]
pub enum Fw2tarError {
    #[error("firmware path does not exist: {0:?}")]
    FirmwareDoesNotExist(PathBuf),

    #[error("firmware path is not a file: {0:?}")]
    FirmwareNotAFile(PathBuf),

    #[error("output already exists: {0:?} (use --force to overwrite)")]
    OutputExists(PathBuf),

    #[error("unknown extractor: {0}")]
    InvalidExtractor(String),

    #[error("input path is neither a file nor a directory: {0:?}")]
    InputUnreadable(PathBuf),

    #[error("signature scanner binary not found on PATH")]
    ScannerMissing,

    #[error("signature scanner failed: {0}")]
    ScannerFailed(String),

    #[error("failed to parse scanner description fragment: {0}")]
    ParseError(String),

    #[error("metadata sink error: {0}")]
    SinkError(String),

    #[error("carve range out of bounds (offset={offset}, size={size}, file_size={file_size})")]
    CarveOutOfRange {
        offset: u64,
        size: u64,
        file_size: u64,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
