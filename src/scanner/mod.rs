//! Signature-scan adapter. Drives the external `binwalk`
//! binary over a file and translates its structured JSON log into
//! [`DetectedArtifact`] records.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Deserialize;
use tempfile::TempDir;
use wait_timeout::ChildExt;

use crate::error::Fw2tarError;

/// Side-effect metadata produced when the scanner actually unpacked an
/// artifact, as opposed to merely detecting it.
#[derive(Debug, Clone, Deserialize)]
pub struct Extraction {
    pub size: u64,
    pub success: bool,
    pub extractor: String,
    #[serde(rename = "output_directory")]
    pub output_dir: PathBuf,
}

/// One entry from the scanner's `file_map`.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectedArtifact {
    pub offset: u64,
    pub id: String,
    pub size: u64,
    pub confidence: f32,
    pub description: String,
    #[serde(skip)]
    pub extraction: Option<Extraction>,
}

#[derive(Debug, Deserialize)]
struct Analysis {
    file_map: Vec<DetectedArtifact>,
    #[serde(default)]
    extractions: std::collections::HashMap<String, Extraction>,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    #[serde(rename = "Analysis")]
    analysis: Analysis,
}

/// Options controlling one invocation of the scanner.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions<'a> {
    pub verbose: bool,
    pub extract: bool,
    pub recursive: bool,
    pub search_all: bool,
    pub include: &'a [&'a str],
    pub exclude: &'a [&'a str],
    pub output_dir: Option<&'a Path>,
}

static TIMEOUT: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(20);

/// Sets the child-process timeout (seconds) applied to every subsequent scan.
/// Mirrors the existing binary's `--timeout` flag.
pub fn set_timeout(secs: u64) {
    TIMEOUT.store(secs, std::sync::atomic::Ordering::Relaxed);
}

fn timeout() -> Duration {
    Duration::from_secs(TIMEOUT.load(std::sync::atomic::Ordering::Relaxed))
}

/// Runs the signature scanner over `path` with the given options, returning
/// the detected artifacts. Errors are returned rather than panicking; callers
/// in the cascade treat any error as "no artifacts" (see `Fw2tarError`'s
/// doc comment on `ScannerFailed`).
pub fn scan(path: &Path, opts: &ScanOptions) -> Result<Vec<DetectedArtifact>, Fw2tarError> {
    if !path.is_file() {
        return Err(Fw2tarError::InputUnreadable(path.to_path_buf()));
    }

    let log_dir = TempDir::new().map_err(Fw2tarError::Io)?;
    let log_path = log_dir.path().join("log.json");

    let mut cmd = Command::new("binwalk");
    if opts.verbose {
        cmd.arg("-v");
    }
    if opts.extract {
        cmd.arg("-e");
    }
    if opts.recursive {
        cmd.arg("-r");
    }
    if opts.search_all {
        cmd.arg("-a");
    }
    if !opts.include.is_empty() {
        cmd.arg("--include").args(opts.include);
    }
    if !opts.exclude.is_empty() {
        cmd.arg("--exclude").args(opts.exclude);
    }
    cmd.arg("-l").arg(&log_path);
    if let Some(out) = opts.output_dir {
        cmd.arg("-C").arg(out);
    }
    cmd.arg(path);
    cmd.stdout(Stdio::null()).stderr(Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Fw2tarError::ScannerMissing)
        }
        Err(e) => return Err(Fw2tarError::Io(e)),
    };

    let status = match child
        .wait_timeout(timeout())
        .map_err(Fw2tarError::Io)?
    {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Fw2tarError::ScannerFailed(format!(
                "scan of {path:?} exceeded timeout of {:?}",
                timeout()
            )));
        }
    };

    if !status.success() {
        return Err(Fw2tarError::ScannerFailed(format!(
            "binwalk exited with {status}"
        )));
    }

    parse_log(&log_path, opts.output_dir)
}

/// Parses the scanner's JSON log and translates the guest-visible extraction
/// output directories into the host-visible path the caller asked for. Since
/// this adapter invokes `binwalk` directly on the host (no container layer),
/// host and guest views coincide and the translation is the identity
/// function; it is kept as an explicit seam so a containerised backend can
/// substitute a real translation later.
fn parse_log(
    log_path: &Path,
    _host_output_dir: Option<&Path>,
) -> Result<Vec<DetectedArtifact>, Fw2tarError> {
    if !log_path.is_file() {
        return Err(Fw2tarError::ScannerFailed(format!(
            "log file not found at {log_path:?}"
        )));
    }

    let bytes = std::fs::read(log_path).map_err(Fw2tarError::Io)?;
    let mut entries: Vec<LogEntry> = serde_json::from_slice(&bytes)
        .map_err(|e| Fw2tarError::ScannerFailed(format!("unparseable log: {e}")))?;

    let entry = entries
        .pop()
        .ok_or_else(|| Fw2tarError::ScannerFailed("empty scanner log".into()))?;

    let mut analysis = entry.analysis;
    for artifact in &mut analysis.file_map {
        artifact.extraction = analysis.extractions.remove(&artifact.id);
    }

    Ok(analysis.file_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_rejects_missing_file() {
        let missing = Path::new("/nonexistent/log.json");
        let err = parse_log(missing, None).unwrap_err();
        assert!(matches!(err, Fw2tarError::ScannerFailed(_)));
    }

    #[test]
    fn parse_log_reads_file_map_and_joins_extractions() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("log.json");
        std::fs::write(
            &log_path,
            r#"[{"Analysis":{"file_map":[{"offset":0,"id":"1","size":10,"confidence":0.9,"description":"gzip compressed data"}],"extractions":{"1":{"size":10,"success":true,"extractor":"gzip","output_directory":"/tmp/out"}}}}]"#,
        )
        .unwrap();

        let artifacts = parse_log(&log_path, None).unwrap();
        assert_eq!(artifacts.len(), 1);
        let extraction = artifacts[0].extraction.as_ref().unwrap();
        assert!(extraction.success);
        assert_eq!(extraction.extractor, "gzip");
    }
}
