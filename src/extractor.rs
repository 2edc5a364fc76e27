//! Extractor driver: enumerates inputs, runs each as a
//! top-level `ExtractionItem` (optionally across a bounded worker pool), and
//! owns the process-wide `visited` dedup set and the `doKernel`/`doRootfs`
//! write-once-false flags every item shares.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::extraction::{ExtractionItem, ExtractionResult};
use crate::metadata::MetadataSink;

/// Shared, read-mostly state every `ExtractionItem` holds a reference to.
/// `visited` is the only field mutated after construction besides the two
/// atomics; everything else is fixed for the lifetime of one `extract()`
/// call.
pub struct ExtractorContext {
    pub output_dir: Option<PathBuf>,
    pub do_kernel: AtomicBool,
    pub do_rootfs: AtomicBool,
    pub brand: Option<String>,
    pub sink: Option<MetadataSink>,
    pub quiet: bool,
    pub visited: Mutex<HashSet<String>>,
    pub removed_devices: Option<Mutex<HashSet<PathBuf>>>,
}

impl ExtractorContext {
    pub fn new(
        output_dir: Option<PathBuf>,
        do_kernel: bool,
        do_rootfs: bool,
        brand: Option<String>,
        sink: Option<MetadataSink>,
        quiet: bool,
        log_devices: bool,
    ) -> Self {
        Self {
            output_dir,
            do_kernel: AtomicBool::new(do_kernel),
            do_rootfs: AtomicBool::new(do_rootfs),
            brand,
            sink,
            quiet,
            visited: Mutex::new(HashSet::new()),
            removed_devices: log_devices.then(|| Mutex::new(HashSet::new())),
        }
    }

    /// Clears `do_kernel` (and never sets it back to true), matching the
    /// original's global flip when an item realizes output is unavailable.
    pub fn disable_kernel(&self) {
        self.do_kernel.store(false, Ordering::SeqCst);
    }

    pub fn disable_rootfs(&self) {
        self.do_rootfs.store(false, Ordering::SeqCst);
    }

    pub fn kernel_enabled(&self) -> bool {
        self.do_kernel.load(Ordering::SeqCst)
    }

    pub fn rootfs_enabled(&self) -> bool {
        self.do_rootfs.load(Ordering::SeqCst)
    }
}

/// Walks `input`, producing the top-level file list: the file itself if
/// `input` is a file, or every regular file beneath it if `input` is a
/// directory. Anything else is reported and skipped.
fn enumerate_inputs(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }

    if input.is_dir() {
        return walkdir::WalkDir::new(input)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
    }

    log::error!("cannot read input: {input:?}");
    Vec::new()
}

pub struct Extractor {
    ctx: Arc<ExtractorContext>,
    parallel: bool,
}

impl Extractor {
    pub fn new(ctx: ExtractorContext, parallel: bool) -> Self {
        Self {
            ctx: Arc::new(ctx),
            parallel,
        }
    }

    pub fn context(&self) -> &Arc<ExtractorContext> {
        &self.ctx
    }

    /// Runs extraction over every top-level input found under `input`,
    /// returning one `ExtractionResult` per input. Order mirrors the input
    /// list when run serially; unspecified (but each independent) when run
    /// in parallel.
    pub fn extract(&self, input: &Path) -> Vec<ExtractionResult> {
        let inputs = enumerate_inputs(input);

        if let Some(dir) = &self.ctx.output_dir {
            if !dir.exists() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    log::error!("failed to create output directory {dir:?}: {e}");
                    return Vec::new();
                }
            }
        }

        if inputs.is_empty() {
            return Vec::new();
        }

        if self.parallel {
            self.extract_parallel(inputs)
        } else {
            inputs
                .iter()
                .map(|path| ExtractionItem::top_level(self.ctx.clone(), path).run())
                .collect()
        }
    }

    fn extract_parallel(&self, inputs: Vec<PathBuf>) -> Vec<ExtractionResult> {
        let num_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(inputs.len().max(1));

        let queue: Mutex<VecDeque<PathBuf>> = Mutex::new(inputs.into_iter().collect());
        let results: Mutex<Vec<ExtractionResult>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..num_workers {
                scope.spawn(|| loop {
                    let next = queue.lock().unwrap().pop_front();
                    let Some(path) = next else { break };

                    let result = ExtractionItem::top_level(self.ctx.clone(), &path).run();
                    results.lock().unwrap().push(result);
                });
            }
        });

        results.into_inner().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_inputs_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"x").unwrap();

        let inputs = enumerate_inputs(&file);
        assert_eq!(inputs, vec![file]);
    }

    #[test]
    fn enumerate_inputs_directory_lists_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.bin"), b"y").unwrap();

        let mut inputs = enumerate_inputs(dir.path());
        inputs.sort();
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn enumerate_inputs_missing_path_is_empty() {
        let inputs = enumerate_inputs(Path::new("/does/not/exist"));
        assert!(inputs.is_empty());
    }

    #[test]
    fn context_flags_are_write_once_false() {
        let ctx = ExtractorContext::new(None, true, true, None, None, true, false);
        assert!(ctx.kernel_enabled());
        ctx.disable_kernel();
        assert!(!ctx.kernel_enabled());
        ctx.disable_kernel();
        assert!(!ctx.kernel_enabled());
    }
}
