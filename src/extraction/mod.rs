//! ExtractionItem state machine. One instance per artifact
//! under consideration; owns the per-item cascade that classifies, carves,
//! decompresses, and recurses until a kernel file and a rootfs archive exist,
//! a terminal condition fires, or recursion bounds are hit.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::archive;
use crate::carve::{copy_range, find_rootfs, magic_type, md5_of};
use crate::classifier::{self, SignatureFamily};
use crate::decrypt;
use crate::extractor::ExtractorContext;
use crate::metadata::SinkField;
use crate::scanner::{self, ScanOptions};

/// Root at 0, descendants bounded to depth <= 3.
pub const RECURSION_DEPTH: usize = 3;
/// At most 5 children spawned per directory traversal before early
/// termination.
pub const RECURSION_BREADTH: usize = 5;

const BLACKLISTED_MIME_FRAGMENTS: &[&str] = &[
    "application/x-executable",
    "application/x-dosexec",
    "application/x-object",
    "application/pdf",
    "application/msword",
    "image/",
    "text/",
    "video/",
];

const BLACKLISTED_DESCRIPTION_FRAGMENTS: &[&str] =
    &["executable", "universal binary", "relocatable", "bytecode", "applet"];

/// Final outcome of running one top-level (or recursive) extraction item.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub status: bool,
    pub tag: String,
    pub kernel_done: bool,
    pub rootfs_done: bool,
    pub kernel_path: Option<PathBuf>,
    pub rootfs_path: Option<PathBuf>,
}

pub struct ExtractionItem {
    ctx: Arc<ExtractorContext>,
    path: PathBuf,
    depth: usize,
    tag: String,
    checksum: String,
    terminate: bool,
    kernel_done: bool,
    rootfs_done: bool,
}

impl ExtractionItem {
    /// Constructs a depth-0 item for one of the driver's top-level inputs.
    pub fn top_level(ctx: Arc<ExtractorContext>, path: &Path) -> Self {
        Self::new(ctx, path, 0, None)
    }

    /// Constructs a child item inheriting its parent's tag, one depth lower.
    pub fn child(ctx: Arc<ExtractorContext>, path: &Path, depth: usize, tag: String) -> Self {
        Self::new(ctx, path, depth, Some(tag))
    }

    fn new(ctx: Arc<ExtractorContext>, path: &Path, depth: usize, parent_tag: Option<String>) -> Self {
        let checksum = md5_of(path).unwrap_or_else(|e| {
            log::warn!("failed to checksum {path:?}: {e}");
            format!("{:x}", md5::compute(path.to_string_lossy().as_bytes()))
        });

        let tag = match parent_tag {
            Some(tag) => tag,
            None => Self::generate_tag(&ctx, path, &checksum),
        };

        let mut item = Self {
            ctx,
            path: path.to_path_buf(),
            depth,
            tag,
            checksum,
            terminate: false,
            kernel_done: false,
            rootfs_done: false,
        };
        item.recompute_status();
        item
    }

    fn generate_tag(ctx: &ExtractorContext, path: &Path, checksum: &str) -> String {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        if let Some(sink) = &ctx.sink {
            match sink.generate_tag(&filename, checksum, ctx.brand.as_deref()) {
                Ok(tag) => return tag,
                Err(e) => log::warn!("metadata sink tag generation failed, falling back: {e}"),
            }
        }

        format!("{filename}_{checksum}")
    }

    fn kernel_path(&self) -> Option<PathBuf> {
        self.ctx
            .output_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.kernel", self.tag)))
    }

    fn rootfs_path(&self) -> Option<PathBuf> {
        self.ctx
            .output_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.tar.gz", self.tag)))
    }

    fn recompute_status(&mut self) {
        self.kernel_done = if self.ctx.kernel_enabled() {
            self.kernel_path().map(|p| p.is_file()).unwrap_or(false)
        } else {
            true
        };
        self.rootfs_done = if self.ctx.rootfs_enabled() {
            self.rootfs_path().map(|p| p.is_file()).unwrap_or(false)
        } else {
            true
        };

        if let Some(sink) = &self.ctx.sink {
            if self.kernel_done && self.ctx.kernel_enabled() {
                let _ = sink.set_field(&self.tag, SinkField::KernelExtracted, "true");
            }
            if self.rootfs_done && self.ctx.rootfs_enabled() {
                let _ = sink.set_field(&self.tag, SinkField::RootfsExtracted, "true");
            }
        }
    }

    fn is_complete(&self) -> bool {
        self.terminate || (self.kernel_done && self.rootfs_done)
    }

    fn log(&self, msg: &str) {
        if !self.ctx.quiet {
            log::info!("{}{}", "  ".repeat(self.depth), msg);
        }
    }

    fn to_result(&self, status: bool) -> ExtractionResult {
        ExtractionResult {
            status,
            tag: self.tag.clone(),
            kernel_done: self.kernel_done,
            rootfs_done: self.rootfs_done,
            kernel_path: self.kernel_path(),
            rootfs_path: self.rootfs_path(),
        }
    }

    /// Runs the item's entry guards and, if none short-circuit, its cascade.
    pub fn run(mut self) -> ExtractionResult {
        if self.is_complete() {
            self.log("skipping: already complete");
            return self.to_result(true);
        }

        if self.depth > RECURSION_DEPTH {
            self.log(&format!("skipping: recursion depth {}", self.depth));
            return self.to_result(self.is_complete());
        }

        {
            let mut visited = self.ctx.visited.lock().unwrap();
            if visited.contains(&self.checksum) {
                self.log(&format!("skipping: already visited {}", self.checksum));
                return self.to_result(self.is_complete());
            }
            visited.insert(self.checksum.clone());
        }

        if self.is_blacklisted() {
            self.log("skipping: blacklisted file type");
            return self.to_result(self.is_complete());
        }

        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => {
                log::error!("failed to allocate temp dir for {:?}: {e}", self.path);
                return self.to_result(false);
            }
        };

        let done = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.run_cascade(temp_dir.path())
        })) {
            Ok(done) => done,
            Err(_) => {
                log::error!("panic while extracting {:?}", self.path);
                false
            }
        };

        // `temp_dir` is dropped here regardless of how run_cascade exited,
        // including the panic path above.
        self.to_result(done)
    }

    fn run_cascade(&mut self, temp_dir: &Path) -> bool {
        type Stage = fn(&mut ExtractionItem, &Path) -> bool;
        const STAGES: [Stage; 6] = [
            ExtractionItem::check_archive,
            ExtractionItem::check_encryption,
            ExtractionItem::check_firmware,
            ExtractionItem::check_kernel,
            ExtractionItem::check_rootfs,
            ExtractionItem::check_compressed,
        ];

        for stage in STAGES {
            if stage(self, temp_dir) {
                self.recompute_status();
                if self.is_complete() {
                    return true;
                }
            }
        }

        false
    }

    fn is_blacklisted(&self) -> bool {
        let mime = magic_type(&self.path, true);
        if BLACKLISTED_MIME_FRAGMENTS.iter().any(|frag| mime.contains(frag)) {
            self.log(&format!("blacklisted mime: {mime}"));
            return true;
        }

        let description = magic_type(&self.path, false);
        if BLACKLISTED_DESCRIPTION_FRAGMENTS
            .iter()
            .any(|frag| description.contains(frag))
        {
            self.log(&format!("blacklisted description: {description}"));
            return true;
        }

        if self
            .path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("dmg"))
            .unwrap_or(false)
        {
            return true;
        }

        false
    }

    fn check_archive(&mut self, temp_dir: &Path) -> bool {
        self.check_recursive(SignatureFamily::Archive, temp_dir)
    }

    fn check_compressed(&mut self, temp_dir: &Path) -> bool {
        self.check_recursive(SignatureFamily::Compressed, temp_dir)
    }

    fn check_encryption(&mut self, temp_dir: &Path) -> bool {
        let mut header = [0u8; 4];
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return false,
        };
        if file.read_exact(&mut header).is_err() {
            return false;
        }
        if &header != decrypt::SHRS_MAGIC {
            return false;
        }

        self.log("found D-Link SHRS-encrypted firmware");

        let data = match std::fs::read(&self.path) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("failed to read SHRS payload {:?}: {e}", self.path);
                return true;
            }
        };

        match decrypt::dlink_decrypt(&data) {
            Ok(plaintext) => {
                let out = temp_dir.join("dlink_decrypt");
                if let Err(e) = std::fs::write(&out, plaintext) {
                    log::warn!("failed to write decrypted SHRS payload: {e}");
                }
            }
            Err(e) => log::warn!("SHRS decryption failed for {:?}: {e}", self.path),
        }

        // The decrypted file is intentionally not recursed into here; see
        // DESIGN.md (open question carried over from the original tool).
        true
    }

    fn check_firmware(&mut self, temp_dir: &Path) -> bool {
        let opts = ScanOptions {
            include: classifier::HEADER,
            ..Default::default()
        };
        let artifacts = match scanner::scan(&self.path, &opts) {
            Ok(a) => a,
            Err(e) => {
                log::debug!("header scan failed for {:?}: {e}", self.path);
                return false;
            }
        };
        let file_size = match std::fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(_) => return false,
        };

        for artifact in &artifacts {
            let desc = artifact.description.as_str();

            if desc.contains("uImage header") {
                if !self.kernel_done && desc.contains("OS Kernel Image") {
                    if let Some(size) = parse_decimal_field(desc, "image size:") {
                        let kernel_offset = artifact.offset + 64;
                        if size > 0
                            && kernel_offset
                                .checked_add(size)
                                .map_or(false, |end| end <= file_size)
                        {
                            self.log(&format!("uImage kernel at {kernel_offset:#x}+{size:#x}"));
                            let tmp_path = temp_dir.join("uimage_kernel");
                            if copy_range(&self.path, kernel_offset, size, &tmp_path).is_ok() {
                                let child = ExtractionItem::child(
                                    self.ctx.clone(),
                                    &tmp_path,
                                    self.depth,
                                    self.tag.clone(),
                                );
                                let _ = child.run();
                                return true;
                            }
                        }
                    }
                }
            } else if !self.kernel_done
                && !self.rootfs_done
                && desc.contains("rootfs offset:")
                && desc.contains("kernel offset:")
            {
                let kernel_offset = parse_hex_field(desc, "kernel offset:").unwrap_or(0);
                let mut kernel_size = parse_hex_field(desc, "kernel length:").unwrap_or(0);
                let rootfs_offset = parse_hex_field(desc, "rootfs offset:").unwrap_or(0);
                let mut rootfs_size = parse_hex_field(desc, "rootfs length:").unwrap_or(0);

                if kernel_size == 0 && rootfs_size == 0 {
                    kernel_size = rootfs_offset.saturating_sub(kernel_offset);
                    rootfs_size = file_size.saturating_sub(rootfs_offset);
                }

                let kernel_ok = kernel_size > 0
                    && kernel_offset
                        .checked_add(kernel_size)
                        .map_or(false, |end| end <= file_size);
                let rootfs_ok = rootfs_size != 0
                    && rootfs_offset
                        .checked_add(rootfs_size)
                        .map_or(false, |end| end <= file_size);

                if kernel_ok && rootfs_ok {
                    self.log(&format!("TRX/TP-Link header: {desc}"));

                    let kernel_tmp = temp_dir.join("trx_kernel");
                    if copy_range(&self.path, kernel_offset, kernel_size, &kernel_tmp).is_ok() {
                        let child = ExtractionItem::child(
                            self.ctx.clone(),
                            &kernel_tmp,
                            self.depth,
                            self.tag.clone(),
                        );
                        let _ = child.run();
                    }

                    let rootfs_tmp = temp_dir.join("trx_rootfs");
                    if copy_range(&self.path, rootfs_offset, rootfs_size, &rootfs_tmp).is_ok() {
                        let child = ExtractionItem::child(
                            self.ctx.clone(),
                            &rootfs_tmp,
                            self.depth,
                            self.tag.clone(),
                        );
                        let _ = child.run();
                    }

                    self.recompute_status();
                    return self.is_complete();
                }
            }
        }

        false
    }

    fn check_kernel(&mut self, _temp_dir: &Path) -> bool {
        if self.kernel_done {
            return false;
        }

        let opts = ScanOptions {
            include: classifier::KERNEL,
            ..Default::default()
        };
        let artifacts = match scanner::scan(&self.path, &opts) {
            Ok(a) => a,
            Err(e) => {
                log::debug!("kernel scan failed for {:?}: {e}", self.path);
                return false;
            }
        };

        // Only the first detected artifact is ever examined here; this
        // mirrors the original tool exactly (see SPEC_FULL.md §9, open
        // question 2) rather than scanning every candidate.
        let Some(first) = artifacts.first() else {
            return false;
        };
        let desc = first.description.clone();

        if !(desc.contains("kernel version") || desc.contains("Linux version")) {
            return false;
        }

        if let Some(sink) = &self.ctx.sink {
            if let Err(e) = sink.set_field(&self.tag, SinkField::KernelVersion, &desc) {
                log::debug!("failed to record kernel version: {e}");
            }
        }

        if !desc.contains("Linux") {
            self.log(&format!("ignoring non-Linux kernel: {desc}"));
            return false;
        }

        self.log(&format!("found Linux kernel: {desc}"));
        match self.kernel_path() {
            Some(dest) => {
                if let Err(e) = std::fs::copy(&self.path, &dest) {
                    log::warn!("failed to copy kernel to {dest:?}: {e}");
                }
            }
            None => self.ctx.disable_kernel(),
        }

        true
    }

    fn check_rootfs(&mut self, temp_dir: &Path) -> bool {
        if self.rootfs_done {
            return false;
        }

        let include = SignatureFamily::ubi_and_rootfs();
        let opts = ScanOptions {
            extract: true,
            include: &include,
            output_dir: Some(temp_dir),
            ..Default::default()
        };
        let artifacts = match scanner::scan(&self.path, &opts) {
            Ok(a) => a,
            Err(e) => {
                log::debug!("rootfs scan failed for {:?}: {e}", self.path);
                return false;
            }
        };

        for artifact in &artifacts {
            let Some(extraction) = &artifact.extraction else {
                continue;
            };
            if !extraction.success {
                continue;
            }

            let (found, root) = find_rootfs(&extraction.output_dir, true);
            if found {
                return self.emit_rootfs(&root);
            }
        }

        false
    }

    fn check_recursive(&mut self, family: SignatureFamily, temp_dir: &Path) -> bool {
        let opts = ScanOptions {
            extract: true,
            include: family.signatures(),
            output_dir: Some(temp_dir),
            ..Default::default()
        };
        let artifacts = match scanner::scan(&self.path, &opts) {
            Ok(a) => a,
            Err(e) => {
                log::debug!("{family:?} scan failed for {:?}: {e}", self.path);
                return false;
            }
        };

        for artifact in &artifacts {
            let Some(extraction) = &artifact.extraction else {
                continue;
            };
            if !extraction.success {
                continue;
            }

            let (found, root) = find_rootfs(&extraction.output_dir, true);
            if found {
                return self.emit_rootfs(&root);
            }

            self.log(&format!("recursing into {:?}", extraction.output_dir));
            let mut count = 0usize;
            if self.walk_dir_recursive(&extraction.output_dir, &artifact.description, &mut count) {
                return true;
            }
        }

        false
    }

    fn emit_rootfs(&mut self, unix_root: &Path) -> bool {
        self.log(&format!("found Linux filesystem in {unix_root:?}"));
        match self.rootfs_path() {
            Some(dest) => {
                match archive::write_rootfs_archive(
                    unix_root,
                    &dest,
                    self.ctx.removed_devices.as_ref(),
                ) {
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("failed to archive rootfs from {unix_root:?}: {e}");
                        return false;
                    }
                }
            }
            None => self.ctx.disable_rootfs(),
        }
        true
    }

    /// Walks `dir` top-down (files in this directory first, then each
    /// subdirectory), spawning at most `RECURSION_BREADTH` children across
    /// the *entire* traversal before setting `terminate` and returning.
    /// `count` threads through recursive calls so the cap is cumulative
    /// across the whole tree, not reset per subdirectory.
    fn walk_dir_recursive(&mut self, dir: &Path, description: &str, count: &mut usize) -> bool {
        let entries: Vec<_> = match std::fs::read_dir(dir) {
            Ok(rd) => rd.filter_map(|e| e.ok()).collect(),
            Err(_) => return false,
        };

        let mut files: Vec<PathBuf> = entries
            .iter()
            .filter(|e| !e.path().is_dir())
            .map(|e| e.path())
            .collect();
        let dirs: Vec<PathBuf> = entries
            .into_iter()
            .filter(|e| e.path().is_dir())
            .map(|e| e.path())
            .collect();

        files.sort();
        files.sort_by_key(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().len())
                .unwrap_or(0)
        });
        promote_original_filename(&mut files, description);

        for file in files {
            if *count >= RECURSION_BREADTH {
                self.log(&format!("skipping: recursion breadth {RECURSION_BREADTH}"));
                self.terminate = true;
                return true;
            }

            let child =
                ExtractionItem::child(self.ctx.clone(), &file, self.depth + 1, self.tag.clone());
            let child_result = child.run();
            *count += 1;

            if child_result.status {
                self.recompute_status();
                if self.is_complete() {
                    return true;
                }
            }
        }

        for sub in dirs {
            if self.walk_dir_recursive(&sub, description, count) {
                return true;
            }
        }

        false
    }
}

fn parse_decimal_field(description: &str, key: &str) -> Option<u64> {
    for frag in description.split(',') {
        if frag.contains(key) {
            let digits: String = frag.chars().filter(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                return digits.parse().ok();
            }
        }
    }
    None
}

fn parse_hex_field(description: &str, key: &str) -> Option<u64> {
    for frag in description.split(',') {
        let trimmed = frag.trim();
        if trimmed.starts_with(key) {
            let value = trimmed[key.len()..].trim();
            let value = value.trim_start_matches("0x").trim_start_matches("0X");
            return u64::from_str_radix(value, 16).ok();
        }
    }
    None
}

fn promote_original_filename(files: &mut Vec<PathBuf>, description: &str) {
    let Some(name) = extract_original_filename(description) else {
        return;
    };
    if let Some(idx) = files
        .iter()
        .position(|p| p.file_name().map(|n| n.to_string_lossy() == name).unwrap_or(false))
    {
        let file = files.remove(idx);
        files.insert(0, file);
    }
}

fn extract_original_filename(description: &str) -> Option<String> {
    for frag in description.split(',') {
        let frag = frag.trim();
        if let Some(rest) = frag.strip_prefix("original file name:") {
            let rest = rest.trim();
            let start = rest.find('"')?;
            let end = rest[start + 1..].find('"')?;
            return Some(rest[start + 1..start + 1 + end].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decimal_field_extracts_digits_only() {
        let desc = "uImage header, header size: 64 bytes, image size: 4194304 bytes";
        assert_eq!(parse_decimal_field(desc, "image size:"), Some(4194304));
    }

    #[test]
    fn parse_hex_field_strips_0x_prefix() {
        let desc = "kernel offset: 0x40, kernel length: 0x100, rootfs offset: 0x140, rootfs length: 0x200";
        assert_eq!(parse_hex_field(desc, "kernel offset:"), Some(0x40));
        assert_eq!(parse_hex_field(desc, "rootfs length:"), Some(0x200));
    }

    #[test]
    fn extract_original_filename_parses_quoted_name() {
        let desc = "gzip compressed data, original file name: \"firmware.bin\", extra: x";
        assert_eq!(
            extract_original_filename(desc),
            Some("firmware.bin".to_string())
        );
    }

    #[test]
    fn promote_original_filename_moves_match_to_front() {
        let mut files = vec![
            PathBuf::from("/tmp/aaa"),
            PathBuf::from("/tmp/firmware.bin"),
            PathBuf::from("/tmp/zzz"),
        ];
        promote_original_filename(&mut files, "original file name: \"firmware.bin\"");
        assert_eq!(files[0], PathBuf::from("/tmp/firmware.bin"));
    }
}
