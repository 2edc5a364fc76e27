//! Carving primitives: byte-range copy, MD5 hashing, UNIX rootfs-tree
//! detection, best-effort recursive delete, and a lightweight magic-type
//! probe.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use crate::error::Fw2tarError;

const BLOCK_SIZE: usize = 64 * 1024;

/// Canonical UNIX root directories used by [`find_rootfs`]'s threshold check.
pub const UNIX_DIRS: &[&str] = &[
    "bin", "etc", "dev", "home", "lib", "mnt", "opt", "root", "run", "sbin", "tmp", "usr", "var",
];

pub const UNIX_THRESHOLD: usize = 4;

/// Copies exactly `size` bytes from `src[offset..offset+size)` into a fresh
/// file at `dst`. A size of zero is a no-op (no file is created). Refuses to
/// carve past the end of `src`.
pub fn copy_range(src: &Path, offset: u64, size: u64, dst: &Path) -> Result<(), Fw2tarError> {
    if size == 0 {
        return Ok(());
    }

    let file_size = std::fs::metadata(src)?.len();
    if offset.checked_add(size).map_or(true, |end| end > file_size) {
        return Err(Fw2tarError::CarveOutOfRange {
            offset,
            size,
            file_size,
        });
    }

    let mut input = File::open(src)?;
    input.seek(SeekFrom::Start(offset))?;
    let mut output = File::create(dst)?;

    let mut remaining = size as usize;
    let mut buf = [0u8; BLOCK_SIZE];
    while remaining > 0 {
        let chunk = remaining.min(BLOCK_SIZE);
        input.read_exact(&mut buf[..chunk])?;
        output.write_all(&buf[..chunk])?;
        remaining -= chunk;
    }

    Ok(())
}

/// MD5 of file contents for regular files; MD5 of the path's bytes for any
/// non-regular entry (symlink, device, socket, FIFO). Keeping non-regular
/// entries path-hashed avoids reading through device nodes while still
/// letting them participate in the process-wide dedup set.
pub fn md5_of(path: &Path) -> Result<String, Fw2tarError> {
    let meta = std::fs::symlink_metadata(path)?;

    if meta.is_file() && !meta.file_type().is_symlink() {
        let mut file = File::open(path)?;
        let mut ctx = md5::Context::new();
        let mut buf = [0u8; BLOCK_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            ctx.consume(&buf[..n]);
        }
        Ok(format!("{:x}", ctx.compute()))
    } else {
        let digest = md5::compute(path.to_string_lossy().as_bytes());
        Ok(format!("{digest:x}"))
    }
}

/// Walks into single-child directory chains, then checks whether the
/// resulting directory exposes at least [`UNIX_THRESHOLD`] of [`UNIX_DIRS`]
/// as immediate subdirectories. If not, and `recurse` is true, tries one
/// level of subdirectories (non-recursively) and returns the first hit.
pub fn find_rootfs(start: &Path, recurse: bool) -> (bool, PathBuf) {
    let mut path = start.to_path_buf();

    loop {
        let entries: Vec<_> = match std::fs::read_dir(&path) {
            Ok(rd) => rd.filter_map(|e| e.ok()).collect(),
            Err(_) => break,
        };
        if entries.len() != 1 {
            break;
        }
        let only = entries[0].path();
        if !only.is_dir() {
            break;
        }
        path = only;
    }

    let count = std::fs::read_dir(&path)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .filter(|e| {
                    e.path().is_dir()
                        && e.file_name()
                            .to_str()
                            .map(|name| UNIX_DIRS.contains(&name))
                            .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0);

    if count >= UNIX_THRESHOLD {
        return (true, path);
    }

    if recurse {
        if let Ok(rd) = std::fs::read_dir(&path) {
            for entry in rd.filter_map(|e| e.ok()) {
                if entry.path().is_dir() {
                    let res = find_rootfs(&entry.path(), false);
                    if res.0 {
                        return res;
                    }
                }
            }
        }
    }

    (false, start.to_path_buf())
}

/// Libmagic-equivalent classification. Returns a MIME type when `mime` is
/// true, otherwise a short free-form description. Implemented via
/// content-sniffing rather than an `libmagic` FFI binding; sufficient to
/// recognise the blacklist categories the cascade's entry guard checks for.
pub fn magic_type(path: &Path, mime: bool) -> String {
    if mime {
        mime_type(path)
    } else {
        description(path)
    }
}

fn mime_type(path: &Path) -> String {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => kind.mime_type().to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

fn description(path: &Path) -> String {
    let mut buf = [0u8; 32];
    let n = read_prefix(path, &mut buf);
    let head = &buf[..n];

    if head.len() >= 4 && head[0..4] == *b"\x7fELF" {
        let et = if head.len() >= 18 {
            u16::from_le_bytes([head[16], head[17]])
        } else {
            0
        };
        return match et {
            1 => "ELF relocatable object".to_string(),
            2 => "ELF executable".to_string(),
            3 => "ELF shared object (pie executable)".to_string(),
            _ => "ELF data".to_string(),
        };
    }

    if head.len() >= 2 && head[0..2] == *b"MZ" {
        return "MS-DOS executable (PE32)".to_string();
    }

    if head.len() >= 4 && head[0..4] == [0xCA, 0xFE, 0xBA, 0xBE] {
        return "Java class data, compiled bytecode".to_string();
    }

    const MACHO_MAGICS: [[u8; 4]; 4] = [
        [0xFE, 0xED, 0xFA, 0xCE],
        [0xFE, 0xED, 0xFA, 0xCF],
        [0xCE, 0xFA, 0xED, 0xFE],
        [0xCF, 0xFA, 0xED, 0xFE],
    ];
    if head.len() >= 4 && MACHO_MAGICS.contains(&[head[0], head[1], head[2], head[3]]) {
        return "Mach-O universal binary executable".to_string();
    }

    "data".to_string()
}

fn read_prefix(path: &Path, buf: &mut [u8]) -> usize {
    match File::open(path) {
        Ok(mut f) => f.read(buf).unwrap_or(0),
        Err(_) => 0,
    }
}

/// Best-effort recursive delete. Logs per-entry failures but never aborts;
/// the caller has no recourse for a temp directory it can't fully clean up
/// beyond reporting it.
pub fn rm_tree(path: &Path) {
    if !path.exists() {
        return;
    }

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.filter_map(|e| e.ok()) {
            let p = entry.path();
            let is_dir = entry
                .file_type()
                .map(|t| t.is_dir() && !t.is_symlink())
                .unwrap_or(false);
            if is_dir {
                rm_tree(&p);
            } else if let Err(e) = std::fs::remove_file(&p) {
                log::warn!("rm_tree: failed to remove {p:?}: {e}");
            }
        }
    }

    if let Err(e) = std::fs::remove_dir(path) {
        log::warn!("rm_tree: failed to remove directory {path:?}: {e}");
    }
}

/// True if `path`'s file type should never be treated as a regular stream
/// (device nodes, sockets, FIFOs) - used by the rootfs archiver to decide
/// when a tree entry must be skipped instead of streamed into the tarball.
pub fn is_special_file(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| {
            let ft = m.file_type();
            ft.is_fifo() || ft.is_socket() || ft.is_block_device() || ft.is_char_device()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn copy_range_rejects_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        fs::write(&src, b"hello world").unwrap();
        let dst = dir.path().join("dst.bin");

        let err = copy_range(&src, 5, 100, &dst).unwrap_err();
        assert!(matches!(err, Fw2tarError::CarveOutOfRange { .. }));
    }

    #[test]
    fn copy_range_extracts_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        fs::write(&src, b"hello world").unwrap();
        let dst = dir.path().join("dst.bin");

        copy_range(&src, 6, 5, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"world");
    }

    #[test]
    fn copy_range_zero_size_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        fs::write(&src, b"hello").unwrap();
        let dst = dir.path().join("dst.bin");

        copy_range(&src, 0, 0, &dst).unwrap();
        assert!(!dst.exists());
    }

    #[test]
    fn md5_of_regular_file_hashes_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        fs::write(&path, b"abc").unwrap();

        let digest = md5_of(&path).unwrap();
        assert_eq!(digest, format!("{:x}", md5::compute(b"abc")));
    }

    #[test]
    fn md5_of_symlink_hashes_path() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.bin");
        fs::write(&target, b"abc").unwrap();
        let link = dir.path().join("link.bin");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let digest = md5_of(&link).unwrap();
        let expected = format!("{:x}", md5::compute(link.to_string_lossy().as_bytes()));
        assert_eq!(digest, expected);
    }

    #[test]
    fn find_rootfs_collapses_single_child_chains() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a/b/c");
        fs::create_dir_all(&root).unwrap();
        for name in UNIX_DIRS.iter().take(UNIX_THRESHOLD) {
            fs::create_dir(root.join(name)).unwrap();
        }

        let (found, path) = find_rootfs(dir.path(), true);
        assert!(found);
        assert_eq!(path, root);
    }

    #[test]
    fn find_rootfs_requires_threshold() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        fs::create_dir(dir.path().join("etc")).unwrap();

        let (found, _) = find_rootfs(dir.path(), true);
        assert!(!found);
    }

    #[test]
    fn find_rootfs_recurses_one_level_for_siblings() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("decoy")).unwrap();
        let inner = dir.path().join("fs_1");
        fs::create_dir(&inner).unwrap();
        for name in UNIX_DIRS.iter().take(UNIX_THRESHOLD) {
            fs::create_dir(inner.join(name)).unwrap();
        }

        let (found, path) = find_rootfs(dir.path(), true);
        assert!(found);
        assert_eq!(path, inner);
    }

    #[test]
    fn description_detects_elf_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog");
        let mut bytes = vec![0x7f, b'E', b'L', b'F'];
        bytes.extend_from_slice(&[0u8; 12]);
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 100]);
        fs::write(&path, &bytes).unwrap();

        assert_eq!(magic_type(&path, false), "ELF executable");
    }

    #[test]
    fn rm_tree_removes_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("file.txt"), b"x").unwrap();

        let victim = dir.path().join("a");
        rm_tree(&victim);
        assert!(!victim.exists());
    }
}
