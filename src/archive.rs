//! Packages a detected rootfs directory into a gzip-compressed tar archive:
//! walk the tree, stream regular files and directories into the archive, and
//! skip device/socket/FIFO nodes rather than failing the whole archive,
//! logging what was dropped.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::write::GzEncoder;
use flate2::Compression;
use walkdir::WalkDir;

use crate::carve::is_special_file;
use crate::error::Fw2tarError;

/// Writes `src_dir`'s contents (root-relative) into a gzip-compressed tar at
/// `dest`. Returns the number of file-system nodes written. Special files
/// (character/block devices, FIFOs, sockets) cannot round-trip through a
/// portable tarball reliably in this context and are skipped; if
/// `removed_devices` is provided, their paths are recorded there instead of
/// only going to the log.
pub fn write_rootfs_archive(
    src_dir: &Path,
    dest: &Path,
    removed_devices: Option<&Mutex<HashSet<PathBuf>>>,
) -> Result<usize, Fw2tarError> {
    let out_file = File::create(dest)?;
    let encoder = GzEncoder::new(out_file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut node_count = 0usize;

    for entry in WalkDir::new(src_dir).follow_links(false).into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("tar_fs: failed to walk entry: {e}");
                continue;
            }
        };

        let path = entry.path();
        if path == src_dir {
            continue;
        }
        let rel = path.strip_prefix(src_dir).unwrap_or(path);

        if is_special_file(path) {
            log::info!("tar_fs: skipping special file {path:?}");
            if let Some(removed) = removed_devices {
                removed.lock().unwrap().insert(path.to_path_buf());
            }
            continue;
        }

        let file_type = entry.file_type();
        let result = if file_type.is_dir() {
            builder.append_dir(rel, path)
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(path);
            match target {
                Ok(target) => builder.append_link(
                    &mut tar::Header::new_gnu(),
                    rel,
                    target.as_path(),
                ),
                Err(e) => {
                    log::warn!("tar_fs: failed to read symlink {path:?}: {e}");
                    continue;
                }
            }
        } else {
            let mut f = match File::open(path) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("tar_fs: failed to open {path:?}: {e}");
                    continue;
                }
            };
            builder.append_file(rel, &mut f)
        };

        match result {
            Ok(()) => node_count += 1,
            Err(e) => log::warn!("tar_fs: failed to append {path:?}: {e}"),
        }
    }

    builder
        .into_inner()
        .map_err(Fw2tarError::Io)?
        .finish()
        .map_err(Fw2tarError::Io)?;

    Ok(node_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn archives_a_simple_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("rootfs");
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("etc/hostname"), b"device\n").unwrap();

        let dest = dir.path().join("out.tar.gz");
        let count = write_rootfs_archive(&root, &dest, None).unwrap();

        assert!(count >= 2);
        assert!(dest.is_file());
        assert!(fs::metadata(&dest).unwrap().len() > 0);
    }
}
