//! Stateless partition of binwalk signature names into the six closed
//! families the extraction cascade dispatches on.

/// One of the six disjoint signature families a detected artifact can belong
/// to. `binwalk --include` is always built from exactly one family at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureFamily {
    Header,
    Kernel,
    Rootfs,
    Ubi,
    Compressed,
    Archive,
}

pub const HEADER: &[&str] = &[
    "binhdr",
    "chk",
    "dlob",
    "jboot_arm",
    "jboot_sch2",
    "jboot_stag",
    "luks",
    "packimg",
    "rtk",
    "seama",
    "tplink",
];

pub const KERNEL: &[&str] = &[
    "linux_arm64_boot_image",
    "linux_boot_image",
    "linux_kernel",
    "wind_kernel",
];

pub const ROOTFS: &[&str] = &[
    "cramfs", "ext", "fat", "jffs2", "romfs", "yaffs", "apfs", "squashfs", "btrfs",
];

pub const UBI: &[&str] = &["ubi", "ubifs"];

pub const COMPRESSED: &[&str] = &[
    "zstd", "zlib", "xz", "gzip", "bzip2", "lzop", "lzma", "lzfse", "lz4", "compressd",
];

pub const ARCHIVE: &[&str] = &["zip", "rar", "tarball", "cab", "cpio", "7zip"];

impl SignatureFamily {
    pub fn signatures(self) -> &'static [&'static str] {
        match self {
            SignatureFamily::Header => HEADER,
            SignatureFamily::Kernel => KERNEL,
            SignatureFamily::Rootfs => ROOTFS,
            SignatureFamily::Ubi => UBI,
            SignatureFamily::Compressed => COMPRESSED,
            SignatureFamily::Archive => ARCHIVE,
        }
    }

    /// Union of UBI and ROOTFS, as used by the rootfs cascade stage.
    pub fn ubi_and_rootfs() -> Vec<&'static str> {
        UBI.iter().chain(ROOTFS.iter()).copied().collect()
    }

    pub fn classify(signature: &str) -> Option<SignatureFamily> {
        for family in [
            SignatureFamily::Header,
            SignatureFamily::Kernel,
            SignatureFamily::Rootfs,
            SignatureFamily::Ubi,
            SignatureFamily::Compressed,
            SignatureFamily::Archive,
        ] {
            if family.signatures().contains(&signature) {
                return Some(family);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn families_are_disjoint() {
        let all = [HEADER, KERNEL, ROOTFS, UBI, COMPRESSED, ARCHIVE];
        let mut seen = HashSet::new();
        for family in all {
            for sig in family {
                assert!(seen.insert(*sig), "signature {sig} appears in more than one family");
            }
        }
    }

    #[test]
    fn classify_round_trips() {
        for sig in HEADER {
            assert_eq!(SignatureFamily::classify(sig), Some(SignatureFamily::Header));
        }
        assert_eq!(SignatureFamily::classify("not_a_signature"), None);
    }

    #[test]
    fn ubi_and_rootfs_union_has_expected_len() {
        assert_eq!(SignatureFamily::ubi_and_rootfs().len(), UBI.len() + ROOTFS.len());
    }
}
