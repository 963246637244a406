use std::path::{Path, PathBuf};

/// Stream paths are octet strings; on Unix they map onto the filesystem
/// byte-for-byte. Elsewhere we fall back to a lossy decode.
#[cfg(unix)]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

/// Working-tree location of a stream path.
pub fn working_path(root: &Path, file: &[u8]) -> PathBuf {
    root.join(path_from_bytes(file))
}

/// RCS master for a stream path: `<dir>/RCS/<basename>,v`.
pub fn master_path(root: &Path, file: &[u8]) -> PathBuf {
    let (dir, base) = split_dir(file);
    let mut name = base.to_vec();
    name.extend_from_slice(b",v");
    root.join(path_from_bytes(dir))
        .join("RCS")
        .join(path_from_bytes(&name))
}

/// RCS subdirectory holding the master for a stream path.
pub fn rcs_dir(root: &Path, file: &[u8]) -> PathBuf {
    let (dir, _) = split_dir(file);
    root.join(path_from_bytes(dir)).join("RCS")
}

fn split_dir(file: &[u8]) -> (&[u8], &[u8]) {
    match memchr::memrchr(b'/', file) {
        Some(i) => (&file[..i], &file[i + 1..]),
        None => (b"", file),
    }
}

/// Printable form of a stream path for diagnostics, escaping control
/// bytes the way `ascii::escape_default` does.
pub fn display_bytes(path: &[u8]) -> String {
    let mut out = String::with_capacity(path.len());
    for &b in path {
        for c in std::ascii::escape_default(b) {
            out.push(c as char);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_path_nests_rcs_dir() {
        let root = Path::new("/work");
        assert_eq!(
            master_path(root, b"src/main.c"),
            PathBuf::from("/work/src/RCS/main.c,v")
        );
        assert_eq!(
            master_path(root, b"README"),
            PathBuf::from("/work/RCS/README,v")
        );
    }

    #[test]
    fn rcs_dir_for_top_level_file() {
        assert_eq!(rcs_dir(Path::new("/w"), b"README"), PathBuf::from("/w/RCS"));
    }

    #[test]
    fn display_escapes_control_bytes() {
        assert_eq!(display_bytes(b"a\tb"), "a\\tb");
    }
}
