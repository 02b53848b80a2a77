//! Virtual filesystem: bundle-first reads with disk fallthrough.
//!
//! Every file-facing read in the host goes through a [`Vfs`], so a
//! packaged application resolves its script and assets from the embedded
//! bundle while a development run resolves the same paths from disk —
//! with identical spelling in both modes.

use std::io;
use std::path::{Path, PathBuf};

use crate::loader::Bundle;
use crate::path::normalize_path;

/// Unified file access layer.
///
/// Lookups consult the bundle first and fall through to the real
/// filesystem on miss, resolving relative paths against `root`. `Vfs` is
/// `Send + Sync`; background read jobs share it behind an `Arc`.
#[derive(Debug)]
pub struct Vfs {
    bundle: Option<Bundle>,
    root: PathBuf,
}

impl Vfs {
    /// Create a VFS over an optional bundle, with `root` as the disk
    /// fallthrough base for relative paths.
    pub fn new(bundle: Option<Bundle>, root: impl Into<PathBuf>) -> Self {
        Self {
            bundle,
            root: root.into(),
        }
    }

    /// A VFS with no bundle: all reads go to disk.
    pub fn disk_only(root: impl Into<PathBuf>) -> Self {
        Self::new(None, root)
    }

    /// Whether a bundle is mounted.
    pub fn has_bundle(&self) -> bool {
        self.bundle.is_some()
    }

    /// The bundle's entry script, if a bundle with an entry is mounted.
    pub fn entry_point(&self) -> Option<&str> {
        self.bundle.as_ref()?.entry_point()
    }

    /// Read a file: bundle first, disk on miss.
    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        if let Some(bundle) = &self.bundle {
            if let Some(data) = bundle.find_file(path) {
                return Ok(data.to_vec());
            }
        }
        std::fs::read(self.disk_path(path))
    }

    /// Read a file as UTF-8 text.
    pub fn read_text(&self, path: &str) -> io::Result<String> {
        let data = self.read(path)?;
        String::from_utf8(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Whether a path resolves in the bundle or on disk.
    pub fn exists(&self, path: &str) -> bool {
        if let Some(bundle) = &self.bundle {
            if bundle.contains(path) {
                return true;
            }
        }
        self.disk_path(path).is_file()
    }

    /// Whether a path would resolve from disk rather than the bundle.
    /// Watching for changes only makes sense for disk-backed paths.
    pub fn is_disk_backed(&self, path: &str) -> bool {
        match &self.bundle {
            Some(bundle) => !bundle.contains(path) && self.disk_path(path).is_file(),
            None => self.disk_path(path).is_file(),
        }
    }

    /// Resolve a (possibly bundle-spelled) path to its disk location.
    /// Absolute paths pass through untouched; relative ones are
    /// normalized and joined onto the root.
    pub fn disk_path(&self, path: &str) -> PathBuf {
        let raw = Path::new(path);
        if raw.is_absolute() {
            return raw.to_path_buf();
        }
        self.root.join(normalize_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_from_bytes;
    use crate::writer::BundleWriter;

    fn bundle_with(files: &[(&str, &[u8])]) -> Bundle {
        let mut writer = BundleWriter::new();
        for (path, data) in files {
            writer.add_file(path, data.to_vec());
        }
        load_from_bytes(&writer.build()).unwrap()
    }

    #[test]
    fn test_bundle_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"from disk").unwrap();

        let vfs = Vfs::new(Some(bundle_with(&[("a.txt", b"from bundle")])), dir.path());
        assert_eq!(vfs.read("a.txt").unwrap(), b"from bundle");
    }

    #[test]
    fn test_disk_fallthrough_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("only-on-disk.txt"), b"disk bytes").unwrap();

        let vfs = Vfs::new(Some(bundle_with(&[("a.txt", b"x")])), dir.path());
        assert_eq!(vfs.read("only-on-disk.txt").unwrap(), b"disk bytes");
        assert_eq!(vfs.read("./only-on-disk.txt").unwrap(), b"disk bytes");
    }

    #[test]
    fn test_missing_everywhere_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = Vfs::disk_only(dir.path());
        let err = vfs.read("nope.txt").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!vfs.exists("nope.txt"));
    }

    #[test]
    fn test_spelling_invariance_against_bundle() {
        let vfs = Vfs::new(
            Some(bundle_with(&[("assets/tex.png", &[9, 9, 9])])),
            "/nonexistent",
        );
        let a = vfs.read("./assets/tex.png").unwrap();
        let b = vfs.read("assets/tex.png").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_disk_backed_classification() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dev.js"), b"x").unwrap();

        let vfs = Vfs::new(Some(bundle_with(&[("packed.js", b"y")])), dir.path());
        assert!(vfs.is_disk_backed("dev.js"));
        assert!(!vfs.is_disk_backed("packed.js"));
        assert!(!vfs.is_disk_backed("absent.js"));
    }
}
