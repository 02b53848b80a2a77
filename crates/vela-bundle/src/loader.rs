//! Bundle detection and loading.
//!
//! Works backwards from the end of a file:
//! 1. Read the fixed footer from EOF; verify magic and version
//! 2. Read `index_region_len` bytes immediately before the footer
//! 3. Parse entry records
//! 4. Compute the data region start as `index_region_start − max(offset+length)`
//!
//! The data region therefore need not begin at file offset 0 — an
//! executable prefix of any size is skipped implicitly. Every malformed
//! input is answered with "no bundle" (`None`), never a panic, so callers
//! can always fall through to the real filesystem.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::format::{read_index, Footer, FOOTER_SIZE};
use crate::path::normalize_path;
use crate::BUNDLE_EXTENSION;

/// Environment variable naming an external bundle file, checked first
/// during discovery.
pub const BUNDLE_ENV_VAR: &str = "VELA_BUNDLE";

/// Location of one file's payload inside the data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleEntry {
    /// Byte offset from the start of the data region.
    pub offset: u64,

    /// Payload length in bytes.
    pub length: u64,
}

/// A loaded bundle: the data region plus the path index.
#[derive(Debug, Clone)]
pub struct Bundle {
    entries: HashMap<String, BundleEntry>,
    data: Vec<u8>,
    entry_path: Option<String>,
}

impl Bundle {
    /// Look up a file by path. Lookup is exact-match after normalization;
    /// there is no directory listing.
    pub fn find_file(&self, path: &str) -> Option<&[u8]> {
        let entry = self.entries.get(&normalize_path(path))?;
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        Some(&self.data[start..end])
    }

    /// Whether a file exists under the given path.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(&normalize_path(path))
    }

    /// The application entry script named by the index, if any.
    pub fn entry_point(&self) -> Option<&str> {
        self.entry_path.as_deref()
    }

    /// All stored paths (normalized).
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    /// Number of files in the bundle.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bundle holds no files.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Load a bundle from a file on disk. Returns None if the file cannot be
/// read or carries no valid bundle.
pub fn load_from_path(path: &Path) -> Option<Bundle> {
    let data = fs::read(path).ok()?;
    load_from_bytes(&data)
}

/// Load a bundle from raw bytes (the tail of an executable or a
/// standalone container file).
pub fn load_from_bytes(data: &[u8]) -> Option<Bundle> {
    if data.len() < FOOTER_SIZE {
        return None;
    }

    let footer_start = data.len() - FOOTER_SIZE;
    let footer = Footer::from_bytes(&data[footer_start..])?;

    let index_len = usize::try_from(footer.index_region_len).ok()?;
    let index_start = footer_start.checked_sub(index_len)?;
    let index = read_index(&data[index_start..footer_start])?;

    // The data region ends where the index begins; its start is derived
    // from the furthest extent any entry reaches.
    let mut max_extent = 0u64;
    for (_, offset, length) in &index.entries {
        max_extent = max_extent.max(offset.checked_add(*length)?);
    }
    let region_len = usize::try_from(max_extent).ok()?;
    let data_start = index_start.checked_sub(region_len)?;

    let mut entries = HashMap::with_capacity(index.entries.len());
    for (path, offset, length) in index.entries {
        let normalized = normalize_path(&path);
        if normalized.is_empty() {
            return None;
        }
        entries.insert(normalized, BundleEntry { offset, length });
    }

    let entry_path = Some(normalize_path(&index.entry_path)).filter(|p| !p.is_empty());

    Some(Bundle {
        entries,
        data: data[data_start..index_start].to_vec(),
        entry_path,
    })
}

/// Locate the active bundle for this process.
///
/// Discovery order:
/// (a) the `VELA_BUNDLE` environment variable naming an external file;
/// (b) a same-named `.vpk` sidecar next to the executable;
/// (c) on macOS, a sidecar in the application bundle's `Resources/`;
/// (d) data appended to the executable itself.
pub fn discover() -> Option<Bundle> {
    if let Some(override_path) = env::var_os(BUNDLE_ENV_VAR) {
        let path = PathBuf::from(&override_path);
        match load_from_path(&path) {
            Some(bundle) => {
                log::debug!("bundle: using {} from ${}", path.display(), BUNDLE_ENV_VAR);
                return Some(bundle);
            }
            None => log::warn!(
                "bundle: ${} names {}, which carries no valid bundle",
                BUNDLE_ENV_VAR,
                path.display()
            ),
        }
    }

    let exe = env::current_exe().ok()?;

    let sidecar = exe.with_extension(BUNDLE_EXTENSION);
    if sidecar.is_file() {
        if let Some(bundle) = load_from_path(&sidecar) {
            log::debug!("bundle: using sidecar {}", sidecar.display());
            return Some(bundle);
        }
    }

    #[cfg(target_os = "macos")]
    if let Some(resource) = resources_sidecar(&exe) {
        if resource.is_file() {
            if let Some(bundle) = load_from_path(&resource) {
                log::debug!("bundle: using app resource {}", resource.display());
                return Some(bundle);
            }
        }
    }

    let bundle = load_from_bytes(&fs::read(&exe).ok()?);
    if bundle.is_some() {
        log::debug!("bundle: using data appended to {}", exe.display());
    }
    bundle
}

/// `Foo.app/Contents/MacOS/foo` → `Foo.app/Contents/Resources/foo.vpk`.
#[cfg(target_os = "macos")]
fn resources_sidecar(exe: &Path) -> Option<PathBuf> {
    let stem = exe.file_stem()?;
    let contents = exe.parent()?.parent()?;
    let mut name = stem.to_os_string();
    name.push(".");
    name.push(BUNDLE_EXTENSION);
    Some(contents.join("Resources").join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{write_index, Index};
    use crate::writer::BundleWriter;

    /// Build container bytes from a raw index and a data region, without
    /// the writer's validation, so tests can craft malformed inputs.
    fn raw_container(data_region: &[u8], index: &Index) -> Vec<u8> {
        let mut out = data_region.to_vec();
        let mut index_bytes = Vec::new();
        let index_len = write_index(&mut index_bytes, index).unwrap();
        out.extend_from_slice(&index_bytes);
        out.extend_from_slice(&Footer::new(index_len).to_bytes());
        out
    }

    fn sample() -> Vec<u8> {
        let mut writer = BundleWriter::new();
        writer.add_file("main.js", b"entry();".to_vec());
        writer.add_file("assets/tex.png", vec![1, 2, 3, 4, 5]);
        writer.set_entry("main.js");
        writer.build()
    }

    #[test]
    fn test_lookup_spelling_invariance() {
        let bundle = load_from_bytes(&sample()).unwrap();
        let direct = bundle.find_file("assets/tex.png").unwrap();
        assert_eq!(bundle.find_file("./assets/tex.png").unwrap(), direct);
        assert_eq!(bundle.find_file("file:///assets/tex.png").unwrap(), direct);
        assert_eq!(bundle.find_file("assets\\tex.png").unwrap(), direct);
        assert!(bundle.find_file("assets/missing.png").is_none());
    }

    #[test]
    fn test_exact_match_only() {
        let bundle = load_from_bytes(&sample()).unwrap();
        assert!(bundle.find_file("assets").is_none());
        assert!(bundle.find_file("tex.png").is_none());
    }

    #[test]
    fn test_executable_prefix_skipped() {
        let mut data = b"arbitrary executable bytes".to_vec();
        data.extend_from_slice(&sample());
        let bundle = load_from_bytes(&data).unwrap();
        assert_eq!(bundle.find_file("main.js").unwrap(), b"entry();");
    }

    #[test]
    fn test_truncated_inputs_rejected() {
        let full = sample();
        for len in 0..full.len() {
            assert!(load_from_bytes(&full[..len]).is_none(), "len {}", len);
        }
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut data = sample();
        let magic_at = data.len() - FOOTER_SIZE;
        data[magic_at] ^= 0xFF;
        assert!(load_from_bytes(&data).is_none());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut data = sample();
        let version_at = data.len() - FOOTER_SIZE + 8;
        data[version_at] = 0x7F;
        assert!(load_from_bytes(&data).is_none());
    }

    #[test]
    fn test_out_of_range_offset_rejected() {
        // Entry claims 100 bytes but only 5 precede the index region.
        let index = Index {
            entry_path: String::new(),
            entries: vec![("big.bin".to_string(), 0, 100)],
        };
        let data = raw_container(&[0u8; 5], &index);
        assert!(load_from_bytes(&data).is_none());
    }

    #[test]
    fn test_overflowing_extent_rejected() {
        let index = Index {
            entry_path: String::new(),
            entries: vec![("x".to_string(), u64::MAX - 1, 2)],
        };
        let data = raw_container(&[0u8; 4], &index);
        assert!(load_from_bytes(&data).is_none());
    }

    #[test]
    fn test_empty_normalized_path_rejected() {
        let index = Index {
            entry_path: String::new(),
            entries: vec![("./".to_string(), 0, 1)],
        };
        let data = raw_container(&[0u8; 1], &index);
        assert!(load_from_bytes(&data).is_none());
    }

    #[test]
    fn test_index_len_beyond_file_rejected() {
        let mut out = Vec::new();
        out.extend_from_slice(&Footer::new(1 << 40).to_bytes());
        assert!(load_from_bytes(&out).is_none());
    }

    #[test]
    fn test_env_override_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let bundle_path = dir.path().join("app.vpk");
        let mut writer = BundleWriter::new();
        writer.add_file("main.js", b"from env".to_vec());
        std::fs::write(&bundle_path, writer.build()).unwrap();

        env::set_var(BUNDLE_ENV_VAR, &bundle_path);
        let bundle = discover().expect("override bundle");
        env::remove_var(BUNDLE_ENV_VAR);

        assert_eq!(bundle.find_file("main.js").unwrap(), b"from env");
    }
}
