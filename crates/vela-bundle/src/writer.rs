//! Bundle construction.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use crate::format::{write_index, Footer, Index};
use crate::path::normalize_path;

/// Builds a bundle container from an in-memory file set.
///
/// Paths are normalized on insertion and stored in sorted order, so the
/// produced container is deterministic for a given file set.
#[derive(Debug, Default)]
pub struct BundleWriter {
    files: BTreeMap<String, Vec<u8>>,
    entry_path: Option<String>,
}

impl BundleWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file. A later insertion under the same normalized path
    /// replaces the earlier one.
    pub fn add_file(&mut self, path: &str, data: impl Into<Vec<u8>>) {
        self.files.insert(normalize_path(path), data.into());
    }

    /// Mark a previously added file as the application entry script.
    pub fn set_entry(&mut self, path: &str) {
        self.entry_path = Some(normalize_path(path));
    }

    /// Number of files added so far.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no files have been added.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write the container (data region, index region, footer) to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<u64> {
        let mut index = Index {
            entry_path: self.entry_path.clone().unwrap_or_default(),
            entries: Vec::with_capacity(self.files.len()),
        };

        // Data region: concatenated payloads, offsets relative to its start.
        let mut data_len = 0u64;
        for (path, data) in &self.files {
            index
                .entries
                .push((path.clone(), data_len, data.len() as u64));
            data_len += data.len() as u64;
        }

        for data in self.files.values() {
            writer.write_all(data)?;
        }

        let mut index_bytes = Vec::new();
        let index_len = write_index(&mut index_bytes, &index)?;
        writer.write_all(&index_bytes)?;

        let footer = Footer::new(index_len);
        writer.write_all(&footer.to_bytes())?;

        Ok(data_len + index_len + footer.to_bytes().len() as u64)
    }

    /// Serialize the container into a byte vector.
    pub fn build(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        // Writing to a Vec cannot fail.
        self.write_to(&mut buffer).expect("in-memory write");
        buffer
    }

    /// Append the container to an existing file (typically an executable),
    /// producing a self-extracting bundle.
    pub fn append_to(&self, path: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(path)?;
        self.write_to(&mut file)?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_from_bytes;

    #[test]
    fn test_build_and_load() {
        let mut writer = BundleWriter::new();
        writer.add_file("main.js", b"console.log(1)".to_vec());
        writer.add_file("assets/tex.png", vec![0x89, 0x50, 0x4E, 0x47]);
        writer.set_entry("main.js");

        let bundle = load_from_bytes(&writer.build()).unwrap();
        assert_eq!(bundle.entry_point(), Some("main.js"));
        assert_eq!(bundle.find_file("main.js").unwrap(), b"console.log(1)");
        assert_eq!(
            bundle.find_file("assets/tex.png").unwrap(),
            &[0x89, 0x50, 0x4E, 0x47]
        );
    }

    #[test]
    fn test_duplicate_path_last_wins() {
        let mut writer = BundleWriter::new();
        writer.add_file("a.txt", b"first".to_vec());
        writer.add_file("./a.txt", b"second".to_vec());
        assert_eq!(writer.len(), 1);

        let bundle = load_from_bytes(&writer.build()).unwrap();
        assert_eq!(bundle.find_file("a.txt").unwrap(), b"second");
    }

    #[test]
    fn test_empty_bundle_roundtrip() {
        let writer = BundleWriter::new();
        let bundle = load_from_bytes(&writer.build()).unwrap();
        assert!(bundle.is_empty());
        assert_eq!(bundle.entry_point(), None);
    }

    #[test]
    fn test_append_to_executable_prefix() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"#!ELF fake executable prefix").unwrap();

        let mut writer = BundleWriter::new();
        writer.add_file("config.json", b"{}".to_vec());
        writer.append_to(temp.path()).unwrap();

        let bundle = crate::loader::load_from_path(temp.path()).unwrap();
        assert_eq!(bundle.find_file("config.json").unwrap(), b"{}");
    }
}
