//! Embedded application bundle
//!
//! A bundle is a self-contained container of script and asset files that
//! travels alongside — or appended to — a packaged executable:
//!
//! ```text
//! ┌─────────────────────────┐
//! │  executable (unchanged) │  ← absent for standalone .vpk files
//! ├─────────────────────────┤
//! │  Data Region            │  ← concatenated file payloads, byte-exact
//! ├─────────────────────────┤
//! │  Index Region           │  ← entry path + per-file path/offset/length
//! ├─────────────────────────┤
//! │  Footer                 │  ← fixed-size, at very end of file
//! └─────────────────────────┘
//! ```
//!
//! The loader works backwards from the footer, so a bundle is detected by
//! reading the tail of a file; anything malformed is treated as "no
//! bundle" and the host falls through to the real filesystem.

mod format;
mod loader;
mod path;
mod vfs;
mod writer;

pub use format::{Footer, FOOTER_MAGIC, FOOTER_SIZE, FORMAT_VERSION};
pub use loader::{discover, load_from_bytes, load_from_path, Bundle, BundleEntry, BUNDLE_ENV_VAR};
pub use path::normalize_path;
pub use vfs::Vfs;
pub use writer::BundleWriter;

/// File extension used for standalone and sidecar bundle files.
pub const BUNDLE_EXTENSION: &str = "vpk";
