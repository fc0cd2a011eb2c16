//! Content-sniffing recursive archive extraction
//!
//! This module identifies archives by their content and unpacks them, then
//! walks the unpacked tree and does the same for every archive found inside.
//!
//! ## Architecture
//!
//! - [`classify`] probes a file's bytes and reports its [`ArchiveKind`]
//!   (zip, then tar, then gzip, then rar) or `None` for plain files.
//! - One extractor per format ([`ZipExtractor`], [`TarExtractor`],
//!   [`GzipExtractor`]) plus a pluggable [`RarBackend`] for RAR, whose
//!   decoder may or may not be available at runtime.
//! - [`Extractor`] drives the recursion: classify, decode into
//!   `<stem>_extracted`, snapshot the output tree, recurse into nested
//!   archives up to the configured depth.
//!
//! Every extractor routes entry names through the same path guard, so no
//! format can write outside its output directory.
//!
//! [`ArchiveKind`]: crate::types::ArchiveKind

mod compression;
mod engine;
mod gzip;
pub mod rar;
mod shared;
mod sniff;
mod tar;
mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

// Re-exports
pub use compression::{decompress_reader, detect_compression};
pub use engine::Extractor;
pub use gzip::{GzipExtractor, gzip_output_name};
pub use rar::{NoOpRarBackend, RarBackend, RarCapabilities, rar_backend_from_config};
pub use shared::{UnpackContext, output_dir_for, resolve_entry_path};
pub use sniff::{classify, is_tar_header};
pub use tar::TarExtractor;
pub use zip::ZipExtractor;
