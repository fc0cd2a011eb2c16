//! Trait and types for RAR decoding

use std::path::{Path, PathBuf};

use crate::extraction::UnpackContext;

/// Capabilities of a RAR backend implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RarCapabilities {
    /// Can extract RAR archives at all
    pub can_extract: bool,
    /// Decodes inside this process (entry-level budget and cancellation)
    /// rather than through an external tool
    pub in_process: bool,
}

/// Trait for RAR decoding
///
/// RAR decoding needs either the bundled decompression library or an
/// external `unrar`-compatible binary, so it sits behind this trait and the
/// engine is handed whichever implementation is available.
///
/// Implementations must keep every written file inside `dest`, charge the
/// bytes they write to `ctx`, and report errors with the same kinds as the
/// built-in formats.
///
/// # Examples
///
/// ```
/// use unarchive::extraction::{NoOpRarBackend, RarBackend, UnpackContext};
/// use std::path::Path;
///
/// let backend = NoOpRarBackend;
/// assert!(!backend.capabilities().can_extract);
///
/// let result = backend.unpack(
///     Path::new("movie.rar"),
///     Path::new("movie_extracted"),
///     &UnpackContext::unlimited(),
/// );
/// assert!(result.is_err());
/// ```
pub trait RarBackend: Send + Sync {
    /// Unpack `archive` into `dest`, returning the regular files written
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - An entry name would land outside `dest` (`PathTraversal`)
    /// - The archive is damaged (`CorruptArchive`)
    /// - The archive needs a feature the backend lacks, such as a password
    ///   (`UnsupportedFormat`)
    /// - The external binary fails to run (`ExternalTool`, CLI backend)
    fn unpack(
        &self,
        archive: &Path,
        dest: &Path,
        ctx: &UnpackContext,
    ) -> crate::Result<Vec<PathBuf>>;

    /// Query capabilities of this backend
    fn capabilities(&self) -> RarCapabilities;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
