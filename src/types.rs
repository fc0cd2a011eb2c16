//! Core types for unarchive

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorSummary};

/// Archive kind detected from file content
///
/// A file that is not an archive has no kind; [`crate::extraction::classify`]
/// returns `None` for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    /// ZIP archive
    Zip,
    /// Tar archive, optionally wrapped in gzip, bzip2 or xz
    Tar,
    /// Single gzip-compressed file
    Gzip,
    /// RAR archive (1.5 - 5.x)
    Rar,
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArchiveKind::Zip => "ZIP",
            ArchiveKind::Tar => "TAR",
            ArchiveKind::Gzip => "GZIP",
            ArchiveKind::Rar => "RAR",
        };
        f.write_str(label)
    }
}

/// Compression layer wrapped around a tar stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain tar
    #[default]
    None,
    /// gzip (`1F 8B`)
    Gzip,
    /// bzip2 (`BZh`)
    Bzip2,
    /// xz (`FD 37 7A 58 5A 00`)
    Xz,
}

/// One archive queued for decoding
///
/// Created when the sniffer classifies a file as an archive and consumed once
/// by the matching decoder. The job exclusively owns its output directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionJob {
    /// Archive being decoded
    pub source: PathBuf,
    /// Directory the archive is unpacked into (`<dirname>/<stem><suffix>`)
    pub output_dir: PathBuf,
    /// Kind the sniffer reported for `source`
    pub kind: ArchiveKind,
    /// Nesting depth (the root archive is depth 0)
    pub depth: u32,
}

impl ExtractionJob {
    /// Create a job, deriving the output directory from the source path
    pub fn new(source: &Path, kind: ArchiveKind, depth: u32, suffix: &str) -> Self {
        Self {
            source: source.to_path_buf(),
            output_dir: crate::extraction::output_dir_for(source, suffix),
            kind,
            depth,
        }
    }
}

/// Event emitted while an extraction run progresses
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An archive is about to be decoded
    ExtractionStarted {
        /// Archive path
        path: PathBuf,
        /// Detected kind
        kind: ArchiveKind,
        /// Destination directory
        output_dir: PathBuf,
        /// Nesting depth
        depth: u32,
    },

    /// An archive was fully decoded
    Extracted {
        /// Archive path
        path: PathBuf,
        /// Detected kind
        kind: ArchiveKind,
        /// Destination directory
        output_dir: PathBuf,
        /// Nesting depth
        depth: u32,
        /// Number of files written
        file_count: usize,
    },

    /// A file produced by an extraction is itself an archive
    NestedArchiveFound {
        /// Nested archive path
        path: PathBuf,
        /// Detected kind
        kind: ArchiveKind,
        /// Depth it will be extracted at
        depth: u32,
    },

    /// An archive could not be extracted
    ExtractionFailed {
        /// Archive path
        path: PathBuf,
        /// Nesting depth
        depth: u32,
        /// What went wrong
        error: ErrorSummary,
    },
}

/// An archive that was decoded successfully
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractedArchive {
    /// Archive path
    pub source: PathBuf,
    /// Directory its contents were written to
    pub output_dir: PathBuf,
    /// Detected kind
    pub kind: ArchiveKind,
    /// Nesting depth
    pub depth: u32,
    /// Files written by this archive's decoder (not including nested output)
    pub files: Vec<PathBuf>,
}

/// An archive whose extraction failed
#[derive(Debug)]
pub struct FailedArchive {
    /// Archive path
    pub source: PathBuf,
    /// Detected kind
    pub kind: ArchiveKind,
    /// Nesting depth
    pub depth: u32,
    /// Why it failed
    pub error: Error,
}

/// Outcome of one extraction run
///
/// The root archive's own failure is returned as an `Err` by
/// [`crate::Extractor::extract`]; this report collects everything below it.
#[must_use]
#[derive(Debug, Default)]
pub struct ExtractionReport {
    /// Archives decoded successfully, in the order they completed
    pub extracted: Vec<ExtractedArchive>,
    /// Nested archives that failed
    pub failures: Vec<FailedArchive>,
    /// Bytes written across all archives in the run
    pub bytes_written: u64,
}

impl ExtractionReport {
    /// True when no archive failed
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// True when nothing was extracted (the input was not an archive)
    pub fn is_noop(&self) -> bool {
        self.extracted.is_empty() && self.failures.is_empty()
    }

    /// All files written during the run, across every archive
    pub fn all_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.extracted.iter().flat_map(|a| a.files.iter())
    }
}

/// Serializable view of an [`ExtractionReport`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Archives decoded successfully
    pub extracted: Vec<ExtractedArchive>,
    /// Nested archives that failed
    pub failures: Vec<FailureSummary>,
    /// Bytes written across the run
    pub bytes_written: u64,
    /// Whether every archive succeeded
    pub complete: bool,
}

/// Serializable view of a [`FailedArchive`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Archive path
    pub source: PathBuf,
    /// Detected kind
    pub kind: ArchiveKind,
    /// Nesting depth
    pub depth: u32,
    /// What went wrong
    pub error: ErrorSummary,
}

impl From<&ExtractionReport> for ReportSummary {
    fn from(report: &ExtractionReport) -> Self {
        Self {
            extracted: report.extracted.clone(),
            failures: report
                .failures
                .iter()
                .map(|f| FailureSummary {
                    source: f.source.clone(),
                    kind: f.kind,
                    depth: f.depth,
                    error: ErrorSummary::from(&f.error),
                })
                .collect(),
            bytes_written: report.bytes_written,
            complete: report.is_complete(),
        }
    }
}
