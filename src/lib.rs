//! # unarchive
//!
//! Content-sniffing recursive archive extractor.
//!
//! Point it at a file and it decides from the bytes alone whether the file is
//! a ZIP, tar (plain or gzip/bzip2/xz compressed), gzip or RAR archive. The
//! archive is unpacked next to itself into `<stem>_extracted`, and every
//! archive found inside is unpacked the same way, up to a fixed nesting depth.
//!
//! ## Guarantees
//!
//! - **Contained writes** - no entry of any format can write outside its
//!   archive's output directory
//! - **Bounded recursion** - nesting stops at `max_depth` (default 32) and
//!   archives that contain themselves are detected
//! - **Failure isolation** - a broken nested archive is reported and its
//!   siblings are still extracted
//! - **Event-driven** - consumers subscribe to progress events, no polling
//!
//! ## Quick Start
//!
//! ```no_run
//! use unarchive::{ExtractionConfig, Extractor};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let extractor = Extractor::new(ExtractionConfig::default())?;
//!
//!     // Subscribe to events
//!     let mut events = extractor.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = extractor.extract_async("download.tar.gz").await?;
//!     println!("{} archives extracted", report.extracted.len());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Archive detection and extraction
pub mod extraction;
/// Core types: archive kinds, jobs, events and reports
pub mod types;

// Re-export commonly used types
pub use config::{ExtractionConfig, RarBackendKind, RarConfig};
pub use error::{Error, ErrorSummary, Result};
pub use extraction::{Extractor, RarBackend, RarCapabilities, classify};
pub use types::{
    ArchiveKind, Compression, Event, ExtractedArchive, ExtractionJob, ExtractionReport,
    FailedArchive, FailureSummary, ReportSummary,
};

use std::path::Path;

/// Recursively extract `path` with the default configuration
///
/// Shorthand for `Extractor::new(ExtractionConfig::default())?.extract(path)`.
pub fn extract(path: &Path) -> Result<ExtractionReport> {
    Extractor::new(ExtractionConfig::default())?.extract(path)
}

/// Run an extraction on the blocking pool and cancel it on a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// On a signal the extractor is cancelled and the run ends with
/// `Error::Cancelled` at the next entry or copy chunk.
///
/// # Example
///
/// ```no_run
/// use unarchive::{ExtractionConfig, Extractor, extract_until_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let extractor = Extractor::new(ExtractionConfig::default())?;
///     let report = extract_until_signal(&extractor, "backup.zip").await?;
///     println!("complete: {}", report.is_complete());
///     Ok(())
/// }
/// ```
pub async fn extract_until_signal(
    extractor: &Extractor,
    path: impl Into<std::path::PathBuf>,
) -> Result<ExtractionReport> {
    let run = extractor.extract_async(path);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = wait_for_signal() => {
            extractor.cancel();
            run.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for Ctrl+C only");
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received SIGINT signal (Ctrl+C)");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM signal");
        }
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C, waiting for SIGTERM only");
                sigterm.recv().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
