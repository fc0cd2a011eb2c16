use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::types::{
    ArchiveKind, Event, ExtractedArchive, ExtractionJob, ExtractionReport, FailedArchive,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::gzip::GzipExtractor;
use super::rar::{RarBackend, rar_backend_from_config};
use super::shared::{UnpackContext, open_source};
use super::sniff::classify;
use super::tar::TarExtractor;
use super::zip::ZipExtractor;

/// Event channel capacity; slow subscribers lag rather than block extraction
const EVENT_CHANNEL_CAPACITY: usize = 1024;

type ContentDigest = [u8; 32];

/// An archive on the current extraction path, used to spot self-containing archives
struct Ancestor {
    digest: ContentDigest,
    path: PathBuf,
}

/// Mutable state of one `extract` call
struct Run {
    ctx: UnpackContext,
    report: ExtractionReport,
    /// Archives already handled in this run
    visited: HashSet<PathBuf>,
}

/// Recursive archive extractor
///
/// Classifies a file by content, unpacks it next to itself into
/// `<stem>_extracted`, then does the same for every archive found in the
/// output, depth first, up to `max_depth` levels below the root.
///
/// Cloning is cheap; clones share the configuration, RAR backend, event
/// channel and cancellation token.
///
/// # Examples
///
/// ```no_run
/// use unarchive::{ExtractionConfig, Extractor};
/// use std::path::Path;
///
/// # fn main() -> unarchive::Result<()> {
/// let extractor = Extractor::new(ExtractionConfig::default())?;
/// let report = extractor.extract(Path::new("photos.zip"))?;
/// for archive in &report.extracted {
///     println!("Extracted {} file to {}", archive.kind, archive.output_dir.display());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Extractor {
    config: Arc<ExtractionConfig>,
    rar: Arc<dyn RarBackend>,
    event_tx: broadcast::Sender<Event>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("config", &self.config)
            .field("rar_backend", &self.rar.name())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

impl Extractor {
    /// Create an extractor, validating `config` and selecting its RAR backend
    pub fn new(config: ExtractionConfig) -> Result<Self> {
        config.validate()?;
        let rar = rar_backend_from_config(&config.rar);
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            rar,
            event_tx,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Replace the RAR backend chosen from the configuration
    pub fn with_rar_backend(mut self, rar: Arc<dyn RarBackend>) -> Self {
        info!(rar_backend = rar.name(), "RAR backend replaced");
        self.rar = rar;
        self
    }

    /// Subscribe to extraction events
    ///
    /// Events are only delivered to receivers that exist when they are sent,
    /// so subscribe before calling [`extract`](Self::extract).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// The RAR backend in use
    pub fn rar_backend(&self) -> &Arc<dyn RarBackend> {
        &self.rar
    }

    /// Token that stops running and future extractions when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Cancel extraction
    ///
    /// A run in progress stops at the next entry or copy chunk and returns
    /// `Error::Cancelled`. Cancellation is permanent for this extractor and
    /// its clones.
    pub fn cancel(&self) {
        info!("extraction cancelled");
        self.cancel_token.cancel();
    }

    /// Recursively extract `path`
    ///
    /// - A file that cannot be opened fails with `Error::UnreadableFile`.
    /// - A file that is not an archive yields an empty report and writes
    ///   nothing.
    /// - A failure decoding the root archive is returned as the error.
    /// - Failures of nested archives are collected in
    ///   [`ExtractionReport::failures`]; their siblings are still extracted.
    /// - Cancellation and an exhausted byte budget stop the whole run.
    pub fn extract(&self, path: &Path) -> Result<ExtractionReport> {
        drop(open_source(path)?);

        let Some(kind) = classify(path) else {
            info!(?path, "not an archive, nothing to extract");
            return Ok(ExtractionReport::default());
        };

        let mut run = Run {
            ctx: UnpackContext::new(self.config.max_total_bytes, self.cancel_token.clone()),
            report: ExtractionReport::default(),
            visited: HashSet::from([path.to_path_buf()]),
        };

        let job = ExtractionJob::new(path, kind, 0, &self.config.output_suffix);
        let result = digest_file(path).and_then(|digest| {
            let mut lineage = vec![Ancestor {
                digest,
                path: path.to_path_buf(),
            }];
            self.run_job(&mut run, &job, &mut lineage)
        });

        if let Err(e) = result {
            warn!(?path, error = %e, "extraction failed");
            self.emit(Event::ExtractionFailed {
                path: path.to_path_buf(),
                depth: 0,
                error: (&e).into(),
            });
            return Err(e);
        }

        run.report.bytes_written = run.ctx.bytes_written();
        info!(
            ?path,
            archives = run.report.extracted.len(),
            failures = run.report.failures.len(),
            bytes_written = run.report.bytes_written,
            "extraction finished"
        );
        Ok(run.report)
    }

    /// Run [`extract`](Self::extract) on tokio's blocking thread pool
    pub async fn extract_async(&self, path: impl Into<PathBuf>) -> Result<ExtractionReport> {
        let extractor = self.clone();
        let path = path.into();
        tokio::task::spawn_blocking(move || extractor.extract(&path))
            .await
            .map_err(|e| Error::Other(format!("extraction task failed: {e}")))?
    }

    /// Decode one archive, then recurse into whatever it produced
    ///
    /// Only this job's own decode failure (and run-wide aborts from below)
    /// come back as `Err`; nested failures are recorded in the report.
    fn run_job(
        &self,
        run: &mut Run,
        job: &ExtractionJob,
        lineage: &mut Vec<Ancestor>,
    ) -> Result<()> {
        run.ctx.check_cancelled()?;

        debug!(
            source = ?job.source,
            kind = %job.kind,
            depth = job.depth,
            max_depth = self.config.max_depth,
            "extracting archive (depth {}/{})",
            job.depth,
            self.config.max_depth
        );
        self.emit(Event::ExtractionStarted {
            path: job.source.clone(),
            kind: job.kind,
            output_dir: job.output_dir.clone(),
            depth: job.depth,
        });

        let files = self.decode(job, &run.ctx)?;

        info!(
            source = ?job.source,
            output_dir = ?job.output_dir,
            extracted_count = files.len(),
            "extracted {} files from {} archive at depth {}",
            files.len(),
            job.kind,
            job.depth
        );
        self.emit(Event::Extracted {
            path: job.source.clone(),
            kind: job.kind,
            output_dir: job.output_dir.clone(),
            depth: job.depth,
            file_count: files.len(),
        });
        run.report.extracted.push(ExtractedArchive {
            source: job.source.clone(),
            output_dir: job.output_dir.clone(),
            kind: job.kind,
            depth: job.depth,
            files,
        });

        let depth = job.depth + 1;
        for (source, kind) in self.discover_nested(&job.output_dir) {
            run.ctx.check_cancelled()?;

            if !run.visited.insert(source.clone()) {
                debug!(?source, "archive already handled in this run");
                continue;
            }

            info!(?source, %kind, depth, "found nested archive");
            self.emit(Event::NestedArchiveFound {
                path: source.clone(),
                kind,
                depth,
            });

            if depth > self.config.max_depth {
                let error = Error::NestingTooDeep {
                    archive: source.clone(),
                    depth,
                    max_depth: self.config.max_depth,
                };
                self.record_failure(run, source, kind, depth, error);
                continue;
            }

            let digest = match digest_file(&source) {
                Ok(digest) => digest,
                Err(e) => {
                    self.record_failure(run, source, kind, depth, e);
                    continue;
                }
            };
            if let Some(ancestor) = lineage.iter().find(|a| a.digest == digest) {
                let error = Error::RecursiveArchive {
                    archive: source.clone(),
                    ancestor: ancestor.path.clone(),
                };
                self.record_failure(run, source, kind, depth, error);
                continue;
            }

            let child = ExtractionJob::new(&source, kind, depth, &self.config.output_suffix);
            lineage.push(Ancestor {
                digest,
                path: source.clone(),
            });
            let result = self.run_job(run, &child, lineage);
            lineage.pop();

            match result {
                Ok(()) => {}
                Err(e) if e.aborts_run() => return Err(e),
                Err(e) => self.record_failure(run, source, kind, depth, e),
            }
        }

        Ok(())
    }

    /// Route a job to the decoder for its kind
    fn decode(&self, job: &ExtractionJob, ctx: &UnpackContext) -> Result<Vec<PathBuf>> {
        match job.kind {
            ArchiveKind::Zip => ZipExtractor::unpack(&job.source, &job.output_dir, ctx),
            ArchiveKind::Tar => TarExtractor::unpack(&job.source, &job.output_dir, ctx),
            ArchiveKind::Gzip => GzipExtractor::unpack(&job.source, &job.output_dir, ctx),
            ArchiveKind::Rar => self.rar.unpack(&job.source, &job.output_dir, ctx),
        }
    }

    /// Snapshot the regular files under `output_dir` and keep the archives
    ///
    /// The snapshot is taken before any of them is extracted, so output
    /// directories created while recursing are never walked here.
    fn discover_nested(&self, output_dir: &Path) -> Vec<(PathBuf, ArchiveKind)> {
        let snapshot: Vec<PathBuf> = walkdir::WalkDir::new(output_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(?output_dir, error = %e, "skipping unreadable path in extracted tree");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect();

        debug!(?output_dir, file_count = snapshot.len(), "scanning extracted files");

        snapshot
            .into_iter()
            .filter_map(|path| classify(&path).map(|kind| (path, kind)))
            .collect()
    }

    fn record_failure(
        &self,
        run: &mut Run,
        source: PathBuf,
        kind: ArchiveKind,
        depth: u32,
        error: Error,
    ) {
        warn!(
            ?source,
            %kind,
            depth,
            error = %error,
            "failed to extract nested archive, continuing with other files"
        );
        self.emit(Event::ExtractionFailed {
            path: source.clone(),
            depth,
            error: (&error).into(),
        });
        run.report.failures.push(FailedArchive {
            source,
            kind,
            depth,
            error,
        });
    }

    fn emit(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}

/// SHA-256 of a file's content
fn digest_file(path: &Path) -> Result<ContentDigest> {
    let mut file = open_source(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|source| Error::UnreadableFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(hasher.finalize().into())
}
