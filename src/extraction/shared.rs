use crate::error::{Error, Result};
use std::cell::Cell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Copy buffer size; also the granularity of budget and cancellation checks
const COPY_CHUNK: usize = 64 * 1024;

/// Suffixes that name a tar wrapped in a compression layer. Stripped as a
/// whole so `a.tar.gz` extracts to `a_extracted`, not `a.tar_extracted`.
const COMPOUND_SUFFIXES: [&str; 7] = [
    ".tar.gz", ".tar.bz2", ".tar.xz", ".tgz", ".tbz2", ".tbz", ".txz",
];

/// Per-run state shared by every extractor: byte budget and cancellation
///
/// One context lives for a whole recursive run, so the budget is cumulative
/// across every nested archive.
#[derive(Debug)]
pub struct UnpackContext {
    limit: Option<u64>,
    written: Cell<u64>,
    cancel_token: CancellationToken,
}

impl UnpackContext {
    /// Create a context with an optional byte budget
    pub fn new(limit: Option<u64>, cancel_token: CancellationToken) -> Self {
        Self {
            limit,
            written: Cell::new(0),
            cancel_token,
        }
    }

    /// Context with no budget and a token nobody cancels
    pub fn unlimited() -> Self {
        Self::new(None, CancellationToken::new())
    }

    /// Total bytes charged so far
    pub fn bytes_written(&self) -> u64 {
        self.written.get()
    }

    /// Fail with [`Error::Cancelled`] once the run's token has been cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Account for `bytes` about to be written on behalf of `archive`
    ///
    /// Nothing is charged when the budget would be exceeded.
    pub fn charge(&self, archive: &Path, bytes: u64) -> Result<()> {
        let total = self.written.get().saturating_add(bytes);
        if let Some(limit) = self.limit
            && total > limit
        {
            return Err(Error::BudgetExceeded {
                archive: archive.to_path_buf(),
                limit,
            });
        }
        self.written.set(total);
        Ok(())
    }
}

/// Output directory for an archive: `<dirname>/<stem><suffix>`
pub fn output_dir_for(source: &Path, suffix: &str) -> PathBuf {
    let parent = source.parent().unwrap_or_else(|| Path::new(""));
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    parent.join(format!("{}{}", archive_stem(&name), suffix))
}

fn archive_stem(name: &str) -> &str {
    let lower = name.to_ascii_lowercase();
    for suffix in COMPOUND_SUFFIXES {
        if lower.len() > suffix.len() && lower.ends_with(suffix) {
            return &name[..name.len() - suffix.len()];
        }
    }

    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

/// Open an archive for reading, mapping failure to [`Error::UnreadableFile`]
pub(crate) fn open_source(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| Error::UnreadableFile {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn corrupt(archive: &Path, reason: impl Into<String>) -> Error {
    Error::CorruptArchive {
        archive: archive.to_path_buf(),
        reason: reason.into(),
    }
}

fn traversal(archive: &Path, entry: &Path) -> Error {
    Error::PathTraversal {
        archive: archive.to_path_buf(),
        entry: entry.to_string_lossy().into_owned(),
    }
}

/// Normalize `entry` relative to `base`, refusing anything that leaves it
///
/// `base` is itself a normalized relative path. Returns `None` when the entry
/// is absolute, carries a drive prefix, or climbs above the root with `..`.
fn normalize_within(base: &Path, entry: &Path) -> Option<PathBuf> {
    let mut normalized = base.to_path_buf();
    for component in entry.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(normalized)
}

/// Turn an archive entry name into a path relative to the output directory
///
/// Returns `Ok(None)` for names that normalize to nothing (such as `./`);
/// callers skip those. Absolute names and names whose `..` segments climb
/// out of the output directory fail with [`Error::PathTraversal`].
pub fn resolve_entry_path(archive: &Path, entry: &Path) -> Result<Option<PathBuf>> {
    let relative = normalize_within(Path::new(""), entry).ok_or_else(|| traversal(archive, entry))?;
    if relative.as_os_str().is_empty() {
        trace!(?archive, ?entry, "skipping entry with empty path");
        return Ok(None);
    }
    Ok(Some(relative))
}

/// Upper bound on symlink expansions while resolving one path
const MAX_LINK_EXPANSIONS: usize = 40;

/// Model of the symlinks an archive creates, replayed before anything is
/// written
///
/// Entry locations and link targets are resolved through every link
/// recorded so far, so a chain such as `a -> .` followed by `a/b -> ..` is
/// seen for what it is on disk. Paths are relative to the output directory.
#[derive(Debug, Default)]
pub(crate) struct LinkTracker {
    /// Resolved link location -> raw target as stored in the archive
    links: HashMap<PathBuf, PathBuf>,
}

impl LinkTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Where an entry named `relative` lands once earlier links are followed
    ///
    /// The final component is not followed: the entry replaces whatever
    /// sits there.
    pub(crate) fn locate(&self, archive: &Path, relative: &Path) -> Result<PathBuf> {
        let parent = relative.parent().unwrap_or_else(|| Path::new(""));
        let mut budget = MAX_LINK_EXPANSIONS;
        let mut location = self
            .resolve(parent, &mut budget)
            .ok_or_else(|| traversal(archive, relative))?;
        if let Some(name) = relative.file_name() {
            location.push(name);
        }
        Ok(location)
    }

    /// Record a file, directory or hard link at `relative`
    pub(crate) fn place(&mut self, archive: &Path, relative: &Path) -> Result<()> {
        let location = self.locate(archive, relative)?;
        self.links.remove(&location);
        Ok(())
    }

    /// Record a symlink at `relative`, rejecting targets that leave the root
    pub(crate) fn place_symlink(
        &mut self,
        archive: &Path,
        relative: &Path,
        target: &Path,
    ) -> Result<()> {
        let location = self.locate(archive, relative)?;
        self.links.remove(&location);

        let base = location.parent().unwrap_or_else(|| Path::new(""));
        let mut budget = MAX_LINK_EXPANSIONS;
        if self.resolve(&base.join(target), &mut budget).is_none() {
            return Err(traversal(archive, target));
        }

        self.links.insert(location, target.to_path_buf());
        Ok(())
    }

    /// Check a hard link target, which is named relative to the root
    pub(crate) fn check_hard_link(&self, archive: &Path, target: &Path) -> Result<()> {
        let mut budget = MAX_LINK_EXPANSIONS;
        match self.resolve(target, &mut budget) {
            Some(_) => Ok(()),
            None => Err(traversal(archive, target)),
        }
    }

    /// Re-check every link against the final set of links
    ///
    /// A later link can change what an earlier target walks through.
    pub(crate) fn finish(&self, archive: &Path) -> Result<()> {
        for (location, target) in &self.links {
            let base = location.parent().unwrap_or_else(|| Path::new(""));
            let mut budget = MAX_LINK_EXPANSIONS;
            if self.resolve(&base.join(target), &mut budget).is_none() {
                return Err(traversal(archive, target));
            }
        }
        Ok(())
    }

    /// Resolve `path` through recorded links; `None` when it leaves the root,
    /// is absolute, or expands too many links
    fn resolve(&self, path: &Path, budget: &mut usize) -> Option<PathBuf> {
        let mut resolved = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    if let Some(target) = self.links.get(&resolved) {
                        *budget = budget.checked_sub(1)?;
                        let base = resolved.parent().unwrap_or_else(|| Path::new("")).join(target);
                        resolved = self.resolve(&base, budget)?;
                    }
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() {
                        return None;
                    }
                }
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }
}

/// Fail unless `dir`, with symlinks resolved on disk, lies inside `dest`
fn ensure_dir_inside(archive: &Path, dest: &Path, dir: &Path, entry: &Path) -> Result<()> {
    let root = dest.canonicalize()?;
    if !dir.canonicalize()?.starts_with(&root) {
        return Err(traversal(archive, entry));
    }
    Ok(())
}

/// Confirm that `path`'s parent, after resolving symlinks on disk, is still
/// inside `dest`
///
/// Lexical checks cannot see a symlink planted by an earlier entry; this
/// catches writes routed through one.
pub(crate) fn ensure_inside(archive: &Path, dest: &Path, path: &Path) -> Result<()> {
    ensure_dir_inside(archive, dest, path.parent().unwrap_or(dest), path)
}

/// Check a link about to be created on disk
///
/// `target` is walked from `base` (the link's directory for symlinks, `dest`
/// for hard links), following whatever already exists on disk. Every step
/// must stay inside `dest`.
pub(crate) fn ensure_link_inside(
    archive: &Path,
    dest: &Path,
    base: &Path,
    target: &Path,
) -> Result<()> {
    let root = dest.canonicalize()?;
    let mut resolved = base.canonicalize()?;
    // Once a component is missing, the rest cannot be followed on disk
    let mut on_disk = true;

    for component in target.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                if on_disk {
                    match resolved.canonicalize() {
                        Ok(real) => resolved = real,
                        Err(_) => on_disk = false,
                    }
                }
            }
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::RootDir | Component::Prefix(_) => return Err(traversal(archive, target)),
        }

        if !resolved.starts_with(&root) {
            return Err(traversal(archive, target));
        }
    }
    Ok(())
}

/// Create parent directories, check containment, and clear any symlink
/// sitting where the output file goes
///
/// The deepest existing ancestor is checked before any directory is
/// created, so a planted symlink cannot route `create_dir_all` outside.
pub(crate) fn prepare_output_path(archive: &Path, dest: &Path, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if let Some(existing) = parent.ancestors().find(|dir| dir.exists()) {
            ensure_dir_inside(archive, dest, existing, path)?;
        }
        std::fs::create_dir_all(parent)?;
    }
    ensure_inside(archive, dest, path)?;

    if let Ok(meta) = std::fs::symlink_metadata(path)
        && meta.file_type().is_symlink()
    {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Create an output file for an entry, see [`prepare_output_path`]
pub(crate) fn create_output_file(archive: &Path, dest: &Path, path: &Path) -> Result<File> {
    prepare_output_path(archive, dest, path)?;
    Ok(File::create(path)?)
}

/// Stream `reader` into `writer`, charging every chunk to the run budget
///
/// Read failures come from the decoder and are reported as a corrupt archive;
/// write failures are plain I/O errors.
pub(crate) fn copy_limited<R, W>(
    reader: &mut R,
    writer: &mut W,
    ctx: &UnpackContext,
    archive: &Path,
) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut copied = 0u64;

    loop {
        ctx.check_cancelled()?;

        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(corrupt(archive, format!("failed to decode entry: {e}"))),
        };

        ctx.charge(archive, n as u64)?;
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }

    writer.flush()?;
    Ok(copied)
}

/// Restore unix permission bits recorded in the archive
#[cfg(unix)]
pub(crate) fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o777))?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn apply_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
