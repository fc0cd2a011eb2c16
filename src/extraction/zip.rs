use crate::error::{Error, Result};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::result::ZipError;

use super::shared::{
    LinkTracker, UnpackContext, apply_mode, copy_limited, corrupt, create_output_file,
    ensure_link_inside, open_source, prepare_output_path, resolve_entry_path,
};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Longest symlink target read from a zip entry
const MAX_LINK_TARGET: u64 = 4096;

/// Archive extractor for ZIP files
pub struct ZipExtractor;

impl ZipExtractor {
    /// Extract every entry of a ZIP archive into `dest_path`
    ///
    /// All entry names are checked before anything is written, so an archive
    /// carrying a single escaping name leaves no files behind. Returns the
    /// regular files written, in archive order.
    pub fn unpack(
        archive_path: &Path,
        dest_path: &Path,
        ctx: &UnpackContext,
    ) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "extracting ZIP archive");

        let file = open_source(archive_path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| corrupt(archive_path, format!("failed to read ZIP archive: {e}")))?;

        let entries = Self::plan_entries(&mut archive, archive_path)?;

        std::fs::create_dir_all(dest_path)?;

        let mut extracted_files = Vec::new();
        for (index, relative) in entries {
            ctx.check_cancelled()?;

            let file = Self::open_entry(&mut archive, index, archive_path)?;
            let target = dest_path.join(&relative);
            if let Some(path) =
                Self::extract_entry(file, &target, dest_path, archive_path, ctx)?
            {
                extracted_files.push(path);
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "ZIP extraction successful"
        );

        Ok(extracted_files)
    }

    /// Resolve every entry name up front, failing the archive on the first unsafe one
    ///
    /// Symlink entries are read here too, so later entries are located
    /// through the links that earlier ones create.
    fn plan_entries(
        archive: &mut zip::ZipArchive<File>,
        archive_path: &Path,
    ) -> Result<Vec<(usize, PathBuf)>> {
        let mut planned = Vec::with_capacity(archive.len());
        let mut links = LinkTracker::new();
        for index in 0..archive.len() {
            let (name, mode) = {
                let raw = archive
                    .by_index_raw(index)
                    .map_err(|e| corrupt(archive_path, format!("failed to read ZIP entry: {e}")))?;
                (raw.name().to_owned(), raw.unix_mode())
            };
            let Some(relative) = resolve_entry_path(archive_path, Path::new(&name))? else {
                continue;
            };

            if mode.is_some_and(is_symlink_mode) {
                let mut file = Self::open_entry(archive, index, archive_path)?;
                let target = read_link_target(&mut file, archive_path)?;
                links.place_symlink(archive_path, &relative, Path::new(&target))?;
            } else {
                links.place(archive_path, &relative)?;
            }
            planned.push((index, relative));
        }
        links.finish(archive_path)?;
        Ok(planned)
    }

    /// Open an entry by index, separating unsupported features from damage
    fn open_entry<'a>(
        archive: &'a mut zip::ZipArchive<File>,
        index: usize,
        archive_path: &Path,
    ) -> Result<zip::read::ZipFile<'a>> {
        archive.by_index(index).map_err(|e| match e {
            ZipError::UnsupportedArchive(reason) => Error::UnsupportedFormat {
                archive: archive_path.to_path_buf(),
                reason: reason.to_string(),
            },
            ZipError::Io(e) => corrupt(archive_path, format!("failed to read ZIP entry: {e}")),
            other => corrupt(archive_path, format!("failed to read ZIP entry: {other}")),
        })
    }

    fn extract_entry(
        mut file: zip::read::ZipFile,
        target: &Path,
        dest_path: &Path,
        archive_path: &Path,
        ctx: &UnpackContext,
    ) -> Result<Option<PathBuf>> {
        if file.is_dir() {
            prepare_output_path(archive_path, dest_path, target)?;
            std::fs::create_dir_all(target)?;
            return Ok(None);
        }

        let mode = file.unix_mode();
        if mode.is_some_and(is_symlink_mode) {
            Self::extract_symlink(&mut file, target, dest_path, archive_path)?;
            return Ok(None);
        }

        let mut outfile = create_output_file(archive_path, dest_path, target)?;
        let written = copy_limited(&mut file, &mut outfile, ctx, archive_path)?;
        drop(outfile);

        if let Some(mode) = mode {
            apply_mode(target, mode)?;
        }

        debug!(path = ?target, bytes = written, "extracted ZIP entry");
        Ok(Some(target.to_path_buf()))
    }

    /// Recreate a symlink entry whose target stays inside the output directory
    fn extract_symlink(
        file: &mut zip::read::ZipFile,
        target: &Path,
        dest_path: &Path,
        archive_path: &Path,
    ) -> Result<()> {
        let link = read_link_target(file, archive_path)?;

        prepare_output_path(archive_path, dest_path, target)?;
        let base = target.parent().unwrap_or(dest_path);
        ensure_link_inside(archive_path, dest_path, base, Path::new(&link))?;
        if target.exists() {
            std::fs::remove_file(target)?;
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(&link, target)?;

        debug!(path = ?target, %link, "created symlink from ZIP entry");
        Ok(())
    }
}

fn is_symlink_mode(mode: u32) -> bool {
    mode & S_IFMT == S_IFLNK
}

/// A zip symlink stores its target as the entry's content
fn read_link_target(file: &mut zip::read::ZipFile, archive_path: &Path) -> Result<String> {
    let mut link = String::new();
    file.take(MAX_LINK_TARGET)
        .read_to_string(&mut link)
        .map_err(|e| corrupt(archive_path, format!("invalid symlink entry: {e}")))?;
    Ok(link)
}
