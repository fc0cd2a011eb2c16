use crate::error::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::EntryType;
use tracing::{debug, info};

use super::compression::{decompress_reader, sniff_compression};
use super::shared::{
    LinkTracker, UnpackContext, apply_mode, copy_limited, corrupt, create_output_file,
    ensure_link_inside, open_source, prepare_output_path, resolve_entry_path,
};

type TarStream = tar::Archive<Box<dyn Read>>;

/// Archive extractor for tar files, plain or wrapped in gzip, bzip2 or xz
pub struct TarExtractor;

impl TarExtractor {
    /// Extract every entry of a tar archive into `dest_path`
    ///
    /// The stream is read twice: once to check every name and link target,
    /// then again to write. Nothing is written when any entry is unsafe.
    /// Returns the regular files (including hard links) written.
    pub fn unpack(
        archive_path: &Path,
        dest_path: &Path,
        ctx: &UnpackContext,
    ) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "extracting tar archive");

        Self::validate_entries(archive_path, ctx)?;

        std::fs::create_dir_all(dest_path)?;

        let mut archive = Self::open(archive_path)?;
        let entries = archive
            .entries()
            .map_err(|e| corrupt(archive_path, format!("failed to read tar archive: {e}")))?;

        let mut extracted_files = Vec::new();
        for entry in entries {
            ctx.check_cancelled()?;

            let entry =
                entry.map_err(|e| corrupt(archive_path, format!("failed to read tar entry: {e}")))?;
            if let Some(path) = Self::extract_entry(entry, dest_path, archive_path, ctx)? {
                extracted_files.push(path);
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "tar extraction successful"
        );

        Ok(extracted_files)
    }

    fn open(archive_path: &Path) -> Result<TarStream> {
        let mut file = open_source(archive_path)?;
        let compression = sniff_compression(&mut file)?;
        debug!(?archive_path, ?compression, "opening tar stream");
        Ok(tar::Archive::new(decompress_reader(file, compression)))
    }

    /// Walk all headers, rejecting escaping names and link targets
    ///
    /// Links are replayed in order so later entries are located through the
    /// symlinks that earlier entries create.
    fn validate_entries(archive_path: &Path, ctx: &UnpackContext) -> Result<()> {
        let mut archive = Self::open(archive_path)?;
        let entries = archive
            .entries()
            .map_err(|e| corrupt(archive_path, format!("failed to read tar archive: {e}")))?;

        let mut links = LinkTracker::new();
        for entry in entries {
            ctx.check_cancelled()?;

            let entry =
                entry.map_err(|e| corrupt(archive_path, format!("failed to read tar entry: {e}")))?;
            let Some(relative) = Self::entry_path(&entry, archive_path)? else {
                continue;
            };

            match entry.header().entry_type() {
                EntryType::Symlink => {
                    let target = Self::link_target(&entry, archive_path)?;
                    links.place_symlink(archive_path, &relative, &target)?;
                }
                EntryType::Link => {
                    let target = Self::link_target(&entry, archive_path)?;
                    links.check_hard_link(archive_path, &target)?;
                    links.place(archive_path, &relative)?;
                }
                EntryType::Directory
                | EntryType::Regular
                | EntryType::Continuous
                | EntryType::GNUSparse => links.place(archive_path, &relative)?,
                // Skipped when extracting, so whatever sits there stays
                _ => {
                    links.locate(archive_path, &relative)?;
                }
            }
        }
        links.finish(archive_path)
    }

    fn entry_path(entry: &tar::Entry<Box<dyn Read>>, archive_path: &Path) -> Result<Option<PathBuf>> {
        let name = entry
            .path()
            .map_err(|e| corrupt(archive_path, format!("invalid tar entry name: {e}")))?;
        resolve_entry_path(archive_path, &name)
    }

    fn link_target(entry: &tar::Entry<Box<dyn Read>>, archive_path: &Path) -> Result<PathBuf> {
        let target = entry
            .link_name()
            .map_err(|e| corrupt(archive_path, format!("invalid link target: {e}")))?
            .ok_or_else(|| corrupt(archive_path, "link entry without a target"))?;
        Ok(target.into_owned())
    }

    fn extract_entry(
        mut entry: tar::Entry<Box<dyn Read>>,
        dest_path: &Path,
        archive_path: &Path,
        ctx: &UnpackContext,
    ) -> Result<Option<PathBuf>> {
        let Some(relative) = Self::entry_path(&entry, archive_path)? else {
            return Ok(None);
        };
        let target = dest_path.join(&relative);
        let entry_type = entry.header().entry_type();

        match entry_type {
            EntryType::Directory => {
                prepare_output_path(archive_path, dest_path, &target)?;
                std::fs::create_dir_all(&target)?;
                Ok(None)
            }
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                let mode = entry.header().mode().ok();
                let mut outfile = create_output_file(archive_path, dest_path, &target)?;
                let written = copy_limited(&mut entry, &mut outfile, ctx, archive_path)?;
                drop(outfile);

                if let Some(mode) = mode {
                    apply_mode(&target, mode)?;
                }

                debug!(path = ?target, bytes = written, "extracted tar entry");
                Ok(Some(target))
            }
            EntryType::Symlink | EntryType::Link => {
                let link_target = Self::link_target(&entry, archive_path)?;
                prepare_output_path(archive_path, dest_path, &target)?;
                let base = match entry_type {
                    EntryType::Symlink => target.parent().unwrap_or(dest_path),
                    _ => dest_path,
                };
                ensure_link_inside(archive_path, dest_path, base, &link_target)?;

                let unpacked = entry
                    .unpack_in(dest_path)
                    .map_err(|e| Error::Io(std::io::Error::other(format!("failed to create link: {e}"))))?;
                if !unpacked {
                    return Err(Error::PathTraversal {
                        archive: archive_path.to_path_buf(),
                        entry: relative.to_string_lossy().into_owned(),
                    });
                }

                debug!(path = ?target, ?entry_type, "created link from tar entry");
                Ok((entry_type == EntryType::Link).then_some(target))
            }
            other => {
                debug!(path = ?target, entry_type = ?other, "skipping special tar entry");
                Ok(None)
            }
        }
    }
}
