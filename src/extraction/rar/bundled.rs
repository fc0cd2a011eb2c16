//! In-process RAR backend built on the `unrar` crate

use super::traits::{RarBackend, RarCapabilities};
use crate::error::Error;
use crate::extraction::UnpackContext;
use crate::extraction::shared::{corrupt, prepare_output_path, resolve_entry_path};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use unrar::error::{Code, UnrarError};

/// RAR backend using the bundled unrar library
///
/// Entry names are checked against the path guard one header at a time, and
/// each entry's unpacked size is charged to the budget before it is written.
pub struct BundledRarBackend;

impl BundledRarBackend {
    /// Convert an unrar error to our error type
    fn convert_unrar_error(e: UnrarError, archive_path: &Path) -> Error {
        match e.code {
            Code::MissingPassword | Code::BadPassword => Error::UnsupportedFormat {
                archive: archive_path.to_path_buf(),
                reason: "encrypted RAR archives are not supported".into(),
            },
            Code::EOpen => Error::UnreadableFile {
                path: archive_path.to_path_buf(),
                source: std::io::Error::other(e.to_string()),
            },
            Code::ECreate | Code::EWrite | Code::EClose => Error::Io(std::io::Error::other(
                format!("failed to write RAR entry: {e}"),
            )),
            _ => corrupt(archive_path, e.to_string()),
        }
    }

    fn skip_failed(e: UnrarError, archive_path: &Path) -> Error {
        corrupt(archive_path, format!("failed to skip entry: {e}"))
    }
}

impl RarBackend for BundledRarBackend {
    fn unpack(
        &self,
        archive_path: &Path,
        dest_path: &Path,
        ctx: &UnpackContext,
    ) -> crate::Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "extracting RAR archive");

        let processor = unrar::Archive::new(archive_path)
            .open_for_processing()
            .map_err(|e| Self::convert_unrar_error(e, archive_path))?;

        std::fs::create_dir_all(dest_path)?;

        let mut extracted_files = Vec::new();
        let mut at_header = processor;
        loop {
            ctx.check_cancelled()?;

            let at_file = match at_header.read_header() {
                Ok(Some(entry_processor)) => entry_processor,
                Ok(None) => break,
                Err(e) => return Err(Self::convert_unrar_error(e, archive_path)),
            };

            let header = at_file.entry();
            if header.is_encrypted() {
                return Err(Error::UnsupportedFormat {
                    archive: archive_path.to_path_buf(),
                    reason: "encrypted RAR entries are not supported".into(),
                });
            }

            let Some(relative) = resolve_entry_path(archive_path, &header.filename)? else {
                at_header = at_file.skip().map_err(|e| Self::skip_failed(e, archive_path))?;
                continue;
            };
            let file_path = dest_path.join(&relative);

            if header.is_directory() {
                prepare_output_path(archive_path, dest_path, &file_path)?;
                std::fs::create_dir_all(&file_path)?;
                at_header = at_file.skip().map_err(|e| Self::skip_failed(e, archive_path))?;
                continue;
            }

            ctx.charge(archive_path, header.unpacked_size)?;
            prepare_output_path(archive_path, dest_path, &file_path)?;

            at_header = at_file
                .extract_to(&file_path)
                .map_err(|e| Self::convert_unrar_error(e, archive_path))?;
            debug!(path = ?file_path, "extracted RAR entry");
            extracted_files.push(file_path);
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "RAR extraction successful"
        );

        Ok(extracted_files)
    }

    fn capabilities(&self) -> RarCapabilities {
        RarCapabilities {
            can_extract: true,
            in_process: true,
        }
    }

    fn name(&self) -> &'static str {
        "bundled-unrar"
    }
}
