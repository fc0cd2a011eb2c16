//! CLI-based RAR backend using an external unrar binary

use super::traits::{RarBackend, RarCapabilities};
use crate::error::Error;
use crate::extraction::UnpackContext;
use crate::extraction::shared::{corrupt, ensure_inside, resolve_entry_path};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info, warn};

/// unrar exit codes
const EXIT_WARNING: i32 = 1;
const EXIT_FATAL: i32 = 2;
const EXIT_CRC: i32 = 3;
const EXIT_NO_FILES: i32 = 10;
const EXIT_BAD_PASSWORD: i32 = 11;

/// CLI-based RAR backend using an external `unrar` binary
///
/// The archive is listed first (`unrar lb`) and every name goes through the
/// path guard before `unrar x` runs. The tool writes files itself, so the
/// byte budget is charged from the extracted sizes afterwards and
/// cancellation is only observed before the tool starts.
///
/// # Examples
///
/// ```no_run
/// use unarchive::extraction::rar::CliRarBackend;
/// use std::path::PathBuf;
///
/// // Create with explicit path
/// let backend = CliRarBackend::new(PathBuf::from("/usr/bin/unrar"));
///
/// // Or auto-discover from PATH
/// let backend = CliRarBackend::from_path().expect("unrar not found in PATH");
/// ```
pub struct CliRarBackend {
    binary_path: PathBuf,
}

impl CliRarBackend {
    /// Create a new CLI backend with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find unrar in PATH
    pub fn from_path() -> Option<Self> {
        which::which("unrar").ok().map(Self::new)
    }

    /// Path of the binary this backend runs
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    fn run(&self, args: &[&OsStr]) -> crate::Result<Output> {
        Command::new(&self.binary_path)
            .args(args)
            .output()
            .map_err(|e| Error::ExternalTool(format!("Failed to execute unrar: {}", e)))
    }

    /// Map a non-success exit status onto our error kinds
    fn check_status(output: &Output, archive_path: &Path) -> crate::Result<()> {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => Ok(()),
            Some(EXIT_WARNING) => {
                warn!(?archive_path, %stderr, "unrar finished with warnings");
                Ok(())
            }
            Some(EXIT_FATAL | EXIT_CRC | EXIT_NO_FILES) if stderr.is_empty() => {
                Err(corrupt(archive_path, "unrar reported a damaged archive"))
            }
            Some(EXIT_FATAL | EXIT_CRC | EXIT_NO_FILES) => Err(corrupt(archive_path, stderr)),
            Some(EXIT_BAD_PASSWORD) => Err(Error::UnsupportedFormat {
                archive: archive_path.to_path_buf(),
                reason: "encrypted RAR archives are not supported".into(),
            }),
            code => Err(Error::ExternalTool(format!(
                "unrar exited with {}: {}",
                code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr
            ))),
        }
    }

    /// List entry names and resolve each one against the path guard
    fn list_entries(&self, archive_path: &Path) -> crate::Result<Vec<PathBuf>> {
        let output = self.run(&[OsStr::new("lb"), OsStr::new("-p-"), archive_path.as_os_str()])?;
        Self::check_status(&output, archive_path)?;

        let listing = String::from_utf8_lossy(&output.stdout);
        let mut entries = Vec::new();
        for line in listing.lines().filter(|l| !l.trim().is_empty()) {
            if let Some(relative) = resolve_entry_path(archive_path, Path::new(line))? {
                entries.push(relative);
            }
        }

        debug!(?archive_path, entry_count = entries.len(), "listed RAR entries");
        Ok(entries)
    }
}

impl RarBackend for CliRarBackend {
    fn unpack(
        &self,
        archive_path: &Path,
        dest_path: &Path,
        ctx: &UnpackContext,
    ) -> crate::Result<Vec<PathBuf>> {
        debug!(
            ?archive_path,
            ?dest_path,
            binary = ?self.binary_path,
            "extracting RAR archive with external tool"
        );

        ctx.check_cancelled()?;
        let entries = self.list_entries(archive_path)?;

        std::fs::create_dir_all(dest_path)?;

        // unrar treats a destination with a trailing separator as a directory
        let mut dest_arg = dest_path.as_os_str().to_owned();
        dest_arg.push(std::path::MAIN_SEPARATOR_STR);

        let output = self.run(&[
            OsStr::new("x"),
            OsStr::new("-o+"),
            OsStr::new("-y"),
            OsStr::new("-p-"),
            archive_path.as_os_str(),
            dest_arg.as_os_str(),
        ])?;
        Self::check_status(&output, archive_path)?;

        let mut extracted_files = Vec::new();
        for relative in entries {
            let path = dest_path.join(&relative);
            let Ok(meta) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            ensure_inside(archive_path, dest_path, &path)?;
            ctx.charge(archive_path, meta.len())?;
            extracted_files.push(path);
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
            in_process: false,
        }
    }

    fn name(&self) -> &'static str {
        "cli-unrar"
    }
}
