//! No-op RAR backend for graceful degradation

use super::traits::{RarBackend, RarCapabilities};
use crate::extraction::UnpackContext;
use std::path::{Path, PathBuf};

/// No-op RAR backend used when no decoder is available
///
/// Every RAR archive fails with `Error::UnsupportedFormat`. In a recursive
/// run that is an ordinary per-archive failure, so the rest of the tree is
/// still extracted.
pub struct NoOpRarBackend;

impl RarBackend for NoOpRarBackend {
    fn unpack(
        &self,
        archive: &Path,
        _dest: &Path,
        _ctx: &UnpackContext,
    ) -> crate::Result<Vec<PathBuf>> {
        Err(crate::Error::UnsupportedFormat {
            archive: archive.to_path_buf(),
            reason: "RAR extraction requires the bundled decoder or an unrar binary. \
                     Configure unrar_path or ensure unrar is in PATH."
                .into(),
        })
    }

    fn capabilities(&self) -> RarCapabilities {
        RarCapabilities {
            can_extract: false,
            in_process: false,
        }
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
