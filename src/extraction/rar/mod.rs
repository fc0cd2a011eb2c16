//! RAR archive decoding
//!
//! RAR is the one format whose decoder may be missing at runtime, so it sits
//! behind the [`RarBackend`] trait. Implementations:
//!
//! - `BundledRarBackend`: the `unrar` library compiled in (cargo feature
//!   `bundled-rar`, on by default)
//! - [`CliRarBackend`]: an external `unrar` binary
//! - [`NoOpRarBackend`]: no decoder; every RAR archive fails with
//!   `UnsupportedFormat` while the rest of the run carries on
//!
//! [`rar_backend_from_config`] picks one from [`RarConfig`].

#[cfg(feature = "bundled-rar")]
mod bundled;
mod cli;
mod noop;
mod traits;

#[cfg(feature = "bundled-rar")]
pub use bundled::BundledRarBackend;
pub use cli::CliRarBackend;
pub use noop::NoOpRarBackend;
pub use traits::{RarBackend, RarCapabilities};

use crate::config::{RarBackendKind, RarConfig};
use std::sync::Arc;

/// Build the RAR backend described by `config`
///
/// - `disabled`: no-op backend
/// - `bundled`: the compiled-in decoder, or no-op when the feature is off
/// - `cli`: `unrar_path` if set, else `unrar` from PATH when `search_path`
///   allows it, else no-op
/// - `auto`: an explicit `unrar_path` wins, then the compiled-in decoder,
///   then `unrar` from PATH, then no-op
pub fn rar_backend_from_config(config: &RarConfig) -> Arc<dyn RarBackend> {
    let backend: Arc<dyn RarBackend> = match config.backend {
        RarBackendKind::Disabled => Arc::new(NoOpRarBackend),
        RarBackendKind::Bundled => bundled_backend().unwrap_or_else(|| {
            tracing::warn!("bundled RAR decoder not compiled in, RAR archives will be rejected");
            Arc::new(NoOpRarBackend)
        }),
        RarBackendKind::Cli => cli_backend(config).unwrap_or_else(|| Arc::new(NoOpRarBackend)),
        RarBackendKind::Auto => {
            if let Some(ref unrar_path) = config.unrar_path {
                Arc::new(CliRarBackend::new(unrar_path.clone()))
            } else {
                bundled_backend()
                    .or_else(|| cli_backend(config))
                    .unwrap_or_else(|| Arc::new(NoOpRarBackend))
            }
        }
    };

    let caps = backend.capabilities();
    tracing::info!(
        rar_backend = backend.name(),
        can_extract = caps.can_extract,
        in_process = caps.in_process,
        "RAR backend initialized"
    );

    backend
}

#[cfg(feature = "bundled-rar")]
fn bundled_backend() -> Option<Arc<dyn RarBackend>> {
    Some(Arc::new(BundledRarBackend))
}

#[cfg(not(feature = "bundled-rar"))]
fn bundled_backend() -> Option<Arc<dyn RarBackend>> {
    None
}

fn cli_backend(config: &RarConfig) -> Option<Arc<dyn RarBackend>> {
    if let Some(ref unrar_path) = config.unrar_path {
        Some(Arc::new(CliRarBackend::new(unrar_path.clone())))
    } else if config.search_path {
        CliRarBackend::from_path().map(|b| Arc::new(b) as Arc<dyn RarBackend>)
    } else {
        None
    }
}
