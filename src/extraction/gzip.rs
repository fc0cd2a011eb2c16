use crate::error::Result;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::shared::{UnpackContext, copy_limited, create_output_file, open_source};

/// Extractor for single-file gzip streams
pub struct GzipExtractor;

impl GzipExtractor {
    /// Decompress a gzip file into exactly one file inside `dest_path`
    ///
    /// Concatenated members are decoded back to back. The output is named by
    /// [`gzip_output_name`] from the source's file name; the name stored in
    /// the gzip header is ignored.
    pub fn unpack(
        archive_path: &Path,
        dest_path: &Path,
        ctx: &UnpackContext,
    ) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "decompressing gzip file");

        let file = open_source(archive_path)?;
        let mut decoder = flate2::read::MultiGzDecoder::new(BufReader::new(file));

        let name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = dest_path.join(gzip_output_name(&name));

        std::fs::create_dir_all(dest_path)?;
        let mut outfile = create_output_file(archive_path, dest_path, &output)?;
        let written = copy_limited(&mut decoder, &mut outfile, ctx, archive_path)?;

        info!(?archive_path, ?output, bytes = written, "gzip decompression successful");

        Ok(vec![output])
    }
}

/// Name of the file a gzip stream decompresses to
///
/// A trailing `.gz`, `.gzip` or `.z` is stripped (any case) and `.tgz`
/// becomes `.tar`. Other names get `.out` appended so the output never
/// shadows its source.
pub fn gzip_output_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();

    if lower.len() > 4 && lower.ends_with(".tgz") {
        return format!("{}.tar", &name[..name.len() - 4]);
    }

    for suffix in [".gzip", ".gz", ".z"] {
        if lower.len() > suffix.len() && lower.ends_with(suffix) {
            return name[..name.len() - suffix.len()].to_string();
        }
    }

    if name.is_empty() {
        return "output.out".to_string();
    }
    format!("{name}.out")
}
