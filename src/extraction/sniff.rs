//! Content-based archive detection
//!
//! File names are never consulted. Each probe opens the file read-only, and
//! any error a probe hits (missing file, permission denied, truncation,
//! garbage in a compressed stream) counts as "not this format".

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use tracing::{debug, trace};

use super::compression::{decompress_reader, read_up_to, sniff_compression};
use crate::types::ArchiveKind;

const TAR_BLOCK_SIZE: usize = 512;
const TAR_CHECKSUM_FIELD: std::ops::Range<usize> = 148..156;

const RAR4_SIGNATURE: &[u8] = &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];
const RAR5_SIGNATURE: &[u8] = &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];

type Probe = fn(&Path) -> io::Result<bool>;

/// Probes in detection order. Tar comes before gzip so a `.tar.gz` is
/// reported as a tar archive rather than a single compressed file.
const PROBES: [(ArchiveKind, Probe); 4] = [
    (ArchiveKind::Zip, is_zip),
    (ArchiveKind::Tar, is_tar),
    (ArchiveKind::Gzip, is_gzip),
    (ArchiveKind::Rar, is_rar),
];

/// Classify a file by content
///
/// Returns `None` for anything that is not a supported archive, including
/// files that cannot be read at all.
pub fn classify(path: &Path) -> Option<ArchiveKind> {
    let kind = PROBES
        .iter()
        .find(|(kind, probe)| run_probe(*kind, path, *probe))
        .map(|(kind, _)| *kind);

    debug!(?path, ?kind, "classified file");
    kind
}

fn run_probe(kind: ArchiveKind, path: &Path, probe: Probe) -> bool {
    match probe(path) {
        Ok(matched) => {
            trace!(?path, %kind, matched, "probe finished");
            matched
        }
        Err(e) => {
            trace!(?path, %kind, error = %e, "probe failed, treating as negative");
            false
        }
    }
}

/// End-of-central-directory record found and the central directory parses
fn is_zip(path: &Path) -> io::Result<bool> {
    let file = File::open(path)?;
    Ok(::zip::ZipArchive::new(file).is_ok())
}

/// First block (after any gzip/bzip2/xz layer) is a tar header with a valid checksum
fn is_tar(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let compression = sniff_compression(&mut file)?;
    let mut reader = decompress_reader(file, compression);

    let mut block = [0u8; TAR_BLOCK_SIZE];
    let n = read_up_to(&mut reader, &mut block)?;
    Ok(n == TAR_BLOCK_SIZE && is_tar_header(&block))
}

/// gzip magic present and at least one decompressed read succeeds
fn is_gzip(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    if read_up_to(&mut file, &mut magic)? < 2 || magic != [0x1F, 0x8B] {
        return Ok(false);
    }

    let file = File::open(path)?;
    let mut decoder = flate2::read::MultiGzDecoder::new(BufReader::new(file));
    let mut byte = [0u8; 1];
    read_up_to(&mut decoder, &mut byte)?;
    Ok(true)
}

fn is_rar(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut signature = [0u8; 8];
    let n = read_up_to(&mut file, &mut signature)?;
    let head = &signature[..n];
    Ok(head.starts_with(RAR5_SIGNATURE) || head.starts_with(RAR4_SIGNATURE))
}

/// Check whether a 512-byte block is a tar header
///
/// The block must not be all zeros (an end-of-archive marker is not an
/// archive) and the stored checksum must equal the byte sum of the header
/// with the checksum field read as spaces. Both the unsigned sum and the
/// historical signed-char sum are accepted.
pub fn is_tar_header(block: &[u8]) -> bool {
    let Some(header) = block.get(..TAR_BLOCK_SIZE) else {
        return false;
    };

    if header.iter().all(|&b| b == 0) {
        return false;
    }

    let Some(stored) = parse_octal(&header[TAR_CHECKSUM_FIELD]) else {
        return false;
    };

    let mut unsigned: u64 = 0;
    let mut signed: i64 = 0;
    for (i, &b) in header.iter().enumerate() {
        let b = if TAR_CHECKSUM_FIELD.contains(&i) { b' ' } else { b };
        unsigned += u64::from(b);
        signed += i64::from(b as i8);
    }

    stored == unsigned || i64::try_from(stored).is_ok_and(|s| s == signed)
}

/// Parse a NUL/space-terminated octal header field
fn parse_octal(field: &[u8]) -> Option<u64> {
    let digits: Vec<u8> = field
        .iter()
        .copied()
        .skip_while(|&b| b == b' ')
        .take_while(|&b| b != 0 && b != b' ')
        .collect();

    if digits.is_empty() || !digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
        return None;
    }

    digits
        .iter()
        .try_fold(0u64, |acc, &d| acc.checked_mul(8)?.checked_add(u64::from(d - b'0')))
}
