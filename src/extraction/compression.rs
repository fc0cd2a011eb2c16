//! Compression layer detection for tar streams

use std::io::{self, BufReader, Read, Seek};

use crate::types::Compression;

const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];

/// Identify the compression wrapped around a stream from its leading bytes
pub fn detect_compression(data: &[u8]) -> Compression {
    if data.starts_with(GZIP_MAGIC) {
        Compression::Gzip
    } else if data.starts_with(BZIP2_MAGIC) {
        Compression::Bzip2
    } else if data.starts_with(XZ_MAGIC) {
        Compression::Xz
    } else {
        Compression::None
    }
}

/// Peek at the start of a seekable reader and rewind it
pub(crate) fn sniff_compression<R: Read + Seek>(reader: &mut R) -> io::Result<Compression> {
    let mut magic = [0u8; 6];
    let n = read_up_to(reader, &mut magic)?;
    reader.rewind()?;
    Ok(detect_compression(&magic[..n]))
}

/// Wrap a reader in the decoder for `compression`
///
/// Multi-member gzip, multi-stream bzip2 and multi-stream xz are all decoded
/// to the end, matching what command-line tools produce.
pub fn decompress_reader<R: Read + 'static>(reader: R, compression: Compression) -> Box<dyn Read> {
    match compression {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(BufReader::new(reader))),
        Compression::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
    }
}

/// Fill as much of `buf` as the stream allows, returning the byte count
pub(crate) fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
