use crate::config::ExtractionConfig;
use crate::error::Error;
use crate::extraction::*;
use crate::types::{ArchiveKind, Event};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a ZIP archive in memory with the given entries
fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ::zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Build an uncompressed tar archive in memory with the given entries
fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = ::tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = ::tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Tar archive whose only entry has a raw, unchecked name
fn tar_with_raw_name(name: &str, content: &[u8]) -> Vec<u8> {
    let mut builder = ::tar::Builder::new(Vec::new());
    let mut header = ::tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name.as_bytes());
    header.set_cksum();
    builder.append(&header, content).unwrap();
    builder.into_inner().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn extractor() -> Extractor {
    Extractor::new(ExtractionConfig::default()).unwrap()
}

/// Number of entries directly inside a directory
fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

// ---------------------------------------------------------------------------
// Single archives
// ---------------------------------------------------------------------------

#[test]
fn zip_extracts_next_to_source() {
    let temp = TempDir::new().unwrap();
    let archive = write_file(
        temp.path(),
        "photos.zip",
        &zip_bytes(&[("a.jpg", b"aaa".as_slice()), ("album/b.jpg", b"bbb".as_slice())]),
    );

    let report = extractor().extract(&archive).unwrap();

    let out = temp.path().join("photos_extracted");
    assert_eq!(report.extracted.len(), 1);
    assert_eq!(report.extracted[0].kind, ArchiveKind::Zip);
    assert_eq!(report.extracted[0].output_dir, out);
    assert_eq!(report.extracted[0].depth, 0);
    assert_eq!(std::fs::read(out.join("a.jpg")).unwrap(), b"aaa");
    assert_eq!(std::fs::read(out.join("album/b.jpg")).unwrap(), b"bbb");
    assert!(report.is_complete());
    assert_eq!(report.bytes_written, 6);
}

#[test]
fn tar_family_roots_share_stem_naming() {
    let temp = TempDir::new().unwrap();
    let tar = tar_bytes(&[("inner.txt", b"payload".as_slice())]);

    let mut bz = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::fast());
    bz.write_all(&tar).unwrap();
    let mut xz = xz2::write::XzEncoder::new(Vec::new(), 1);
    xz.write_all(&tar).unwrap();

    let cases = [
        ("plain.tar", tar.clone(), "plain_extracted"),
        ("gz.tgz", gzip(&tar), "gz_extracted"),
        ("bz.tar.bz2", bz.finish().unwrap(), "bz_extracted"),
        ("xz.tar.xz", xz.finish().unwrap(), "xz_extracted"),
    ];

    for (name, data, expected_dir) in cases {
        let archive = write_file(temp.path(), name, &data);
        let report = extractor().extract(&archive).unwrap();

        assert_eq!(report.extracted.len(), 1, "{name}");
        assert_eq!(report.extracted[0].kind, ArchiveKind::Tar, "{name}");
        let out = temp.path().join(expected_dir);
        assert_eq!(
            std::fs::read(out.join("inner.txt")).unwrap(),
            b"payload",
            "{name}"
        );
    }
}

#[test]
fn gzip_root_produces_single_named_file() {
    let temp = TempDir::new().unwrap();
    let archive = write_file(temp.path(), "server.log.gz", &gzip(b"line 1\nline 2\n"));

    let report = extractor().extract(&archive).unwrap();

    let out = temp.path().join("server.log_extracted");
    assert_eq!(report.extracted[0].kind, ArchiveKind::Gzip);
    assert_eq!(report.extracted[0].files, vec![out.join("server.log")]);
    assert_eq!(std::fs::read(out.join("server.log")).unwrap(), b"line 1\nline 2\n");
    assert_eq!(entry_count(&out), 1);
}

#[test]
fn extension_is_ignored_when_classifying() {
    let temp = TempDir::new().unwrap();
    let archive = write_file(
        temp.path(),
        "looks_like_text.txt",
        &zip_bytes(&[("real.txt", b"zip inside".as_slice())]),
    );

    let report = extractor().extract(&archive).unwrap();
    assert_eq!(report.extracted[0].kind, ArchiveKind::Zip);
    assert!(temp.path().join("looks_like_text_extracted/real.txt").exists());
}

// ---------------------------------------------------------------------------
// Non-archives and unreadable input
// ---------------------------------------------------------------------------

#[test]
fn plain_file_is_a_noop() {
    let temp = TempDir::new().unwrap();
    let path = write_file(temp.path(), "notes.zip", b"only text in here");

    let report = extractor().extract(&path).unwrap();

    assert!(report.is_noop());
    assert!(report.is_complete());
    assert_eq!(entry_count(temp.path()), 1, "no output directory may be created");
}

#[test]
fn missing_root_is_unreadable() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("nope.zip");

    match extractor().extract(&missing) {
        Err(Error::UnreadableFile { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected UnreadableFile, got {other:?}"),
    }
}

#[test]
fn corrupt_root_is_returned_as_error() {
    let temp = TempDir::new().unwrap();
    let mut data = gzip(&[b'x'; 4096]);
    let crc = data.len() - 8;
    data[crc] ^= 0xFF;
    let archive = write_file(temp.path(), "broken.gz", &data);

    let err = extractor().extract(&archive).unwrap_err();
    assert!(matches!(err, Error::CorruptArchive { .. }), "got {err:?}");
}

// ---------------------------------------------------------------------------
// Recursion
// ---------------------------------------------------------------------------

#[test]
fn nested_tar_gz_then_zip() {
    let temp = TempDir::new().unwrap();
    let b_zip = zip_bytes(&[("c.txt", b"deepest".as_slice())]);
    let a_tar = tar_bytes(&[("b.zip", b_zip.as_slice())]);
    let archive = write_file(temp.path(), "a.tar.gz", &gzip(&a_tar));

    let report = extractor().extract(&archive).unwrap();

    let a_out = temp.path().join("a_extracted");
    assert!(a_out.join("b.zip").is_file(), "nested archive stays in place");
    assert_eq!(
        std::fs::read(a_out.join("b_extracted/c.txt")).unwrap(),
        b"deepest"
    );

    let kinds: Vec<_> = report.extracted.iter().map(|e| (e.kind, e.depth)).collect();
    assert_eq!(kinds, vec![(ArchiveKind::Tar, 0), (ArchiveKind::Zip, 1)]);
    assert!(report.is_complete());
}

#[test]
fn gzip_output_is_reclassified() {
    let temp = TempDir::new().unwrap();
    let inner = zip_bytes(&[("doc.txt", b"from zip".as_slice())]);
    let archive = write_file(temp.path(), "data.zip.gz", &gzip(&inner));

    let report = extractor().extract(&archive).unwrap();

    let gz_out = temp.path().join("data.zip_extracted");
    assert!(gz_out.join("data.zip").is_file());
    assert_eq!(
        std::fs::read(gz_out.join("data_extracted/doc.txt")).unwrap(),
        b"from zip"
    );
    assert_eq!(report.extracted.len(), 2);
    assert_eq!(report.extracted[1].kind, ArchiveKind::Zip);
}

#[test]
fn depth_cap_stops_at_thirty_two() {
    let temp = TempDir::new().unwrap();

    // level_00.zip contains level_01.zip ... level_39.zip contains payload.txt
    let mut data = zip_bytes(&[("payload.txt", b"bottom".as_slice())]);
    for level in (1..40).rev() {
        let name = format!("level_{level:02}.zip");
        data = zip_bytes(&[(name.as_str(), data.as_slice())]);
    }
    let archive = write_file(temp.path(), "level_00.zip", &data);

    let report = extractor().extract(&archive).unwrap();

    assert_eq!(report.extracted.len(), 33, "depths 0 through 32 are extracted");
    assert_eq!(report.extracted.last().unwrap().depth, 32);
    assert_eq!(report.failures.len(), 1);

    let failure = &report.failures[0];
    assert_eq!(failure.depth, 33);
    assert_eq!(failure.error.code(), "nesting_too_deep");
    assert!(failure.source.ends_with("level_33.zip"));
    assert!(!report.is_complete());
}

#[test]
fn custom_max_depth_is_respected() {
    let temp = TempDir::new().unwrap();
    let inner = zip_bytes(&[("x.txt", b"x".as_slice())]);
    let middle = zip_bytes(&[("inner.zip", inner.as_slice())]);
    let archive = write_file(
        temp.path(),
        "outer.zip",
        &zip_bytes(&[("middle.zip", middle.as_slice())]),
    );

    let config = ExtractionConfig {
        max_depth: 1,
        ..ExtractionConfig::default()
    };
    let report = Extractor::new(config).unwrap().extract(&archive).unwrap();

    assert_eq!(report.extracted.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0].error,
        Error::NestingTooDeep {
            depth: 2,
            max_depth: 1,
            ..
        }
    ));
    assert!(!temp.path().join("outer_extracted/middle_extracted/inner_extracted").exists());
}

#[test]
fn failing_nested_archive_does_not_stop_siblings() {
    let temp = TempDir::new().unwrap();
    let mut broken = gzip(&[b'x'; 4096]);
    let crc = broken.len() - 8;
    broken[crc] ^= 0xFF;
    let good = zip_bytes(&[("ok.txt", b"fine".as_slice())]);

    let archive = write_file(
        temp.path(),
        "outer.zip",
        &zip_bytes(&[
            ("a_broken.gz", broken.as_slice()),
            ("b_good.zip", good.as_slice()),
            ("readme.txt", b"plain".as_slice()),
        ]),
    );

    let report = extractor().extract(&archive).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, ArchiveKind::Gzip);
    assert_eq!(report.failures[0].error.code(), "corrupt_archive");
    assert!(report.failures[0].source.ends_with("a_broken.gz"));

    assert_eq!(
        std::fs::read(temp.path().join("outer_extracted/b_good_extracted/ok.txt")).unwrap(),
        b"fine"
    );
    assert_eq!(report.extracted.len(), 2);
}

#[test]
fn sources_sharing_an_output_dir_are_each_extracted_once() {
    let temp = TempDir::new().unwrap();
    let b_zip = zip_bytes(&[
        ("x.txt", b"from zip".as_slice()),
        ("n.gz", gzip(b"plain").as_slice()),
    ]);
    let b_tar = tar_bytes(&[("y.txt", b"from tar".as_slice())]);
    let archive = write_file(
        temp.path(),
        "outer.zip",
        &zip_bytes(&[("b.zip", b_zip.as_slice()), ("b.tar", b_tar.as_slice())]),
    );

    let report = extractor().extract(&archive).unwrap();

    let shared = temp.path().join("outer_extracted/b_extracted");
    assert!(shared.join("x.txt").is_file());
    assert!(shared.join("y.txt").is_file());
    assert!(report.is_complete());

    let sources: Vec<_> = report.extracted.iter().map(|e| e.source.clone()).collect();
    let unique: std::collections::HashSet<_> = sources.iter().collect();
    assert_eq!(sources.len(), unique.len(), "no archive extracted twice");
    assert_eq!(report.extracted.len(), 4);
}

#[test]
fn unavailable_rar_decoder_is_a_nested_failure() {
    let temp = TempDir::new().unwrap();
    let mut rar = b"Rar!\x1a\x07\x01\x00".to_vec();
    rar.extend_from_slice(&[0u8; 64]);
    let archive = write_file(
        temp.path(),
        "release.zip",
        &zip_bytes(&[("movie.rar", rar.as_slice()), ("info.nfo", b"nfo".as_slice())]),
    );

    let report = extractor()
        .with_rar_backend(Arc::new(NoOpRarBackend))
        .extract(&archive)
        .unwrap();

    assert_eq!(report.extracted.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, ArchiveKind::Rar);
    assert_eq!(report.failures[0].error.code(), "unsupported_format");
}

// ---------------------------------------------------------------------------
// Path traversal
// ---------------------------------------------------------------------------

#[test]
fn zip_with_parent_dir_entry_is_rejected() {
    let temp = TempDir::new().unwrap();
    let work = temp.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    let archive = write_file(
        &work,
        "evil.zip",
        &zip_bytes(&[("../../etc/passwd", b"root::0:0".as_slice())]),
    );

    let err = extractor().extract(&archive).unwrap_err();

    match err {
        Error::PathTraversal { entry, .. } => assert_eq!(entry, "../../etc/passwd"),
        other => panic!("expected PathTraversal, got {other:?}"),
    }
    assert!(!temp.path().join("etc").exists());
}

#[test]
fn tar_with_absolute_entry_is_rejected() {
    let temp = TempDir::new().unwrap();
    let archive = write_file(
        temp.path(),
        "abs.tar",
        &tar_with_raw_name("/tmp/unarchive-escape.txt", b"escaped"),
    );

    let err = extractor().extract(&archive).unwrap_err();
    assert!(matches!(err, Error::PathTraversal { .. }), "got {err:?}");
}

#[test]
fn nested_traversal_is_isolated() {
    let temp = TempDir::new().unwrap();
    let evil = tar_with_raw_name("../../../escape.txt", b"escaped");
    let archive = write_file(
        temp.path(),
        "bundle.zip",
        &zip_bytes(&[("evil.tar", evil.as_slice()), ("fine.txt", b"ok".as_slice())]),
    );

    let report = extractor().extract(&archive).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].error.code(), "path_traversal");
    assert!(!temp.path().join("escape.txt").exists());
    assert!(temp.path().join("bundle_extracted/fine.txt").is_file());
}

// ---------------------------------------------------------------------------
// Budget and cancellation
// ---------------------------------------------------------------------------

#[test]
fn byte_budget_aborts_run() {
    let temp = TempDir::new().unwrap();
    let big = vec![0u8; 10_000];
    let inner = zip_bytes(&[("zeros.bin", big.as_slice())]);
    let archive = write_file(
        temp.path(),
        "bomb.zip",
        &zip_bytes(&[("inner.zip", inner.as_slice())]),
    );

    let config = ExtractionConfig {
        max_total_bytes: Some(inner.len() as u64 + 1_000),
        ..ExtractionConfig::default()
    };
    let err = Extractor::new(config).unwrap().extract(&archive).unwrap_err();

    assert!(matches!(err, Error::BudgetExceeded { .. }), "got {err:?}");
}

#[test]
fn cancelled_extractor_does_nothing() {
    let temp = TempDir::new().unwrap();
    let archive = write_file(
        temp.path(),
        "a.zip",
        &zip_bytes(&[("a.txt", b"a".as_slice())]),
    );

    let extractor = extractor();
    extractor.cancel();
    let err = extractor.extract(&archive).unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(!temp.path().join("a_extracted").exists());
}

// ---------------------------------------------------------------------------
// Self-containing archives
// ---------------------------------------------------------------------------

/// RAR stand-in that "extracts" a fixed file, whatever the archive holds
struct FixedOutputBackend {
    name: &'static str,
    content: Vec<u8>,
}

impl RarBackend for FixedOutputBackend {
    fn unpack(
        &self,
        _archive: &Path,
        dest: &Path,
        _ctx: &UnpackContext,
    ) -> crate::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dest)?;
        let path = dest.join(self.name);
        std::fs::write(&path, &self.content)?;
        Ok(vec![path])
    }

    fn capabilities(&self) -> RarCapabilities {
        RarCapabilities {
            can_extract: true,
            in_process: true,
        }
    }

    fn name(&self) -> &'static str {
        "fixed-output"
    }
}

fn rar_signature_file() -> Vec<u8> {
    let mut rar = b"Rar!\x1a\x07\x00".to_vec();
    rar.extend_from_slice(b"self-containing payload");
    rar
}

#[test]
fn archive_containing_itself_is_not_reextracted() {
    let temp = TempDir::new().unwrap();
    let rar = rar_signature_file();
    let root = write_file(temp.path(), "quine.rar", &rar);

    let extractor = extractor().with_rar_backend(Arc::new(FixedOutputBackend {
        name: "copy.rar",
        content: rar,
    }));
    let report = extractor.extract(&root).unwrap();

    assert_eq!(report.extracted.len(), 1);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.source, temp.path().join("quine_extracted/copy.rar"));
    assert_eq!(failure.depth, 1);
    assert_eq!(failure.kind, ArchiveKind::Rar);
    assert_eq!(failure.error.code(), "recursive_archive");
    match &failure.error {
        Error::RecursiveArchive { ancestor, .. } => assert_eq!(ancestor, &root),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!temp.path().join("quine_extracted/copy_extracted").exists());
}

#[test]
fn copy_of_a_distant_ancestor_is_caught() {
    let temp = TempDir::new().unwrap();
    let rar = rar_signature_file();
    let root = write_file(temp.path(), "outer.rar", &rar);
    let inner = zip_bytes(&[("again.rar", rar.as_slice())]);

    let extractor = extractor().with_rar_backend(Arc::new(FixedOutputBackend {
        name: "inner.zip",
        content: inner,
    }));
    let report = extractor.extract(&root).unwrap();

    let kinds: Vec<(ArchiveKind, u32)> = report.extracted.iter().map(|a| (a.kind, a.depth)).collect();
    assert_eq!(kinds, vec![(ArchiveKind::Rar, 0), (ArchiveKind::Zip, 1)]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].depth, 2);
    match &report.failures[0].error {
        Error::RecursiveArchive { archive, ancestor } => {
            assert!(archive.ends_with("inner_extracted/again.rar"));
            assert_eq!(ancestor, &root);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn identical_siblings_are_both_extracted() {
    let temp = TempDir::new().unwrap();
    let twin = zip_bytes(&[("same.txt", b"same".as_slice())]);
    let root = write_file(
        temp.path(),
        "twins.tar",
        &tar_bytes(&[("left.zip", twin.as_slice()), ("right.zip", twin.as_slice())]),
    );

    let report = extractor().extract(&root).unwrap();

    assert!(report.is_complete(), "{:?}", report.failures);
    assert_eq!(report.extracted.len(), 3);
    assert!(temp.path().join("twins_extracted/left_extracted/same.txt").is_file());
    assert!(temp.path().join("twins_extracted/right_extracted/same.txt").is_file());
}

// ---------------------------------------------------------------------------
// Events and async wrapper
// ---------------------------------------------------------------------------

#[test]
fn events_follow_extraction_order() {
    let temp = TempDir::new().unwrap();
    let inner = zip_bytes(&[("c.txt", b"c".as_slice())]);
    let archive = write_file(
        temp.path(),
        "a.zip",
        &zip_bytes(&[("b.zip", inner.as_slice())]),
    );

    let extractor = extractor();
    let mut rx = extractor.subscribe();
    let report = extractor.extract(&archive).unwrap();
    assert!(report.is_complete());

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert_eq!(events.len(), 5, "{events:?}");
    assert!(matches!(&events[0], Event::ExtractionStarted { depth: 0, kind: ArchiveKind::Zip, .. }));
    assert!(matches!(&events[1], Event::Extracted { depth: 0, file_count: 1, .. }));
    assert!(matches!(&events[2], Event::NestedArchiveFound { depth: 1, .. }));
    assert!(matches!(&events[3], Event::ExtractionStarted { depth: 1, .. }));
    match &events[4] {
        Event::Extracted { output_dir, .. } => {
            assert_eq!(output_dir, &temp.path().join("a_extracted/b_extracted"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn nested_failure_emits_failed_event() {
    let temp = TempDir::new().unwrap();
    let mut rar = b"Rar!\x1a\x07\x00".to_vec();
    rar.extend_from_slice(&[0u8; 32]);
    let archive = write_file(
        temp.path(),
        "a.zip",
        &zip_bytes(&[("b.rar", rar.as_slice())]),
    );

    let extractor = extractor().with_rar_backend(Arc::new(NoOpRarBackend));
    let mut rx = extractor.subscribe();
    let report = extractor.extract(&archive).unwrap();
    assert_eq!(report.failures.len(), 1);

    let mut failed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Event::ExtractionFailed { path, depth, error } = event {
            failed.push((path, depth, error.code));
        }
    }

    assert_eq!(failed.len(), 1);
    assert!(failed[0].0.ends_with("b.rar"));
    assert_eq!(failed[0].1, 1);
    assert_eq!(failed[0].2, "unsupported_format");
}

#[tokio::test]
async fn extract_async_runs_on_blocking_pool() {
    let temp = TempDir::new().unwrap();
    let archive = write_file(
        temp.path(),
        "async.zip",
        &zip_bytes(&[("file.txt", b"async".as_slice())]),
    );

    let report = extractor().extract_async(archive).await.unwrap();

    assert_eq!(report.extracted.len(), 1);
    assert!(temp.path().join("async_extracted/file.txt").is_file());
}
