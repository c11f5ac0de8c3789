use oxizip_archive::zip::{
    Compression, ReaderOptions, WriterOptions, ZipArchiveReader, ZipArchiveWriter,
};
use oxizip_core::OxiZipError;
use std::fs;
use std::io;

fn stored_archive() -> Vec<u8> {
    let options = WriterOptions::default()
        .with_compression(Compression::Stored)
        .with_store_directories(false);
    let writer = ZipArchiveWriter::new(Vec::new(), options).unwrap();
    writer.add_bytes("first.txt", &[b'a'; 300]).unwrap();
    writer.add_bytes("second.txt", &[b'b'; 300]).unwrap();
    writer.into_inner().unwrap()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|window| window == needle)
}

#[test]
fn test_not_a_zip() {
    let err = ZipArchiveReader::from_bytes(vec![0u8; 1000], ReaderOptions::default()).unwrap_err();
    assert!(matches!(err, OxiZipError::EndOfCentralDirectoryNotFound));
    assert!(err.is_format_error());

    let err = ZipArchiveReader::from_bytes(Vec::new(), ReaderOptions::default()).unwrap_err();
    assert!(err.is_format_error());
}

#[test]
fn test_broken_end_record_signature() {
    let mut archive = stored_archive();
    let eocd = rfind(&archive, &[0x50, 0x4B, 0x05, 0x06]).unwrap();
    archive[eocd + 3] = 0xFF;
    let err = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap_err();
    assert!(err.is_format_error(), "{}", err);
}

#[test]
fn test_truncated_archive() {
    let archive = stored_archive();
    let eocd = rfind(&archive, &[0x50, 0x4B, 0x05, 0x06]).unwrap();

    // End record cut in half.
    let err = ZipArchiveReader::from_bytes(archive[..eocd + 10].to_vec(), ReaderOptions::default())
        .unwrap_err();
    assert!(err.is_format_error(), "{}", err);

    // Central directory cut short, end record intact.
    let central = find(&archive, &[0x50, 0x4B, 0x01, 0x02]).unwrap();
    let mut cut = archive[..central + 20].to_vec();
    cut.extend_from_slice(&archive[eocd..]);
    let err = ZipArchiveReader::from_bytes(cut, ReaderOptions::default()).unwrap_err();
    assert!(err.is_format_error(), "{}", err);
}

#[test]
fn test_broken_central_signature() {
    let mut archive = stored_archive();
    let central = rfind(&archive, &[0x50, 0x4B, 0x01, 0x02]).unwrap();
    archive[central + 2] = 0x09;
    let err = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap_err();
    assert!(matches!(err.root(), OxiZipError::InvalidSignature { .. }), "{}", err);
}

#[test]
fn test_flipped_data_byte_fails_crc() {
    let mut archive = stored_archive();
    let data = find(&archive, &[b'b'; 300]).unwrap();
    archive[data + 150] = b'c';

    let reader = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap();
    assert_eq!(reader.read_entry(reader.entry(0).unwrap()).unwrap(), vec![b'a'; 300]);

    let second = reader.entry(1).unwrap();
    let err = reader.read_entry(second).unwrap_err();
    assert!(matches!(err.root(), OxiZipError::CrcMismatch { .. }), "{}", err);
    assert!(err.is_integrity_error());
    assert!(reader.test_entry(second).is_err());
}

#[test]
fn test_local_header_damage() {
    let mut archive = stored_archive();
    let second_local = rfind(&archive[..find(&archive, &[0x50, 0x4B, 0x01, 0x02]).unwrap()], &[0x50, 0x4B, 0x03, 0x04])
        .unwrap();
    archive[second_local] = 0;

    let reader = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap();
    let err = reader.read_entry(reader.entry(1).unwrap()).unwrap_err();
    assert!(err.is_format_error(), "{}", err);
    assert!(err.to_string().contains("second.txt"));
}

#[test]
fn test_spanned_archive_rejected() {
    let mut archive = stored_archive();
    let eocd = rfind(&archive, &[0x50, 0x4B, 0x05, 0x06]).unwrap();
    archive[eocd + 4] = 1;
    let err = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap_err();
    assert!(matches!(err, OxiZipError::InvalidHeader { .. }), "{}", err);
}

#[test]
fn test_extract_all_refuses_traversal() {
    let options = WriterOptions::default().with_store_directories(false);
    let writer = ZipArchiveWriter::new(Vec::new(), options).unwrap();
    writer.add_bytes("ok.txt", b"fine").unwrap();
    writer.add_bytes("zz/evil.txt", b"gotcha").unwrap();
    let mut archive = writer.into_inner().unwrap();

    // Rewrite the name in both the local and the central record.
    while let Some(at) = find(&archive, b"zz/evil.txt") {
        archive[at..at + 3].copy_from_slice(b"../");
    }

    let reader = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap();
    assert_eq!(reader.entries()[1].name(), "../evil.txt");

    let root = tempfile::tempdir().unwrap();
    let target = root.path().join("out");
    let err = reader.extract_all(&target).unwrap_err();
    assert!(matches!(err.root(), OxiZipError::PathTraversal { .. }), "{}", err);
    // Nothing is written, not even the harmless entry.
    assert!(!target.join("ok.txt").exists());
    assert!(!root.path().join("evil.txt").exists());
}

fn body(index: usize) -> Vec<u8> {
    format!("entry {:02} body ", index).repeat(40).into_bytes()
}

#[test]
fn test_extract_all_reports_the_corrupt_entry() {
    let options = WriterOptions::default()
        .with_compression(Compression::Stored)
        .with_store_directories(false);
    let writer = ZipArchiveWriter::new(Vec::new(), options).unwrap();
    for i in 0..50 {
        writer.add_bytes(&format!("batch/e{:02}.txt", i), &body(i)).unwrap();
    }
    let mut archive = writer.into_inner().unwrap();
    let at = find(&archive, &body(31)).unwrap();
    archive[at + 100] ^= 0x20;

    let reader =
        ZipArchiveReader::from_bytes(archive, ReaderOptions::default().with_parallelism(4))
            .unwrap();
    let target = tempfile::tempdir().unwrap();
    let err = reader.extract_all(target.path()).unwrap_err();

    // The sibling aborts must not replace the real failure.
    assert!(matches!(err.root(), OxiZipError::CrcMismatch { .. }), "{}", err);
    assert!(!err.is_cancelled());
    assert!(err.is_integrity_error());
    assert!(err.to_string().contains("batch/e31.txt"), "{}", err);
    assert!(!target.path().join("batch/e31.txt").exists());

    // Whatever was extracted before the failure is intact.
    for i in (0..50).filter(|&i| i != 31) {
        let path = target.path().join(format!("batch/e{:02}.txt", i));
        if path.exists() {
            assert_eq!(fs::read(&path).unwrap(), body(i));
        }
    }
}

#[cfg(unix)]
#[test]
fn test_add_directory_reports_unreadable_file() {
    let source = tempfile::tempdir().unwrap();
    for i in 0..30 {
        fs::write(source.path().join(format!("f{:02}.txt", i)), body(i)).unwrap();
    }
    // A dangling link is listed like a file but cannot be opened.
    std::os::unix::fs::symlink(source.path().join("missing"), source.path().join("f15-link.txt"))
        .unwrap();

    let options = WriterOptions::default().with_parallelism(4);
    let writer = ZipArchiveWriter::new(Vec::new(), options).unwrap();
    let err = writer.add_directory(source.path(), "src", &[]).unwrap_err();

    assert!(
        matches!(err.root(), OxiZipError::Io(e) if e.kind() == io::ErrorKind::NotFound),
        "{}",
        err
    );
    assert!(err.to_string().contains("src/f15-link.txt"), "{}", err);
}
