use oxizip_archive::zip::extra::{EXTRA_ZIP64, ExtraFieldMap, Zip64ExtraField};
use oxizip_archive::zip::header::{
    CentralDirectoryHeader, EndOfCentralDirectory, LocalFileHeader, ZIP64_MARKER_16,
    ZIP64_MARKER_32, Zip64EndOfCentralDirectory, Zip64EndOfCentralDirectoryLocator, needs_zip64,
    version_needed,
};
use oxizip_archive::zip::{
    Compression, ReaderOptions, TimestampMode, WriterOptions, ZipArchiveReader, ZipArchiveWriter,
};

const FOUR_GIB: u64 = 0x1_0000_0000;

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|window| window == needle)
}

#[test]
fn test_size_boundary() {
    let below = ZIP64_MARKER_32 as u64 - 1;
    let at = ZIP64_MARKER_32 as u64;

    assert!(!needs_zip64(below, below, below));
    assert!(needs_zip64(at, 0, 0));
    assert!(needs_zip64(0, at, 0));
    assert!(needs_zip64(0, 0, at));

    assert!(Zip64ExtraField::for_local(below, below).is_empty());
    let local = Zip64ExtraField::for_local(at, 10);
    assert_eq!(local.uncompressed_size, Some(at));
    assert_eq!(local.compressed_size, Some(10));

    let central = Zip64ExtraField::for_central(10, at, below);
    assert_eq!(central.uncompressed_size, None);
    assert_eq!(central.compressed_size, Some(at));
    assert_eq!(central.local_header_offset, None);
}

#[test]
fn test_offset_past_four_gib() {
    let options = WriterOptions::default()
        .with_compression(Compression::Stored)
        .with_store_directories(false)
        .with_timestamp_mode(TimestampMode::DosOnly);
    let writer = ZipArchiveWriter::with_offset(Vec::new(), FOUR_GIB, options).unwrap();
    writer.add_bytes("far.txt", b"far away").unwrap();
    writer.finish().unwrap();
    let reported = writer.zip_file_size();
    let out = writer.into_inner().unwrap();
    assert_eq!(reported, FOUR_GIB + out.len() as u64);

    // The local header has no offset slot, so it carries no Zip64 field,
    // but its version follows the central record's.
    let local = LocalFileHeader::read(&mut &out[..]).unwrap();
    assert!(local.extra.is_empty());
    assert_eq!(local.version_needed, version_needed::ZIP64);

    let central_at = rfind(&out, &[0x50, 0x4B, 0x01, 0x02]).unwrap();
    let central = CentralDirectoryHeader::read(&mut &out[central_at..]).unwrap();
    assert_eq!(central.local_header_offset, ZIP64_MARKER_32);
    assert_eq!(central.version_needed, version_needed::ZIP64);
    let extras = ExtraFieldMap::parse(&central.extra);
    let zip64 = Zip64ExtraField::parse(extras.get(EXTRA_ZIP64).unwrap(), false, false, true, false);
    assert_eq!(zip64.local_header_offset, Some(FOUR_GIB));

    let record_at = rfind(&out, &[0x50, 0x4B, 0x06, 0x06]).unwrap();
    let record = Zip64EndOfCentralDirectory::read(&mut &out[record_at..]).unwrap();
    assert_eq!(record.total_entries, 1);
    assert_eq!(record.cd_offset, FOUR_GIB + central_at as u64);

    let locator_at = rfind(&out, &[0x50, 0x4B, 0x06, 0x07]).unwrap();
    let locator = Zip64EndOfCentralDirectoryLocator::parse(&out[locator_at..]).unwrap();
    assert_eq!(locator.zip64_eocd_offset, FOUR_GIB + record_at as u64);

    let eocd_at = rfind(&out, &[0x50, 0x4B, 0x05, 0x06]).unwrap();
    let eocd = EndOfCentralDirectory::parse(&out[eocd_at..]).unwrap();
    assert_eq!(eocd.cd_offset, ZIP64_MARKER_32);
    assert_eq!(eocd.total_entries, 1);
}

#[test]
fn test_entry_count_triggers_zip64_end_records() {
    let count = ZIP64_MARKER_16 as usize;
    let options = WriterOptions::default()
        .with_compression(Compression::Stored)
        .with_store_directories(false)
        .with_timestamp_mode(TimestampMode::DosOnly);
    let writer = ZipArchiveWriter::new(Vec::new(), options).unwrap();
    for i in 0..count {
        writer.add_bytes(&format!("f{:05}", i), &[]).unwrap();
    }
    let archive = writer.into_inner().unwrap();

    let eocd_at = rfind(&archive[archive.len() - 64..], &[0x50, 0x4B, 0x05, 0x06]).unwrap();
    let eocd = EndOfCentralDirectory::parse(&archive[archive.len() - 64 + eocd_at..]).unwrap();
    assert_eq!(eocd.total_entries, ZIP64_MARKER_16);
    assert!(eocd.has_zip64_markers());

    let reader = ZipArchiveReader::from_bytes(archive.clone(), ReaderOptions::default()).unwrap();
    assert!(reader.is_zip64());
    assert_eq!(reader.len(), count);
    assert_eq!(reader.entries()[count - 1].name(), "f65534");
    assert!(reader.read_entry(&reader.entries()[40_000]).unwrap().is_empty());
    drop(reader);

    // Same archive behind a stub its offsets do not count.
    let mut prefixed = vec![0x4Du8; 4096];
    prefixed.extend_from_slice(&archive);
    let reader = ZipArchiveReader::from_bytes(prefixed, ReaderOptions::default()).unwrap();
    assert!(reader.is_zip64());
    assert_eq!(reader.len(), count);
    let last = &reader.entries()[count - 1];
    assert_eq!(last.name(), "f65534");
    assert!(last.local_header_offset() >= 4096);
    assert!(reader.read_entry(last).unwrap().is_empty());
}

#[test]
fn test_entry_count_below_limit_stays_classic() {
    let count = ZIP64_MARKER_16 as usize - 1;
    let options = WriterOptions::default()
        .with_compression(Compression::Stored)
        .with_store_directories(false)
        .with_timestamp_mode(TimestampMode::DosOnly);
    let writer = ZipArchiveWriter::new(Vec::new(), options).unwrap();
    for i in 0..count {
        writer.add_bytes(&format!("f{:05}", i), &[]).unwrap();
    }
    let archive = writer.into_inner().unwrap();

    assert!(rfind(&archive, &[0x50, 0x4B, 0x06, 0x07]).is_none());
    let eocd_at = archive.len() - 22;
    let eocd = EndOfCentralDirectory::parse(&archive[eocd_at..]).unwrap();
    assert_eq!(eocd.total_entries as usize, count);
    assert!(!eocd.has_zip64_markers());

    let reader = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap();
    assert!(!reader.is_zip64());
    assert_eq!(reader.len(), count);
}

/// Central record of the only entry of an archive written at `start`.
fn central_record_at(start: u64) -> CentralDirectoryHeader {
    let options = WriterOptions::default()
        .with_compression(Compression::Stored)
        .with_store_directories(false)
        .with_timestamp_mode(TimestampMode::DosOnly);
    let writer = ZipArchiveWriter::with_offset(Vec::new(), start, options).unwrap();
    writer.add_bytes("edge.txt", b"on the edge").unwrap();
    let out = writer.into_inner().unwrap();
    let central_at = rfind(&out, &[0x50, 0x4B, 0x01, 0x02]).unwrap();
    CentralDirectoryHeader::read(&mut &out[central_at..]).unwrap()
}

#[test]
fn test_written_offset_threshold() {
    let below = central_record_at(ZIP64_MARKER_32 as u64 - 1);
    assert_eq!(below.local_header_offset, ZIP64_MARKER_32 - 1);
    assert!(ExtraFieldMap::parse(&below.extra).get(EXTRA_ZIP64).is_none());
    assert_eq!(below.version_needed, version_needed::STORED);

    // An offset equal to the sentinel must already move to the extra field.
    let at = central_record_at(ZIP64_MARKER_32 as u64);
    assert_eq!(at.local_header_offset, ZIP64_MARKER_32);
    assert_eq!(at.version_needed, version_needed::ZIP64);
    let extras = ExtraFieldMap::parse(&at.extra);
    let zip64 = Zip64ExtraField::parse(extras.get(EXTRA_ZIP64).unwrap(), false, false, true, false);
    assert_eq!(zip64.local_header_offset, Some(ZIP64_MARKER_32 as u64));
    assert_eq!(zip64.uncompressed_size, None);
    assert_eq!(zip64.compressed_size, None);
    assert_eq!(at.compressed_size, 11);
}

#[test]
fn test_prefix_not_counted_in_offsets() {
    let options = WriterOptions::default();
    let writer = ZipArchiveWriter::new(Vec::new(), options).unwrap();
    writer.add_bytes("bin/first.txt", &b"first ".repeat(50)).unwrap();
    writer.add_bytes("bin/second.txt", &b"second ".repeat(50)).unwrap();
    let archive = writer.into_inner().unwrap();

    let mut prefixed = vec![0x4Du8; 777];
    prefixed.extend_from_slice(&archive);
    let reader = ZipArchiveReader::from_bytes(prefixed, ReaderOptions::default()).unwrap();
    assert_eq!(reader.len(), 3);
    assert_eq!(reader.entries()[0].name(), "bin/");
    assert_eq!(reader.entries()[0].local_header_offset(), 777);

    let second = reader.entry_by_name("bin/second.txt").unwrap();
    assert!(second.central_offset() > 777);
    assert_eq!(reader.read_entry(second).unwrap(), b"second ".repeat(50));
    assert_eq!(
        reader.read_entry(reader.entry_by_name("bin/first.txt").unwrap()).unwrap(),
        b"first ".repeat(50)
    );
}

#[test]
fn test_self_extractor_prefix() {
    let stub = vec![0x4Du8; 1024];
    let options = WriterOptions::default().with_store_directories(false);
    let writer = ZipArchiveWriter::with_offset(stub.clone(), stub.len() as u64, options).unwrap();
    writer.add_bytes("payload.txt", &b"run me ".repeat(100)).unwrap();
    let archive = writer.into_inner().unwrap();
    assert_eq!(&archive[..1024], &stub[..]);

    let reader = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap();
    let entry = reader.entry_by_name("payload.txt").unwrap();
    assert_eq!(entry.local_header_offset(), 1024);
    assert_eq!(reader.read_entry(entry).unwrap(), b"run me ".repeat(100));
}
