use oxizip_archive::zip::{
    Compression, CompressionMethod, Encryption, EntryTimes, ReaderOptions, TimestampMode,
    WriterOptions, ZipArchiveReader, ZipArchiveWriter, encoding_for_label,
};
use oxizip_core::OxiZipError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const PASSWORD: &str = "correct horse";

fn sample_files() -> Vec<(&'static str, Vec<u8>)> {
    let mut noisy = Vec::with_capacity(96 * 1024);
    let mut seed: u32 = 0x2545F491;
    for _ in 0..96 * 1024 {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        noisy.push(seed as u8);
    }
    vec![
        ("readme.txt", b"Hello, ZIP!\n".to_vec()),
        ("docs/long.txt", "The quick brown fox. ".repeat(10_000).into_bytes()),
        ("docs/noise.bin", noisy),
        ("empty.dat", Vec::new()),
    ]
}

fn build(options: WriterOptions) -> Vec<u8> {
    let writer = ZipArchiveWriter::new(Vec::new(), options).unwrap();
    for (name, data) in sample_files() {
        writer.add_bytes(name, &data).unwrap();
    }
    writer.into_inner().unwrap()
}

#[test]
fn test_roundtrip_matrix() {
    let encryptions = [
        Encryption::None,
        Encryption::Traditional,
        Encryption::Aes128,
        Encryption::Aes192,
        Encryption::Aes256,
    ];
    for compression in [Compression::Stored, Compression::Deflate] {
        for encryption in encryptions {
            let mut options = WriterOptions::default()
                .with_compression(compression)
                .with_encryption(encryption);
            if encryption.is_encrypted() {
                options = options.with_password(PASSWORD);
            }
            let archive = build(options);

            let reader =
                ZipArchiveReader::from_bytes(archive, ReaderOptions::default().with_password(PASSWORD))
                    .unwrap();
            let names: Vec<&str> = reader.entries().iter().map(|e| e.name()).collect();
            assert_eq!(
                names,
                vec!["readme.txt", "docs/", "docs/long.txt", "docs/noise.bin", "empty.dat"],
                "{:?}/{:?}",
                compression,
                encryption
            );

            for (name, data) in sample_files() {
                let entry = reader.entry_by_name(name).unwrap();
                assert_eq!(reader.read_entry(entry).unwrap(), data, "{} {:?}/{:?}", name, compression, encryption);
                assert_eq!(entry.uncompressed_size(), data.len() as u64);
                if data.is_empty() {
                    assert!(!entry.is_encrypted());
                    assert_eq!(entry.method(), CompressionMethod::Stored);
                    continue;
                }
                assert_eq!(entry.is_encrypted(), encryption.is_encrypted());
                if encryption.aes_strength().is_some() {
                    assert_eq!(entry.method(), CompressionMethod::Aes);
                    assert_eq!(entry.aes().unwrap().unwrap().strength, encryption.aes_strength().unwrap());
                }
            }
        }
    }
}

#[test]
fn test_deflate_shrinks_text_but_not_noise() {
    let archive = build(WriterOptions::default());
    let reader = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap();

    let long = reader.entry_by_name("docs/long.txt").unwrap();
    assert_eq!(long.data_method().unwrap(), CompressionMethod::Deflate);
    assert!(long.compressed_size() < long.uncompressed_size() / 10);

    let noise = reader.entry_by_name("docs/noise.bin").unwrap();
    assert!(noise.compressed_size() + 1024 > noise.uncompressed_size());
}

#[test]
fn test_wrong_password_is_integrity_error() {
    for encryption in [Encryption::Traditional, Encryption::Aes256] {
        // Stored, so a wrong key that slips past the check byte ends in a
        // CRC mismatch rather than a deflate stream error.
        let archive = build(
            WriterOptions::default()
                .with_compression(Compression::Stored)
                .with_encryption(encryption)
                .with_password(PASSWORD),
        );
        let reader =
            ZipArchiveReader::from_bytes(archive, ReaderOptions::default().with_password("nope"))
                .unwrap();
        let entry = reader.entry_by_name("docs/long.txt").unwrap();
        let err = reader.read_entry(entry).unwrap_err();
        assert!(err.is_integrity_error(), "{:?}: {}", encryption, err);
        assert!(err.to_string().contains("docs/long.txt"));
    }
}

#[test]
fn test_missing_password() {
    let archive = build(
        WriterOptions::default()
            .with_encryption(Encryption::Aes128)
            .with_password(PASSWORD),
    );
    let reader = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap();
    let entry = reader.entry_by_name("readme.txt").unwrap();
    let err = reader.read_entry(entry).unwrap_err();
    assert!(matches!(err.root(), OxiZipError::PasswordRequired { .. }));
    assert!(!err.is_integrity_error());
}

#[test]
fn test_verify_before_output_roundtrip() {
    let archive = build(
        WriterOptions::default()
            .with_encryption(Encryption::Aes256)
            .with_password(PASSWORD),
    );
    let options = ReaderOptions::default()
        .with_password(PASSWORD)
        .with_verify_before_output(true);
    let reader = ZipArchiveReader::from_bytes(archive, options).unwrap();
    for (name, data) in sample_files() {
        let entry = reader.entry_by_name(name).unwrap();
        assert_eq!(reader.read_entry(entry).unwrap(), data);
    }
}

#[test]
fn test_comment_and_levels() {
    let options = WriterOptions::default()
        .with_comment("built by the test suite")
        .with_level(oxizip_archive::zip::DeflateLevel::SmallestSize);
    let archive = build(options);
    let reader = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap();
    assert_eq!(reader.comment(), "built by the test suite");
    assert!(!reader.is_zip64());
    let entry = reader.entry_by_name("docs/long.txt").unwrap();
    assert_eq!(entry.header().flags & 0b110, 0b010);
}

#[test]
fn test_timestamps_by_mode() {
    // Even second, after 1980, with a sub-second part NTFS keeps.
    let when = UNIX_EPOCH + Duration::from_secs(1_600_000_000) + Duration::from_millis(250);
    for mode in [
        TimestampMode::DosOnly,
        TimestampMode::Ntfs,
        TimestampMode::Extended,
        TimestampMode::Both,
    ] {
        let writer = ZipArchiveWriter::new(
            Vec::new(),
            WriterOptions::default().with_timestamp_mode(mode),
        )
        .unwrap();
        writer
            .add_entry("t.txt", &b"time"[..], Some(4), EntryTimes::uniform(when))
            .unwrap();
        let archive = writer.into_inner().unwrap();
        let reader = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap();
        let entry = reader.entry_by_name("t.txt").unwrap();

        let error = |got: SystemTime| match got.duration_since(when) {
            Ok(d) => d,
            Err(e) => e.duration(),
        };
        let tolerance = match mode {
            TimestampMode::DosOnly => Duration::from_secs(2),
            TimestampMode::Extended => Duration::from_secs(1),
            TimestampMode::Ntfs | TimestampMode::Both => Duration::from_micros(1),
        };
        assert!(error(entry.modified()) <= tolerance, "{:?}", mode);
        if mode.writes_ntfs() {
            assert!(error(entry.created()) <= tolerance);
            assert!(error(entry.accessed()) <= tolerance);
        }
    }
}

#[test]
fn test_codepage_names_roundtrip() {
    let shift_jis = encoding_for_label("shift_jis").unwrap();
    let writer = ZipArchiveWriter::new(
        Vec::new(),
        WriterOptions::default()
            .with_encoding(shift_jis)
            .with_store_directories(false),
    )
    .unwrap();
    writer.add_bytes("日本語.txt", b"nihongo").unwrap();
    writer.add_bytes("caf\u{e9}\u{1F600}.txt", b"emoji").unwrap();
    let archive = writer.into_inner().unwrap();

    // Reading with the same codepage recovers the first name from the raw
    // bytes; the second only survives through the unicode path field.
    let reader = ZipArchiveReader::from_bytes(
        archive.clone(),
        ReaderOptions::default().with_encoding(shift_jis),
    )
    .unwrap();
    assert_eq!(reader.entries()[0].name(), "日本語.txt");
    assert!(!reader.entries()[0].header().is_utf8());
    assert_eq!(reader.entries()[1].name(), "caf\u{e9}\u{1F600}.txt");
    assert_eq!(
        reader.read_entry(reader.entry_by_name("caf\u{e9}\u{1F600}.txt").unwrap()).unwrap(),
        b"emoji"
    );

    // A reader guessing the wrong codepage still gets both names from the
    // unicode path fields.
    let reader = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap();
    assert_eq!(reader.entries()[0].name(), "日本語.txt");
}

#[test]
fn test_file_and_stream_sources() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.zip");
    std::fs::write(&path, build(WriterOptions::default())).unwrap();

    let from_file = ZipArchiveReader::open(&path, ReaderOptions::default()).unwrap();
    let from_stream = ZipArchiveReader::from_reader(
        std::fs::File::open(&path).unwrap(),
        ReaderOptions::default().with_temp_dir(dir.path()),
    )
    .unwrap();

    for reader in [&from_file, &from_stream] {
        assert_eq!(reader.len(), 5);
        let entry = reader.entry_by_name("docs/long.txt").unwrap();
        assert_eq!(reader.read_entry(entry).unwrap().len(), 21 * 10_000);
        for entry in reader.entries() {
            reader.test_entry(entry).unwrap();
        }
    }
}
