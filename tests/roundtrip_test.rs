use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use chin::{ChinError, ChinReader, ChinWriter, HEADER_SIZE};

fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, data).unwrap();
    path
}

fn set_mtime(path: &Path, unix_secs: u64) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(UNIX_EPOCH + Duration::from_secs(unix_secs))
        .unwrap();
}

fn metadata_offset(archive_bytes: &[u8]) -> u64 {
    u64::from_be_bytes(archive_bytes[16..24].try_into().unwrap())
}

#[test]
fn single_file_archive_layout() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_file(dir.path(), "hello.txt", b"hello, world!");
    let out = dir.path().join("out.chin");

    let mut writer = ChinWriter::create(&out, None, None).unwrap();
    writer.add_path(&src, "hello.txt").unwrap();
    writer.finalize().unwrap();

    let bytes = fs::read(&out).unwrap();
    assert_eq!(&bytes[0..4], b"CHIN");
    assert_eq!(&bytes[4..6], &[0x00, 0x06]);
    assert_eq!(&bytes[6..8], &[0x00, 0x00]);
    assert!(bytes[56..72].iter().all(|&b| b == 0), "salt must be zeroed");

    assert_eq!(&bytes[8..16], &1u64.to_be_bytes());
    assert_eq!(metadata_offset(&bytes), (HEADER_SIZE + 13) as u64);
    assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + 13], b"hello, world!");

    let expected: [u8; 32] = blake3::hash(b"hello, world!").into();
    assert_eq!(&bytes[24..56], &expected);

    let mut reader = ChinReader::open(&out, None).unwrap();
    let files = reader.list_files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "hello.txt");
    assert_eq!(files[0].size, 13);
    assert_eq!(files[0].offset, HEADER_SIZE as u64);
    assert!(!files[0].is_dir);

    reader.verify().unwrap();

    let dest = dir.path().join("dest");
    reader.extract_all(&dest, true).unwrap();
    assert_eq!(fs::read(dest.join("hello.txt")).unwrap(), b"hello, world!");
}

#[test]
fn directory_tree_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");

    let a = write_file(&root, "a.txt", b"alpha contents");
    let b = write_file(&root, "sub/b.bin", &[0u8, 1, 2, 0, 255, 0, 42]);
    let empty = write_file(&root, "empty.txt", b"");
    fs::create_dir_all(root.join("emptydir")).unwrap();

    set_mtime(&a, 1_700_000_000);
    set_mtime(&b, 1_700_000_001);
    set_mtime(&empty, 1_700_000_002);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&a, fs::Permissions::from_mode(0o640)).unwrap();
    }

    let out = dir.path().join("tree.chin");
    let mut writer = ChinWriter::create(&out, None, None).unwrap();
    writer.add_path(&root, "root").unwrap();
    writer.finalize().unwrap();

    let mut reader = ChinReader::open(&out, None).unwrap();
    // The directory entry comes before everything it contains.
    assert_eq!(reader.list_files()[0].name, "root");
    assert!(reader.list_files()[0].is_dir);

    let dest = dir.path().join("dest");
    reader.extract_all(&dest, true).unwrap();

    assert_eq!(fs::read(dest.join("root/a.txt")).unwrap(), b"alpha contents");
    assert_eq!(
        fs::read(dest.join("root/sub/b.bin")).unwrap(),
        [0u8, 1, 2, 0, 255, 0, 42]
    );
    assert_eq!(fs::read(dest.join("root/empty.txt")).unwrap(), b"");
    assert!(dest.join("root/emptydir").is_dir());

    let mtime = |p: &Path| {
        fs::metadata(p)
            .unwrap()
            .modified()
            .unwrap()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    };
    assert_eq!(mtime(&dest.join("root/a.txt")), 1_700_000_000);
    assert_eq!(mtime(&dest.join("root/sub/b.bin")), 1_700_000_001);
    assert_eq!(mtime(&dest.join("root/empty.txt")), 1_700_000_002);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(dest.join("root/a.txt"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o640);
    }
}

#[test]
fn encrypted_roundtrip_and_wrong_password() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_file(dir.path(), "hello.txt", b"hello, world!");
    let out = dir.path().join("secret.chin");

    let mut writer = ChinWriter::create(&out, Some("correct horse"), None).unwrap();
    writer.add_path(&src, "hello.txt").unwrap();
    writer.finalize().unwrap();

    let bytes = fs::read(&out).unwrap();
    assert_eq!(&bytes[6..8], &[0x00, 0x01], "encrypted flag");
    assert!(
        bytes[56..72].iter().any(|&b| b != 0),
        "master salt must be random"
    );
    // salt(16) + nonce(12) + tag(16) on top of the 13 plaintext bytes.
    let stored = metadata_offset(&bytes) - HEADER_SIZE as u64;
    assert!(stored >= 13 + 16 + 12 + 16);
    // Ciphertext, not plaintext, on disk.
    assert!(!bytes
        .windows(13)
        .any(|window| window == b"hello, world!"));

    let err = ChinReader::open(&out, Some("wrong horse")).unwrap_err();
    assert!(matches!(err, ChinError::InvalidPassword));

    let mut reader = ChinReader::open(&out, Some("correct horse")).unwrap();
    reader.verify().unwrap();

    let dest = dir.path().join("dest");
    reader.extract_all(&dest, true).unwrap();
    assert_eq!(fs::read(dest.join("hello.txt")).unwrap(), b"hello, world!");
}

#[test]
fn split_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("dir");
    write_file(&root, "a", &[0xAA; 100]);
    write_file(&root, "b", &[0xBB; 100]);

    let out = dir.path().join("out.chin");
    let mut writer = ChinWriter::create(&out, None, Some(150)).unwrap();
    writer.add_path(&root, "dir").unwrap();
    writer.finalize().unwrap();

    assert_eq!(fs::metadata(&out).unwrap().len(), 150);
    let c01 = dir.path().join("out.chin.c01");
    assert!(c01.exists());

    let volume0 = fs::read(&out).unwrap();
    assert_eq!(&volume0[6..8], &[0x00, 0x02], "split flag");

    let dest = dir.path().join("dest");
    let mut reader = ChinReader::open(&out, None).unwrap();
    reader.verify().unwrap();
    reader.extract_all(&dest, true).unwrap();
    assert_eq!(fs::read(dest.join("dir/a")).unwrap(), [0xAA; 100]);
    assert_eq!(fs::read(dest.join("dir/b")).unwrap(), [0xBB; 100]);

    // The split archive's data region matches the unsplit form byte for byte.
    let unsplit = dir.path().join("plain.chin");
    let mut writer = ChinWriter::create(&unsplit, None, None).unwrap();
    writer.add_path(&root, "dir").unwrap();
    writer.finalize().unwrap();

    let mut joined = volume0;
    joined.extend(fs::read(&c01).unwrap());
    let unsplit_bytes = fs::read(&unsplit).unwrap();
    let end = metadata_offset(&unsplit_bytes) as usize;
    assert_eq!(joined[HEADER_SIZE..end], unsplit_bytes[HEADER_SIZE..end]);
}

#[test]
fn split_flag_clear_when_no_rotation_happens() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_file(dir.path(), "small.txt", b"fits in one volume");
    let out = dir.path().join("out.chin");

    let mut writer = ChinWriter::create(&out, None, Some(1024 * 1024)).unwrap();
    writer.add_path(&src, "small.txt").unwrap();
    writer.finalize().unwrap();

    assert!(!dir.path().join("out.chin.c01").exists());
    let bytes = fs::read(&out).unwrap();
    assert_eq!(&bytes[6..8], &[0x00, 0x00]);

    let mut reader = ChinReader::open(&out, None).unwrap();
    reader.verify().unwrap();
}

#[test]
fn data_tamper_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_file(dir.path(), "data.bin", &[7u8; 4096]);
    let out = dir.path().join("out.chin");

    let mut writer = ChinWriter::create(&out, None, None).unwrap();
    writer.add_path(&src, "data.bin").unwrap();
    writer.finalize().unwrap();

    let mut bytes = fs::read(&out).unwrap();
    bytes[HEADER_SIZE + 100] ^= 0x01;
    fs::write(&out, &bytes).unwrap();

    let mut reader = ChinReader::open(&out, None).unwrap();
    assert!(matches!(
        reader.verify().unwrap_err(),
        ChinError::ChecksumMismatch
    ));

    let dest = dir.path().join("dest");
    assert!(matches!(
        reader.extract_all(&dest, true).unwrap_err(),
        ChinError::ChecksumMismatch
    ));
}

#[test]
fn encrypted_data_tamper_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let src = write_file(dir.path(), "x.bin", &payload);
    let out = dir.path().join("out.chin");

    let mut writer = ChinWriter::create(&out, Some("pw"), None).unwrap();
    writer.add_path(&src, "x.bin").unwrap();
    writer.finalize().unwrap();

    let mut bytes = fs::read(&out).unwrap();
    bytes[1000] ^= 0x01;
    fs::write(&out, &bytes).unwrap();

    let mut reader = ChinReader::open(&out, Some("pw")).unwrap();
    let err = reader.verify().unwrap_err();
    assert!(matches!(
        err,
        ChinError::ChecksumMismatch | ChinError::InvalidPassword
    ));
}

#[test]
fn encrypted_trailer_tamper_is_invalid_password() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_file(dir.path(), "hello.txt", b"hello, world!");
    let out = dir.path().join("out.chin");

    let mut writer = ChinWriter::create(&out, Some("pw"), None).unwrap();
    writer.add_path(&src, "hello.txt").unwrap();
    writer.finalize().unwrap();

    let mut bytes = fs::read(&out).unwrap();
    let trailer_start = metadata_offset(&bytes) as usize;
    bytes[trailer_start + 20] ^= 0x01;
    fs::write(&out, &bytes).unwrap();

    assert!(matches!(
        ChinReader::open(&out, Some("pw")).unwrap_err(),
        ChinError::InvalidPassword
    ));
}

#[test]
fn salts_are_fresh_per_archive() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_file(dir.path(), "same.txt", b"identical input");

    let out1 = dir.path().join("one.chin");
    let out2 = dir.path().join("two.chin");
    for out in [&out1, &out2] {
        let mut writer = ChinWriter::create(out, Some("pw"), None).unwrap();
        writer.add_path(&src, "same.txt").unwrap();
        writer.finalize().unwrap();
    }

    let a = fs::read(&out1).unwrap();
    let b = fs::read(&out2).unwrap();
    assert_ne!(&a[56..72], &b[56..72], "master salts must differ");

    let end_a = metadata_offset(&a) as usize;
    let end_b = metadata_offset(&b) as usize;
    assert_ne!(
        &a[HEADER_SIZE..end_a],
        &b[HEADER_SIZE..end_b],
        "ciphertext must differ"
    );
}

#[test]
fn archive_artifacts_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("stuff");
    write_file(&root, "keep.txt", b"kept");
    write_file(&root, "old.chin", b"not an archive really");
    write_file(&root, "old.chin.c01", b"continuation");

    let out = dir.path().join("out.chin");
    let mut writer = ChinWriter::create(&out, None, None).unwrap();
    writer.add_path(&root, "stuff").unwrap();
    writer.finalize().unwrap();

    let reader = ChinReader::open(&out, None).unwrap();
    let names: Vec<&str> = reader.list_files().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["stuff", "stuff/keep.txt"]);
}

#[test]
fn offsets_are_monotone_and_disjoint() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    write_file(&root, "a.bin", &[1u8; 300]);
    write_file(&root, "b.bin", &[2u8; 150]);
    write_file(&root, "c.bin", &[3u8; 77]);

    let out = dir.path().join("out.chin");
    let mut writer = ChinWriter::create(&out, None, None).unwrap();
    writer.add_path(&root, "root").unwrap();
    writer.finalize().unwrap();

    let reader = ChinReader::open(&out, None).unwrap();
    let files: Vec<_> = reader.list_files().iter().filter(|e| !e.is_dir).collect();
    assert_eq!(files.len(), 3);
    assert_eq!(files[0].offset, HEADER_SIZE as u64);
    for pair in files.windows(2) {
        assert!(pair[0].offset + pair[0].size <= pair[1].offset);
        assert!(pair[0].offset < pair[1].offset);
    }
    let last = files.last().unwrap();
    assert_eq!(
        last.offset + last.size,
        reader.header().metadata_offset
    );
}

#[test]
fn find_file_is_byte_exact() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_file(dir.path(), "hello.txt", b"hi");
    let out = dir.path().join("out.chin");

    let mut writer = ChinWriter::create(&out, None, None).unwrap();
    writer.add_path(&src, "hello.txt").unwrap();
    writer.finalize().unwrap();

    let mut reader = ChinReader::open(&out, None).unwrap();
    assert!(reader.find_file("hello.txt").is_some());
    assert!(reader.find_file("HELLO.txt").is_none());
    assert!(reader.find_file("hello").is_none());

    let entry = reader.find_file("hello.txt").unwrap().clone();
    let dest = dir.path().join("dest");
    reader.extract_file(&entry, &dest, true).unwrap();
    assert_eq!(fs::read(dest.join("hello.txt")).unwrap(), b"hi");
}

#[test]
fn encrypted_split_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    let payload: Vec<u8> = (0..2048u32).map(|i| (i % 253) as u8).collect();
    write_file(&root, "data.bin", &payload);

    let out = dir.path().join("out.chin");
    let mut writer = ChinWriter::create(&out, Some("both modes"), Some(512)).unwrap();
    writer.add_path(&root, "root").unwrap();
    writer.finalize().unwrap();

    assert!(dir.path().join("out.chin.c01").exists());

    let mut reader = ChinReader::open(&out, Some("both modes")).unwrap();
    reader.verify().unwrap();
    let dest = dir.path().join("dest");
    reader.extract_all(&dest, true).unwrap();
    assert_eq!(fs::read(dest.join("root/data.bin")).unwrap(), payload);
}

#[test]
fn overwrites_readonly_target() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_file(dir.path(), "f.txt", b"new contents");
    let out = dir.path().join("out.chin");

    let mut writer = ChinWriter::create(&out, None, None).unwrap();
    writer.add_path(&src, "f.txt").unwrap();
    writer.finalize().unwrap();

    let dest = dir.path().join("dest");
    let existing = write_file(&dest, "f.txt", b"old");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&existing, fs::Permissions::from_mode(0o444)).unwrap();
    }
    let _ = existing;

    let mut reader = ChinReader::open(&out, None).unwrap();
    reader.extract_all(&dest, true).unwrap();
    assert_eq!(fs::read(dest.join("f.txt")).unwrap(), b"new contents");
}
