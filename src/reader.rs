//! Archive reader — open/validate, list, extract, verify.
//!
//! Opening parses the header from volume 0, reopens the archive as a split
//! set when the header says so, loads and (if needed) decrypts the metadata
//! trailer, and bounds-checks every entry against the data region before any
//! of them can be extracted. Extraction refuses entry names that would
//! escape the destination root (Zip-Slip) before touching the filesystem.

use filetime::FileTime;
use std::fs::{self, File};
use std::hash::Hasher;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use twox_hash::XxHash64;

use crate::crypto::{self, stream, KEY_SIZE, NONCE_SIZE};
use crate::error::{ChinError, Result};
use crate::header::{Header, HEADER_SIZE};
use crate::metadata::{FileEntry, Metadata};
use crate::split::{ArchiveSource, SplitReader};

const COPY_BUF_SIZE: usize = 64 * 1024;

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct ChinReader {
    source: ArchiveSource,
    header: Header,
    metadata: Metadata,
    master_key: Option<[u8; KEY_SIZE]>,
    /// Called once per entry before any of its bytes move.
    pub on_file_start: Option<Box<dyn FnMut(&str)>>,
    /// Called with the plaintext byte count of each extracted chunk.
    pub on_progress: Option<Box<dyn FnMut(usize)>>,
}

impl std::fmt::Debug for ChinReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChinReader")
            .field("source", &self.source)
            .field("header", &self.header)
            .field("metadata", &self.metadata)
            .field("master_key", &self.master_key)
            .field("on_file_start", &self.on_file_start.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl ChinReader {
    pub fn open<P: AsRef<Path>>(path: P, password: Option<&str>) -> Result<Self> {
        let path = path.as_ref();

        let mut file = File::open(path)?;
        let mut header_bytes = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_bytes)
            .map_err(|_| ChinError::InvalidFormat("truncated header".into()))?;
        let mut header = Header::read(&header_bytes[..])?;

        let mut source = if header.is_split() {
            drop(file);
            let mut split = ArchiveSource::Split(SplitReader::open(path)?);
            // Re-read the header through the virtual stream; the split view
            // is authoritative from here on.
            split.seek(SeekFrom::Start(0))?;
            split
                .read_exact(&mut header_bytes)
                .map_err(|_| ChinError::InvalidFormat("truncated header".into()))?;
            header = Header::read(&header_bytes[..])?;
            split
        } else {
            ArchiveSource::Single(file)
        };

        let total_size = source.total_size()?;
        if header.metadata_offset < HEADER_SIZE as u64 || header.metadata_offset > total_size {
            return Err(ChinError::OutOfRange(
                "metadata offset outside the archive".into(),
            ));
        }

        source.seek(SeekFrom::Start(header.metadata_offset))?;
        let mut trailer = Vec::new();
        source.read_to_end(&mut trailer)?;
        if trailer.is_empty() {
            return Err(ChinError::InvalidFormat("empty metadata".into()));
        }

        let master_key = if header.is_encrypted() {
            let password = password.unwrap_or("");
            Some(crypto::derive_master_key(password.as_bytes(), &header.salt))
        } else {
            None
        };

        let plaintext = match &master_key {
            Some(key) => {
                if trailer.len() < NONCE_SIZE {
                    return Err(ChinError::InvalidFormat(
                        "metadata too short for nonce".into(),
                    ));
                }
                crypto::open(key, &trailer)?
            }
            None => trailer,
        };

        let metadata = Metadata::deserialize(&plaintext)?;
        if metadata.file_count != header.file_count {
            return Err(ChinError::InvalidFormat(format!(
                "file count mismatch (header {} vs metadata {})",
                header.file_count, metadata.file_count
            )));
        }

        for entry in &metadata.files {
            if entry.is_dir {
                continue;
            }
            let stored_len = if master_key.is_some() {
                stream::encrypted_len(entry.size)
            } else {
                entry.size
            };
            let end = entry.offset.checked_add(stored_len);
            if entry.offset < HEADER_SIZE as u64
                || end.map_or(true, |end| end > header.metadata_offset)
            {
                return Err(ChinError::OutOfRange(format!(
                    "entry '{}' extends outside the data region",
                    entry.name
                )));
            }
        }

        Ok(Self {
            source,
            header,
            metadata,
            master_key,
            on_file_start: None,
            on_progress: None,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn list_files(&self) -> &[FileEntry] {
        &self.metadata.files
    }

    pub fn find_file(&self, name: &str) -> Option<&FileEntry> {
        self.metadata.files.iter().find(|e| e.name == name)
    }

    // ── Extraction ───────────────────────────────────────────────────────────

    /// Extract one entry under `dest_root`, verifying its checksum when
    /// `verify` is set.
    ///
    /// The entry name is resolved lexically against the destination root
    /// before anything is written; names escaping the root fail with
    /// [`ChinError::SecurityError`].
    pub fn extract_file(&mut self, entry: &FileEntry, dest_root: &Path, verify: bool) -> Result<()> {
        let root = normalize_path(&absolutize(dest_root)?);
        let full_path = normalize_path(&root.join(relative_entry_path(&entry.name)));
        if full_path != root && !full_path.starts_with(&root) {
            return Err(ChinError::SecurityError(entry.name.clone()));
        }

        if entry.is_dir {
            fs::create_dir_all(&full_path)?;
            set_mode(&full_path, entry.mode)?;
            return Ok(());
        }

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        remove_existing(&full_path)?;

        if let Some(cb) = self.on_file_start.as_mut() {
            cb(&entry.name);
        }

        let mut out = File::create(&full_path)?;
        self.source.seek(SeekFrom::Start(entry.offset))?;

        let mut hasher = XxHash64::with_seed(0);
        if let Some(key) = self.master_key {
            let dst = HashingWriter {
                inner: &mut out,
                hasher: &mut hasher,
                progress: self.on_progress.as_mut(),
            };
            stream::decrypt_stream(&mut self.source, dst, &key, entry.size)?;
        } else {
            copy_plain(
                &mut self.source,
                &mut out,
                &mut hasher,
                self.on_progress.as_mut(),
                entry.size,
            )?;
        }

        if verify && hasher.finish() != entry.checksum {
            return Err(ChinError::ChecksumMismatch);
        }

        // Close before touching attributes, then mode, then times.
        drop(out);
        set_mode(&full_path, entry.mode)?;
        let mtime = FileTime::from_unix_time(entry.mod_time as i64, 0);
        filetime::set_file_mtime(&full_path, mtime)?;
        Ok(())
    }

    /// Extract every entry in trailer order; directories precede their
    /// contents by writer construction.
    pub fn extract_all(&mut self, dest_root: &Path, verify: bool) -> Result<()> {
        let entries = self.metadata.files.clone();
        for entry in &entries {
            self.extract_file(entry, dest_root, verify)?;
        }
        Ok(())
    }

    // ── Verification ─────────────────────────────────────────────────────────

    /// Recompute the BLAKE3 over the data region as stored, then every
    /// entry's XXH64 over its plaintext (decrypting on the fly for encrypted
    /// archives).
    pub fn verify(&mut self) -> Result<()> {
        self.source.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        let mut region_hasher = blake3::Hasher::new();
        let mut remaining = self.header.metadata_offset - HEADER_SIZE as u64;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.source.read(&mut buf[..want])?;
            if n == 0 {
                return Err(ChinError::TruncatedArchive(
                    "data region ended before the metadata offset".into(),
                ));
            }
            region_hasher.update(&buf[..n]);
            remaining -= n as u64;
        }
        if <[u8; 32]>::from(region_hasher.finalize()) != self.header.data_checksum {
            return Err(ChinError::ChecksumMismatch);
        }

        let entries = self.metadata.files.clone();
        let master_key = self.master_key;
        for entry in entries.iter().filter(|e| !e.is_dir) {
            self.source.seek(SeekFrom::Start(entry.offset))?;
            let mut hasher = XxHash64::with_seed(0);
            match master_key {
                Some(key) => {
                    let dst = HashingWriter {
                        inner: io::sink(),
                        hasher: &mut hasher,
                        progress: None,
                    };
                    stream::decrypt_stream(&mut self.source, dst, &key, entry.size)?;
                }
                None => copy_plain(
                    &mut self.source,
                    &mut io::sink(),
                    &mut hasher,
                    None,
                    entry.size,
                )?,
            }
            if hasher.finish() != entry.checksum {
                return Err(ChinError::ChecksumMismatch);
            }
        }
        Ok(())
    }
}

// ── Streaming helpers ────────────────────────────────────────────────────────

fn copy_plain<R: Read, W: Write>(
    src: &mut R,
    dst: &mut W,
    hasher: &mut XxHash64,
    mut progress: Option<&mut Box<dyn FnMut(usize)>>,
    size: u64,
) -> Result<()> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = src.read(&mut buf[..want])?;
        if n == 0 {
            return Err(ChinError::TruncatedArchive(
                "entry payload ended early".into(),
            ));
        }
        dst.write_all(&buf[..n])?;
        hasher.write(&buf[..n]);
        if let Some(cb) = progress.as_mut() {
            cb(n);
        }
        remaining -= n as u64;
    }
    Ok(())
}

/// Observes plaintext leaving the decryptor.
struct HashingWriter<'a, W> {
    inner: W,
    hasher: &'a mut XxHash64,
    progress: Option<&'a mut Box<dyn FnMut(usize)>>,
}

impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.write(&buf[..n]);
        if let Some(cb) = self.progress.as_mut() {
            cb(n);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── Path handling ────────────────────────────────────────────────────────────

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_owned())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Resolve `.` and `..` components lexically, without touching the
/// filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Entry names are stored `/`-separated; rebuild a relative path with the
/// platform separator. Empty segments (and thus leading slashes) drop out.
fn relative_entry_path(name: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for segment in name.split('/').filter(|s| !s.is_empty()) {
        out.push(segment);
    }
    out
}

fn remove_existing(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(_) => {
            // Read-only target: relax the mode, then retry once.
            let _ = set_mode(path, 0o666);
            fs::remove_file(path)?;
            Ok(())
        }
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
