//! Archive writer — walks inputs, streams payloads, finalizes the container.
//!
//! Protocol: a placeholder header goes out first so payloads can stream
//! without knowing offsets in advance. Every file is hashed twice on the way
//! through: XXH64 over the plaintext for the entry checksum, BLAKE3 over the
//! bytes as written to disk (ciphertext when encrypting) for the data-region
//! checksum. `finalize` writes the metadata trailer, then seeks back to
//! offset 0 and rewrites the header with the real counts and offsets.

use chrono::Utc;
use std::fs::{self, File};
use std::hash::Hasher;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use twox_hash::XxHash64;

use crate::crypto::{self, stream, KEY_SIZE, SALT_SIZE};
use crate::error::{ChinError, Result};
use crate::header::{Header, FLAG_ENCRYPTED, FLAG_SPLIT, HEADER_SIZE, VERSION};
use crate::metadata::{FileEntry, Metadata, MAX_NAME_LEN};
use crate::split::ArchiveSink;

const COPY_BUF_SIZE: usize = 64 * 1024;

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct ChinWriter {
    sink: ArchiveSink,
    data_offset: u64,
    data_hasher: blake3::Hasher,
    metadata: Metadata,
    master_key: Option<[u8; KEY_SIZE]>,
    salt: [u8; SALT_SIZE],
    /// Called once per entry before any of its bytes move.
    pub on_file_start: Option<Box<dyn FnMut(&str)>>,
    /// Called with the byte count of each chunk committed to the sink.
    pub on_progress: Option<Box<dyn FnMut(usize)>>,
}

impl ChinWriter {
    /// Create the output (single file, or split volumes when `split_size` is
    /// set), derive the master key when a password is given, and write the
    /// placeholder header.
    pub fn create<P: AsRef<Path>>(
        path: P,
        password: Option<&str>,
        split_size: Option<u64>,
    ) -> Result<Self> {
        let mut sink = ArchiveSink::create(path.as_ref(), split_size)?;

        let (salt, master_key) = match password {
            Some(pw) if !pw.is_empty() => {
                let salt = crypto::generate_salt();
                (salt, Some(crypto::derive_master_key(pw.as_bytes(), &salt)))
            }
            _ => ([0u8; SALT_SIZE], None),
        };

        let mut flags = 0u16;
        if master_key.is_some() {
            flags |= FLAG_ENCRYPTED;
        }
        if split_size.is_some() {
            flags |= FLAG_SPLIT;
        }
        Header::placeholder(flags, salt).write(&mut sink)?;

        Ok(Self {
            sink,
            data_offset: HEADER_SIZE as u64,
            data_hasher: blake3::Hasher::new(),
            metadata: Metadata {
                version: VERSION,
                file_count: 0,
                created_at: Utc::now().timestamp().max(0) as u64,
                data_checksum: [0u8; 32],
                files: Vec::new(),
            },
            master_key,
            salt,
            on_file_start: None,
            on_progress: None,
        })
    }

    /// Add a file or directory tree under the archive-relative `name`.
    ///
    /// Inputs that look like chin archives (`*.chin`, or any volume of a
    /// split set) are silently skipped so an archive never packs itself.
    pub fn add_path<P: AsRef<Path>>(&mut self, path: P, name: &str) -> Result<()> {
        let path = path.as_ref();

        let lower = path.to_string_lossy().to_lowercase();
        if lower.ends_with(".chin") || lower.contains(".chin.c") {
            tracing::debug!(path = %path.display(), "skipping archive artifact");
            return Ok(());
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ChinError::NameTooLong(name.len()));
        }

        let info = fs::metadata(path)?;
        if info.is_dir() {
            self.add_directory(path, name, &info)
        } else {
            self.add_single_file(path, name, &info)
        }
    }

    fn add_directory(&mut self, path: &Path, name: &str, info: &fs::Metadata) -> Result<()> {
        self.metadata.files.push(FileEntry {
            name: name.to_owned(),
            size: 0,
            offset: 0,
            checksum: 0,
            mode: mode_bits(info),
            mod_time: mod_time_secs(info),
            is_dir: true,
        });
        self.metadata.file_count += 1;

        // Sort children so enumeration is deterministic across platforms.
        let mut children: Vec<_> = fs::read_dir(path)?.collect::<std::io::Result<_>>()?;
        children.sort_by_key(|entry| entry.file_name());

        for child in children {
            let child_name = child.file_name().to_string_lossy().into_owned();
            self.add_path(child.path(), &format!("{name}/{child_name}"))?;
        }
        Ok(())
    }

    fn add_single_file(&mut self, path: &Path, name: &str, info: &fs::Metadata) -> Result<()> {
        if let Some(cb) = self.on_file_start.as_mut() {
            cb(name);
        }

        let mut file = File::open(path)?;
        let offset = self.data_offset;
        let size = info.len();

        let mut plain_hasher = XxHash64::with_seed(0);
        let total_written;

        if let Some(key) = self.master_key {
            let tee = TeeReader {
                inner: &mut file,
                hasher: &mut plain_hasher,
            };
            let dst = SinkWriter {
                sink: &mut self.sink,
                hasher: &mut self.data_hasher,
                progress: self.on_progress.as_mut(),
            };
            total_written = stream::encrypt_stream(tee, dst, &key)?;
        } else {
            let mut buf = vec![0u8; COPY_BUF_SIZE];
            let mut copied = 0u64;
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                self.sink.write_all(&buf[..n])?;
                self.data_hasher.update(&buf[..n]);
                plain_hasher.write(&buf[..n]);
                if let Some(cb) = self.on_progress.as_mut() {
                    cb(n);
                }
                copied += n as u64;
            }
            total_written = copied;
        }

        self.metadata.files.push(FileEntry {
            name: name.to_owned(),
            size,
            offset,
            checksum: plain_hasher.finish(),
            mode: mode_bits(info),
            mod_time: mod_time_secs(info),
            is_dir: false,
        });
        self.data_offset += total_written;
        self.metadata.file_count += 1;

        Ok(())
    }

    /// Write the metadata trailer, rewrite the header with the final
    /// offsets, flags and checksums, truncate and sync.
    pub fn finalize(mut self) -> Result<()> {
        self.metadata.data_checksum = self.data_hasher.finalize().into();

        let mut trailer = self.metadata.serialize();
        if let Some(key) = &self.master_key {
            // [ nonce (12) | ciphertext... ] under the master key.
            trailer = crypto::seal(key, &trailer)?;
        }
        let metadata_offset = self.data_offset;

        let mut flags = 0u16;
        if self.master_key.is_some() {
            flags |= FLAG_ENCRYPTED;
        }
        if self.sink.is_split() {
            flags |= FLAG_SPLIT;
        }
        let header = Header {
            version: VERSION,
            flags,
            file_count: self.metadata.file_count,
            metadata_offset,
            data_checksum: self.metadata.data_checksum,
            salt: self.salt,
        };

        self.sink.seek(SeekFrom::Start(0))?;
        header.write(&mut self.sink)?;

        self.sink.seek(SeekFrom::Start(metadata_offset))?;
        self.sink.write_all(&trailer)?;

        let end = self.sink.seek(SeekFrom::Current(0))?;
        self.sink.truncate(end)?;
        self.sink.sync()?;
        Ok(())
    }
}

// ── Hashing adapters ─────────────────────────────────────────────────────────

/// Observes plaintext on its way into the cipher.
struct TeeReader<'a, R> {
    inner: R,
    hasher: &'a mut XxHash64,
}

impl<R: Read> Read for TeeReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.write(&buf[..n]);
        }
        Ok(n)
    }
}

/// Observes on-disk bytes and reports committed chunks.
struct SinkWriter<'a> {
    sink: &'a mut ArchiveSink,
    hasher: &'a mut blake3::Hasher,
    progress: Option<&'a mut Box<dyn FnMut(usize)>>,
}

impl Write for SinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.sink.write(buf)?;
        self.hasher.update(&buf[..n]);
        if let Some(cb) = self.progress.as_mut() {
            cb(n);
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.sink.flush()
    }
}

// ── Platform metadata ────────────────────────────────────────────────────────

#[cfg(unix)]
fn mode_bits(info: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    info.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(info: &fs::Metadata) -> u32 {
    if info.is_dir() {
        0o755
    } else {
        0o644
    }
}

fn mod_time_secs(info: &fs::Metadata) -> u64 {
    info.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
