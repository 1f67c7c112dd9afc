//! Metadata trailer — the serialized file index at the tail of the archive.
//!
//! Plaintext layout (big-endian):
//!
//! ```text
//! u16 version | u64 file_count | u64 created_at | 32 data_checksum
//! u32 entry_count
//! entry_count x { u32 name_len | name | u64 size | u64 offset
//!                 u64 checksum | u32 mode | u8 is_dir | u64 mod_time }
//! 32 metadata_checksum            BLAKE3 of all preceding bytes
//! ```
//!
//! When the archive is encrypted the trailer is stored as
//! `nonce(12) || AES-256-GCM(plaintext trailer)` under the master key.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{ChinError, Result};

/// Upper bound on the entry count, so a corrupted trailer cannot OOM us.
pub const MAX_FILE_COUNT: u64 = 10_000_000;
/// Upper bound on a single entry name, in bytes.
pub const MAX_NAME_LEN: usize = 4096;

const CHECKSUM_SIZE: usize = 32;

/// One record per packed file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Archive-relative name, `/`-separated.
    pub name: String,
    /// Plaintext byte length; 0 for directories.
    pub size: u64,
    /// Start of this entry's stream in the virtual archive address space.
    pub offset: u64,
    /// XXH64 of the plaintext bytes; 0 for directories.
    pub checksum: u64,
    pub mode: u32,
    /// Modification time, Unix seconds.
    pub mod_time: u64,
    pub is_dir: bool,
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub version: u16,
    pub file_count: u64,
    /// Archive creation time, Unix seconds.
    pub created_at: u64,
    /// Copy of the header's data-region checksum.
    pub data_checksum: [u8; 32],
    pub files: Vec<FileEntry>,
}

impl Metadata {
    /// Serialize the trailer, appending the BLAKE3 checksum of the body.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.files.len() * 64);

        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.file_count.to_be_bytes());
        buf.extend_from_slice(&self.created_at.to_be_bytes());
        buf.extend_from_slice(&self.data_checksum);

        buf.extend_from_slice(&(self.files.len() as u32).to_be_bytes());
        for file in &self.files {
            buf.extend_from_slice(&(file.name.len() as u32).to_be_bytes());
            buf.extend_from_slice(file.name.as_bytes());
            buf.extend_from_slice(&file.size.to_be_bytes());
            buf.extend_from_slice(&file.offset.to_be_bytes());
            buf.extend_from_slice(&file.checksum.to_be_bytes());
            buf.extend_from_slice(&file.mode.to_be_bytes());
            buf.push(file.is_dir as u8);
            buf.extend_from_slice(&file.mod_time.to_be_bytes());
        }

        let checksum: [u8; 32] = blake3::hash(&buf).into();
        buf.extend_from_slice(&checksum);
        buf
    }

    /// Parse and validate a plaintext trailer.
    ///
    /// Rejects oversized counts and names, count mismatches, truncation,
    /// trailing garbage, and a wrong trailing checksum.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < CHECKSUM_SIZE {
            return Err(ChinError::InvalidFormat("metadata too short".into()));
        }
        let body = &data[..data.len() - CHECKSUM_SIZE];
        let mut stored = [0u8; CHECKSUM_SIZE];
        stored.copy_from_slice(&data[data.len() - CHECKSUM_SIZE..]);
        let computed: [u8; 32] = blake3::hash(body).into();
        if stored != computed {
            return Err(ChinError::ChecksumMismatch);
        }

        let mut cur = Cursor::new(body);
        let truncated = |_| ChinError::InvalidFormat("truncated metadata".into());

        let version = cur.read_u16::<BigEndian>().map_err(truncated)?;
        let file_count = cur.read_u64::<BigEndian>().map_err(truncated)?;
        let created_at = cur.read_u64::<BigEndian>().map_err(truncated)?;
        let mut data_checksum = [0u8; 32];
        std::io::Read::read_exact(&mut cur, &mut data_checksum).map_err(truncated)?;

        let entry_count = cur.read_u32::<BigEndian>().map_err(truncated)?;
        if u64::from(entry_count) > MAX_FILE_COUNT {
            return Err(ChinError::InvalidFormat(format!(
                "file count too large ({entry_count}): corrupted metadata"
            )));
        }
        if u64::from(entry_count) != file_count {
            return Err(ChinError::InvalidFormat(format!(
                "file count mismatch ({file_count} vs {entry_count})"
            )));
        }

        let mut files = Vec::with_capacity(entry_count as usize);
        for i in 0..entry_count {
            let name_len = cur.read_u32::<BigEndian>().map_err(truncated)? as usize;
            if name_len > MAX_NAME_LEN {
                return Err(ChinError::InvalidFormat(format!(
                    "name too long ({name_len}) for entry {i}: corrupted metadata"
                )));
            }
            let mut name_bytes = vec![0u8; name_len];
            std::io::Read::read_exact(&mut cur, &mut name_bytes).map_err(truncated)?;
            let name = String::from_utf8(name_bytes)
                .map_err(|_| ChinError::InvalidFormat(format!("entry {i} name is not UTF-8")))?;

            let size = cur.read_u64::<BigEndian>().map_err(truncated)?;
            let offset = cur.read_u64::<BigEndian>().map_err(truncated)?;
            let checksum = cur.read_u64::<BigEndian>().map_err(truncated)?;
            let mode = cur.read_u32::<BigEndian>().map_err(truncated)?;
            let is_dir = cur.read_u8().map_err(truncated)? == 1;
            let mod_time = cur.read_u64::<BigEndian>().map_err(truncated)?;

            files.push(FileEntry {
                name,
                size,
                offset,
                checksum,
                mode,
                mod_time,
                is_dir,
            });
        }

        if cur.position() != body.len() as u64 {
            return Err(ChinError::InvalidFormat(
                "trailing garbage after metadata entries".into(),
            ));
        }

        Ok(Self {
            version,
            file_count,
            created_at,
            data_checksum,
            files,
        })
    }
}
