use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{ChinError, Result};

pub const MAGIC: &[u8; 4] = b"CHIN";
pub const VERSION: u16 = 6;
pub const HEADER_SIZE: usize = 72; // 4+2+2+8+8+32+16
pub const SALT_SIZE: usize = 16;

pub const FLAG_ENCRYPTED: u16 = 1 << 0;
pub const FLAG_SPLIT: u16 = 1 << 1;

/// Fixed 72-byte control block at offset 0.
///
/// Written as a placeholder when packing starts and rewritten with the final
/// counts, offsets and checksum on finalize. All integers are big-endian.
#[derive(Debug, Clone)]
pub struct Header {
    pub version: u16,
    pub flags: u16,
    pub file_count: u64,
    pub metadata_offset: u64,
    pub data_checksum: [u8; 32],
    pub salt: [u8; SALT_SIZE],
}

impl Header {
    /// Header as written before any payload bytes: flags and salt are known,
    /// everything else is zero until finalize.
    pub fn placeholder(flags: u16, salt: [u8; SALT_SIZE]) -> Self {
        Self {
            version: VERSION,
            flags,
            file_count: 0,
            metadata_offset: 0,
            data_checksum: [0u8; 32],
            salt,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_split(&self) -> bool {
        self.flags & FLAG_SPLIT != 0
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u16::<BigEndian>(self.version)?;
        writer.write_u16::<BigEndian>(self.flags)?;
        writer.write_u64::<BigEndian>(self.file_count)?;
        writer.write_u64::<BigEndian>(self.metadata_offset)?;
        writer.write_all(&self.data_checksum)?;
        writer.write_all(&self.salt)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|_| ChinError::InvalidFormat("truncated header".into()))?;
        if &magic != MAGIC {
            return Err(ChinError::InvalidFormat("bad magic".into()));
        }
        let version = reader.read_u16::<BigEndian>()?;
        if version != VERSION {
            return Err(ChinError::UnsupportedVersion(version));
        }
        let flags = reader.read_u16::<BigEndian>()?;
        let file_count = reader.read_u64::<BigEndian>()?;
        let metadata_offset = reader.read_u64::<BigEndian>()?;
        let mut data_checksum = [0u8; 32];
        reader.read_exact(&mut data_checksum)?;
        let mut salt = [0u8; SALT_SIZE];
        reader.read_exact(&mut salt)?;
        Ok(Self {
            version,
            flags,
            file_count,
            metadata_offset,
            data_checksum,
            salt,
        })
    }
}
