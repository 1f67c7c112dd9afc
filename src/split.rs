//! Split-volume I/O — one contiguous virtual byte stream over N physical files.
//!
//! Volume naming: the primary volume is `<base>.chin`; continuations are
//! `<base>.chin.c01`, `<base>.chin.c02`, ... (zero-padded, width 2). Every
//! non-terminal volume is exactly `max_size` bytes; the last may be shorter.
//! The two-digit suffix caps an archive at 100 volumes; the writer fails
//! rather than silently widening the suffix.
//!
//! [`ArchiveSink`] and [`ArchiveSource`] dispatch between a plain file and
//! the split forms so the writer and reader never care which one they hold.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Hard cap from the two-digit continuation suffix.
pub const MAX_VOLUMES: usize = 100;

fn volume_path(base: &Path, index: usize) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".c{index:02}"));
    PathBuf::from(name)
}

// ── SplitWriter ──────────────────────────────────────────────────────────────

/// Seekable byte sink spanning numbered volume files.
///
/// Writes advance a virtual offset; when the current volume reaches
/// `max_size` the next volume is created transparently, byte-exact regardless
/// of write granularity. Handles to every created volume stay open so the
/// header at virtual offset 0 can be rewritten on finalize.
pub struct SplitWriter {
    base_path: PathBuf,
    max_size: u64,
    parts: Vec<File>,
    part_index: usize,
    part_pos: u64,
    virtual_pos: u64,
    virtual_end: u64,
}

impl SplitWriter {
    pub fn create<P: AsRef<Path>>(base: P, max_size: u64) -> io::Result<Self> {
        if max_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "split size must be positive",
            ));
        }
        let base_path = base.as_ref().to_owned();
        let first = File::create(&base_path)?;
        Ok(Self {
            base_path,
            max_size,
            parts: vec![first],
            part_index: 0,
            part_pos: 0,
            virtual_pos: 0,
            virtual_end: 0,
        })
    }

    /// Number of volumes created so far.
    pub fn volume_count(&self) -> usize {
        self.parts.len()
    }

    fn advance_part(&mut self) -> io::Result<()> {
        let next = self.part_index + 1;
        if next < self.parts.len() {
            // Revisiting a volume that already exists after a seek-back.
            self.parts[next].seek(SeekFrom::Start(0))?;
        } else {
            if next >= MAX_VOLUMES {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "split archive limited to 100 volumes",
                ));
            }
            let file = File::create(volume_path(&self.base_path, next))?;
            self.parts.push(file);
        }
        self.part_index = next;
        self.part_pos = 0;
        Ok(())
    }

    /// Trim the last volume so the virtual stream ends at `virtual_len`.
    /// Earlier volumes are never deleted.
    pub fn truncate(&mut self, virtual_len: u64) -> io::Result<()> {
        let last = self.parts.len() - 1;
        let local = virtual_len.saturating_sub(last as u64 * self.max_size);
        self.parts[last].set_len(local)?;
        if virtual_len < self.virtual_end {
            self.virtual_end = virtual_len;
        }
        Ok(())
    }

    /// Flush all open volumes to stable storage.
    pub fn sync(&mut self) -> io::Result<()> {
        for part in &self.parts {
            part.sync_all()?;
        }
        Ok(())
    }
}

impl Write for SplitWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let remaining = self.max_size - self.part_pos;
            if remaining == 0 {
                self.advance_part()?;
                continue;
            }
            let take = (rest.len() as u64).min(remaining) as usize;
            let n = self.parts[self.part_index].write(&rest[..take])?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            self.part_pos += n as u64;
            self.virtual_pos += n as u64;
            rest = &rest[n..];
        }
        if self.virtual_pos > self.virtual_end {
            self.virtual_end = self.virtual_pos;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for part in &mut self.parts {
            part.flush()?;
        }
        Ok(())
    }
}

impl Seek for SplitWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(offset) => self.virtual_pos as i128 + offset as i128,
            SeekFrom::End(offset) => self.virtual_end as i128 + offset as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }
        let target = target as u64;

        let mut part = (target / self.max_size) as usize;
        let mut local = target % self.max_size;
        // The exact end of a full volume stays on that volume.
        if local == 0 && part > 0 && part == self.parts.len() {
            part -= 1;
            local = self.max_size;
        }
        if part >= self.parts.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek beyond the last written volume",
            ));
        }

        self.parts[part].seek(SeekFrom::Start(local))?;
        self.part_index = part;
        self.part_pos = local;
        self.virtual_pos = target;
        Ok(target)
    }
}

// ── SplitReader ──────────────────────────────────────────────────────────────

/// Seekable byte source spanning numbered volume files.
///
/// Opens the primary volume, then probes `.c01`, `.c02`, ... until the first
/// missing file, recording individual sizes and the running total.
#[derive(Debug)]
pub struct SplitReader {
    parts: Vec<File>,
    sizes: Vec<u64>,
    total_size: u64,
    part_index: usize,
    virtual_pos: u64,
}

impl SplitReader {
    pub fn open<P: AsRef<Path>>(base: P) -> io::Result<Self> {
        let base = base.as_ref();
        let mut parts = vec![File::open(base)?];

        let mut index = 1;
        loop {
            match File::open(volume_path(base, index)) {
                Ok(file) => {
                    parts.push(file);
                    index += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(e),
            }
        }

        let mut sizes = Vec::with_capacity(parts.len());
        let mut total_size = 0;
        for part in &parts {
            let len = part.metadata()?.len();
            sizes.push(len);
            total_size += len;
        }
        tracing::debug!(volumes = parts.len(), total_size, "opened split archive");

        Ok(Self {
            parts,
            sizes,
            total_size,
            part_index: 0,
            virtual_pos: 0,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// State-preserving positional read: seek, read once, restore the
    /// previous virtual offset.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let saved = self.virtual_pos;
        self.seek(SeekFrom::Start(offset))?;
        let result = self.read(buf);
        self.seek(SeekFrom::Start(saved))?;
        result
    }
}

impl Read for SplitReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.part_index >= self.parts.len() {
                return Ok(0);
            }
            let n = self.parts[self.part_index].read(buf)?;
            if n > 0 {
                self.virtual_pos += n as u64;
                return Ok(n);
            }
            // Current volume exhausted; move on if there is another.
            if self.part_index + 1 == self.parts.len() {
                return Ok(0);
            }
            self.part_index += 1;
            self.parts[self.part_index].seek(SeekFrom::Start(0))?;
        }
    }
}

impl Seek for SplitReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(offset) => self.virtual_pos as i128 + offset as i128,
            SeekFrom::End(offset) => self.total_size as i128 + offset as i128,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }
        let target = target as u64;
        if target > self.total_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek past the end of the split archive",
            ));
        }

        let mut start = 0u64;
        for (i, &size) in self.sizes.iter().enumerate() {
            let is_last = i + 1 == self.sizes.len();
            if target < start + size || (target == start + size && is_last) {
                self.parts[i].seek(SeekFrom::Start(target - start))?;
                self.part_index = i;
                self.virtual_pos = target;
                return Ok(target);
            }
            start += size;
        }

        // Unreachable: target <= total_size always lands in the loop above.
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "seek did not resolve to a volume",
        ))
    }
}

// ── Sink / source dispatch ───────────────────────────────────────────────────

/// Output side: a single archive file or a split volume set.
pub enum ArchiveSink {
    Single(File),
    Split(SplitWriter),
}

impl ArchiveSink {
    pub fn create<P: AsRef<Path>>(path: P, split_size: Option<u64>) -> io::Result<Self> {
        match split_size {
            Some(max) => Ok(Self::Split(SplitWriter::create(path, max)?)),
            None => Ok(Self::Single(File::create(path)?)),
        }
    }

    /// True only when rotation actually happened: a split writer that never
    /// filled its first volume still produces a single-file archive.
    pub fn is_split(&self) -> bool {
        match self {
            Self::Single(_) => false,
            Self::Split(w) => w.volume_count() > 1,
        }
    }

    pub fn truncate(&mut self, virtual_len: u64) -> io::Result<()> {
        match self {
            Self::Single(f) => f.set_len(virtual_len),
            Self::Split(w) => w.truncate(virtual_len),
        }
    }

    pub fn sync(&mut self) -> io::Result<()> {
        match self {
            Self::Single(f) => f.sync_all(),
            Self::Split(w) => w.sync(),
        }
    }
}

impl Write for ArchiveSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Single(f) => f.write(buf),
            Self::Split(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Single(f) => f.flush(),
            Self::Split(w) => w.flush(),
        }
    }
}

impl Seek for ArchiveSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Single(f) => f.seek(pos),
            Self::Split(w) => w.seek(pos),
        }
    }
}

/// Input side: a single archive file or a split volume set.
#[derive(Debug)]
pub enum ArchiveSource {
    Single(File),
    Split(SplitReader),
}

impl ArchiveSource {
    pub fn total_size(&self) -> io::Result<u64> {
        match self {
            Self::Single(f) => Ok(f.metadata()?.len()),
            Self::Split(r) => Ok(r.total_size()),
        }
    }
}

impl Read for ArchiveSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Single(f) => f.read(buf),
            Self::Split(r) => r.read(buf),
        }
    }
}

impl Seek for ArchiveSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Single(f) => f.seek(pos),
            Self::Split(r) => r.seek(pos),
        }
    }
}
