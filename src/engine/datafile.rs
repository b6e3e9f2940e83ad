//! The environment data file.
//!
//! Layout:
//!
//! ```text
//! [magic: 8 bytes]
//! [checksum: u32][length: u32][payload: length bytes]   -- one per commit
//! ...
//! ```
//!
//! The checksum is the CRC32 of the payload; the payload is an encoded
//! [`CommitRecord`]. A record cut short at the end of the file (a torn write)
//! is ignored when reading and truncated away by [`DataFile::read_new`] once
//! the caller holds the writer lock. A bad checksum anywhere else means the
//! file is corrupted.
//!
//! A failed append or sync is rolled back with [`DataFile::rewind`], so a
//! commit that reported an error never reappears on the next open.

use super::codes;
use super::record::CommitRecord;
use super::{EngineError, Result};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Identifies a data file written by this backend.
pub(crate) const MAGIC: &[u8; 8] = b"MDBXLUA\x01";

/// Size of a record header (checksum + length).
pub(crate) const HEADER_SIZE: usize = 8;

/// Suffix of the file a compaction writes before renaming it into place.
const COMPACT_SUFFIX: &str = "-compact";

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Length field for a payload of `len` bytes.
fn frame_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        EngineError::with_message(
            codes::TXN_FULL,
            format!("{}: commit of {} bytes does not fit a record", super::strerror(codes::TXN_FULL), len),
        )
    })
}

/// Frames `payload` as `[checksum][length][payload]`.
pub(crate) fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    let length = frame_len(payload.len())?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32_le(checksum(payload));
    buf.put_u32_le(length);
    buf.put_slice(payload);
    Ok(buf.to_vec())
}

/// Position to roll the file back to when a commit fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Mark {
    size: u64,
    unsynced: u64,
}

/// Failure injected into the next append or sync.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Half the record reaches the file, then the write fails.
    Write,
    /// The record is written but the fsync fails.
    Sync,
    /// The record reaches the file with its last byte flipped.
    Corrupt,
}

/// Append-only handle on the data file.
pub(crate) struct DataFile {
    path: PathBuf,
    file: File,
    read_only: bool,
    size: u64,
    unsynced: u64,
    #[cfg(test)]
    fault: Option<Fault>,
}

impl DataFile {
    /// Opens (creating unless `read_only`) the data file and returns the
    /// commits it holds, oldest first. A torn tail is left in place.
    pub(crate) fn open(path: &Path, read_only: bool, mode: u32) -> Result<(Self, Vec<CommitRecord>)> {
        let mut file = open_file(path, read_only, mode)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        if contents.is_empty() {
            let mut size = 0;
            if !read_only {
                file.write_all(MAGIC)?;
                file.sync_all()?;
                size = MAGIC.len() as u64;
            }
            return Ok((Self::with_file(path, file, read_only, size), Vec::new()));
        }

        if contents.len() < MAGIC.len() || &contents[..MAGIC.len()] != MAGIC {
            return Err(EngineError::new(codes::INVALID));
        }

        let (records, consumed) = scan_frames(&contents[MAGIC.len()..], MAGIC.len() as u64)?;
        let valid_len = (MAGIC.len() + consumed) as u64;
        if valid_len < contents.len() as u64 {
            log::debug!("{:?} ends with {} bytes of incomplete commit data", path, contents.len() as u64 - valid_len);
        }
        file.seek(SeekFrom::Start(valid_len))?;

        Ok((Self::with_file(path, file, read_only, valid_len), records))
    }

    fn with_file(path: &Path, file: File, read_only: bool, size: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
            read_only,
            size,
            unsynced: 0,
            #[cfg(test)]
            fault: None,
        }
    }

    /// Writes `record` as the whole content of a fresh file, then renames it
    /// over `path`. Returns a handle positioned after the record.
    pub(crate) fn write_compacted(path: &Path, mode: u32, record: &CommitRecord) -> Result<Self> {
        let mut contents = MAGIC.to_vec();
        contents.extend_from_slice(&frame(&record.encode()?)?);

        let mut temp = path.as_os_str().to_owned();
        temp.push(COMPACT_SUFFIX);
        let temp = PathBuf::from(temp);

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        let mut file = options.open(&temp)?;

        // The handle follows the inode through the rename.
        let written = file.write_all(&contents).and_then(|_| file.sync_all()).and_then(|_| fs::rename(&temp, path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        if let Err(e) = sync_parent(path) {
            log::warn!("Failed to sync the directory of {:?}: {}", path, e);
        }

        Ok(Self::with_file(path, file, false, contents.len() as u64))
    }

    /// Appends one framed commit payload and hands it to the OS.
    pub(crate) fn append(&mut self, payload: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(EngineError::new(codes::EACCES));
        }
        #[allow(unused_mut)]
        let mut framed = frame(payload)?;

        #[cfg(test)]
        match self.fault.take() {
            Some(Fault::Write) => {
                self.file.write_all(&framed[..framed.len() / 2])?;
                return Err(std::io::Error::other("injected write failure").into());
            }
            Some(Fault::Corrupt) => {
                if let Some(last) = framed.last_mut() {
                    *last ^= 0xff;
                }
            }
            other => self.fault = other,
        }

        self.file.write_all(&framed)?;
        self.size += framed.len() as u64;
        self.unsynced += framed.len() as u64;
        Ok(())
    }

    /// Fsyncs everything appended so far.
    pub(crate) fn sync(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }

        #[cfg(test)]
        if self.fault == Some(Fault::Sync) {
            self.fault = None;
            return Err(std::io::Error::other("injected sync failure").into());
        }

        self.file.sync_all()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Current end of the committed data.
    pub(crate) fn mark(&self) -> Mark {
        Mark { size: self.size, unsynced: self.unsynced }
    }

    /// Cuts the file back to `mark`, dropping whatever was written after it.
    pub(crate) fn rewind(&mut self, mark: Mark) -> Result<()> {
        self.file.set_len(mark.size)?;
        self.file.seek(SeekFrom::Start(mark.size))?;
        self.size = mark.size;
        self.unsynced = mark.unsynced;
        self.file.sync_all()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Reads back and decodes the records written since `mark`.
    pub(crate) fn read_back(&mut self, mark: Mark) -> Result<Vec<CommitRecord>> {
        let mut written = vec![0u8; (self.size - mark.size) as usize];
        self.file.seek(SeekFrom::Start(mark.size))?;
        let read = self.file.read_exact(&mut written);
        self.file.seek(SeekFrom::Start(self.size))?;
        read?;

        let (records, consumed) = scan_frames(&written, mark.size)?;
        if consumed != written.len() {
            return Err(EngineError::with_message(
                codes::CORRUPTED,
                format!("{}: record at offset {} did not read back", super::strerror(codes::CORRUPTED), mark.size),
            ));
        }
        Ok(records)
    }

    /// Picks up complete records appended by other handles on the same
    /// file. With `repair`, an incomplete tail is truncated away; only the
    /// writer-lock holder may ask for that.
    pub(crate) fn read_new(&mut self, repair: bool) -> Result<Vec<CommitRecord>> {
        let len = self.file.metadata()?.len();
        if len < self.size {
            return Err(EngineError::with_message(
                codes::CORRUPTED,
                format!("{}: {:?} shrank below {} bytes", super::strerror(codes::CORRUPTED), self.path, self.size),
            ));
        }
        if len == self.size {
            return Ok(Vec::new());
        }

        let mut tail = Vec::with_capacity((len - self.size) as usize);
        self.file.seek(SeekFrom::Start(self.size))?;
        (&mut self.file).take(len - self.size).read_to_end(&mut tail)?;

        let (records, consumed) = scan_frames(&tail, self.size)?;
        self.size += consumed as u64;
        if consumed < tail.len() && repair && !self.read_only {
            log::warn!("Dropping {} bytes of torn commit data at the end of {:?}", tail.len() - consumed, self.path);
            self.file.set_len(self.size)?;
            self.file.sync_all()?;
        }
        self.file.seek(SeekFrom::Start(self.size))?;
        Ok(records)
    }

    /// Bytes appended since the last sync.
    pub(crate) fn unsynced(&self) -> u64 {
        self.unsynced
    }

    /// Current file size in bytes.
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Path of the data file.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// OS-level handle of the data file.
    pub(crate) fn fd(&self) -> i64 {
        raw_handle(&self.file)
    }

    #[cfg(test)]
    pub(crate) fn inject(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }
}

fn open_file(path: &Path, read_only: bool, mode: u32) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    if !read_only {
        options.write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(options.open(path)?)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Decodes every complete record in `contents`, which starts at file offset
/// `base`. Returns the records and the length of the valid prefix.
fn scan_frames(contents: &[u8], base: u64) -> Result<(Vec<CommitRecord>, usize)> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < contents.len() {
        let mut rest = &contents[offset..];
        if rest.len() < HEADER_SIZE {
            break;
        }
        let expected = rest.get_u32_le();
        let length = rest.get_u32_le() as usize;
        if rest.len() < length {
            break;
        }
        let payload = &rest[..length];
        let end = offset + HEADER_SIZE + length;

        if checksum(payload) != expected {
            if end == contents.len() {
                break;
            }
            return Err(EngineError::with_message(
                codes::CORRUPTED,
                format!("{}: checksum mismatch at offset {}", super::strerror(codes::CORRUPTED), base + offset as u64),
            ));
        }

        records.push(CommitRecord::decode(payload)?);
        offset = end;
    }

    Ok((records, offset))
}

#[cfg(unix)]
fn raw_handle(file: &File) -> i64 {
    use std::os::unix::io::AsRawFd;
    file.as_raw_fd() as i64
}

#[cfg(windows)]
fn raw_handle(file: &File) -> i64 {
    use std::os::windows::io::AsRawHandle;
    file.as_raw_handle() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::LogOp;
    use tempfile::TempDir;

    fn commit(seq: u64, key: &[u8]) -> CommitRecord {
        CommitRecord::new(seq, vec![LogOp::Put { dbi: 1, key: key.to_vec(), value: b"bx".to_vec() }])
    }

    fn file_len(path: &Path) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }

    #[test]
    fn test_create_writes_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");

        let (file, records) = DataFile::open(&path, false, 0o664).unwrap();
        assert!(records.is_empty());
        assert_eq!(file.size(), MAGIC.len() as u64);
        assert_eq!(std::fs::read(&path).unwrap(), MAGIC.to_vec());
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");

        {
            let (mut file, _) = DataFile::open(&path, false, 0o664).unwrap();
            file.append(&commit(1, b"a").encode().unwrap()).unwrap();
            file.append(&commit(2, b"b").encode().unwrap()).unwrap();
            assert!(file.unsynced() > 0);
            file.sync().unwrap();
            assert_eq!(file.unsynced(), 0);
        }

        let (_, records) = DataFile::open(&path, false, 0o664).unwrap();
        assert_eq!(records, vec![commit(1, b"a"), commit(2, b"b")]);
    }

    #[test]
    fn test_torn_tail_is_truncated_on_repair() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");

        {
            let (mut file, _) = DataFile::open(&path, false, 0o664).unwrap();
            file.append(&commit(1, b"a").encode().unwrap()).unwrap();
            file.sync().unwrap();
        }
        let good_len = file_len(&path);

        let mut torn = frame(&commit(2, b"b").encode().unwrap()).unwrap();
        torn.truncate(torn.len() - 3);
        let mut raw = OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(&torn).unwrap();
        drop(raw);

        let (mut file, records) = DataFile::open(&path, false, 0o664).unwrap();
        assert_eq!(records, vec![commit(1, b"a")]);
        assert_eq!(file.size(), good_len);
        assert!(file_len(&path) > good_len);

        assert!(file.read_new(false).unwrap().is_empty());
        assert!(file_len(&path) > good_len);
        assert!(file.read_new(true).unwrap().is_empty());
        assert_eq!(file_len(&path), good_len);
    }

    #[test]
    fn test_read_new_sees_other_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");

        let (mut first, _) = DataFile::open(&path, false, 0o664).unwrap();
        let (mut second, _) = DataFile::open(&path, false, 0o664).unwrap();

        first.append(&commit(1, b"a").encode().unwrap()).unwrap();
        assert_eq!(second.read_new(false).unwrap(), vec![commit(1, b"a")]);
        assert_eq!(second.size(), first.size());

        second.append(&commit(2, b"b").encode().unwrap()).unwrap();
        assert_eq!(first.read_new(false).unwrap(), vec![commit(2, b"b")]);
        assert!(second.read_new(false).unwrap().is_empty());
    }

    #[test]
    fn test_corruption_in_the_middle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");

        {
            let (mut file, _) = DataFile::open(&path, false, 0o664).unwrap();
            file.append(&commit(1, b"a").encode().unwrap()).unwrap();
            file.append(&commit(2, b"b").encode().unwrap()).unwrap();
            file.sync().unwrap();
        }

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[MAGIC.len() + HEADER_SIZE] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = DataFile::open(&path, false, 0o664).err().unwrap();
        assert_eq!(err.code(), codes::CORRUPTED);
    }

    #[test]
    fn test_foreign_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"definitely not a database").unwrap();

        let err = DataFile::open(&path, false, 0o664).err().unwrap();
        assert_eq!(err.code(), codes::INVALID);
    }

    #[test]
    fn test_read_only_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = DataFile::open(&dir.path().join("missing"), true, 0o664).err().unwrap();
        assert_eq!(err.code(), codes::ENOENT);
    }

    #[test]
    fn test_read_only_rejects_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        DataFile::open(&path, false, 0o664).unwrap();

        let (mut file, _) = DataFile::open(&path, true, 0o664).unwrap();
        assert_eq!(file.append(b"x").unwrap_err().code(), codes::EACCES);
    }

    #[test]
    fn test_rewind_after_failed_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        let (mut file, _) = DataFile::open(&path, false, 0o664).unwrap();
        file.append(&commit(1, b"a").encode().unwrap()).unwrap();

        let mark = file.mark();
        file.inject(Fault::Write);
        assert!(file.append(&commit(2, b"b").encode().unwrap()).is_err());
        assert!(file_len(&path) > mark.size);

        file.rewind(mark).unwrap();
        assert_eq!(file.size(), mark.size);
        assert_eq!(file_len(&path), mark.size);

        file.append(&commit(2, b"c").encode().unwrap()).unwrap();
        drop(file);
        let (_, records) = DataFile::open(&path, false, 0o664).unwrap();
        assert_eq!(records, vec![commit(1, b"a"), commit(2, b"c")]);
    }

    #[test]
    fn test_rewind_after_failed_sync() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        let (mut file, _) = DataFile::open(&path, false, 0o664).unwrap();

        let mark = file.mark();
        file.append(&commit(1, b"a").encode().unwrap()).unwrap();
        file.inject(Fault::Sync);
        assert!(file.sync().is_err());
        file.rewind(mark).unwrap();
        drop(file);

        let (_, records) = DataFile::open(&path, false, 0o664).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        let (mut file, _) = DataFile::open(&path, false, 0o664).unwrap();
        file.append(&commit(1, b"a").encode().unwrap()).unwrap();

        let mark = file.mark();
        file.append(&commit(2, b"b").encode().unwrap()).unwrap();
        assert_eq!(file.read_back(mark).unwrap(), vec![commit(2, b"b")]);

        // Still positioned at the end.
        file.append(&commit(3, b"c").encode().unwrap()).unwrap();
        assert_eq!(file.read_back(mark).unwrap(), vec![commit(2, b"b"), commit(3, b"c")]);
    }

    #[test]
    fn test_write_compacted_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        {
            let (mut file, _) = DataFile::open(&path, false, 0o664).unwrap();
            for seq in 1..=50 {
                file.append(&commit(seq, b"k").encode().unwrap()).unwrap();
            }
        }
        let before = file_len(&path);

        let mut file = DataFile::write_compacted(&path, 0o664, &commit(50, b"k")).unwrap();
        assert!(file.size() < before);
        assert_eq!(file.size(), file_len(&path));
        file.append(&commit(51, b"z").encode().unwrap()).unwrap();
        drop(file);

        let (_, records) = DataFile::open(&path, false, 0o664).unwrap();
        assert_eq!(records, vec![commit(50, b"k"), commit(51, b"z")]);
        let mut temp = path.as_os_str().to_owned();
        temp.push(COMPACT_SUFFIX);
        assert!(!Path::new(&temp).exists());
    }

    #[test]
    fn test_oversized_payload_is_txn_full() {
        assert_eq!(frame_len(16).unwrap(), 16);
        assert_eq!(frame_len(u32::MAX as usize).unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(frame_len(u32::MAX as usize + 1).unwrap_err().code(), codes::TXN_FULL);
    }
}
