//! Read/write of the `*.log` append log extending a snapshot.
//!
//! A log is a 4-byte sequence header followed by a concatenation of add/del
//! entries (§4.1/§4.3). Entries are appended at a cached `write_pos` rather
//! than by seeking to the file's end, so that a corrupt tail detected on
//! replay is overwritten by the next append instead of extended past (§9).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::codec::{self, Crc32Writer, LogEntry, LOG_OP_ADD, LOG_OP_DEL};
use crate::index::Index;
use crate::location::Location;

/// An open append log, positioned at `write_pos` for the next append.
pub struct Log {
    file: File,
    path: PathBuf,
    write_pos: u64,
}

impl Log {
    /// Creates a fresh log at `path`, writing the header for `sequence`,
    /// per §4.3 *Append*: "On first write after open without an existing
    /// log, a fresh log is created and the header sequence is written."
    pub fn create(path: &Path, sequence: u32) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&sequence.to_le_bytes())?;
        tracing::debug!(path = %path.display(), sequence, "created fresh append log");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            write_pos: codec::LOG_HEADER_LEN,
        })
    }

    /// Opens an existing log at `path` for recovery, per §4.3 *Open for
    /// recovery*. Returns `Ok(None)` if the file is absent, too short to
    /// hold a header, or its header does not match `expected_sequence` —
    /// in all three cases the file is deleted and the caller proceeds as
    /// if there were no log at all. The returned log is positioned right
    /// after the header; the caller must still call [`Log::replay`].
    pub fn open(path: &Path, expected_sequence: u32) -> io::Result<Option<Self>> {
        let mut file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut header = [0u8; 4];
        if !codec::try_read_exact(&mut file, &mut header)? {
            tracing::warn!(path = %path.display(), "log shorter than its header, discarding");
            drop(file);
            fs::remove_file(path)?;
            return Ok(None);
        }
        let sequence = u32::from_le_bytes(header);
        if sequence != expected_sequence {
            tracing::warn!(
                path = %path.display(),
                log_sequence = sequence,
                snapshot_sequence = expected_sequence,
                "log header is stale, discarding"
            );
            drop(file);
            fs::remove_file(path)?;
            return Ok(None);
        }

        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
            write_pos: codec::LOG_HEADER_LEN,
        }))
    }

    /// Replays entries starting at the current `write_pos` into `index`,
    /// per §4.3 *Replay*. Stops at the first short read, parse error or
    /// CRC mismatch, leaving `write_pos` at the end of the last fully
    /// valid entry. Returns the number of entries applied.
    pub fn replay(&mut self, index: &mut Index, admit: impl Fn(&[u8]) -> bool) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(self.write_pos))?;
        let mut applied = 0usize;

        loop {
            let entry_start = self.write_pos;
            let mut op_buf = [0u8; 1];
            if !codec::try_read_exact(&mut self.file, &mut op_buf)? {
                break;
            }

            match op_buf[0] {
                LOG_OP_ADD => {
                    let mut head = [0u8; 12];
                    if !codec::try_read_exact(&mut self.file, &mut head)? {
                        tracing::warn!(path = %self.path.display(), entry_start, "truncated add entry header");
                        break;
                    }
                    let key = u64::from_le_bytes(head[0..8].try_into().expect("8 bytes"));
                    let len = u32::from_le_bytes(head[8..12].try_into().expect("4 bytes")) as usize;
                    let mut value = vec![0u8; len];
                    if !codec::try_read_exact(&mut self.file, &mut value)? {
                        tracing::warn!(path = %self.path.display(), entry_start, "truncated add entry value");
                        break;
                    }
                    let mut crc_buf = [0u8; 4];
                    if !codec::try_read_exact(&mut self.file, &mut crc_buf)? {
                        tracing::warn!(path = %self.path.display(), entry_start, "truncated add entry crc");
                        break;
                    }
                    let stored = u32::from_le_bytes(crc_buf);
                    let mut hasher = Crc32Writer::new();
                    hasher.update(&op_buf);
                    hasher.update(&head);
                    hasher.update(&value);
                    if hasher.finalize() != stored {
                        tracing::warn!(path = %self.path.display(), entry_start, "log entry crc mismatch");
                        break;
                    }

                    let admitted = if admit(&value) { Some(Bytes::from(value)) } else { None };
                    index.apply_add(key, admitted, Location::Log(entry_start));
                    applied += 1;
                    self.write_pos = entry_start + 1 + 12 + len as u64 + 4;
                }
                LOG_OP_DEL => {
                    let mut head = [0u8; 8];
                    if !codec::try_read_exact(&mut self.file, &mut head)? {
                        tracing::warn!(path = %self.path.display(), entry_start, "truncated del entry");
                        break;
                    }
                    let key = u64::from_le_bytes(head);
                    let mut crc_buf = [0u8; 4];
                    if !codec::try_read_exact(&mut self.file, &mut crc_buf)? {
                        tracing::warn!(path = %self.path.display(), entry_start, "truncated del entry crc");
                        break;
                    }
                    let stored = u32::from_le_bytes(crc_buf);
                    let mut hasher = Crc32Writer::new();
                    hasher.update(&op_buf);
                    hasher.update(&head);
                    if hasher.finalize() != stored {
                        tracing::warn!(path = %self.path.display(), entry_start, "log entry crc mismatch");
                        break;
                    }

                    index.apply_del(key);
                    applied += 1;
                    self.write_pos = entry_start + 1 + 8 + 4;
                }
                other => {
                    tracing::warn!(path = %self.path.display(), entry_start, opcode = other, "invalid log opcode");
                    break;
                }
            }
        }

        Ok(applied)
    }

    /// Appends an "add" entry for `key`/`value`, returning the entry's
    /// starting offset so the caller can record `Location::Log(offset)`.
    pub fn append_add(&mut self, key: u64, value: &[u8]) -> io::Result<u64> {
        self.write_entry(&LogEntry::encode_add(key, value))
    }

    /// Appends a "del" entry (tombstone) for `key`.
    pub fn append_del(&mut self, key: u64) -> io::Result<u64> {
        self.write_entry(&LogEntry::encode_del(key))
    }

    fn write_entry(&mut self, entry: &[u8]) -> io::Result<u64> {
        let offset = self.write_pos;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(entry)?;
        self.write_pos += entry.len() as u64;
        Ok(offset)
    }

    /// Reads a value out of the log at `offset`, per §4.4 *Read path*:
    /// `offset + 8 + 1` skips the opcode and key.
    pub fn read_value(&mut self, offset: u64) -> io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset + 9))?;
        let mut len_buf = [0u8; 4];
        io::Read::read_exact(&mut self.file, &mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut value = vec![0u8; len];
        io::Read::read_exact(&mut self.file, &mut value)?;
        Ok(value)
    }

    /// Fsyncs the log file, making every append so far durable.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Removes the log file at `path`, tolerating its absence.
pub fn delete(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
