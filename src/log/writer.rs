//! Record log writer.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::options::SyncMode;
use crate::util::crc::{crc32_multi, mask_crc};
use crate::Result;

use super::{RecordType, BLOCK_SIZE, HEADER_SIZE};

const ZEROES: [u8; HEADER_SIZE] = [0; HEADER_SIZE];

/// Appends logical records to a log file.
pub struct LogWriter {
    /// Buffered writer for the log file.
    writer: BufWriter<File>,
    /// Current position within the current block.
    block_offset: usize,
    /// Durability policy.
    sync_mode: SyncMode,
    /// Bytes written since last sync.
    bytes_since_sync: usize,
    /// Total bytes in the file.
    file_size: u64,
}

impl LogWriter {
    /// Create (or truncate) a log file.
    pub fn create(path: &Path, sync_mode: SyncMode) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self::from_parts(file, 0, sync_mode))
    }

    /// Open an existing log for appending.
    ///
    /// Writing resumes at the block offset implied by the file size.
    pub fn open_for_append(path: &Path, sync_mode: SyncMode) -> Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self::from_parts(file, file_size, sync_mode))
    }

    fn from_parts(file: File, file_size: u64, sync_mode: SyncMode) -> Self {
        Self {
            writer: BufWriter::with_capacity(BLOCK_SIZE, file),
            block_offset: (file_size % BLOCK_SIZE as u64) as usize,
            sync_mode,
            bytes_since_sync: 0,
            file_size,
        }
    }

    /// Bytes written to the file so far, including padding.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Append a logical record.
    ///
    /// The record is split across as many physical records as needed. An
    /// empty payload still produces one FULL record.
    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let mut left = data;
        let mut begin = true;

        loop {
            let leftover = BLOCK_SIZE - self.block_offset;

            // Switch to a new block if we can't fit a header.
            if leftover < HEADER_SIZE {
                if leftover > 0 {
                    self.writer.write_all(&ZEROES[..leftover])?;
                    self.bytes_since_sync += leftover;
                    self.file_size += leftover as u64;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = left.len().min(avail);
            let end = left.len() == fragment_length;

            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            let (fragment, rest) = left.split_at(fragment_length);
            self.emit_physical_record(record_type, fragment)?;

            left = rest;
            begin = false;

            if end {
                break;
            }
        }

        // Hand everything to the OS even when no sync is due.
        self.writer.flush()?;
        Ok(())
    }

    /// Write a physical record (header + data).
    fn emit_physical_record(&mut self, record_type: RecordType, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= 0xFFFF);
        debug_assert!(self.block_offset + HEADER_SIZE + data.len() <= BLOCK_SIZE);

        let crc = mask_crc(crc32_multi(&[&[record_type.to_byte()], data]));

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&crc.to_le_bytes());
        header[4..6].copy_from_slice(&(data.len() as u16).to_le_bytes());
        header[6] = record_type.to_byte();

        self.writer.write_all(&header)?;
        self.writer.write_all(data)?;

        let record_size = HEADER_SIZE + data.len();
        self.block_offset += record_size;
        self.bytes_since_sync += record_size;
        self.file_size += record_size as u64;

        self.maybe_sync()
    }

    fn maybe_sync(&mut self) -> Result<()> {
        match self.sync_mode {
            SyncMode::Always => self.sync(),
            SyncMode::Bytes { bytes } if self.bytes_since_sync >= bytes => self.sync(),
            SyncMode::Bytes { .. } | SyncMode::None => Ok(()),
        }
    }

    /// Force a sync to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Close the writer, syncing any outstanding data.
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_writer_full_record_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");

        let mut writer = LogWriter::create(&path, SyncMode::Always).unwrap();
        writer.add_record(b"hello").unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 5);
        assert_eq!(&bytes[4..6], &5u16.to_le_bytes());
        assert_eq!(bytes[6], RecordType::Full.to_byte());

        let stored = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(stored, mask_crc(crc32_multi(&[&[1], b"hello"])));
    }

    #[test]
    fn test_writer_empty_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");

        let mut writer = LogWriter::create(&path, SyncMode::None).unwrap();
        writer.add_record(b"").unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(bytes[6], RecordType::Full.to_byte());
    }

    #[test]
    fn test_writer_pads_block_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");

        let mut writer = LogWriter::create(&path, SyncMode::None).unwrap();
        // Leave 3 bytes in the first block.
        writer
            .add_record(&vec![b'a'; BLOCK_SIZE - HEADER_SIZE - 3])
            .unwrap();
        writer.add_record(b"next").unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), BLOCK_SIZE + HEADER_SIZE + 4);
        assert_eq!(&bytes[BLOCK_SIZE - 3..BLOCK_SIZE], &[0, 0, 0]);
        assert_eq!(bytes[BLOCK_SIZE + 6], RecordType::Full.to_byte());
    }

    #[test]
    fn test_writer_large_record_fragments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.log");

        let mut writer = LogWriter::create(&path, SyncMode::None).unwrap();
        writer.add_record(&vec![b'x'; BLOCK_SIZE * 2]).unwrap();
        let size = writer.file_size();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, size);
        assert_eq!(bytes[6], RecordType::First.to_byte());
        assert_eq!(bytes[BLOCK_SIZE + 6], RecordType::Middle.to_byte());
        assert_eq!(bytes[2 * BLOCK_SIZE + 6], RecordType::Last.to_byte());
    }

    #[test]
    fn test_writer_open_for_append_resumes_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST-000001");

        let mut writer = LogWriter::create(&path, SyncMode::None).unwrap();
        writer.add_record(b"first").unwrap();
        writer.close().unwrap();

        let mut writer = LogWriter::open_for_append(&path, SyncMode::None).unwrap();
        assert_eq!(writer.file_size(), (HEADER_SIZE + 5) as u64);
        writer.add_record(b"second").unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 2 * HEADER_SIZE + 11);
    }
}
