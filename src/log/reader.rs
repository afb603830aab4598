//! Record log reader.

use std::fmt;
use std::io::{ErrorKind, Read};

use bytes::Bytes;

use crate::util::crc::{crc32_multi, unmask_crc};
use crate::Error;

use super::{RecordType, BLOCK_SIZE, HEADER_SIZE};

/// A region of the log that was dropped while reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corruption {
    /// File offset of the first dropped byte.
    pub offset: u64,
    /// Number of bytes dropped.
    pub bytes: usize,
    /// What was wrong.
    pub reason: String,
}

impl Corruption {
    /// Convert into a corruption error.
    pub fn to_error(&self) -> Error {
        Error::corruption(self.to_string())
    }
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes dropped at offset {})",
            self.reason, self.bytes, self.offset
        )
    }
}

/// Receives corruption notices from a [`LogReader`].
pub trait Reporter {
    /// Some bytes were dropped.
    fn corruption(&mut self, corruption: &Corruption);
}

impl<F: FnMut(&Corruption)> Reporter for F {
    fn corruption(&mut self, corruption: &Corruption) {
        self(corruption)
    }
}

/// Remembers only the first corruption seen.
#[derive(Debug, Default)]
pub struct FirstCorruption {
    first: Option<Corruption>,
}

impl FirstCorruption {
    /// Create an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// The first corruption, if any.
    pub fn first(&self) -> Option<&Corruption> {
        self.first.as_ref()
    }
}

impl Reporter for FirstCorruption {
    fn corruption(&mut self, corruption: &Corruption) {
        if self.first.is_none() {
            self.first = Some(corruption.clone());
        }
    }
}

/// Outcome of reading one physical record.
enum Physical {
    Record(RecordType, usize, usize),
    Unknown(u8, usize),
    Eof,
    Bad,
}

/// Reads logical records back from a log.
///
/// Damaged regions are reported to the [`Reporter`] and skipped; reading
/// resumes at the next intact record boundary.
pub struct LogReader<R, P> {
    source: R,
    reporter: P,
    /// Current block.
    buffer: Vec<u8>,
    /// Unread range of `buffer`.
    buffer_start: usize,
    buffer_end: usize,
    /// File offset just past the end of `buffer`.
    end_of_buffer_offset: u64,
    /// Last read returned less than a full block.
    eof: bool,
    /// Skip fragments until the start of a new logical record.
    resyncing: bool,
}

impl<R: Read, P: Reporter> LogReader<R, P> {
    /// Create a reader positioned at the start of `source`.
    pub fn new(source: R, reporter: P) -> Self {
        Self {
            source,
            reporter,
            buffer: vec![0u8; BLOCK_SIZE],
            buffer_start: 0,
            buffer_end: 0,
            end_of_buffer_offset: 0,
            eof: false,
            resyncing: false,
        }
    }

    /// Get the reporter.
    pub fn reporter(&self) -> &P {
        &self.reporter
    }

    /// Get the reporter mutably, e.g. to report a record the caller rejects.
    pub fn reporter_mut(&mut self) -> &mut P {
        &mut self.reporter
    }

    /// File offset of the next unread byte.
    pub fn position(&self) -> u64 {
        self.end_of_buffer_offset - (self.buffer_end - self.buffer_start) as u64
    }

    /// Consume the reader, returning its reporter.
    pub fn into_reporter(self) -> P {
        self.reporter
    }

    /// Read the next logical record.
    ///
    /// Returns None at end of stream.
    pub fn read_record(&mut self) -> Option<Bytes> {
        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            match self.read_physical_record() {
                Physical::Record(record_type, start, end) => {
                    if self.resyncing {
                        match record_type {
                            RecordType::Middle => continue,
                            RecordType::Last => {
                                self.resyncing = false;
                                continue;
                            }
                            _ => self.resyncing = false,
                        }
                    }

                    match record_type {
                        RecordType::Full => {
                            if in_fragmented_record && !scratch.is_empty() {
                                self.report(scratch.len(), "partial record without end(1)");
                            }
                            return Some(Bytes::copy_from_slice(&self.buffer[start..end]));
                        }
                        RecordType::First => {
                            if in_fragmented_record && !scratch.is_empty() {
                                self.report(scratch.len(), "partial record without end(2)");
                            }
                            scratch.clear();
                            scratch.extend_from_slice(&self.buffer[start..end]);
                            in_fragmented_record = true;
                        }
                        RecordType::Middle => {
                            if in_fragmented_record {
                                scratch.extend_from_slice(&self.buffer[start..end]);
                            } else {
                                self.report(end - start, "missing start of fragmented record(1)");
                            }
                        }
                        RecordType::Last => {
                            if in_fragmented_record {
                                scratch.extend_from_slice(&self.buffer[start..end]);
                                return Some(Bytes::from(scratch));
                            }
                            self.report(end - start, "missing start of fragmented record(2)");
                        }
                        RecordType::Zero => {
                            // A zero record that passed its checksum carries no data.
                        }
                    }
                }
                Physical::Unknown(type_byte, length) => {
                    let dropped = length + if in_fragmented_record { scratch.len() } else { 0 };
                    self.report(dropped, &format!("unknown record type {}", type_byte));
                    in_fragmented_record = false;
                    scratch.clear();
                }
                Physical::Bad => {
                    if in_fragmented_record {
                        self.report(scratch.len(), "error in middle of record");
                        in_fragmented_record = false;
                        scratch.clear();
                    }
                    self.resyncing = true;
                }
                Physical::Eof => {
                    // A writer that died mid-record leaves a dangling prefix.
                    return None;
                }
            }
        }
    }

    fn read_physical_record(&mut self) -> Physical {
        loop {
            if self.buffer_end - self.buffer_start < HEADER_SIZE {
                if self.eof {
                    // A truncated header at the tail is the end of the stream.
                    self.buffer_start = self.buffer_end;
                    return Physical::Eof;
                }
                if !self.read_block() {
                    return Physical::Eof;
                }
                continue;
            }

            let header = &self.buffer[self.buffer_start..self.buffer_start + HEADER_SIZE];
            let expected_crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let length = u16::from_le_bytes([header[4], header[5]]) as usize;
            let type_byte = header[6];

            let available = self.buffer_end - self.buffer_start;
            if HEADER_SIZE + length > available {
                self.buffer_start = self.buffer_end;
                if !self.eof {
                    self.report(available, "bad record length");
                    return Physical::Bad;
                }
                // Truncated record at the tail: the writer died mid-write.
                return Physical::Eof;
            }

            if type_byte == RecordType::Zero.to_byte() && length == 0 {
                // Pre-allocated space; skip the rest of the block silently.
                self.buffer_start = self.buffer_end;
                return Physical::Bad;
            }

            let data_start = self.buffer_start + HEADER_SIZE;
            let data_end = data_start + length;

            let actual_crc = crc32_multi(&[&[type_byte], &self.buffer[data_start..data_end]]);
            if actual_crc != unmask_crc(expected_crc) {
                // The length itself may be corrupt, so drop the whole block.
                self.buffer_start = self.buffer_end;
                self.report(available, "checksum mismatch");
                return Physical::Bad;
            }

            self.buffer_start = data_end;

            return match RecordType::from_byte(type_byte) {
                Some(record_type) => Physical::Record(record_type, data_start, data_end),
                None => Physical::Unknown(type_byte, HEADER_SIZE + length),
            };
        }
    }

    /// Fill the buffer with the next block. Returns false at end of stream.
    fn read_block(&mut self) -> bool {
        self.buffer_start = 0;
        self.buffer_end = 0;

        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.source.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.eof = true;
                    self.end_of_buffer_offset += filled as u64;
                    self.reporter.corruption(&Corruption {
                        offset: self.end_of_buffer_offset,
                        bytes: BLOCK_SIZE,
                        reason: format!("read error: {}", e),
                    });
                    return false;
                }
            }
        }

        self.buffer_end = filled;
        self.end_of_buffer_offset += filled as u64;
        if filled < BLOCK_SIZE {
            self.eof = true;
        }
        filled > 0
    }

    fn report(&mut self, bytes: usize, reason: &str) {
        let unread = (self.buffer_end - self.buffer_start) as u64;
        let offset = (self.end_of_buffer_offset - unread).saturating_sub(bytes as u64);
        self.reporter.corruption(&Corruption {
            offset,
            bytes,
            reason: reason.to_string(),
        });
    }
}
