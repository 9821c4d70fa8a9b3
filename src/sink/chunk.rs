//! Gzip spool buffer for a single chunk.

use flate2::Compression;
use flate2::write::GzEncoder;
use snafu::prelude::*;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::{NamedTempFile, TempPath};

use crate::error::{CreateSpoolFileSnafu, FinishChunkSnafu, SinkError, WriteChunkSnafu};

/// An open chunk: newline-delimited payloads streamed through gzip into a
/// spool file on local disk.
///
/// The spool file is removed when the buffer, or the [`SealedChunk`] it
/// turns into, is dropped.
pub struct ChunkBuffer {
    encoder: GzEncoder<BufWriter<NamedTempFile>>,
    label: String,
    bytes_written: usize,
    records: u64,
    start_offset: Option<i64>,
    end_offset: i64,
}

impl ChunkBuffer {
    /// Open a new spool file in `spool_dir`. `label` identifies the chunk
    /// in error messages.
    pub fn create(spool_dir: &Path, label: impl Into<String>) -> Result<Self, SinkError> {
        let file = tempfile::Builder::new()
            .prefix("snowdrift-")
            .suffix(".gz")
            .tempfile_in(spool_dir)
            .context(CreateSpoolFileSnafu { dir: spool_dir })?;

        Ok(Self {
            encoder: GzEncoder::new(BufWriter::new(file), Compression::default()),
            label: label.into(),
            bytes_written: 0,
            records: 0,
            start_offset: None,
            end_offset: 0,
        })
    }

    /// Append one record followed by a newline.
    pub fn write_record(&mut self, offset: i64, payload: &[u8]) -> Result<(), SinkError> {
        self.encoder
            .write_all(payload)
            .and_then(|()| self.encoder.write_all(b"\n"))
            .context(WriteChunkSnafu { key: &self.label })?;

        self.bytes_written += payload.len();
        self.records += 1;
        self.start_offset.get_or_insert(offset);
        self.end_offset = offset + 1;
        Ok(())
    }

    /// Uncompressed payload bytes written so far, excluding separators.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Offset of the first record in the chunk.
    pub fn start_offset(&self) -> Option<i64> {
        self.start_offset
    }

    /// Finish the gzip stream. Returns `None` for a buffer that never
    /// received a record; its spool file is discarded.
    pub fn seal(self) -> Result<Option<SealedChunk>, SinkError> {
        let Some(start_offset) = self.start_offset else {
            return Ok(None);
        };

        let file = self
            .encoder
            .finish()
            .and_then(|writer| writer.into_inner().map_err(|e| e.into_error()))
            .context(FinishChunkSnafu { key: &self.label })?;

        Ok(Some(SealedChunk {
            path: file.into_temp_path(),
            start_offset,
            end_offset: self.end_offset,
            records: self.records,
            uncompressed_bytes: self.bytes_written,
        }))
    }
}

/// A finished gzip file waiting to be uploaded.
pub struct SealedChunk {
    pub path: TempPath,
    /// First offset in the chunk, inclusive.
    pub start_offset: i64,
    /// One past the last offset in the chunk.
    pub end_offset: i64,
    pub records: u64,
    pub uncompressed_bytes: usize,
}
