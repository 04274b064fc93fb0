//! Sequential access to dump files.
//!
//! A dump file is a plain concatenation of framed records (see
//! [`docrestore_codec::encode_record`]). [`RecordReader`] yields them in
//! file order; [`RecordWriter`] appends them.

use crate::error::{RestoreError, RestoreResult};
use docrestore_codec::{
    decode_frame_header, decode_record, encode_record, CodecError, Document, FRAME_HEADER_SIZE,
};
use docrestore_storage::{FileBackend, StorageBackend};
use std::path::{Path, PathBuf};

/// Iterates over the records of one dump file.
///
/// A malformed or truncated record ends the iteration with an error; the
/// reader yields nothing after that.
#[derive(Debug)]
pub struct RecordReader<B: StorageBackend = FileBackend> {
    backend: B,
    path: PathBuf,
    offset: u64,
    size: u64,
    failed: bool,
}

impl RecordReader<FileBackend> {
    /// Opens a dump file.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be opened.
    pub fn open(path: &Path) -> RestoreResult<Self> {
        Self::new(FileBackend::open_read_only(path)?, path)
    }
}

impl<B: StorageBackend> RecordReader<B> {
    /// Creates a reader over a backend. `path` is used in error messages.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend size cannot be read.
    pub fn new(backend: B, path: impl Into<PathBuf>) -> RestoreResult<Self> {
        let size = backend.size()?;
        Ok(Self {
            backend,
            path: path.into(),
            offset: 0,
            size,
            failed: false,
        })
    }

    /// Byte offset of the next record.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The file this reader was opened on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_next(&mut self) -> RestoreResult<Document> {
        let remaining = self.size - self.offset;
        if remaining < FRAME_HEADER_SIZE as u64 {
            return Err(RestoreError::record(&self.path, CodecError::UnexpectedEof));
        }

        let raw = self.backend.read_at(self.offset, FRAME_HEADER_SIZE)?;
        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&raw);
        let len = decode_frame_header(header, self.offset)
            .map_err(|e| RestoreError::record(&self.path, e))?;

        let payload_offset = self.offset + FRAME_HEADER_SIZE as u64;
        if self.size - payload_offset < len as u64 {
            return Err(RestoreError::record(&self.path, CodecError::UnexpectedEof));
        }

        let payload = self.backend.read_at(payload_offset, len)?;
        let doc =
            decode_record(&payload, self.offset).map_err(|e| RestoreError::record(&self.path, e))?;
        self.offset = payload_offset + len as u64;
        Ok(doc)
    }
}

impl<B: StorageBackend> Iterator for RecordReader<B> {
    type Item = RestoreResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.size {
            return None;
        }
        let result = self.read_next();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

/// Appends framed records to a dump file.
#[derive(Debug)]
pub struct RecordWriter<B: StorageBackend = FileBackend> {
    backend: B,
    count: u64,
}

impl RecordWriter<FileBackend> {
    /// Creates (or truncates) a dump file.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be created.
    pub fn create(path: &Path) -> RestoreResult<Self> {
        Ok(Self::new(FileBackend::create(path)?))
    }
}

impl<B: StorageBackend> RecordWriter<B> {
    /// Creates a writer over a backend.
    pub fn new(backend: B) -> Self {
        Self { backend, count: 0 }
    }

    /// Appends one record, returning its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be encoded or written.
    pub fn write(&mut self, doc: &Document) -> RestoreResult<u64> {
        let frame = encode_record(doc).map_err(|e| RestoreError::record("<writer>", e))?;
        let offset = self.backend.append(&frame)?;
        self.count += 1;
        Ok(offset)
    }

    /// Number of records written so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Syncs and returns the number of records written.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the sync fails.
    pub fn finish(mut self) -> RestoreResult<u64> {
        self.backend.sync()?;
        Ok(self.count)
    }

    /// Returns the underlying backend.
    pub fn into_backend(self) -> B {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrestore_storage::InMemoryBackend;
    use tempfile::tempdir;

    fn docs() -> Vec<Document> {
        (0..3)
            .map(|i| Document::new().with("_id", i64::from(i)).with("name", format!("n{i}")))
            .collect()
    }

    fn write_all(docs: &[Document]) -> Vec<u8> {
        let mut writer = RecordWriter::new(InMemoryBackend::new());
        for doc in docs {
            writer.write(doc).unwrap();
        }
        assert_eq!(writer.count(), docs.len() as u64);
        writer.into_backend().data()
    }

    #[test]
    fn reads_records_in_order() {
        let docs = docs();
        let bytes = write_all(&docs);

        let reader = RecordReader::new(InMemoryBackend::with_data(bytes), "mem").unwrap();
        let read: Vec<Document> = reader.collect::<RestoreResult<_>>().unwrap();
        assert_eq!(read, docs);
    }

    #[test]
    fn empty_file_yields_nothing() {
        let mut reader = RecordReader::new(InMemoryBackend::new(), "mem").unwrap();
        assert!(reader.next().is_none());
    }

    #[test]
    fn truncated_record_fails_once() {
        let mut bytes = write_all(&docs());
        bytes.truncate(bytes.len() - 2);

        let mut reader = RecordReader::new(InMemoryBackend::with_data(bytes), "mem").unwrap();
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            RestoreError::Record {
                source: CodecError::UnexpectedEof,
                ..
            }
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn dangling_header_bytes_fail() {
        let mut bytes = write_all(&docs()[..1]);
        bytes.extend_from_slice(&[1, 0]);

        let reader = RecordReader::new(InMemoryBackend::with_data(bytes), "mem").unwrap();
        let results: Vec<_> = reader.collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn zero_length_record_is_rejected() {
        let reader = RecordReader::new(InMemoryBackend::with_data(vec![0, 0, 0, 0]), "mem").unwrap();
        let results: Vec<_> = reader.collect();
        assert!(matches!(
            results[0],
            Err(RestoreError::Record {
                source: CodecError::InvalidRecordSize { .. },
                ..
            })
        ));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app").join("users.bson");

        let mut writer = RecordWriter::create(&path).unwrap();
        for doc in docs() {
            writer.write(&doc).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 3);

        let reader = RecordReader::open(&path).unwrap();
        assert_eq!(reader.path(), path);
        assert_eq!(reader.count(), 3);
    }
}
