//! Record framing for dump files.
//!
//! A dump file is a plain sequence of frames, one per document:
//!
//! ```text
//! | len: u32 LE | CBOR document (len bytes) |
//! ```
//!
//! There is no file header, so concatenating two dump files yields a valid
//! dump file.

use crate::decoder::DocumentDecoder;
use crate::document::Document;
use crate::encoder::document_to_cbor;
use crate::error::{CodecError, CodecResult};

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest document a frame may carry (16 MiB).
pub const MAX_RECORD_SIZE: u32 = 16 * 1024 * 1024;

/// Encodes a document as one frame.
///
/// # Errors
///
/// Returns an error if the document cannot be encoded or exceeds
/// [`MAX_RECORD_SIZE`].
pub fn encode_record(doc: &Document) -> CodecResult<Vec<u8>> {
    let payload = document_to_cbor(doc)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_SIZE)
        .ok_or_else(|| {
            CodecError::encoding_failed(format!("document of {} bytes is too large", payload.len()))
        })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads the payload length out of a frame header found at `offset`.
///
/// # Errors
///
/// Returns [`CodecError::InvalidRecordSize`] for empty or oversized frames.
pub fn decode_frame_header(header: [u8; FRAME_HEADER_SIZE], offset: u64) -> CodecResult<usize> {
    let len = u32::from_le_bytes(header);
    // The smallest document (empty map) is one byte.
    if len == 0 || len > MAX_RECORD_SIZE {
        return Err(CodecError::InvalidRecordSize {
            offset,
            size: u64::from(len),
        });
    }
    Ok(len as usize)
}

/// Decodes a frame payload found at `offset` into a document.
///
/// # Errors
///
/// Returns [`CodecError::NotADocument`] if the payload is valid CBOR but not
/// a map, or the underlying decode error otherwise.
pub fn decode_record(payload: &[u8], offset: u64) -> CodecResult<Document> {
    let mut decoder = DocumentDecoder::new(payload);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::invalid_structure(format!(
            "trailing bytes after record at offset {offset}"
        )));
    }
    value
        .into_document()
        .ok_or(CodecError::NotADocument { offset })
}
