//! Document CBOR encoder.

use crate::document::Document;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// CBOR tag carrying a replication timestamp as `[secs, inc]`.
pub const TIMESTAMP_TAG: u64 = 4000;

/// Encode a value to CBOR bytes.
///
/// Encoding is deterministic:
/// - Integers use the shortest possible encoding
/// - No indefinite-length encoding
/// - Document fields are written in document order
///
/// # Errors
///
/// Returns an error if the value cannot be encoded (e.g., contains NaN).
pub fn to_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = DocumentEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Encode a document to CBOR bytes.
///
/// # Errors
///
/// Returns an error if any field cannot be encoded.
pub fn document_to_cbor(doc: &Document) -> CodecResult<Vec<u8>> {
    let mut encoder = DocumentEncoder::new();
    encoder.encode_document(doc)?;
    Ok(encoder.into_bytes())
}

/// A CBOR encoder for dump records.
pub struct DocumentEncoder {
    buffer: Vec<u8>,
}

impl DocumentEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => {
                self.buffer.push(0xf6);
                Ok(())
            }
            Value::Undefined => {
                self.buffer.push(0xf7);
                Ok(())
            }
            Value::Bool(b) => {
                self.buffer.push(if *b { 0xf5 } else { 0xf4 });
                Ok(())
            }
            Value::Integer(n) => {
                self.encode_integer(*n);
                Ok(())
            }
            Value::Float(f) => self.encode_float(*f),
            Value::Timestamp(ts) => {
                self.encode_unsigned(6, TIMESTAMP_TAG);
                self.encode_unsigned(4, 2);
                self.encode_unsigned(0, u64::from(ts.secs));
                self.encode_unsigned(0, u64::from(ts.inc));
                Ok(())
            }
            Value::Bytes(b) => {
                self.encode_bytes(b);
                Ok(())
            }
            Value::Text(s) => {
                self.encode_text(s);
                Ok(())
            }
            Value::Array(arr) => self.encode_array(arr),
            Value::Document(doc) => self.encode_document(doc),
        }
    }

    /// Encode a document as a CBOR map with text keys.
    pub fn encode_document(&mut self, doc: &Document) -> CodecResult<()> {
        self.encode_unsigned(5, doc.len() as u64);
        for (key, value) in doc.iter() {
            self.encode_text(key);
            self.encode(value)?;
        }
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_unsigned(0, n as u64);
        } else {
            // -1 encodes as argument 0, -2 as 1, and so on.
            let abs_minus_one = (-(n + 1)) as u64;
            self.encode_unsigned(1, abs_minus_one);
        }
    }

    fn encode_float(&mut self, f: f64) -> CodecResult<()> {
        if f.is_nan() {
            return Err(CodecError::NaNForbidden);
        }
        self.buffer.push(0xfb);
        self.buffer.extend_from_slice(&f.to_be_bytes());
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_bytes(&mut self, bytes: &[u8]) {
        self.encode_unsigned(2, bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_unsigned(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn encode_array(&mut self, arr: &[Value]) -> CodecResult<()> {
        self.encode_unsigned(4, arr.len() as u64);
        for item in arr {
            self.encode(item)?;
        }
        Ok(())
    }
}

impl Default for DocumentEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;

    #[test]
    fn encode_simple_values() {
        assert_eq!(to_cbor(&Value::Null).unwrap(), vec![0xf6]);
        assert_eq!(to_cbor(&Value::Undefined).unwrap(), vec![0xf7]);
        assert_eq!(to_cbor(&Value::Bool(false)).unwrap(), vec![0xf4]);
        assert_eq!(to_cbor(&Value::Bool(true)).unwrap(), vec![0xf5]);
    }

    #[test]
    fn encode_integers_shortest_form() {
        assert_eq!(to_cbor(&Value::Integer(23)).unwrap(), vec![0x17]);
        assert_eq!(to_cbor(&Value::Integer(24)).unwrap(), vec![0x18, 24]);
        assert_eq!(
            to_cbor(&Value::Integer(256)).unwrap(),
            vec![0x19, 0x01, 0x00]
        );
        assert_eq!(
            to_cbor(&Value::Integer(65536)).unwrap(),
            vec![0x1a, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn encode_negative_integers() {
        assert_eq!(to_cbor(&Value::Integer(-1)).unwrap(), vec![0x20]);
        assert_eq!(to_cbor(&Value::Integer(-24)).unwrap(), vec![0x37]);
        assert_eq!(to_cbor(&Value::Integer(-100)).unwrap(), vec![0x38, 99]);
    }

    #[test]
    fn encode_float_as_double() {
        let bytes = to_cbor(&Value::Float(1.5)).unwrap();
        assert_eq!(bytes[0], 0xfb);
        assert_eq!(&bytes[1..], &1.5f64.to_be_bytes());
    }

    #[test]
    fn reject_nan() {
        assert_eq!(
            to_cbor(&Value::Float(f64::NAN)),
            Err(CodecError::NaNForbidden)
        );
    }

    #[test]
    fn encode_timestamp_as_tagged_pair() {
        let bytes = to_cbor(&Value::Timestamp(Timestamp::new(100, 2))).unwrap();
        // tag(4000) = 0xd9 0x0f 0xa0, array(2), 100, 2
        assert_eq!(bytes, vec![0xd9, 0x0f, 0xa0, 0x82, 0x18, 100, 0x02]);
    }

    #[test]
    fn document_keeps_field_order() {
        let doc = Document::new().with("bb", 2).with("a", 1);
        let bytes = document_to_cbor(&doc).unwrap();
        assert_eq!(bytes, vec![0xa2, 0x62, b'b', b'b', 0x02, 0x61, b'a', 0x01]);
    }
}
