//! Document CBOR decoder.

use crate::document::Document;
use crate::encoder::TIMESTAMP_TAG;
use crate::error::{CodecError, CodecResult};
use crate::timestamp::Timestamp;
use crate::value::Value;

/// Decode a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR or contain
/// forbidden constructs (NaN, indefinite-length, non-text map keys).
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = DocumentDecoder::new(bytes);
    decoder.decode()
}

/// Decode a document from CBOR bytes, rejecting trailing data.
///
/// # Errors
///
/// Returns an error if the bytes do not hold exactly one CBOR map.
pub fn document_from_cbor(bytes: &[u8]) -> CodecResult<Document> {
    let mut decoder = DocumentDecoder::new(bytes);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::invalid_structure("trailing bytes after document"));
    }
    value
        .into_document()
        .ok_or_else(|| CodecError::decoding_failed("top-level value is not a document"))
}

/// A CBOR decoder for dump records.
pub struct DocumentDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Maximum allowed element count for arrays and maps.
/// This prevents allocation-based DoS from untrusted input.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum allowed byte/string length.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

impl<'a> DocumentDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decode the next value.
    #[allow(clippy::cast_possible_wrap)]
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial_byte = self.read_byte()?;
        let major_type = initial_byte >> 5;
        let additional_info = initial_byte & 0x1f;

        match major_type {
            0 => {
                let n = self.decode_unsigned(additional_info)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::decoding_failed("unsigned integer out of range"))
            }
            1 => {
                let n = self.decode_unsigned(additional_info)?;
                if i64::try_from(n).is_ok() {
                    Ok(Value::Integer(-(n as i64) - 1))
                } else {
                    Err(CodecError::decoding_failed("negative integer out of range"))
                }
            }
            2 => self.decode_bytes(additional_info),
            3 => self.decode_text(additional_info).map(Value::Text),
            4 => self.decode_array(additional_info),
            5 => self.decode_document(additional_info).map(Value::Document),
            6 => {
                let tag = self.decode_unsigned(additional_info)?;
                if tag == TIMESTAMP_TAG {
                    self.decode_timestamp()
                } else {
                    // Unknown tags are transparent.
                    self.decode()
                }
            }
            7 => self.decode_simple(additional_info),
            _ => Err(CodecError::invalid_structure("invalid major type")),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        if self.pos >= self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    #[inline]
    fn decode_unsigned(&mut self, additional_info: u8) -> CodecResult<u64> {
        match additional_info {
            0..=23 => Ok(u64::from(additional_info)),
            24 => {
                let byte = self.read_byte()?;
                if byte < 24 {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(u64::from(byte))
            }
            25 => {
                let bytes = self.read_bytes(2)?;
                let value = u16::from_be_bytes([bytes[0], bytes[1]]);
                if u8::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(u64::from(value))
            }
            26 => {
                let bytes = self.read_bytes(4)?;
                let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if u16::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(u64::from(value))
            }
            27 => {
                let bytes = self.read_bytes(8)?;
                let value = u64::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]);
                if u32::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(value)
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            _ => Err(CodecError::IndefiniteLengthForbidden),
        }
    }

    fn decode_length(&mut self, additional_info: u8, max: u64) -> CodecResult<usize> {
        if additional_info == 31 {
            return Err(CodecError::IndefiniteLengthForbidden);
        }
        let len = self.decode_unsigned(additional_info)?;
        if len > max {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: max,
            });
        }
        usize::try_from(len).map_err(|_| CodecError::SizeLimitExceeded {
            claimed: len,
            max_allowed: max,
        })
    }

    fn decode_bytes(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_BYTES_LENGTH)?;
        let bytes = self.read_bytes(len)?;
        Ok(Value::Bytes(bytes.to_vec()))
    }

    fn decode_text(&mut self, additional_info: u8) -> CodecResult<String> {
        let len = self.decode_length(additional_info, MAX_BYTES_LENGTH)?;
        let bytes = self.read_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(text.to_string())
    }

    fn decode_array(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(Value::Array(items))
    }

    fn decode_document(&mut self, additional_info: u8) -> CodecResult<Document> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        let mut doc = Document::with_capacity(len.min(1024));

        for _ in 0..len {
            let initial_byte = self.read_byte()?;
            if initial_byte >> 5 != 3 {
                return Err(CodecError::invalid_structure("document keys must be text"));
            }
            let key = self.decode_text(initial_byte & 0x1f)?;
            let value = self.decode()?;
            if doc.insert(key.clone(), value).is_some() {
                return Err(CodecError::invalid_structure(format!(
                    "duplicate field '{key}'"
                )));
            }
        }

        Ok(doc)
    }

    fn decode_timestamp(&mut self) -> CodecResult<Value> {
        let pair = match self.decode()? {
            Value::Array(items) if items.len() == 2 => items,
            _ => {
                return Err(CodecError::invalid_structure(
                    "timestamp must be a [secs, inc] pair",
                ))
            }
        };
        let part = |v: &Value| {
            v.as_integer()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| CodecError::invalid_structure("timestamp part out of range"))
        };
        Ok(Value::Timestamp(Timestamp::new(part(&pair[0])?, part(&pair[1])?)))
    }

    fn decode_simple(&mut self, additional_info: u8) -> CodecResult<Value> {
        match additional_info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            23 => Ok(Value::Undefined),
            24 => {
                let simple = self.read_byte()?;
                Err(CodecError::unsupported_type(format!("simple value {simple}")))
            }
            25 => {
                let bytes = self.read_bytes(2)?;
                Self::checked_float(half_to_f64(u16::from_be_bytes([bytes[0], bytes[1]])))
            }
            26 => {
                let bytes = self.read_bytes(4)?;
                let f = f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                Self::checked_float(f64::from(f))
            }
            27 => {
                let bytes = self.read_bytes(8)?;
                let f = f64::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]);
                Self::checked_float(f)
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            _ => Err(CodecError::unsupported_type(format!(
                "simple value {additional_info}"
            ))),
        }
    }

    fn checked_float(f: f64) -> CodecResult<Value> {
        if f.is_nan() {
            Err(CodecError::NaNForbidden)
        } else {
            Ok(Value::Float(f))
        }
    }
}

/// Widens an IEEE 754 half-precision float.
fn half_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let mantissa = f64::from(bits & 0x03ff);

    let magnitude = match exponent {
        0 => mantissa * 2f64.powi(-24),
        31 if mantissa == 0.0 => f64::INFINITY,
        31 => f64::NAN,
        _ => (1.0 + mantissa / 1024.0) * 2f64.powi(exponent - 15),
    };
    sign * magnitude
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_simple_values() {
        assert_eq!(from_cbor(&[0xf6]).unwrap(), Value::Null);
        assert_eq!(from_cbor(&[0xf7]).unwrap(), Value::Undefined);
        assert_eq!(from_cbor(&[0xf4]).unwrap(), Value::Bool(false));
        assert_eq!(from_cbor(&[0xf5]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn decode_integers() {
        assert_eq!(from_cbor(&[0x17]).unwrap(), Value::Integer(23));
        assert_eq!(from_cbor(&[0x18, 255]).unwrap(), Value::Integer(255));
        assert_eq!(from_cbor(&[0x19, 0x01, 0x00]).unwrap(), Value::Integer(256));
        assert_eq!(from_cbor(&[0x20]).unwrap(), Value::Integer(-1));
        assert_eq!(from_cbor(&[0x38, 99]).unwrap(), Value::Integer(-100));
    }

    #[test]
    fn decode_floats() {
        // half 1.5 = 0x3e00
        assert_eq!(from_cbor(&[0xf9, 0x3e, 0x00]).unwrap(), Value::Float(1.5));
        let mut single = vec![0xfa];
        single.extend_from_slice(&2.5f32.to_be_bytes());
        assert_eq!(from_cbor(&single).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn reject_nan() {
        assert!(matches!(
            from_cbor(&[0xf9, 0x7e, 0x00]),
            Err(CodecError::NaNForbidden)
        ));
    }

    #[test]
    fn decode_timestamp_tag() {
        let value = from_cbor(&[0xd9, 0x0f, 0xa0, 0x82, 0x18, 100, 0x02]).unwrap();
        assert_eq!(value, Value::Timestamp(Timestamp::new(100, 2)));
    }

    #[test]
    fn malformed_timestamp_rejected() {
        assert!(matches!(
            from_cbor(&[0xd9, 0x0f, 0xa0, 0x81, 0x01]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn unknown_tags_are_transparent() {
        // tag(1) 5
        assert_eq!(from_cbor(&[0xc1, 0x05]).unwrap(), Value::Integer(5));
    }

    #[test]
    fn decode_document_in_stored_order() {
        let doc = document_from_cbor(&[0xa2, 0x61, b'z', 0x01, 0x61, b'a', 0x02]).unwrap();
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["z", "a"]);
    }

    #[test]
    fn reject_non_text_keys() {
        assert!(matches!(
            from_cbor(&[0xa1, 0x01, 0x01]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn reject_duplicate_keys() {
        assert!(matches!(
            from_cbor(&[0xa2, 0x61, b'a', 0x01, 0x61, b'a', 0x02]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn reject_trailing_bytes() {
        assert!(matches!(
            document_from_cbor(&[0xa0, 0x00]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn reject_top_level_scalar() {
        assert!(matches!(
            document_from_cbor(&[0x01]),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn reject_indefinite_length() {
        assert!(matches!(
            from_cbor(&[0x9f, 0x01, 0xff]),
            Err(CodecError::IndefiniteLengthForbidden)
        ));
        assert!(matches!(
            from_cbor(&[0xbf, 0x61, b'a', 0x01, 0xff]),
            Err(CodecError::IndefiniteLengthForbidden)
        ));
    }

    #[test]
    fn reject_non_shortest_encoding() {
        assert!(matches!(
            from_cbor(&[0x18, 23]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn unexpected_eof() {
        assert!(matches!(from_cbor(&[]), Err(CodecError::UnexpectedEof)));
        assert!(matches!(
            from_cbor(&[0x19, 0x01]),
            Err(CodecError::UnexpectedEof)
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert!(matches!(
            from_cbor(&[0x62, 0xff, 0xfe]),
            Err(CodecError::InvalidUtf8)
        ));
    }
}
