//! # docrestore codec
//!
//! Document model and CBOR record encoding for docrestore dumps.
//!
//! Records in a dump file are ordered documents encoded as CBOR maps with
//! text keys, each wrapped in a length-prefixed frame. Encoding is
//! deterministic:
//!
//! - Integers use shortest encoding
//! - No indefinite-length items
//! - Document fields keep their original order
//! - Replication timestamps use CBOR tag 4000 over `[secs, inc]`
//! - `undefined` is kept distinct from `null`
//!
//! ## Usage
//!
//! ```
//! use docrestore_codec::{decode_record, encode_record, Document, FRAME_HEADER_SIZE};
//!
//! let doc = Document::new().with("_id", 1).with("name", "ann");
//! let frame = encode_record(&doc).unwrap();
//! let decoded = decode_record(&frame[FRAME_HEADER_SIZE..], 0).unwrap();
//! assert_eq!(doc, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod document;
mod encoder;
mod error;
mod frame;
mod timestamp;
mod value;

pub use decoder::{document_from_cbor, from_cbor, DocumentDecoder};
pub use document::Document;
pub use encoder::{document_to_cbor, to_cbor, DocumentEncoder, TIMESTAMP_TAG};
pub use error::{CodecError, CodecResult};
pub use frame::{
    decode_frame_header, decode_record, encode_record, FRAME_HEADER_SIZE, MAX_RECORD_SIZE,
};
pub use timestamp::Timestamp;
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            Just(Value::Undefined),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            (-1.0e12f64..1.0e12).prop_map(Value::Float),
            (any::<u32>(), any::<u32>()).prop_map(|(s, i)| Value::Timestamp(Timestamp::new(s, i))),
            "[a-z0-9 ]{0,16}".prop_map(Value::Text),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Document(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn decoded_value_reencodes_to_same_bytes(value in value_strategy()) {
            let bytes = to_cbor(&value).unwrap();
            let decoded = from_cbor(&bytes).unwrap();
            prop_assert_eq!(&decoded, &value);
            prop_assert_eq!(to_cbor(&decoded).unwrap(), bytes);
        }
    }

    #[test]
    fn nested_document_survives_a_frame() {
        let doc = Document::new()
            .with("ts", Timestamp::new(100, 2))
            .with("op", "i")
            .with("ns", "app.users")
            .with("o", Document::new().with("_id", 7).with("tags", vec![Value::from("a")]));
        let frame = encode_record(&doc).unwrap();
        let len = decode_frame_header([frame[0], frame[1], frame[2], frame[3]], 0).unwrap();
        assert_eq!(len, frame.len() - FRAME_HEADER_SIZE);
        assert_eq!(decode_record(&frame[FRAME_HEADER_SIZE..], 0).unwrap(), doc);
    }
}
