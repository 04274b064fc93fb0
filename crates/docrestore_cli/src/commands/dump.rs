//! Dump command implementation.

use super::document_to_json;
use docrestore_core::RecordReader;
use serde::Serialize;
use std::path::Path;

/// A dump record for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Offset of the record in the file.
    pub offset: u64,
    /// The record as extended JSON.
    pub record: serde_json::Value,
}

/// Runs the dump command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No dump file at {}", path.display()).into());
    }

    let records = collect_records(path, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            println!("Records ({} shown)", records.len());
            println!("================");
            for info in &records {
                println!("[{:08}] {}", info.offset, info.record);
            }
        }
    }

    Ok(())
}

fn collect_records(
    path: &Path,
    limit: Option<usize>,
) -> Result<Vec<RecordInfo>, Box<dyn std::error::Error>> {
    let mut reader = RecordReader::open(path)?;
    let mut records = Vec::new();
    let max_records = limit.unwrap_or(usize::MAX);

    while records.len() < max_records {
        let offset = reader.offset();
        let Some(record) = reader.next() else {
            break;
        };
        records.push(RecordInfo {
            offset,
            record: document_to_json(&record?),
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrestore_testkit::prelude::*;

    #[test]
    fn reads_records_with_offsets() {
        let docs = numbered(3);
        let dump = DumpBuilder::new().data("a.bson", &docs);
        let records = collect_records(&dump.path("a.bson"), None).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].offset, 0);
        let first_len = encode_records(&docs[..1]).len() as u64;
        assert_eq!(records[1].offset, first_len);
        assert_eq!(records[2].record, serde_json::json!({"_id": 2}));
    }

    #[test]
    fn limit_stops_early() {
        let dump = DumpBuilder::new().data("a.bson", &numbered(5));
        assert_eq!(collect_records(&dump.path("a.bson"), Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let dump = DumpBuilder::new().raw("a.bson", &[0xff, 0xff, 0xff, 0xff]);
        assert!(collect_records(&dump.path("a.bson"), None).is_err());
    }
}
