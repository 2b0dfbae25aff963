//! Store record framing
//!
//! The store file is a sequence of framed records:
//!
//! ```text
//! +------------------+
//! | Record Length    | (u32 LE, includes itself and the checksum)
//! +------------------+
//! | Entry Payload    | (JSON)
//! +------------------+
//! | Checksum         | (u32 LE, CRC32 over length + payload)
//! +------------------+
//! ```
//!
//! One record = one committed transaction. A record that extends past the
//! end of the file is a torn write from a crash and is discarded; a
//! fully-present record with a bad checksum is corruption and halts the
//! folder.

use serde::{Deserialize, Serialize};

use super::errors::{StoreError, StoreResult};
use crate::capability::Capability;
use crate::relpath::RelativePath;
use crate::snapshot::LocalSnapshot;

/// Length prefix + empty JSON object + checksum.
const MIN_RECORD_SIZE: usize = 4 + 2 + 4;

/// The capability triple recorded when the remote pointer advances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObjectCaps {
    /// The snapshot directory (the snapshot's identity)
    pub snapshot: Capability,
    /// The content blob; `None` for a deletion snapshot
    pub content: Option<Capability>,
    /// The metadata blob
    pub metadata: Capability,
}

/// Everything recorded about the latest remote snapshot of a path.
///
/// Size, mtime, and content hash let the scanner compare the working file
/// against the last synchronized version without touching the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub caps: RemoteObjectCaps,
    /// Content size (`None` for a deletion)
    pub size: Option<u64>,
    /// Modification time recorded in the snapshot metadata
    pub mtime: i64,
    /// Hex SHA-256 of the content (`None` for a deletion)
    pub content_hash: Option<String>,
}

/// A recorded conflict, observable through status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRow {
    pub path: RelativePath,
    pub participant: String,
    pub cap: Capability,
    pub detected_at: i64,
}

/// One committed store transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreEntry {
    /// First record of every store file.
    SchemaVersion { version: u32 },
    /// A new head local snapshot for its path. Replay clears any conflict
    /// rows for the path (the edit that produced the snapshot is the
    /// resolution).
    LocalSnapshot { snapshot: LocalSnapshot },
    /// The remote pointer for a path advanced; the local chain for that
    /// path is gone.
    RemoteAdvance {
        path: RelativePath,
        entry: RemoteEntry,
    },
    /// A divergent remote version was observed.
    Conflict { conflict: ConflictRow },
}

/// Serialize an entry into a framed record.
pub fn encode_record(entry: &StoreEntry) -> Vec<u8> {
    let payload = serde_json::to_vec(entry).expect("store entry serialization cannot fail");
    let record_length = (4 + payload.len() + 4) as u32;

    // Checksum covers: length + payload
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&record_length.to_le_bytes());
    hasher.update(&payload);
    let checksum = hasher.finalize();

    let mut record = Vec::with_capacity(record_length as usize);
    record.extend_from_slice(&record_length.to_le_bytes());
    record.extend_from_slice(&payload);
    record.extend_from_slice(&checksum.to_le_bytes());
    record
}

/// Outcome of decoding one record at an offset.
#[derive(Debug)]
pub enum Decoded {
    /// A valid record and the number of bytes it occupies.
    Entry(StoreEntry, usize),
    /// Clean end of file.
    Eof,
    /// The final record was torn by a crash; everything from the offset on
    /// is discardable.
    TornTail,
}

/// Decode the record starting at `offset`.
///
/// Torn tails (a record extending past EOF) are reported as recoverable;
/// a fully-present record that fails its checksum or does not parse is
/// corruption.
pub fn decode_record(data: &[u8], offset: usize) -> StoreResult<Decoded> {
    let remaining = &data[offset..];
    if remaining.is_empty() {
        return Ok(Decoded::Eof);
    }
    if remaining.len() < 4 {
        return Ok(Decoded::TornTail);
    }

    let record_length =
        u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]) as usize;
    if remaining.len() < record_length {
        // The write of this record never completed.
        return Ok(Decoded::TornTail);
    }
    if record_length < MIN_RECORD_SIZE {
        return Err(StoreError::corrupt(format!(
            "impossible record length {} at offset {}",
            record_length, offset
        )));
    }

    let checksum_offset = record_length - 4;
    let stored_checksum = u32::from_le_bytes([
        remaining[checksum_offset],
        remaining[checksum_offset + 1],
        remaining[checksum_offset + 2],
        remaining[checksum_offset + 3],
    ]);
    let computed_checksum = crc32fast::hash(&remaining[..checksum_offset]);
    if computed_checksum != stored_checksum {
        return Err(StoreError::corrupt(format!(
            "checksum mismatch at offset {}: computed {:08x}, stored {:08x}",
            offset, computed_checksum, stored_checksum
        )));
    }

    let entry: StoreEntry = serde_json::from_slice(&remaining[4..checksum_offset])
        .map_err(|e| StoreError::corrupt(format!("unparseable record at offset {}: {}", offset, e)))?;
    Ok(Decoded::Entry(entry, record_length))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> StoreEntry {
        StoreEntry::RemoteAdvance {
            path: RelativePath::new("sylvester").unwrap(),
            entry: RemoteEntry {
                caps: RemoteObjectCaps {
                    snapshot: Capability::parse("URI:DIR2-CHK:abc").unwrap(),
                    content: Some(Capability::parse("URI:CHK:def").unwrap()),
                    metadata: Capability::parse("URI:CHK:ghi").unwrap(),
                },
                size: Some(5000),
                mtime: 1_700_000_000,
                content_hash: Some("ab".repeat(32)),
            },
        }
    }

    #[test]
    fn test_record_round_trip() {
        let entry = sample_entry();
        let record = encode_record(&entry);

        match decode_record(&record, 0).unwrap() {
            Decoded::Entry(decoded, consumed) => {
                assert_eq!(decoded, entry);
                assert_eq!(consumed, record.len());
            }
            _ => panic!("expected a record"),
        }
    }

    #[test]
    fn test_empty_input_is_eof() {
        assert!(matches!(decode_record(&[], 0).unwrap(), Decoded::Eof));
    }

    #[test]
    fn test_truncated_record_is_torn_tail() {
        let record = encode_record(&sample_entry());

        for cut in [1, 3, record.len() / 2, record.len() - 1] {
            match decode_record(&record[..cut], 0).unwrap() {
                Decoded::TornTail => {}
                _ => panic!("cut at {} should be a torn tail", cut),
            }
        }
    }

    #[test]
    fn test_corrupted_record_is_fatal() {
        let mut record = encode_record(&sample_entry());
        let mid = record.len() / 2;
        record[mid] ^= 0xFF;

        let err = decode_record(&record, 0).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_deterministic_encoding() {
        let entry = sample_entry();
        assert_eq!(encode_record(&entry), encode_record(&entry));
    }

    #[test]
    fn test_consecutive_records_decode() {
        let a = StoreEntry::SchemaVersion { version: 1 };
        let b = sample_entry();
        let mut data = encode_record(&a);
        data.extend_from_slice(&encode_record(&b));

        let (first, consumed) = match decode_record(&data, 0).unwrap() {
            Decoded::Entry(e, n) => (e, n),
            _ => panic!(),
        };
        assert_eq!(first, a);

        match decode_record(&data, consumed).unwrap() {
            Decoded::Entry(e, _) => assert_eq!(e, b),
            _ => panic!(),
        }
    }
}
