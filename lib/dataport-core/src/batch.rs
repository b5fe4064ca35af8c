use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::resolver::EndpointAddress;

type DestinationMap = IndexMap<EndpointAddress, BatchRecord, foldhash::quality::RandomState>;

/// An operation carried by a [`KeyVersion`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Insert or update the index entry for a document.
    Upsert {
        /// Index instance the entry belongs to.
        instance_id: u64,

        /// Key computed from the new version of the document.
        #[serde(serialize_with = "serialize_key")]
        key: Option<Bytes>,

        /// Key computed from the prior version of the document, if known.
        #[serde(serialize_with = "serialize_key")]
        old_key: Option<Bytes>,

        /// Partition key of the new version of the document.
        #[serde(serialize_with = "serialize_key")]
        partition_key: Option<Bytes>,
    },

    /// Remove any entry for a document that no longer belongs at the receiving endpoint.
    UpsertDeletion {
        /// Index instance the entry belongs to.
        instance_id: u64,

        /// Key computed from the prior version of the document, if known.
        #[serde(serialize_with = "serialize_key")]
        old_key: Option<Bytes>,

        /// Partition key of the new version of the document.
        #[serde(serialize_with = "serialize_key")]
        partition_key: Option<Bytes>,
    },

    /// Remove the entry for a deleted or expired document.
    Deletion {
        /// Index instance the entry belongs to.
        instance_id: u64,

        /// Key computed from the prior version of the document, if known.
        #[serde(serialize_with = "serialize_key")]
        old_key: Option<Bytes>,

        /// Partition key of the new version of the document, if any.
        #[serde(serialize_with = "serialize_key")]
        partition_key: Option<Bytes>,
    },

    /// The stream for the partition was opened.
    StreamBegin,

    /// Heartbeat with the latest sequence number for the partition.
    Sync,

    /// A snapshot range begins.
    Snapshot {
        /// Snapshot type flags.
        snapshot_type: u32,

        /// First sequence number of the snapshot.
        start: u64,

        /// Last sequence number of the snapshot.
        end: u64,
    },

    /// The stream for the partition was closed.
    StreamEnd,
}

impl Command {
    /// Returns `true` if this command is a stream control command.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::StreamBegin | Self::Sync | Self::Snapshot { .. } | Self::StreamEnd
        )
    }
}

/// A single versioned operation on a document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct KeyVersion {
    /// Sequence number of the change that produced this entry.
    pub seqno: u64,

    /// Document key.
    #[serde(serialize_with = "serialize_bytes")]
    pub docid: Bytes,

    /// Creation timestamp of the change.
    pub ctime: u64,

    /// The operation.
    #[serde(flatten)]
    pub command: Command,
}

/// Identity stamped on a [`BatchRecord`] when it is created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchSeed {
    /// Source collection the entries came from.
    pub source: Arc<str>,

    /// Partition the entries came from.
    pub partition_id: u16,

    /// Epoch of the partition.
    pub partition_epoch: u64,
}

/// Entries bound for a single endpoint.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BatchRecord {
    /// Source collection the entries came from.
    pub source: Arc<str>,

    /// Partition the entries came from.
    pub partition_id: u16,

    /// Epoch of the partition.
    pub partition_epoch: u64,

    /// Entries, in the order they were routed.
    pub entries: Vec<KeyVersion>,
}

impl BatchRecord {
    fn from_seed(seed: &BatchSeed) -> Self {
        Self {
            source: Arc::clone(&seed.source),
            partition_id: seed.partition_id,
            partition_epoch: seed.partition_epoch,
            entries: Vec::new(),
        }
    }
}

/// Accumulates routed entries into one [`BatchRecord`] per endpoint.
///
/// An accumulator is owned by a single processing unit for one flush cycle: entries for an endpoint are appended to the
/// record created when that endpoint was first seen, and records are handed out in first-seen order when drained. It
/// is not meant to be shared between concurrent routing calls.
#[derive(Debug, Default)]
pub struct BatchAccumulator {
    records: DestinationMap,
}

impl BatchAccumulator {
    /// Creates an empty `BatchAccumulator`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry to the record for `destination`.
    ///
    /// If no record exists yet for `destination`, one is created from `seed`. Existing records keep the identity they
    /// were created with.
    pub fn upsert(&mut self, destination: &EndpointAddress, seed: &BatchSeed, entry: KeyVersion) {
        match self.records.get_mut(destination) {
            Some(record) => record.entries.push(entry),
            None => {
                let mut record = BatchRecord::from_seed(seed);
                record.entries.push(entry);
                self.records.insert(destination.clone(), record);
            }
        }
    }

    /// Returns the record for `destination`, if any entries have been routed to it.
    pub fn get(&self, destination: &EndpointAddress) -> Option<&BatchRecord> {
        self.records.get(destination)
    }

    /// Returns the number of endpoints with a record.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no entries have been routed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the total number of entries across all records.
    pub fn entry_count(&self) -> usize {
        self.records.values().map(|record| record.entries.len()).sum()
    }

    /// Iterates over all records, in the order their endpoints were first seen.
    pub fn iter(&self) -> impl Iterator<Item = (&EndpointAddress, &BatchRecord)> {
        self.records.iter()
    }

    /// Removes and returns all records, leaving the accumulator empty and ready for the next flush cycle.
    pub fn drain(&mut self) -> impl Iterator<Item = (EndpointAddress, BatchRecord)> + '_ {
        self.records.drain(..)
    }

    /// Consumes the accumulator, returning all records in first-seen order.
    pub fn into_records(self) -> Vec<(EndpointAddress, BatchRecord)> {
        self.records.into_iter().collect()
    }
}

fn serialize_bytes<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

fn serialize_key<S>(key: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match key {
        Some(key) => serialize_bytes(key, serializer),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(partition_id: u16, partition_epoch: u64) -> BatchSeed {
        BatchSeed {
            source: Arc::from("orders"),
            partition_id,
            partition_epoch,
        }
    }

    fn upsert_entry(seqno: u64, key: &'static str) -> KeyVersion {
        KeyVersion {
            seqno,
            docid: Bytes::from_static(b"doc"),
            ctime: 0,
            command: Command::Upsert {
                instance_id: 1,
                key: Some(Bytes::from_static(key.as_bytes())),
                old_key: None,
                partition_key: None,
            },
        }
    }

    #[test]
    fn first_seed_wins_and_entries_append() {
        let dest = EndpointAddress::from("10.0.0.1:9104");
        let mut batches = BatchAccumulator::new();

        batches.upsert(&dest, &seed(3, 100), upsert_entry(1, "a"));
        batches.upsert(&dest, &seed(4, 200), upsert_entry(2, "b"));

        let record = batches.get(&dest).unwrap();
        assert_eq!(record.partition_id, 3);
        assert_eq!(record.partition_epoch, 100);
        assert_eq!(
            record.entries.iter().map(|e| e.seqno).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(batches.len(), 1);
        assert_eq!(batches.entry_count(), 2);
    }

    #[test]
    fn drain_preserves_first_seen_order_and_empties() {
        let mut batches = BatchAccumulator::new();
        for addr in ["c:1", "a:1", "b:1", "a:1"] {
            batches.upsert(&EndpointAddress::from(addr), &seed(0, 0), upsert_entry(1, "k"));
        }

        let order = batches.drain().map(|(addr, _)| addr.to_string()).collect::<Vec<_>>();
        assert_eq!(order, vec!["c:1", "a:1", "b:1"]);
        assert!(batches.is_empty());
    }

    #[test]
    fn serializes_keys_as_text() {
        let json = serde_json::to_value(upsert_entry(9, r#"["ada"]"#)).unwrap();
        assert_eq!(json["seqno"], 9);
        assert_eq!(json["docid"], "doc");
        assert_eq!(json["command"], "upsert");
        assert_eq!(json["key"], r#"["ada"]"#);
        assert!(json["old_key"].is_null());
    }

    #[test]
    fn control_commands() {
        assert!(Command::Sync.is_control());
        assert!(Command::Snapshot {
            snapshot_type: 1,
            start: 0,
            end: 1
        }
        .is_control());
        assert!(!Command::Deletion {
            instance_id: 1,
            old_key: None,
            partition_key: None
        }
        .is_control());
    }
}
