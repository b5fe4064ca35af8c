use anyhow::Context as _;
use bytes::Bytes;
use dataport_event::{ChangeEvent, Datatype, Opcode, SnapshotMarker};
use serde::Deserialize;
use serde_json::Value;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
enum RecordOpcode {
    Mutation,
    Deletion,
    Expiration,
    StreamBegin,
    StreamEnd,
    SnapshotMarker,
    Sync,
    Other(u8),
}

impl From<RecordOpcode> for Opcode {
    fn from(value: RecordOpcode) -> Self {
        match value {
            RecordOpcode::Mutation => Self::Mutation,
            RecordOpcode::Deletion => Self::Deletion,
            RecordOpcode::Expiration => Self::Expiration,
            RecordOpcode::StreamBegin => Self::StreamBegin,
            RecordOpcode::StreamEnd => Self::StreamEnd,
            RecordOpcode::SnapshotMarker => Self::SnapshotMarker,
            RecordOpcode::Sync => Self::Sync,
            RecordOpcode::Other(code) => Self::Other(code),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
struct RecordSnapshot {
    #[serde(rename = "type", default)]
    snapshot_type: u32,
    start: u64,
    end: u64,
}

/// A single recorded change-stream event, as read from one line of a replay file.
///
/// Document bodies are given as JSON values. A record with `xattrs` carries extended attributes: for deletions and
/// expirations, the attributes become the tombstone payload.
#[derive(Clone, Debug, Deserialize)]
pub struct StreamRecord {
    opcode: RecordOpcode,
    partition: u16,
    #[serde(default)]
    epoch: u64,
    #[serde(default)]
    seqno: u64,
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    old_value: Option<Value>,
    #[serde(default)]
    xattrs: Option<Value>,
    #[serde(default)]
    cas: u64,
    #[serde(default)]
    rev_seqno: u64,
    #[serde(default)]
    ctime: u64,
    #[serde(default)]
    expiration: u32,
    #[serde(default)]
    flags: u32,
    #[serde(default)]
    snapshot: Option<RecordSnapshot>,
}

impl StreamRecord {
    /// Parses a record from a single line of JSON.
    ///
    /// # Errors
    ///
    /// If the line is not a valid record, an error will be returned.
    pub fn from_line(line: &str) -> Result<Self, anyhow::Error> {
        serde_json::from_str(line).context("Failed to parse stream record.")
    }

    /// Returns the partition the record belongs to.
    pub fn partition(&self) -> u16 {
        self.partition
    }

    /// Converts the record into a change event.
    ///
    /// # Errors
    ///
    /// If a document body cannot be re-encoded, an error will be returned.
    pub fn into_event(self) -> Result<ChangeEvent, anyhow::Error> {
        let opcode = Opcode::from(self.opcode);

        let mut event = match (opcode, self.snapshot) {
            (Opcode::StreamBegin, _) => ChangeEvent::stream_begin(self.partition, self.epoch, self.seqno),
            (Opcode::StreamEnd, _) => ChangeEvent::stream_end(self.partition, self.epoch, self.seqno),
            (Opcode::Sync, _) => ChangeEvent::sync(self.partition, self.epoch, self.seqno),
            (Opcode::SnapshotMarker, snapshot) => {
                let snapshot = snapshot.context("Snapshot marker record is missing `snapshot`.")?;
                let marker = SnapshotMarker {
                    snapshot_type: snapshot.snapshot_type,
                    start: snapshot.start,
                    end: snapshot.end,
                };
                ChangeEvent::snapshot_marker(self.partition, self.epoch, self.seqno, marker)
            }
            (opcode, _) => ChangeEvent::with_opcode(opcode, self.partition, self.key)
                .with_partition_epoch(self.epoch)
                .with_seqno(self.seqno),
        };

        let mut datatype = Datatype::none();
        if let Some(value) = self.value {
            event = event.with_value(encode_body(&value)?);
            datatype |= Datatype::Json;
        }
        if let Some(old_value) = self.old_value {
            event = event.with_old_value(encode_body(&old_value)?);
        }
        if let Some(xattrs) = self.xattrs {
            datatype |= Datatype::Xattr;
            if opcode.is_removal() {
                event = event.with_value(encode_body(&xattrs)?);
            }
        }

        Ok(event
            .with_datatype(datatype)
            .with_cas(self.cas)
            .with_rev_seqno(self.rev_seqno)
            .with_ctime(self.ctime)
            .with_expiration(self.expiration)
            .with_flags(self.flags))
    }
}

fn encode_body(value: &Value) -> Result<Bytes, anyhow::Error> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .context("Failed to encode document body.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mutation() {
        let record = StreamRecord::from_line(
            r#"{"opcode":"mutation","partition":3,"epoch":7,"seqno":12,"key":"order-1","value":{"customer":"ada"},"old_value":{"customer":"bob"},"cas":99}"#,
        )
        .unwrap();
        assert_eq!(record.partition(), 3);

        let event = record.into_event().unwrap();
        assert_eq!(event.opcode(), Opcode::Mutation);
        assert_eq!(event.partition_id(), 3);
        assert_eq!(event.partition_epoch(), 7);
        assert_eq!(event.seqno(), 12);
        assert_eq!(&event.key()[..], b"order-1");
        assert_eq!(&event.value()[..], br#"{"customer":"ada"}"#);
        assert_eq!(&event.old_value()[..], br#"{"customer":"bob"}"#);
        assert!(event.datatype().contains(Datatype::Json));
        assert_eq!(event.metadata().cas, 99);
    }

    #[test]
    fn deletion_with_xattrs_carries_tombstone_payload() {
        let event = StreamRecord::from_line(
            r#"{"opcode":"deletion","partition":0,"key":"order-1","xattrs":{"_meta":{"owner":"ada"}}}"#,
        )
        .unwrap()
        .into_event()
        .unwrap();

        assert_eq!(event.opcode(), Opcode::Deletion);
        assert!(event.has_extended_attributes());
        assert_eq!(&event.value()[..], br#"{"_meta":{"owner":"ada"}}"#);
    }

    #[test]
    fn parses_control_records() {
        let event = StreamRecord::from_line(
            r#"{"opcode":"snapshot_marker","partition":1,"epoch":2,"seqno":10,"ctime":5,"snapshot":{"type":1,"start":10,"end":20}}"#,
        )
        .unwrap()
        .into_event()
        .unwrap();
        assert_eq!(event.opcode(), Opcode::SnapshotMarker);
        assert_eq!(event.snapshot().map(|s| (s.start, s.end)), Some((10, 20)));
        assert_eq!(event.ctime(), 5);

        let event = StreamRecord::from_line(r#"{"opcode":{"other":95},"partition":1}"#)
            .unwrap()
            .into_event()
            .unwrap();
        assert_eq!(event.opcode(), Opcode::Other(95));
    }

    #[test]
    fn snapshot_marker_requires_range() {
        let record = StreamRecord::from_line(r#"{"opcode":"snapshot_marker","partition":1}"#).unwrap();
        assert!(record.into_event().is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(StreamRecord::from_line("not json").is_err());
        assert!(StreamRecord::from_line(r#"{"opcode":"mutation"}"#).is_err());
    }
}
