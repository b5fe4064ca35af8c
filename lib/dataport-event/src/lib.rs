//! Change-stream event model.
//!
//! A change stream delivers one ordered sequence of events per partition. Data events (mutations, deletions, and
//! expirations) describe a single document, while control events (stream begin/end, snapshot markers, and sync
//! heartbeats) describe the state of the stream itself.
#![deny(warnings)]
#![deny(missing_docs)]

use std::fmt;

use bitmask_enum::bitmask;
use bytes::Bytes;

mod metadata;
pub use self::metadata::EventMetadata;

mod opcode;
pub use self::opcode::Opcode;

/// Document datatype flags.
///
/// This type is a bitmask, mirroring the datatype byte carried by every data event: a document body can be JSON, can
/// be compressed, and can carry extended attributes, in any combination.
#[bitmask(u8)]
#[bitmask_config(vec_debug)]
pub enum Datatype {
    /// The body is a JSON document.
    Json,

    /// The body is Snappy-compressed.
    Snappy,

    /// The body is prefixed with extended attributes.
    Xattr,
}

impl Default for Datatype {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut types = Vec::new();

        if self.contains(Self::Json) {
            types.push("json");
        }

        if self.contains(Self::Snappy) {
            types.push("snappy");
        }

        if self.contains(Self::Xattr) {
            types.push("xattr");
        }

        if types.is_empty() {
            write!(f, "raw")
        } else {
            write!(f, "{}", types.join("|"))
        }
    }
}

/// A snapshot marker.
///
/// Snapshot markers delimit a range of sequence numbers that together form a consistent snapshot of the partition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SnapshotMarker {
    /// Snapshot type flags, as reported by the stream.
    pub snapshot_type: u32,

    /// First sequence number in the snapshot.
    pub start: u64,

    /// Last sequence number in the snapshot.
    pub end: u64,
}

/// A change-stream event.
///
/// Events are created with one of the opcode-specific constructors and then decorated with the `with_*` methods. The
/// value of an event is only populated for mutations, or for deletions and expirations whose tombstone retains its
/// extended attributes (in which case the value holds the attribute payload). The old value is populated by the caller
/// only when a prior version of the document is available.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangeEvent {
    opcode: Opcode,
    key: Bytes,
    value: Bytes,
    old_value: Bytes,
    datatype: Datatype,
    partition_id: u16,
    partition_epoch: u64,
    seqno: u64,
    rev_seqno: u64,
    cas: u64,
    ctime: u64,
    expiration: u32,
    flags: u32,
    lock_time: u32,
    nru: u8,
    snapshot: Option<SnapshotMarker>,
}

impl ChangeEvent {
    fn new(opcode: Opcode, partition_id: u16, key: Bytes) -> Self {
        Self {
            opcode,
            key,
            value: Bytes::new(),
            old_value: Bytes::new(),
            datatype: Datatype::none(),
            partition_id,
            partition_epoch: 0,
            seqno: 0,
            rev_seqno: 0,
            cas: 0,
            ctime: 0,
            expiration: 0,
            flags: 0,
            lock_time: 0,
            nru: 0,
            snapshot: None,
        }
    }

    /// Creates a mutation event for the given document key and body.
    pub fn mutation(partition_id: u16, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        let mut event = Self::new(Opcode::Mutation, partition_id, key.into());
        event.value = value.into();
        event
    }

    /// Creates a deletion event for the given document key.
    pub fn deletion(partition_id: u16, key: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Deletion, partition_id, key.into())
    }

    /// Creates an expiration event for the given document key.
    pub fn expiration(partition_id: u16, key: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Expiration, partition_id, key.into())
    }

    /// Creates an event with an arbitrary opcode.
    ///
    /// This is mostly useful for opcodes the router does not interpret, such as [`Opcode::Other`].
    pub fn with_opcode(opcode: Opcode, partition_id: u16, key: impl Into<Bytes>) -> Self {
        Self::new(opcode, partition_id, key.into())
    }

    /// Creates a stream begin control event.
    pub fn stream_begin(partition_id: u16, partition_epoch: u64, seqno: u64) -> Self {
        Self::new(Opcode::StreamBegin, partition_id, Bytes::new())
            .with_partition_epoch(partition_epoch)
            .with_seqno(seqno)
    }

    /// Creates a stream end control event.
    pub fn stream_end(partition_id: u16, partition_epoch: u64, seqno: u64) -> Self {
        Self::new(Opcode::StreamEnd, partition_id, Bytes::new())
            .with_partition_epoch(partition_epoch)
            .with_seqno(seqno)
    }

    /// Creates a sync heartbeat control event.
    pub fn sync(partition_id: u16, partition_epoch: u64, seqno: u64) -> Self {
        Self::new(Opcode::Sync, partition_id, Bytes::new())
            .with_partition_epoch(partition_epoch)
            .with_seqno(seqno)
    }

    /// Creates a snapshot marker control event.
    pub fn snapshot_marker(partition_id: u16, partition_epoch: u64, seqno: u64, marker: SnapshotMarker) -> Self {
        let mut event = Self::new(Opcode::SnapshotMarker, partition_id, Bytes::new())
            .with_partition_epoch(partition_epoch)
            .with_seqno(seqno);
        event.snapshot = Some(marker);
        event
    }

    /// Sets the body of the event.
    ///
    /// For deletions and expirations, this should only be used to carry the extended attribute payload of a tombstone.
    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = value.into();
        self
    }

    /// Sets the prior body of the document.
    pub fn with_old_value(mut self, old_value: impl Into<Bytes>) -> Self {
        self.old_value = old_value.into();
        self
    }

    /// Sets the datatype flags of the event.
    pub fn with_datatype(mut self, datatype: Datatype) -> Self {
        self.datatype = datatype;
        self
    }

    /// Sets the partition epoch (partition UUID) of the event.
    pub fn with_partition_epoch(mut self, partition_epoch: u64) -> Self {
        self.partition_epoch = partition_epoch;
        self
    }

    /// Sets the sequence number of the event.
    pub fn with_seqno(mut self, seqno: u64) -> Self {
        self.seqno = seqno;
        self
    }

    /// Sets the revision sequence number of the document.
    pub fn with_rev_seqno(mut self, rev_seqno: u64) -> Self {
        self.rev_seqno = rev_seqno;
        self
    }

    /// Sets the CAS value of the document.
    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    /// Sets the creation timestamp of the event.
    pub fn with_ctime(mut self, ctime: u64) -> Self {
        self.ctime = ctime;
        self
    }

    /// Sets the expiration time of the document.
    pub fn with_expiration(mut self, expiration: u32) -> Self {
        self.expiration = expiration;
        self
    }

    /// Sets the user flags of the document.
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the lock time of the document.
    pub fn with_lock_time(mut self, lock_time: u32) -> Self {
        self.lock_time = lock_time;
        self
    }

    /// Sets the not-recently-used value of the document.
    pub fn with_nru(mut self, nru: u8) -> Self {
        self.nru = nru;
        self
    }

    /// Returns the opcode of the event.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns the document key.
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Returns the document body, which may be empty.
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Returns the prior document body, which may be empty.
    pub fn old_value(&self) -> &Bytes {
        &self.old_value
    }

    /// Returns the datatype flags of the event.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Returns `true` if the document carries extended attributes.
    pub fn has_extended_attributes(&self) -> bool {
        self.datatype.contains(Datatype::Xattr)
    }

    /// Marks the body of the event as JSON.
    ///
    /// This is used when a tombstone's extended attributes are treated as the effective document body.
    pub fn treat_as_json(&mut self) {
        self.datatype |= Datatype::Json;
    }

    /// Returns the partition identifier.
    pub fn partition_id(&self) -> u16 {
        self.partition_id
    }

    /// Returns the partition epoch.
    pub fn partition_epoch(&self) -> u64 {
        self.partition_epoch
    }

    /// Returns the sequence number.
    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    /// Returns the creation timestamp.
    pub fn ctime(&self) -> u64 {
        self.ctime
    }

    /// Returns the snapshot marker, if this is a snapshot marker event.
    pub fn snapshot(&self) -> Option<&SnapshotMarker> {
        self.snapshot.as_ref()
    }

    /// Derives the metadata document for this event.
    pub fn metadata(&self) -> EventMetadata {
        EventMetadata {
            id: String::from_utf8_lossy(&self.key).into_owned(),
            cas: self.cas,
            expiration: self.expiration,
            flags: self.flags,
            nru: self.nru,
            by_seqno: self.seqno,
            rev_seqno: self.rev_seqno,
            lock_time: self.lock_time,
        }
    }
}
