use std::sync::Arc;

use bytes::Bytes;
use dataport_event::{ChangeEvent, SnapshotMarker};
use serde::Serialize;

use crate::batch::{Command, KeyVersion};

/// A stream control message for a single partition.
///
/// Lifecycle messages are built straight from control events and are never batched with document entries.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LifecycleMessage {
    /// Source collection of the stream.
    pub source: Arc<str>,

    /// Partition the message applies to.
    pub partition_id: u16,

    /// Epoch of the partition.
    pub partition_epoch: u64,

    /// The control entry.
    pub entry: KeyVersion,
}

impl LifecycleMessage {
    fn new(source: Arc<str>, event: &ChangeEvent, ctime: u64, command: Command) -> Self {
        Self {
            source,
            partition_id: event.partition_id(),
            partition_epoch: event.partition_epoch(),
            entry: KeyVersion {
                seqno: event.seqno(),
                docid: Bytes::new(),
                ctime,
                command,
            },
        }
    }

    /// Creates a stream-begin message.
    pub fn stream_begin(source: Arc<str>, event: &ChangeEvent) -> Self {
        Self::new(source, event, 0, Command::StreamBegin)
    }

    /// Creates a sync message.
    pub fn sync(source: Arc<str>, event: &ChangeEvent) -> Self {
        Self::new(source, event, 0, Command::Sync)
    }

    /// Creates a snapshot message.
    ///
    /// Events without a snapshot marker produce an empty range.
    pub fn snapshot(source: Arc<str>, event: &ChangeEvent) -> Self {
        let marker = event.snapshot().copied().unwrap_or(SnapshotMarker {
            snapshot_type: 0,
            start: 0,
            end: 0,
        });
        Self::new(
            source,
            event,
            event.ctime(),
            Command::Snapshot {
                snapshot_type: marker.snapshot_type,
                start: marker.start,
                end: marker.end,
            },
        )
    }

    /// Creates a stream-end message.
    pub fn stream_end(source: Arc<str>, event: &ChangeEvent) -> Self {
        Self::new(source, event, 0, Command::StreamEnd)
    }
}
