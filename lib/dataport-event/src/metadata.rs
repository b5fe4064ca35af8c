use serde::Serialize;

/// Document metadata handed to a transform alongside the document body.
///
/// The metadata is derived once per event (see [`ChangeEvent::metadata`][crate::ChangeEvent::metadata]) and shared by
/// every transform invocation for that event.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct EventMetadata {
    /// Document key, decoded as UTF-8 (lossily).
    pub id: String,

    /// Compare-and-swap value.
    pub cas: u64,

    /// Expiration time, in seconds since the Unix epoch, or zero if the document does not expire.
    pub expiration: u32,

    /// User flags.
    pub flags: u32,

    /// Not-recently-used marker.
    pub nru: u8,

    /// Sequence number of this version of the document.
    #[serde(rename = "byseqno")]
    pub by_seqno: u64,

    /// Revision sequence number of the document.
    #[serde(rename = "revseqno")]
    pub rev_seqno: u64,

    /// Lock time.
    #[serde(rename = "locktime")]
    pub lock_time: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_stream_field_names() {
        let meta = EventMetadata {
            id: "k".to_string(),
            by_seqno: 4,
            rev_seqno: 2,
            lock_time: 1,
            ..Default::default()
        };

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["id"], "k");
        assert_eq!(json["byseqno"], 4);
        assert_eq!(json["revseqno"], 2);
        assert_eq!(json["locktime"], 1);
    }
}
