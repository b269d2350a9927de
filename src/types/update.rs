//! Ingestion records streamed in from upstream replication.

/// Identifies a replication stream.
pub type StreamId = u32;
/// Per-stream sequence number; strictly increasing within a stream.
pub type SentenceId = u64;
/// Partition key of the corpora: one bucket per domain.
pub type Domain = u32;

/// A single translation example delivered by a replication stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub stream_id: StreamId,
    pub sentence_id: SentenceId,
    pub domain: Domain,
    pub source_sentence: String,
    /// Two producer-side flags carried through verbatim. The storage engine
    /// does not interpret them.
    pub reserved_flags: [bool; 2],
}

impl Update {
    #[must_use]
    pub fn new(
        stream_id: StreamId,
        sentence_id: SentenceId,
        domain: Domain,
        source_sentence: impl Into<String>,
    ) -> Self {
        Self {
            stream_id,
            sentence_id,
            domain,
            source_sentence: source_sentence.into(),
            reserved_flags: [false; 2],
        }
    }

    #[must_use]
    pub fn with_reserved_flags(mut self, flags: [bool; 2]) -> Self {
        self.reserved_flags = flags;
        self
    }
}

/// Element type of the writer queue.
///
/// Shutdown is a distinct variant so no data value can be mistaken for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WriterMessage {
    Data(Update),
    Shutdown,
}
