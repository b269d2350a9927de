//! Serialized shape of the `index` metadata file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::update::{Domain, SentenceId, StreamId};

/// Durable description of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDescriptor {
    pub domain: Domain,
    /// File name relative to the storage directory.
    pub file_name: String,
    /// Bytes committed to the backing file.
    pub size: u64,
    /// Prefix of the backing file already fed to the context index.
    pub analyzed_size: u64,
    /// Lines committed to the backing file.
    pub lines: u64,
}

/// Root object persisted to `index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub buckets: Vec<BucketDescriptor>,
    pub streams: BTreeMap<StreamId, SentenceId>,
}
