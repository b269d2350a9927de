//! Public types exposed by the `corpora-core` crate.

pub mod manifest;
pub mod options;
pub mod update;

pub use manifest::{BucketDescriptor, IndexManifest};
pub use options::{AnalysisOptions, StorageOptions, StorageOptionsBuilder};
pub(crate) use update::WriterMessage;
pub use update::{Domain, SentenceId, StreamId, Update};
