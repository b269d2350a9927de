#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(clippy::uninlined_format_args, clippy::float_cmp)
)]
#![allow(clippy::module_name_repetitions)]
//
// Documentation lints: internal helpers are self-describing; public APIs carry docs.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Byte counts and line counts are bounded by file sizes; the float conversions
// only feed the analysis growth heuristic.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
//
// Builders and thread bodies take owned values on purpose.
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Durable per-domain corpora storage for a machine-translation context index.
//!
//! [`CorporaStorage`] receives parsed updates from replication streams, drops
//! replays by comparing against the last applied sentence of each stream,
//! appends accepted sentences to per-domain buckets, and periodically flushes
//! them to disk, feeds new content into a [`ContextIndex`], and atomically
//! replaces the `index` metadata file.

/// The corpora-core crate version (matches `Cargo.toml`).
pub const CORPORA_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod constants;
pub mod context;
pub mod error;
pub mod io;
#[cfg(feature = "lex")]
pub mod lex;
pub mod storage;
pub mod types;

pub use constants::*;
pub use context::ContextIndex;
pub use error::{CorporaError, Result};
pub use io::bucket::CorpusBucket;
pub use io::index_file::IndexFileCodec;
#[cfg(feature = "lex")]
pub use lex::{ContextHit, TantivyContextIndex};
pub use storage::{
    AnalysisPool, AnalysisTask, CorporaIndex, CorporaStorage, StreamOffsets, UpdatesListener,
};
pub use types::{
    AnalysisOptions, BucketDescriptor, Domain, IndexManifest, SentenceId, StorageOptions,
    StorageOptionsBuilder, StreamId, Update,
};
