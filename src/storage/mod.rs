//! Corpora storage engine: lifecycle, background writer and analysis pool.

pub mod analysis;
pub mod index;
pub mod lifecycle;
mod writer;

use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{SentenceId, StreamId, Update};

pub use analysis::{AnalysisPool, AnalysisTask};
pub use index::{CorporaIndex, StreamOffsets};
pub use lifecycle::CorporaStorage;

/// Push interface through which replication delivers parsed updates.
pub trait UpdatesListener {
    fn update_received(&self, update: Update) -> Result<()>;

    /// Resume points, polled by replication after a restart.
    fn current_stream_offsets(&self) -> BTreeMap<StreamId, SentenceId>;
}
