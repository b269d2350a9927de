//! Contract of the context index kept in step with the corpora.

use crate::error::Result;
use crate::types::Domain;

/// Search structure that retrieves prior translations similar to a query.
///
/// The storage engine feeds it newly flushed bucket content from its analysis
/// pool, so implementations must accept concurrent `add` calls for different
/// domains. `flush` and `invalidate_cache` must be safe to call when nothing
/// was added.
pub trait ContextIndex: Send + Sync {
    /// Ingest lines appended to the corpus of `domain`.
    fn add(&self, domain: Domain, lines: &[String]) -> Result<()>;

    /// Make everything added so far durable.
    fn flush(&self) -> Result<()>;

    /// Drop cached query state so the next lookup sees flushed content.
    fn invalidate_cache(&self) -> Result<()>;
}
