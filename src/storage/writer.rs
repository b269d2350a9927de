//! The background writer: sole mutator of buckets and the corpora index.
//!
//! The writer drains the update queue, drops replays that are not newer than
//! the last applied sentence of their stream, and runs a debounced flush cycle
//! whenever the queue stays quiet for the write-behind delay. A fatal error is
//! stored in [`WriterState`] and stops the writer; every later submission
//! re-raises it.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::analysis::{AnalysisPool, panic_message};
use super::index::CorporaIndex;
use crate::error::{CorporaError, Result};
use crate::types::{Domain, Update, WriterMessage};

/// State shared between the engine handle and its writer thread.
#[derive(Debug, Default)]
pub(crate) struct WriterState {
    shutting_down: AtomicBool,
    error: OnceLock<Arc<CorporaError>>,
}

impl WriterState {
    pub(crate) fn error(&self) -> Option<Arc<CorporaError>> {
        self.error.get().cloned()
    }

    pub(crate) fn check(&self) -> Result<()> {
        match self.error() {
            Some(err) => Err(CorporaError::WriterFailed(err)),
            None => Ok(()),
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Returns `true` for the caller that initiated shutdown.
    pub(crate) fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::AcqRel)
    }

    fn record_error(&self, err: CorporaError) {
        if self.error.set(Arc::new(err)).is_err() {
            tracing::debug!("writer error already recorded");
        }
    }
}

pub(crate) struct StoragePaths {
    pub(crate) index: PathBuf,
    pub(crate) swap: PathBuf,
}

enum Poll {
    Data(Update),
    Shutdown,
    Timeout,
}

pub(crate) struct BackgroundWriter {
    index: CorporaIndex,
    pending: BTreeSet<Domain>,
    receiver: Receiver<WriterMessage>,
    analysis: AnalysisPool,
    paths: StoragePaths,
    write_behind: Duration,
    last_write: Instant,
    state: Arc<WriterState>,
}

impl BackgroundWriter {
    pub(crate) fn new(
        index: CorporaIndex,
        receiver: Receiver<WriterMessage>,
        analysis: AnalysisPool,
        paths: StoragePaths,
        write_behind: Duration,
        state: Arc<WriterState>,
    ) -> Self {
        Self {
            index,
            pending: BTreeSet::new(),
            receiver,
            analysis,
            paths,
            write_behind,
            last_write: Instant::now(),
            state,
        }
    }

    /// Thread body. Always closes the index, even when the loop fails.
    pub(crate) fn run(mut self) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process()));
        let result = outcome.unwrap_or_else(|payload| {
            Err(CorporaError::WriterPanicked {
                reason: panic_message(payload.as_ref()),
            })
        });
        self.index.close();

        match result {
            Ok(()) => tracing::info!("corpora writer stopped"),
            Err(err) => {
                tracing::error!(error = %err, "corpora writer failed");
                self.state.record_error(err);
            }
        }
    }

    fn process(&mut self) -> Result<()> {
        loop {
            let remaining = self.write_behind.saturating_sub(self.last_write.elapsed());
            match self.next_message(remaining) {
                Poll::Timeout => {
                    self.flush_to_disk(false)?;
                    self.last_write = Instant::now();
                }
                Poll::Shutdown => break,
                Poll::Data(update) => self.apply(update)?,
            }
        }
        // Analysis is left to the next open, which re-checks every bucket.
        self.flush_to_disk(true)
    }

    fn next_message(&self, timeout: Duration) -> Poll {
        if timeout.is_zero() {
            return Poll::Timeout;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(WriterMessage::Data(update)) => Poll::Data(update),
            Ok(WriterMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => Poll::Shutdown,
            Err(RecvTimeoutError::Timeout) => Poll::Timeout,
        }
    }

    fn apply(&mut self, update: Update) -> Result<()> {
        if !self
            .index
            .register_update(update.stream_id, update.sentence_id)
        {
            tracing::debug!(
                stream = update.stream_id,
                sentence = update.sentence_id,
                "discarding replayed update"
            );
            return Ok(());
        }

        let bucket = self.index.get_bucket(update.domain);
        if !bucket.is_open() {
            bucket.open()?;
        }
        bucket.append(&update.source_sentence);
        self.pending.insert(update.domain);
        Ok(())
    }

    fn flush_to_disk(&mut self, skip_analysis: bool) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        tracing::info!(
            pending = self.pending.len(),
            skip_analysis,
            "flushing corpora index to disk"
        );

        for bucket in self.index.buckets_in(&self.pending) {
            bucket.flush()?;
        }

        if !skip_analysis {
            let options = self.index.analysis_options().clone();
            match self
                .analysis
                .analyze_if_needed(self.index.buckets_in(&self.pending), &options)
            {
                Ok(analyzed) => tracing::debug!(analyzed, "analysis cycle complete"),
                Err(err) if !err.is_fatal() => {
                    tracing::warn!(
                        error = %err,
                        "analysis failed; index snapshot deferred to the next cycle"
                    );
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }

        self.pending.clear();
        self.index.store(&self.paths.swap, &self.paths.index)
    }
}
