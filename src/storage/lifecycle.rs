//! Opening, feeding and shutting down a corpora storage.
//!
//! Responsibilities:
//! - Create the storage directory, drop a stale `~index`, load or initialise the index.
//! - Re-analyze buckets whose content reached disk but never reached the context index.
//! - Own the bounded queue and the writer thread; expose backpressured submission.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};

use super::UpdatesListener;
use super::analysis::AnalysisPool;
use super::index::{CorporaIndex, StreamOffsets};
use super::writer::{BackgroundWriter, StoragePaths, WriterState};
use crate::constants::{INDEX_FILE_NAME, SUBMIT_POLL_INTERVAL_MS, SWAP_INDEX_FILE_NAME};
use crate::context::ContextIndex;
use crate::error::{CorporaError, Result};
use crate::types::{SentenceId, StorageOptions, StreamId, Update, WriterMessage};

/// Handle to a running corpora storage.
///
/// Cheap to share behind an `Arc`: every method takes `&self`, and all
/// mutation happens on the single writer thread the handle owns.
pub struct CorporaStorage {
    path: PathBuf,
    sender: Sender<WriterMessage>,
    /// Used by [`shutdown`](Self::shutdown) to clear the queue ahead of the stop message.
    drain: Receiver<WriterMessage>,
    state: Arc<WriterState>,
    streams: StreamOffsets,
    done: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CorporaStorage {
    /// Open (or create) the storage rooted at `path` and start its writer.
    pub fn open<P: AsRef<Path>>(
        path: P,
        options: StorageOptions,
        context: Arc<dyn ContextIndex>,
    ) -> Result<Self> {
        options.validate()?;
        let path_ref = path.as_ref();
        Self::start(path_ref, &options, context).map_err(|err| CorporaError::Initialization {
            path: path_ref.to_path_buf(),
            source: Box::new(err),
        })
    }

    fn start(path: &Path, options: &StorageOptions, context: Arc<dyn ContextIndex>) -> Result<Self> {
        fs_err::create_dir_all(path)?;

        let paths = StoragePaths {
            index: path.join(INDEX_FILE_NAME),
            swap: path.join(SWAP_INDEX_FILE_NAME),
        };
        if paths.swap.exists() {
            tracing::warn!(path = %paths.swap.display(), "removing staging index left by an interrupted flush");
            fs_err::remove_file(&paths.swap)?;
        }

        let mut index = if paths.index.exists() {
            CorporaIndex::load(options.analysis.clone(), &paths.index, path)?
        } else {
            tracing::info!(path = %path.display(), "initialising empty corpora index");
            CorporaIndex::new(options.analysis.clone(), path)
        };

        let analysis = AnalysisPool::new(options.analysis_threads, context)?;
        let analyzed = analysis.analyze_if_needed(index.buckets_mut(), &options.analysis)?;
        if analyzed > 0 {
            tracing::info!(analyzed, "analyzed buckets left over from the previous run");
            index.store(&paths.swap, &paths.index)?;
        }

        let streams = index.stream_offsets();
        let state = Arc::new(WriterState::default());
        let (sender, receiver) = crossbeam_channel::bounded(options.queue_size);
        let drain = receiver.clone();
        let (done_tx, done) = crossbeam_channel::bounded::<()>(0);

        let writer = BackgroundWriter::new(
            index,
            receiver,
            analysis,
            paths,
            options.write_behind_delay(),
            Arc::clone(&state),
        );
        let handle = thread::Builder::new()
            .name("corpora-writer".into())
            .spawn(move || {
                // Dropped when the writer returns, which wakes `await_termination`.
                let _done = done_tx;
                writer.run();
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            sender,
            drain,
            state,
            streams,
            done,
            handle: Mutex::new(Some(handle)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue `update` for the writer.
    ///
    /// Blocks while the queue is full. Fails with the stored error once the
    /// writer has failed; after shutdown the update is accepted and dropped.
    pub fn submit_update(&self, update: Update) -> Result<()> {
        self.state.check()?;
        if self.state.is_shutting_down() {
            return Ok(());
        }

        let poll = Duration::from_millis(SUBMIT_POLL_INTERVAL_MS);
        let mut message = WriterMessage::Data(update);
        loop {
            match self.sender.send_timeout(message, poll) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    self.state.check()?;
                    if self.state.is_shutting_down() {
                        return Ok(());
                    }
                    message = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return self.state.check(),
            }
        }
    }

    /// Last applied sentence per stream; replication resumes after these.
    #[must_use]
    pub fn current_stream_offsets(&self) -> BTreeMap<StreamId, SentenceId> {
        self.streams.snapshot()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state.is_shutting_down()
    }

    /// Ask the writer to stop after a final flush. Queued updates that the
    /// writer has not taken yet are discarded; their stream offsets were never
    /// applied, so replication delivers them again. Idempotent.
    pub fn shutdown(&self) {
        if !self.state.begin_shutdown() {
            return;
        }
        tracing::info!(path = %self.path.display(), "shutting down corpora storage");
        loop {
            while self.drain.try_recv().is_ok() {}
            match self.sender.try_send(WriterMessage::Shutdown) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => break,
                Err(TrySendError::Full(_)) => thread::yield_now(),
            }
        }
    }

    /// Wait up to `timeout` for the writer to exit.
    ///
    /// Returns `Ok(false)` on timeout, `Ok(true)` once the writer exited
    /// cleanly, and the stored error if it exited because of a failure.
    pub fn await_termination(&self, timeout: Duration) -> Result<bool> {
        if let Err(RecvTimeoutError::Timeout) = self.done.recv_timeout(timeout) {
            return Ok(false);
        }
        self.join_writer();
        self.state.check()?;
        Ok(true)
    }

    fn join_writer(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("corpora writer thread panicked outside its guard");
            }
        }
    }
}

impl UpdatesListener for CorporaStorage {
    fn update_received(&self, update: Update) -> Result<()> {
        self.submit_update(update)
    }

    fn current_stream_offsets(&self) -> BTreeMap<StreamId, SentenceId> {
        CorporaStorage::current_stream_offsets(self)
    }
}

impl Drop for CorporaStorage {
    fn drop(&mut self) {
        self.shutdown();
        self.join_writer();
    }
}
