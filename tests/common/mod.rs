//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use corpora_core::{
    AnalysisOptions, ContextIndex, CorporaError, Domain, IndexFileCodec, IndexManifest, Result,
    StorageOptions,
};

/// Context index that records what it receives and can be told to fail.
#[derive(Default)]
pub struct RecordingContext {
    pub lines: Mutex<BTreeMap<Domain, Vec<String>>>,
    pub flushes: AtomicUsize,
    pub invalidations: AtomicUsize,
    pub failures: AtomicUsize,
    pub fail: AtomicBool,
}

impl RecordingContext {
    pub fn failing() -> Self {
        let context = Self::default();
        context.fail.store(true, Ordering::SeqCst);
        context
    }

    pub fn lines_for(&self, domain: Domain) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .get(&domain)
            .cloned()
            .unwrap_or_default()
    }
}

impl ContextIndex for RecordingContext {
    fn add(&self, domain: Domain, lines: &[String]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(CorporaError::ContextIndex {
                reason: format!("refusing domain {domain}"),
            });
        }
        self.lines
            .lock()
            .unwrap()
            .entry(domain)
            .or_default()
            .extend_from_slice(lines);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn invalidate_cache(&self) -> Result<()> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Context index whose first `add` parks until released, stalling the writer.
pub struct GatedContext {
    entered: Sender<()>,
    release: Receiver<()>,
    gated: AtomicBool,
}

impl GatedContext {
    /// Returns the context, a receiver signalled when the gate is reached,
    /// and a sender that opens it.
    pub fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        (
            Self {
                entered: entered_tx,
                release: release_rx,
                gated: AtomicBool::new(true),
            },
            entered_rx,
            release_tx,
        )
    }
}

impl ContextIndex for GatedContext {
    fn add(&self, _domain: Domain, _lines: &[String]) -> Result<()> {
        if self.gated.swap(false, Ordering::SeqCst) {
            let _ = self.entered.send(());
            let _ = self.release.recv();
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn invalidate_cache(&self) -> Result<()> {
        Ok(())
    }
}

/// Context index that only makes lines visible once `flush` commits them,
/// rejecting adds for the domains in `rejected`.
#[derive(Default)]
pub struct StagedContext {
    pub staged: Mutex<BTreeMap<Domain, Vec<String>>>,
    pub committed: Mutex<BTreeMap<Domain, Vec<String>>>,
    pub rejected: Mutex<BTreeSet<Domain>>,
    pub failures: AtomicUsize,
}

impl StagedContext {
    pub fn rejecting(domains: &[Domain]) -> Self {
        let context = Self::default();
        context.rejected.lock().unwrap().extend(domains);
        context
    }

    pub fn committed_for(&self, domain: Domain) -> Vec<String> {
        self.committed
            .lock()
            .unwrap()
            .get(&domain)
            .cloned()
            .unwrap_or_default()
    }
}

impl ContextIndex for StagedContext {
    fn add(&self, domain: Domain, lines: &[String]) -> Result<()> {
        if self.rejected.lock().unwrap().contains(&domain) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(CorporaError::ContextIndex {
                reason: format!("refusing domain {domain}"),
            });
        }
        self.staged
            .lock()
            .unwrap()
            .entry(domain)
            .or_default()
            .extend_from_slice(lines);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let staged = std::mem::take(&mut *self.staged.lock().unwrap());
        let mut committed = self.committed.lock().unwrap();
        for (domain, lines) in staged {
            committed.entry(domain).or_default().extend(lines);
        }
        Ok(())
    }

    fn invalidate_cache(&self) -> Result<()> {
        Ok(())
    }
}

pub fn options(write_behind_ms: u64) -> StorageOptions {
    StorageOptions::builder()
        .analysis_threads(2)
        .queue_size(16)
        .write_behind_delay_ms(write_behind_ms)
        .analysis(AnalysisOptions::eager())
        .build()
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn read_manifest(dir: &Path) -> Option<IndexManifest> {
    IndexFileCodec::read(&dir.join("index")).ok()
}

pub fn bucket_lines(dir: &Path, domain: Domain) -> Vec<String> {
    std::fs::read_to_string(dir.join(format!("{domain}.bucket")))
        .map(|content| content.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
