//! In-memory corpora index: the bucket set and per-stream offsets.
//!
//! Only the background writer mutates a `CorporaIndex`. Stream offsets are
//! additionally published through [`StreamOffsets`] so producers can read
//! resume points without going through the writer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::Result;
use crate::io::bucket::CorpusBucket;
use crate::io::index_file::IndexFileCodec;
use crate::types::{AnalysisOptions, Domain, IndexManifest, SentenceId, StreamId};

/// Shared, read-mostly view of the last applied sentence per stream.
#[derive(Debug, Clone, Default)]
pub struct StreamOffsets {
    inner: Arc<RwLock<BTreeMap<StreamId, SentenceId>>>,
}

impl StreamOffsets {
    fn from_map(map: BTreeMap<StreamId, SentenceId>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<StreamId, SentenceId> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn get(&self, stream: StreamId) -> Option<SentenceId> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stream)
            .copied()
    }

    fn advance(&self, stream: StreamId, sentence: SentenceId) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match guard.get(&stream) {
            Some(&last) if sentence <= last => false,
            _ => {
                guard.insert(stream, sentence);
                true
            }
        }
    }
}

pub struct CorporaIndex {
    directory: PathBuf,
    analysis: AnalysisOptions,
    buckets: BTreeMap<Domain, CorpusBucket>,
    streams: StreamOffsets,
}

impl CorporaIndex {
    #[must_use]
    pub fn new(analysis: AnalysisOptions, directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
            analysis,
            buckets: BTreeMap::new(),
            streams: StreamOffsets::default(),
        }
    }

    /// Rebuild the index from a persisted `index` file.
    pub fn load(analysis: AnalysisOptions, index_path: &Path, directory: &Path) -> Result<Self> {
        let manifest = IndexFileCodec::read(index_path)?;
        let buckets = manifest
            .buckets
            .iter()
            .map(|descriptor| {
                (
                    descriptor.domain,
                    CorpusBucket::from_descriptor(directory, descriptor),
                )
            })
            .collect();
        tracing::info!(
            buckets = manifest.buckets.len(),
            streams = manifest.streams.len(),
            "loaded corpora index"
        );
        Ok(Self {
            directory: directory.to_path_buf(),
            analysis,
            buckets,
            streams: StreamOffsets::from_map(manifest.streams),
        })
    }

    /// Record `(stream, sentence)` if it is newer than anything applied for the stream.
    pub fn register_update(&mut self, stream: StreamId, sentence: SentenceId) -> bool {
        self.streams.advance(stream, sentence)
    }

    /// The bucket for `domain`, created on first use.
    pub fn get_bucket(&mut self, domain: Domain) -> &mut CorpusBucket {
        let directory = &self.directory;
        self.buckets
            .entry(domain)
            .or_insert_with(|| CorpusBucket::new(directory, domain))
    }

    #[must_use]
    pub fn bucket(&self, domain: Domain) -> Option<&CorpusBucket> {
        self.buckets.get(&domain)
    }

    pub fn buckets(&self) -> impl Iterator<Item = &CorpusBucket> {
        self.buckets.values()
    }

    /// Mutable access to the buckets whose domain is in `domains`.
    pub fn buckets_in<'a>(
        &'a mut self,
        domains: &'a BTreeSet<Domain>,
    ) -> impl Iterator<Item = &'a mut CorpusBucket> + 'a {
        self.buckets
            .iter_mut()
            .filter(move |(domain, _)| domains.contains(domain))
            .map(|(_, bucket)| bucket)
    }

    pub fn buckets_mut(&mut self) -> impl Iterator<Item = &mut CorpusBucket> {
        self.buckets.values_mut()
    }

    #[must_use]
    pub fn analysis_options(&self) -> &AnalysisOptions {
        &self.analysis
    }

    #[must_use]
    pub fn streams(&self) -> BTreeMap<StreamId, SentenceId> {
        self.streams.snapshot()
    }

    /// Handle that observes stream offsets as the writer applies updates.
    #[must_use]
    pub fn stream_offsets(&self) -> StreamOffsets {
        self.streams.clone()
    }

    #[must_use]
    pub fn manifest(&self) -> IndexManifest {
        IndexManifest {
            buckets: self.buckets.values().map(CorpusBucket::descriptor).collect(),
            streams: self.streams.snapshot(),
        }
    }

    /// Persist a snapshot: write `swap_path`, then rename it over `index_path`.
    pub fn store(&self, swap_path: &Path, index_path: &Path) -> Result<()> {
        IndexFileCodec::write_atomic(&self.manifest(), swap_path, index_path)
    }

    /// Release every bucket file handle.
    pub fn close(&mut self) {
        for bucket in self.buckets.values_mut() {
            bucket.close();
        }
    }
}
