//! Parallel analysis of buckets into the context index.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::context::ContextIndex;
use crate::error::{CorporaError, Result};
use crate::io::bucket::CorpusBucket;
use crate::types::AnalysisOptions;

/// Feeds one bucket's unanalyzed tail into the context index.
///
/// The bucket is only read. The caller advances its analyzed size once the
/// context index has made the lines durable.
pub struct AnalysisTask<'a> {
    context: &'a dyn ContextIndex,
    bucket: &'a CorpusBucket,
}

impl<'a> AnalysisTask<'a> {
    #[must_use]
    pub fn new(context: &'a dyn ContextIndex, bucket: &'a CorpusBucket) -> Self {
        Self { context, bucket }
    }

    /// Returns the bucket size the fed lines extend to.
    pub fn run(self) -> Result<u64> {
        let domain = self.bucket.domain();
        let target = self.bucket.size();
        let lines = self
            .bucket
            .read_unanalyzed()
            .map_err(|err| CorporaError::Analysis {
                domain,
                reason: format!("reading bucket: {err}"),
            })?;
        self.context
            .add(domain, &lines)
            .map_err(|err| match err {
                err @ CorporaError::Analysis { .. } => err,
                other => CorporaError::Analysis {
                    domain,
                    reason: other.to_string(),
                },
            })?;
        tracing::debug!(domain, lines = lines.len(), "bucket fed to context index");
        Ok(target)
    }
}

/// Fixed-size worker pool running [`AnalysisTask`]s.
pub struct AnalysisPool {
    pool: ThreadPool,
    context: Arc<dyn ContextIndex>,
}

impl AnalysisPool {
    pub fn new(threads: usize, context: Arc<dyn ContextIndex>) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("corpora-analysis-{i}"))
            .build()
            .map_err(|err| CorporaError::InvalidOptions {
                reason: format!("cannot build analysis pool: {err}"),
            })?;
        Ok(Self { pool, context })
    }

    #[must_use]
    pub fn context(&self) -> &Arc<dyn ContextIndex> {
        &self.context
    }

    /// Analyze every bucket that needs it and wait for all of them.
    ///
    /// Returns `Ok(0)` without touching the context index when nothing needed
    /// analysis. On failure the first error (in bucket order) is returned after
    /// every task has finished and no bucket advances. Analyzed sizes move only
    /// after the context index flush succeeds; the cache is invalidated last.
    pub fn analyze_if_needed<'a, I>(&self, buckets: I, options: &AnalysisOptions) -> Result<usize>
    where
        I: IntoIterator<Item = &'a mut CorpusBucket>,
    {
        let mut targets: Vec<&mut CorpusBucket> = buckets
            .into_iter()
            .filter(|bucket| bucket.should_analyze(options))
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let context: &dyn ContextIndex = self.context.as_ref();
        let results: Vec<Result<u64>> = self.pool.install(|| {
            targets
                .par_iter()
                .map(|bucket| {
                    let domain = bucket.domain();
                    panic::catch_unwind(AssertUnwindSafe(|| {
                        AnalysisTask::new(context, &**bucket).run()
                    }))
                    .unwrap_or_else(|payload| {
                        Err(CorporaError::Analysis {
                            domain,
                            reason: format!(
                                "analysis task panicked: {}",
                                panic_message(payload.as_ref())
                            ),
                        })
                    })
                })
                .collect()
        });
        let fed: Vec<u64> = results.into_iter().collect::<Result<_>>()?;

        self.context.flush()?;
        for (bucket, target) in targets.iter_mut().zip(&fed) {
            bucket.mark_analyzed(*target);
        }
        self.context.invalidate_cache()?;
        Ok(fed.len())
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    use crate::types::Domain;

    #[derive(Default)]
    struct Recording {
        lines: Mutex<BTreeMap<Domain, Vec<String>>>,
        flushes: AtomicUsize,
        invalidations: AtomicUsize,
        fail_domain: Option<Domain>,
        panic_domain: Option<Domain>,
        fail_flush: bool,
    }

    impl ContextIndex for Recording {
        fn add(&self, domain: Domain, lines: &[String]) -> Result<()> {
            if self.fail_domain == Some(domain) {
                return Err(CorporaError::ContextIndex {
                    reason: "rejected".into(),
                });
            }
            if self.panic_domain == Some(domain) {
                panic!("boom in {domain}");
            }
            self.lines
                .lock()
                .expect("lock")
                .entry(domain)
                .or_default()
                .extend_from_slice(lines);
            Ok(())
        }

        fn flush(&self) -> Result<()> {
            if self.fail_flush {
                return Err(CorporaError::ContextIndex {
                    reason: "commit refused".into(),
                });
            }
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn invalidate_cache(&self) -> Result<()> {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn filled_buckets(dir: &std::path::Path, domains: &[Domain]) -> Vec<CorpusBucket> {
        domains
            .iter()
            .map(|&domain| {
                let mut bucket = CorpusBucket::new(dir, domain);
                bucket.append(&format!("sentence for {domain}"));
                bucket.flush().expect("flush");
                bucket
            })
            .collect()
    }

    #[test]
    fn analyzes_pending_buckets_in_parallel() {
        let dir = tempdir().expect("tmp");
        let context = Arc::new(Recording::default());
        let pool = AnalysisPool::new(4, context.clone()).expect("pool");
        let mut buckets = filled_buckets(dir.path(), &[1, 2, 3, 4, 5]);

        let analyzed = pool
            .analyze_if_needed(buckets.iter_mut(), &AnalysisOptions::default())
            .expect("analysis");
        assert_eq!(analyzed, 5);
        assert!(buckets.iter().all(|b| b.analyzed_size() == b.size()));
        assert_eq!(context.lines.lock().expect("lock").len(), 5);
        assert_eq!(context.flushes.load(Ordering::SeqCst), 1);
        assert_eq!(context.invalidations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nothing_to_analyze_skips_context_flush() {
        let dir = tempdir().expect("tmp");
        let context = Arc::new(Recording::default());
        let pool = AnalysisPool::new(2, context.clone()).expect("pool");
        let mut buckets = vec![CorpusBucket::new(dir.path(), 1)];

        let analyzed = pool
            .analyze_if_needed(buckets.iter_mut(), &AnalysisOptions::default())
            .expect("analysis");
        assert_eq!(analyzed, 0);
        assert_eq!(context.flushes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failure_is_reported_after_all_tasks_finish() {
        let dir = tempdir().expect("tmp");
        let context = Arc::new(Recording {
            fail_domain: Some(2),
            ..Recording::default()
        });
        let pool = AnalysisPool::new(2, context.clone()).expect("pool");
        let mut buckets = filled_buckets(dir.path(), &[1, 2, 3]);

        let err = pool
            .analyze_if_needed(buckets.iter_mut(), &AnalysisOptions::default())
            .expect_err("domain 2 fails");
        assert!(matches!(err, CorporaError::Analysis { domain: 2, .. }));
        assert!(!err.is_fatal());

        // Siblings were fed but never flushed, so none of them may advance.
        assert_eq!(context.lines.lock().expect("lock").len(), 2);
        assert_eq!(context.flushes.load(Ordering::SeqCst), 0);
        for bucket in &buckets {
            assert_eq!(bucket.analyzed_size(), 0, "domain {}", bucket.domain());
            assert!(bucket.should_analyze(&AnalysisOptions::default()));
        }
    }

    #[test]
    fn failed_context_flush_keeps_buckets_flagged() {
        let dir = tempdir().expect("tmp");
        let context = Arc::new(Recording {
            fail_flush: true,
            ..Recording::default()
        });
        let pool = AnalysisPool::new(2, context.clone()).expect("pool");
        let mut buckets = filled_buckets(dir.path(), &[1, 2]);

        let err = pool
            .analyze_if_needed(buckets.iter_mut(), &AnalysisOptions::default())
            .expect_err("flush fails");
        assert!(!err.is_fatal());
        assert!(buckets.iter().all(|b| b.analyzed_size() == 0));
        assert_eq!(context.invalidations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_task_becomes_analysis_error() {
        let dir = tempdir().expect("tmp");
        let context = Arc::new(Recording {
            panic_domain: Some(7),
            ..Recording::default()
        });
        let pool = AnalysisPool::new(1, context).expect("pool");
        let mut buckets = filled_buckets(dir.path(), &[7]);

        let err = pool
            .analyze_if_needed(buckets.iter_mut(), &AnalysisOptions::default())
            .expect_err("panic");
        match err {
            CorporaError::Analysis { domain, reason } => {
                assert_eq!(domain, 7);
                assert!(reason.contains("boom in 7"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
