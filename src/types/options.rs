//! Builder-style options used when opening a corpora storage.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_GROWTH_RATIO, DEFAULT_MIN_PENDING_BYTES, DEFAULT_QUEUE_SIZE,
    DEFAULT_WRITE_BEHIND_DELAY_MS,
};
use crate::error::{CorporaError, Result};

fn default_analysis_threads() -> usize {
    num_cpus::get().max(1)
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_write_behind_delay_ms() -> u64 {
    DEFAULT_WRITE_BEHIND_DELAY_MS
}

fn default_min_pending_bytes() -> u64 {
    DEFAULT_MIN_PENDING_BYTES
}

fn default_growth_ratio() -> f64 {
    DEFAULT_GROWTH_RATIO
}

/// Thresholds that decide when a bucket has accumulated enough new content to
/// be fed to the context index again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Unanalyzed bytes that always trigger an analysis.
    #[serde(default = "default_min_pending_bytes")]
    pub min_pending_bytes: u64,
    /// Unanalyzed bytes relative to the already analyzed size that trigger an analysis.
    #[serde(default = "default_growth_ratio")]
    pub growth_ratio: f64,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            min_pending_bytes: default_min_pending_bytes(),
            growth_ratio: default_growth_ratio(),
        }
    }
}

impl AnalysisOptions {
    /// Analyze every flushed byte as soon as it lands on disk.
    #[must_use]
    pub fn eager() -> Self {
        Self {
            min_pending_bytes: 1,
            growth_ratio: 0.0,
        }
    }
}

/// Tunables for [`CorporaStorage`](crate::CorporaStorage).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageOptions {
    /// Size of the worker pool that feeds buckets into the context index.
    #[serde(default = "default_analysis_threads")]
    pub analysis_threads: usize,
    /// Capacity of the bounded update queue; producers block when it is full.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Idle time between debounced flush cycles.
    #[serde(default = "default_write_behind_delay_ms")]
    pub write_behind_delay_ms: u64,
    #[serde(default)]
    pub analysis: AnalysisOptions,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            analysis_threads: default_analysis_threads(),
            queue_size: default_queue_size(),
            write_behind_delay_ms: default_write_behind_delay_ms(),
            analysis: AnalysisOptions::default(),
        }
    }
}

impl StorageOptions {
    /// Start a fluent builder for `StorageOptions`.
    #[must_use]
    pub fn builder() -> StorageOptionsBuilder {
        StorageOptionsBuilder::default()
    }

    #[must_use]
    pub fn write_behind_delay(&self) -> Duration {
        Duration::from_millis(self.write_behind_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_size == 0 {
            return Err(CorporaError::InvalidOptions {
                reason: "queue_size must be non-zero".into(),
            });
        }
        if self.analysis_threads == 0 {
            return Err(CorporaError::InvalidOptions {
                reason: "analysis_threads must be non-zero".into(),
            });
        }
        // A zero delay leaves the writer no time to wait on the queue.
        if self.write_behind_delay_ms == 0 {
            return Err(CorporaError::InvalidOptions {
                reason: "write_behind_delay_ms must be non-zero".into(),
            });
        }
        if !self.analysis.growth_ratio.is_finite() || self.analysis.growth_ratio < 0.0 {
            return Err(CorporaError::InvalidOptions {
                reason: "analysis.growth_ratio must be a finite, non-negative number".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StorageOptionsBuilder {
    inner: StorageOptions,
}

impl StorageOptionsBuilder {
    #[must_use]
    pub fn analysis_threads(mut self, threads: usize) -> Self {
        self.inner.analysis_threads = threads;
        self
    }

    #[must_use]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.inner.queue_size = size;
        self
    }

    #[must_use]
    pub fn write_behind_delay_ms(mut self, ms: u64) -> Self {
        self.inner.write_behind_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn analysis(mut self, analysis: AnalysisOptions) -> Self {
        self.inner.analysis = analysis;
        self
    }

    #[must_use]
    pub fn build(self) -> StorageOptions {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = StorageOptions::default();
        assert!(options.analysis_threads >= 1);
        assert_eq!(options.queue_size, DEFAULT_QUEUE_SIZE);
        options.validate().expect("defaults validate");
    }

    #[test]
    fn zero_queue_is_rejected() {
        let options = StorageOptions::builder().queue_size(0).build();
        let err = options.validate().expect_err("zero queue");
        assert!(matches!(err, CorporaError::InvalidOptions { .. }));
    }

    #[test]
    fn zero_threads_are_rejected() {
        let options = StorageOptions::builder().analysis_threads(0).build();
        assert!(options.validate().is_err());
    }

    #[test]
    fn zero_write_behind_delay_is_rejected() {
        let options = StorageOptions::builder().write_behind_delay_ms(0).build();
        let err = options.validate().expect_err("zero delay");
        assert!(err.to_string().contains("write_behind_delay_ms"));
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let options: StorageOptions =
            serde_json::from_str(r#"{"queue_size": 8, "analysis": {"growth_ratio": 0.5}}"#)
                .expect("parse");
        assert_eq!(options.queue_size, 8);
        assert_eq!(options.write_behind_delay_ms, DEFAULT_WRITE_BEHIND_DELAY_MS);
        assert!(options.analysis_threads >= 1);
        assert_eq!(options.analysis.min_pending_bytes, DEFAULT_MIN_PENDING_BYTES);
        assert_eq!(options.analysis.growth_ratio, 0.5);
        options.validate().expect("valid");
    }

    #[test]
    fn builder_overrides_keep_other_defaults() {
        let options = StorageOptions::builder()
            .queue_size(7)
            .write_behind_delay_ms(250)
            .build();
        assert_eq!(options.write_behind_delay(), Duration::from_millis(250));
        assert_eq!(options.analysis, AnalysisOptions::default());
    }
}
