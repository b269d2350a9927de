//! Error types surfaced by the corpora storage engine.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::types::Domain;

pub type Result<T> = std::result::Result<T, CorporaError>;

#[derive(Debug, Error)]
pub enum CorporaError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to initialise corpora storage at {path}: {source}")]
    Initialization {
        path: PathBuf,
        #[source]
        source: Box<CorporaError>,
    },

    #[error("invalid corpora index: {reason}")]
    InvalidIndex { reason: String },

    #[error("failed to encode corpora index: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode corpora index: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("invalid storage options: {reason}")]
    InvalidOptions { reason: String },

    #[error("analysis of domain {domain} failed: {reason}")]
    Analysis { domain: Domain, reason: String },

    #[error("context index error: {reason}")]
    ContextIndex { reason: String },

    #[error("background writer failed: {0}")]
    WriterFailed(#[source] Arc<CorporaError>),

    #[error("background writer panicked: {reason}")]
    WriterPanicked { reason: String },

    #[cfg(feature = "lex")]
    #[error(transparent)]
    Tantivy(#[from] tantivy::TantivyError),
}

impl CorporaError {
    /// Whether the error leaves the background writer unusable.
    ///
    /// Analysis failures are retried on the next flush cycle; everything that
    /// touches the durable state (bucket files, the index file) is fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Analysis { .. } | Self::ContextIndex { .. } => false,
            #[cfg(feature = "lex")]
            Self::Tantivy(_) => false,
            _ => true,
        }
    }
}
