use std::time::Duration;
use thiserror::Error;

use crate::model::{RawItem, Source};

/// Whole-source failure of a fetcher. Single-target failures never surface here.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The provider asked us to wait. `partial` holds what was collected before the signal.
    #[error("{provider} provider rate limited, retry after {wait:?}")]
    RateLimited {
        provider: Source,
        wait: Duration,
        partial: Vec<RawItem>,
    },

    #[error("{provider} session is not authorized: {message}")]
    Unauthorized { provider: Source, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FetchError {
    /// Provider-specified wait, if any. Overrides the retry policy delay.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { wait, .. } => Some(*wait),
            _ => None,
        }
    }

    pub fn into_partial(self) -> Vec<RawItem> {
        match self {
            FetchError::RateLimited { partial, .. } => partial,
            _ => Vec::new(),
        }
    }
}

/// Request-level failures. Either one means no job was scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitoringError {
    #[error("no applicable sources for '{company}': enable a source and provide its targets")]
    NoApplicableSources { company: String },

    #[error("invalid monitoring request: {0}")]
    InvalidRequest(String),
}
