//! Typed failures for the seams where callers need to branch on the kind of
//! error (batch halving, HTTP status mapping, job state guards).

use crate::job::JobStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by an inference backend for one batch.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference backend ran out of memory: {0}")]
    ResourceExhausted(String),

    #[error("inference backend failed: {0}")]
    Backend(String),
}

impl InferenceError {
    /// Classify a backend message the way accelerator runtimes report OOM.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("out of memory")
            || lower.contains("out_of_memory")
            || lower.contains("failed to allocate")
        {
            Self::ResourceExhausted(message)
        } else {
            Self::Backend(message)
        }
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}

/// Errors raised while validating or running a job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no valid outputs")]
    NoOutputs,

    #[error("invalid produce values: {0:?}")]
    UnknownProducts(Vec<String>),

    #[error("{stage}: out of memory even at min batch size")]
    ExhaustedAtMinBatch { stage: &'static str },

    #[error("{stage}: backend returned {got} results for {expected} frames")]
    BatchMismatch {
        stage: &'static str,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("output was not created: {}", path.display())]
    OutputMissing { path: PathBuf },

    #[error("output is empty: {}", path.display())]
    OutputEmpty { path: PathBuf },

    #[error("input clip has no frames")]
    EmptyClip,

    #[error("invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}
