//! Remote speech synthesis: task submission, polling and result storage.
//!
//! Provides the `SpeechBackend` and `ArtifactStore` traits the pipeline runs
//! against, with implementations for:
//! - Amazon Polly asynchronous synthesis tasks (`polly`)
//! - S3 result objects through `object_store` (`storage`)

pub mod polly;
pub mod segment;
pub mod storage;

use std::fmt;

use bytes::Bytes;
use futures_util::future::BoxFuture;

pub use segment::{segment, TextSegment};
pub use storage::ObjectKey;

/// Common trait for synthesis backends (dyn-compatible).
pub trait SpeechBackend: Send + Sync {
    /// Start a synthesis task for `text` and return its handle.
    fn submit<'a>(
        &'a self,
        text: &'a str,
        voice: &'a str,
    ) -> BoxFuture<'a, Result<String, BackendError>>;

    /// Fetch the current state of a previously submitted task.
    fn poll<'a>(&'a self, handle: &'a str) -> BoxFuture<'a, Result<TaskState, BackendError>>;

    /// Display name for logs (e.g. "Amazon Polly (us-west-2)").
    fn name(&self) -> String;
}

/// Object storage holding finished synthesis results.
pub trait ArtifactStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Bytes, StorageError>>;

    fn delete<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<(), StorageError>>;
}

/// Lifecycle of a backend synthesis job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Submitted,
    /// Still working; carries the backend's status word.
    Running(String),
    /// Finished; carries the result location URI.
    Completed(String),
    /// Finished unsuccessfully; carries the backend's reason.
    Failed(String),
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::Running(status) => write!(f, "{}", status),
            Self::Completed(_) => write!(f, "completed"),
            Self::Failed(_) => write!(f, "failed"),
        }
    }
}

/// One in-flight backend job, owned by the synthesis stage.
#[derive(Debug, Clone)]
pub struct SynthesisTask {
    pub handle: String,
    pub state: TaskState,
}

impl SynthesisTask {
    pub fn new(handle: String) -> Self {
        Self {
            handle,
            state: TaskState::Submitted,
        }
    }
}

/// Errors reported by a synthesis backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("response missing {0}")]
    MissingField(&'static str),
}

/// Errors reported by artifact storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object {0} not found")]
    NotFound(ObjectKey),
    #[error("object {key} belongs to bucket {bucket}, expected {expected}")]
    ForeignBucket {
        key: String,
        bucket: String,
        expected: String,
    },
    #[error(transparent)]
    Store(#[from] object_store::Error),
}
