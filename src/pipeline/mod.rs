//! Synthesis and playback stages wired together with bounded channels.
//!
//! ```text
//! segments -> SynthesisStage -[audio, cap 5]-> PlaybackStage -[progress]-> UI
//!                  \-------------------[logs]--------------------------> UI
//! ```
//!
//! Every stage shares one `CancellationToken`. The first fatal error lands in
//! a single-slot error channel; the watchdog logs it and cancels everything.
//! Closing a channel is the end-of-stream signal for its consumer.

mod playback;
mod synthesis;
#[cfg(test)]
pub(crate) mod testing;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Local};
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audio::{AudioError, AudioOutput, DurationProbe, ProbeError};
use crate::tts::storage::LocationError;
use crate::tts::{ArtifactStore, BackendError, ObjectKey, SpeechBackend, StorageError, TextSegment};

use playback::PlaybackStage;
use synthesis::{Route, SynthesisStage};

/// Capacity of the synthesis -> playback hand-off queue.
pub const AUDIO_QUEUE_CAPACITY: usize = 5;

/// Where synthesized audio goes. Chosen once, before the pipeline starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// Append every segment's mp3 to this file; nothing is played.
    File(PathBuf),
    /// Play each segment on the local audio device.
    Playback,
}

/// Synthesized audio for one segment.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// 1-based segment number.
    pub segment: usize,
    /// Where the audio was fetched from.
    pub key: ObjectKey,
    pub audio: Bytes,
}

/// Estimated playback position, emitted once per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackProgress {
    /// 1-based segment number.
    pub segment: usize,
    pub current: u64,
    pub total: u64,
}

/// A timestamped status line for the log pane.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub at: DateTime<Local>,
    pub text: String,
}

impl LogLine {
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            at: Local::now(),
            text: text.into(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.at.format("%H:%M:%S"), self.text)
    }
}

/// A pipeline-fatal failure. The first one reported wins.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("segment {segment}: failed to submit synthesis task: {source}")]
    Submit {
        segment: usize,
        #[source]
        source: BackendError,
    },
    #[error("segment {segment}: failed to poll task {handle}: {source}")]
    Poll {
        segment: usize,
        handle: String,
        #[source]
        source: BackendError,
    },
    #[error("segment {segment}: synthesis task {handle} failed: {reason}")]
    TaskFailed {
        segment: usize,
        handle: String,
        reason: String,
    },
    #[error("segment {segment}: bad result location {uri}: {source}")]
    ResultLocation {
        segment: usize,
        uri: String,
        #[source]
        source: LocationError,
    },
    #[error("segment {segment}: failed to fetch result: {source}")]
    Fetch {
        segment: usize,
        #[source]
        source: StorageError,
    },
    #[error("segment {segment}: failed to delete result: {source}")]
    Delete {
        segment: usize,
        #[source]
        source: StorageError,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("segment {segment}: duration probe failed: {source}")]
    Probe {
        segment: usize,
        #[source]
        source: ProbeError,
    },
    #[error("segment {segment}: playback failed: {source}")]
    Playback {
        segment: usize,
        #[source]
        source: AudioError,
    },
    #[error("{stage} stage panicked: {reason}")]
    StagePanicked { stage: &'static str, reason: String },
}

impl PipelineError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }
}

/// Tunables that do not name a collaborator.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub voice: String,
    pub poll_interval: Duration,
    pub sink: OutputSink,
}

/// Consumer ends handed to the UI.
pub struct PipelineChannels {
    pub logs: mpsc::UnboundedReceiver<LogLine>,
    pub progress: mpsc::UnboundedReceiver<PlaybackProgress>,
    /// Fires once every stage has returned without error or cancellation.
    /// Dropped unfired otherwise.
    pub completed: oneshot::Receiver<()>,
}

/// Everything a run needs. `start` consumes it.
pub struct Pipeline {
    backend: Arc<dyn SpeechBackend>,
    store: Arc<dyn ArtifactStore>,
    probe: Arc<dyn DurationProbe>,
    output: Arc<dyn AudioOutput>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        store: Arc<dyn ArtifactStore>,
        probe: Arc<dyn DurationProbe>,
        output: Arc<dyn AudioOutput>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            backend,
            store,
            probe,
            output,
            settings,
        }
    }

    /// Spawn the stages. Must be called inside a Tokio runtime.
    pub fn start(self, segments: Vec<TextSegment>) -> (RunningPipeline, PipelineChannels) {
        let cancel = CancellationToken::new();
        let (err_tx, mut err_rx) = mpsc::channel::<PipelineError>(1);
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        info!(
            backend = %self.backend.name(),
            segments = segments.len(),
            voice = %self.settings.voice,
            sink = ?self.settings.sink,
            "Starting narration pipeline"
        );

        let mut stages = Vec::with_capacity(2);

        let route = match &self.settings.sink {
            OutputSink::File(path) => {
                // No playback stage: the progress channel closes immediately.
                drop(progress_tx);
                Route::File(path.clone())
            }
            OutputSink::Playback => {
                let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_CAPACITY);
                let playback = PlaybackStage {
                    probe: self.probe,
                    output: self.output,
                    audio: audio_rx,
                    progress: progress_tx,
                    cancel: cancel.clone(),
                };
                stages.push(spawn_stage("playback", playback.run(), err_tx.clone()));
                Route::Queue(audio_tx)
            }
        };

        let synthesis = SynthesisStage {
            backend: self.backend,
            store: self.store,
            voice: self.settings.voice,
            poll_interval: self.settings.poll_interval,
            segments,
            route,
            logs: log_tx,
            cancel: cancel.clone(),
        };
        stages.push(spawn_stage("synthesis", synthesis.run(), err_tx));

        // Ends with None once every stage has returned without error.
        let (completed_tx, completed_rx) = oneshot::channel();
        let watchdog_cancel = cancel.clone();
        let watchdog = tokio::spawn(async move {
            let Some(err) = err_rx.recv().await else {
                if !watchdog_cancel.is_cancelled() {
                    info!("Pipeline completed");
                    let _ = completed_tx.send(());
                }
                return None;
            };
            error!(error = %err, "Pipeline failed, cancelling");
            watchdog_cancel.cancel();
            Some(err)
        });

        (
            RunningPipeline {
                cancel,
                stages,
                watchdog,
            },
            PipelineChannels {
                logs: log_rx,
                progress: progress_rx,
                completed: completed_rx,
            },
        )
    }
}

/// Handle to a started pipeline.
pub struct RunningPipeline {
    cancel: CancellationToken,
    stages: Vec<(&'static str, JoinHandle<()>)>,
    watchdog: JoinHandle<Option<PipelineError>>,
}

impl RunningPipeline {
    /// Token cancelled on the first fatal error; also usable to stop the run.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for every stage and return the first fatal error, if any.
    pub async fn finish(self) -> Result<(), PipelineError> {
        for (name, handle) in self.stages {
            if let Err(e) = handle.await {
                warn!(stage = name, "Stage task did not complete: {}", e);
            }
        }

        match self.watchdog.await {
            Ok(Some(err)) => Err(err),
            Ok(None) => Ok(()),
            Err(e) => Err(PipelineError::StagePanicked {
                stage: "watchdog",
                reason: e.to_string(),
            }),
        }
    }
}

/// Run a stage to completion, reporting its error (or panic) on `errors`.
fn spawn_stage<F>(
    name: &'static str,
    stage: F,
    errors: mpsc::Sender<PipelineError>,
) -> (&'static str, JoinHandle<()>)
where
    F: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let outcome = match AssertUnwindSafe(stage).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(PipelineError::StagePanicked {
                stage: name,
                reason: panic_message(panic.as_ref()),
            }),
        };

        match outcome {
            Ok(()) => info!(stage = name, "Stage finished"),
            Err(err) => {
                if let Err(mpsc::error::TrySendError::Full(err)) = errors.try_send(err) {
                    warn!(stage = name, error = %err, "Pipeline already failing, error dropped");
                }
            }
        }
    });
    (name, handle)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
