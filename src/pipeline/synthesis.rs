//! Submit, poll, fetch, route and delete, one segment at a time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Artifact, LogLine, PipelineError};
use crate::tts::storage::parse_result_location;
use crate::tts::{ArtifactStore, ObjectKey, SpeechBackend, SynthesisTask, TaskState, TextSegment};

/// Destination for fetched audio.
pub(super) enum Route {
    File(PathBuf),
    Queue(mpsc::Sender<Artifact>),
}

enum Destination {
    File { file: File, path: PathBuf },
    Queue(mpsc::Sender<Artifact>),
}

pub(super) struct SynthesisStage {
    pub backend: Arc<dyn SpeechBackend>,
    pub store: Arc<dyn ArtifactStore>,
    pub voice: String,
    pub poll_interval: Duration,
    pub segments: Vec<TextSegment>,
    pub route: Route,
    pub logs: mpsc::UnboundedSender<LogLine>,
    pub cancel: CancellationToken,
}

impl SynthesisStage {
    /// Returns `Ok` on completion and on cancellation. Dropping `self`
    /// closes the audio queue and the log channel.
    pub async fn run(self) -> Result<(), PipelineError> {
        let mut destination = match &self.route {
            Route::File(path) => Destination::File {
                file: File::create(path)
                    .await
                    .map_err(PipelineError::io(format!("failed to create {}", path.display())))?,
                path: path.clone(),
            },
            Route::Queue(queue) => Destination::Queue(queue.clone()),
        };

        let total = self.segments.len();
        for segment in &self.segments {
            let number = segment.sequence_index + 1;
            self.log(format!(
                "Section {}/{}: synthesizing {} words",
                number,
                total,
                segment.word_count()
            ));

            let Some((key, audio)) = self.synthesize(segment).await? else {
                info!("Synthesis cancelled");
                return Ok(());
            };

            // Deleted before hand-off, and never raced against cancellation.
            self.store
                .delete(&key)
                .await
                .map_err(|source| PipelineError::Delete {
                    segment: number,
                    source,
                })?;
            debug!(segment = number, %key, "Deleted remote audio");

            match &mut destination {
                Destination::File { file, path } => {
                    file.write_all(&audio)
                        .await
                        .map_err(PipelineError::io(format!("failed to write {}", path.display())))?;
                    self.log(format!(
                        "Section {}/{}: appended to {}",
                        number,
                        total,
                        path.display()
                    ));
                }
                Destination::Queue(queue) => {
                    let artifact = Artifact {
                        segment: number,
                        key,
                        audio,
                    };
                    match self.cancel.run_until_cancelled(queue.send(artifact)).await {
                        None => return Ok(()),
                        Some(Err(_)) => {
                            warn!(segment = number, "Audio queue closed, stopping synthesis");
                            return Ok(());
                        }
                        Some(Ok(())) => debug!(segment = number, "Queued audio for playback"),
                    }
                }
            }
        }

        if let Destination::File { mut file, .. } = destination {
            file.flush()
                .await
                .map_err(PipelineError::io("failed to flush output file"))?;
        }

        self.log(format!("All {} sections synthesized", total));
        Ok(())
    }

    /// Drive one segment's task to completion and fetch its audio.
    ///
    /// `Ok(None)` means the pipeline was cancelled.
    async fn synthesize(
        &self,
        segment: &TextSegment,
    ) -> Result<Option<(ObjectKey, Bytes)>, PipelineError> {
        let number = segment.sequence_index + 1;

        let Some(submitted) = self
            .cancel
            .run_until_cancelled(self.backend.submit(&segment.content, &self.voice))
            .await
        else {
            return Ok(None);
        };
        let mut task = SynthesisTask::new(submitted.map_err(|source| PipelineError::Submit {
            segment: number,
            source,
        })?);
        info!(segment = number, task = %task.handle, "Synthesis task submitted");

        // First tick completes immediately.
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let uri = loop {
            if self.cancel.run_until_cancelled(ticker.tick()).await.is_none() {
                return Ok(None);
            }
            let poll = self.backend.poll(&task.handle);
            let Some(polled) = self.cancel.run_until_cancelled(poll).await else {
                return Ok(None);
            };
            task.state = polled.map_err(|source| PipelineError::Poll {
                segment: number,
                handle: task.handle.clone(),
                source,
            })?;

            match &task.state {
                TaskState::Completed(uri) => break uri.clone(),
                TaskState::Failed(reason) => {
                    return Err(PipelineError::TaskFailed {
                        segment: number,
                        handle: task.handle.clone(),
                        reason: reason.clone(),
                    })
                }
                TaskState::Submitted | TaskState::Running(_) => {
                    self.log(format!(
                        "Synthesis running... status: {}, id: {}",
                        task.state, task.handle
                    ));
                }
            }
        };

        let key = parse_result_location(&uri).map_err(|source| PipelineError::ResultLocation {
            segment: number,
            uri: uri.clone(),
            source,
        })?;
        self.log(format!("Synthesis complete, fetching {}", key));

        let Some(fetched) = self.cancel.run_until_cancelled(self.store.get(&key)).await else {
            return Ok(None);
        };
        let audio = fetched.map_err(|source| PipelineError::Fetch {
            segment: number,
            source,
        })?;

        Ok(Some((key, audio)))
    }

    fn log(&self, text: String) {
        debug!("{}", text);
        // The UI may already be gone; logs are best-effort.
        let _ = self.logs.send(LogLine::now(text));
    }
}
