//! Probe, play and report progress for each queued artifact.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Artifact, PipelineError, PlaybackProgress};
use crate::audio::{AudioOutput, DurationProbe};

pub(super) struct PlaybackStage {
    pub probe: Arc<dyn DurationProbe>,
    pub output: Arc<dyn AudioOutput>,
    pub audio: mpsc::Receiver<Artifact>,
    pub progress: mpsc::UnboundedSender<PlaybackProgress>,
    pub cancel: CancellationToken,
}

impl PlaybackStage {
    /// Consume the audio queue until it is closed and drained, or cancelled.
    /// Dropping `self` closes the progress channel.
    pub async fn run(mut self) -> Result<(), PipelineError> {
        loop {
            let Some(next) = self.cancel.run_until_cancelled(self.audio.recv()).await else {
                info!("Playback cancelled");
                return Ok(());
            };
            let Some(artifact) = next else {
                info!("Audio queue drained");
                return Ok(());
            };
            if !self.play(artifact).await? {
                return Ok(());
            }
        }
    }

    /// Returns `Ok(false)` when cancelled part way through.
    async fn play(&self, artifact: Artifact) -> Result<bool, PipelineError> {
        let segment = artifact.segment;
        let Some(total) = self.probe_duration(&artifact).await? else {
            return Ok(false);
        };
        info!(
            segment,
            key = %artifact.key,
            duration_secs = total,
            bytes = artifact.audio.len(),
            "Starting playback"
        );

        let emitter = tokio::spawn(emit_progress(
            segment,
            total,
            self.progress.clone(),
            self.cancel.clone(),
        ));

        let output = Arc::clone(&self.output);
        let cancel = self.cancel.clone();
        let audio = artifact.audio;
        let played = tokio::task::spawn_blocking(move || output.play(&audio, &cancel)).await;

        match played {
            Ok(Ok(())) => debug!(segment, "Playback finished"),
            Ok(Err(source)) => {
                emitter.abort();
                return Err(PipelineError::Playback { segment, source });
            }
            Err(e) => {
                emitter.abort();
                return Err(PipelineError::StagePanicked {
                    stage: "playback",
                    reason: e.to_string(),
                });
            }
        }

        // Keep emitters from overlapping the next segment's.
        match self.cancel.run_until_cancelled(emitter).await {
            None => Ok(false),
            Some(Ok(())) => Ok(true),
            Some(Err(e)) => {
                warn!(segment, "Progress emitter ended abnormally: {}", e);
                Ok(true)
            }
        }
    }

    /// Write the artifact to a temp file, probe it, then remove the file.
    ///
    /// `Ok(None)` means cancelled; the temp file is removed on drop.
    async fn probe_duration(&self, artifact: &Artifact) -> Result<Option<u64>, PipelineError> {
        let segment = artifact.segment;
        let mut temp = tempfile::Builder::new()
            .prefix("narrator-")
            .suffix(".mp3")
            .tempfile()
            .map_err(PipelineError::io("failed to create temp file"))?;
        temp.write_all(&artifact.audio)
            .and_then(|()| temp.flush())
            .map_err(PipelineError::io("failed to write temp file"))?;

        let probe = self.probe.probe(temp.path());
        let Some(probed) = self.cancel.run_until_cancelled(probe).await else {
            return Ok(None);
        };
        let total = probed.map_err(|source| PipelineError::Probe { segment, source })?;

        temp.close()
            .map_err(PipelineError::io("failed to remove temp file"))?;
        Ok(Some(total))
    }
}

/// Emit `{0, total}` .. `{total - 1, total}` once a second, then
/// `{total, total}`. Timer-driven; it does not follow the decoder.
pub(super) async fn emit_progress(
    segment: usize,
    total: u64,
    progress: mpsc::UnboundedSender<PlaybackProgress>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    for current in (0..total).chain(std::iter::once(total)) {
        if cancel.run_until_cancelled(ticker.tick()).await.is_none() {
            return;
        }
        let tick = PlaybackProgress {
            segment,
            current,
            total,
        };
        if progress.send(tick).is_err() {
            debug!(segment, "Progress receiver gone, stopping emitter");
            return;
        }
    }
}
