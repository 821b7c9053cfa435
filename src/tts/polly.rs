//! Amazon Polly asynchronous synthesis tasks.
//!
//! `StartSpeechSynthesisTask` writes an mp3 into the configured S3 bucket;
//! `GetSpeechSynthesisTask` reports progress and, once complete, the object
//! location. Polly never reports the audio length, hence the duration probe.

use std::sync::atomic::{AtomicU64, Ordering};

use aws_sdk_polly::error::DisplayErrorContext;
use aws_sdk_polly::types::{Engine, OutputFormat, TaskStatus, VoiceId};
use aws_sdk_polly::Client as PollyClient;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BackendError, SpeechBackend, TaskState};

/// Voice used when none is configured. Always accepted without validation.
pub const DEFAULT_VOICE: &str = "Matthew";

/// Whether `voice` names a Polly voice.
pub fn is_known_voice(voice: &str) -> bool {
    voice == DEFAULT_VOICE || VoiceId::values().contains(&voice)
}

/// Polly synthesis engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PollyEngine {
    Standard,
    Neural,
    LongForm,
    Generative,
}

impl PollyEngine {
    fn to_sdk(self) -> Engine {
        match self {
            Self::Standard => Engine::Standard,
            Self::Neural => Engine::Neural,
            Self::LongForm => Engine::LongForm,
            Self::Generative => Engine::Generative,
        }
    }
}

/// Polly task backend writing results into `bucket`.
pub struct PollyBackend {
    client: PollyClient,
    bucket: String,
    region: String,
    engine: Option<PollyEngine>,
    request_counter: AtomicU64,
}

impl PollyBackend {
    pub fn new(
        sdk_config: &aws_config::SdkConfig,
        bucket: &str,
        engine: Option<PollyEngine>,
    ) -> Self {
        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            client: PollyClient::new(sdk_config),
            bucket: bucket.to_string(),
            region,
            engine,
            request_counter: AtomicU64::new(0),
        }
    }
}

impl SpeechBackend for PollyBackend {
    fn submit<'a>(
        &'a self,
        text: &'a str,
        voice: &'a str,
    ) -> BoxFuture<'a, Result<String, BackendError>> {
        Box::pin(async move {
            let request_id = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
            info!(request_id, voice, text_len = text.len(), "Starting Polly synthesis task");

            let mut request = self
                .client
                .start_speech_synthesis_task()
                .text(text)
                .voice_id(VoiceId::from(voice))
                .output_format(OutputFormat::Mp3)
                .output_s3_bucket_name(&self.bucket);

            if let Some(engine) = self.engine {
                request = request.engine(engine.to_sdk());
            }

            let response = request
                .send()
                .await
                .map_err(|e| BackendError::Request(DisplayErrorContext(&e).to_string()))?;

            let task_id = response
                .synthesis_task()
                .and_then(|task| task.task_id())
                .ok_or(BackendError::MissingField("task id"))?;

            debug!(request_id, task_id, "Polly task accepted");
            Ok(task_id.to_string())
        })
    }

    fn poll<'a>(&'a self, handle: &'a str) -> BoxFuture<'a, Result<TaskState, BackendError>> {
        Box::pin(async move {
            let response = self
                .client
                .get_speech_synthesis_task()
                .task_id(handle)
                .send()
                .await
                .map_err(|e| BackendError::Request(DisplayErrorContext(&e).to_string()))?;

            let task = response
                .synthesis_task()
                .ok_or(BackendError::MissingField("synthesis task"))?;
            let status = task
                .task_status()
                .ok_or(BackendError::MissingField("task status"))?;

            let state = match status {
                TaskStatus::Completed => {
                    let uri = task
                        .output_uri()
                        .ok_or(BackendError::MissingField("output uri"))?;
                    TaskState::Completed(uri.to_string())
                }
                TaskStatus::Failed => TaskState::Failed(
                    task.task_status_reason()
                        .unwrap_or("no reason given")
                        .to_string(),
                ),
                other => TaskState::Running(other.as_str().to_string()),
            };
            Ok(state)
        })
    }

    fn name(&self) -> String {
        format!("Amazon Polly ({})", self.region)
    }
}
