//! In-memory stand-ins for Polly, S3, ffmpeg and the speaker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::{OutputSink, Pipeline, PipelineSettings};
use crate::audio::{AudioError, AudioOutput, DurationProbe, ProbeError};
use crate::tts::{
    ArtifactStore, BackendError, ObjectKey, SpeechBackend, StorageError, TaskState, TextSegment,
};

pub(crate) fn segments(texts: &[&str]) -> Vec<TextSegment> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| TextSegment {
            content: text.to_string(),
            sequence_index: i,
        })
        .collect()
}

pub(crate) fn test_key(name: &str) -> ObjectKey {
    ObjectKey {
        bucket: "test-bucket".into(),
        key: format!("{}.mp3", name),
    }
}

pub(crate) fn fake_pipeline(
    backend: Arc<FakeBackend>,
    store: Arc<FakeStore>,
    probe: FakeProbe,
    output: Arc<FakeOutput>,
    sink: OutputSink,
) -> Pipeline {
    Pipeline::new(
        backend,
        store,
        Arc::new(probe),
        output,
        PipelineSettings {
            voice: "Matthew".into(),
            poll_interval: Duration::from_secs(5),
            sink,
        },
    )
}

/// Hands out `task-N` handles; the `polls_needed`-th poll completes unless
/// `polls_by_text` names a different count for the segment.
#[derive(Default)]
pub(crate) struct FakeBackend {
    polls_needed: usize,
    polls_by_text: HashMap<String, usize>,
    fail_text: Option<(String, String)>,
    reject_submit: bool,
    fixed_uri: Option<String>,
    submitted: Mutex<Vec<String>>,
    polls: Mutex<HashMap<String, usize>>,
}

impl FakeBackend {
    pub fn completing_after(polls: usize) -> Self {
        Self {
            polls_needed: polls.max(1),
            ..Default::default()
        }
    }

    pub fn completing_per_text(polls: &[(&str, usize)]) -> Self {
        Self {
            polls_needed: 1,
            polls_by_text: polls
                .iter()
                .map(|(text, count)| (text.to_string(), *count))
                .collect(),
            ..Default::default()
        }
    }

    pub fn failing_on(text: &str, reason: &str) -> Self {
        Self {
            polls_needed: 1,
            fail_text: Some((text.to_string(), reason.to_string())),
            ..Default::default()
        }
    }

    pub fn rejecting_submit() -> Self {
        Self {
            reject_submit: true,
            ..Default::default()
        }
    }

    pub fn completing_with_uri(uri: &str) -> Self {
        Self {
            polls_needed: 1,
            fixed_uri: Some(uri.to_string()),
            ..Default::default()
        }
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn polls(&self, handle: &str) -> usize {
        self.polls.lock().unwrap().get(handle).copied().unwrap_or(0)
    }
}

impl SpeechBackend for FakeBackend {
    fn submit<'a>(
        &'a self,
        text: &'a str,
        _voice: &'a str,
    ) -> BoxFuture<'a, Result<String, BackendError>> {
        Box::pin(async move {
            if self.reject_submit {
                return Err(BackendError::Request("throttled".into()));
            }
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(text.to_string());
            Ok(format!("task-{}", submitted.len()))
        })
    }

    fn poll<'a>(&'a self, handle: &'a str) -> BoxFuture<'a, Result<TaskState, BackendError>> {
        Box::pin(async move {
            let index: usize = handle
                .trim_start_matches("task-")
                .parse()
                .map_err(|_| BackendError::MissingField("task id"))?;
            let text = self.submitted.lock().unwrap()[index - 1].clone();

            let count = {
                let mut polls = self.polls.lock().unwrap();
                let count = polls.entry(handle.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            let needed = self
                .polls_by_text
                .get(&text)
                .copied()
                .unwrap_or(self.polls_needed);
            if count < needed {
                return Ok(TaskState::Running("inProgress".into()));
            }

            if let Some((fail_text, reason)) = &self.fail_text {
                if *fail_text == text {
                    return Ok(TaskState::Failed(reason.clone()));
                }
            }

            let uri = self.fixed_uri.clone().unwrap_or_else(|| {
                format!("https://s3.us-west-2.amazonaws.com/test-bucket/{}.mp3", handle)
            });
            Ok(TaskState::Completed(uri))
        })
    }

    fn name(&self) -> String {
        "fake".to_string()
    }
}

/// Objects contain their own key as bytes.
#[derive(Default)]
pub(crate) struct FakeStore {
    fail_delete: bool,
    missing: bool,
    deleted: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn failing_delete() -> Self {
        Self {
            fail_delete: true,
            ..Default::default()
        }
    }

    pub fn missing_objects() -> Self {
        Self {
            missing: true,
            ..Default::default()
        }
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

impl ArtifactStore for FakeStore {
    fn get<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<Bytes, StorageError>> {
        Box::pin(async move {
            if self.missing {
                return Err(StorageError::NotFound(key.clone()));
            }
            Ok(Bytes::from(key.key.clone()))
        })
    }

    fn delete<'a>(&'a self, key: &'a ObjectKey) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            if self.fail_delete {
                return Err(StorageError::ForeignBucket {
                    key: key.key.clone(),
                    bucket: key.bucket.clone(),
                    expected: "other".into(),
                });
            }
            self.deleted.lock().unwrap().push(key.key.clone());
            Ok(())
        })
    }
}

/// Reports a fixed duration and remembers which files it looked at.
pub(crate) struct FakeProbe {
    result: Result<u64, String>,
    probed: Mutex<Vec<PathBuf>>,
}

impl FakeProbe {
    pub fn seconds(secs: u64) -> Self {
        Self {
            result: Ok(secs),
            probed: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err("Duration: N/A".into()),
            probed: Mutex::new(Vec::new()),
        }
    }

    pub fn probed_paths(&self) -> Vec<PathBuf> {
        self.probed.lock().unwrap().clone()
    }
}

impl DurationProbe for FakeProbe {
    fn probe<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<u64, ProbeError>> {
        Box::pin(async move {
            assert!(path.exists(), "probe called on missing file {}", path.display());
            self.probed.lock().unwrap().push(path.to_path_buf());
            self.result
                .clone()
                .map_err(|output| ProbeError::Unparseable { output })
        })
    }
}

/// Records what was "played", as UTF-8, when each play started and ended,
/// and how many plays overlapped. Each play blocks for `play_time`.
#[derive(Default)]
pub(crate) struct FakeOutput {
    fail: bool,
    play_time: Duration,
    played: Mutex<Vec<String>>,
    events: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeOutput {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn taking(play_time: Duration) -> Self {
        Self {
            play_time,
            ..Default::default()
        }
    }

    /// `start <audio>` and `end <audio>` in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl AudioOutput for FakeOutput {
    fn play(&self, mp3: &[u8], _cancel: &CancellationToken) -> Result<(), AudioError> {
        if self.fail {
            return Err(AudioError::Decode("not an mp3".into()));
        }
        let audio = String::from_utf8_lossy(mp3).into_owned();
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.events.lock().unwrap().push(format!("start {}", audio));

        std::thread::sleep(self.play_time);

        self.events.lock().unwrap().push(format!("end {}", audio));
        self.played.lock().unwrap().push(audio);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
