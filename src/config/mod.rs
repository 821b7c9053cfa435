//! Command line, settings file and the validated run configuration.
//!
//! Precedence: command line (and `NARRATOR_BUCKET`), then
//! `<config dir>/polly-narrator/settings.json`, then built-in defaults.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pipeline::OutputSink;
use crate::tts::polly::{is_known_voice, PollyEngine, DEFAULT_VOICE};
use crate::tts::segment::DEFAULT_MAX_WORDS;

pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_REGION: &str = "us-west-2";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Read text aloud with Amazon Polly.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "narrate", version, about)]
pub struct Cli {
    /// S3 bucket Polly writes results to
    #[arg(long, env = "NARRATOR_BUCKET")]
    pub bucket: Option<String>,

    /// AWS shared-config profile [default: default]
    #[arg(long)]
    pub profile: Option<String>,

    /// AWS region [default: us-west-2]
    #[arg(long)]
    pub region: Option<String>,

    /// Polly voice id [default: Matthew]
    #[arg(long)]
    pub voice: Option<String>,

    /// Polly engine
    #[arg(long, value_enum)]
    pub engine: Option<PollyEngine>,

    /// Text file to read (stdin when omitted)
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// Write the mp3 here instead of playing it
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Words per synthesis task [default: 20000]
    #[arg(long)]
    pub max_words: Option<usize>,

    /// Seconds between task status polls [default: 5]
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// ffmpeg executable used to measure audio length [default: ffmpeg]
    #[arg(long)]
    pub ffmpeg: Option<PathBuf>,

    /// Audio output device name (see --list-devices)
    #[arg(long)]
    pub output_device: Option<String>,

    /// Playback volume, 0.0 to 2.0 [default: 1.0]
    #[arg(long)]
    pub volume: Option<f32>,

    /// Play without the terminal dashboard
    #[arg(long)]
    pub headless: bool,

    /// Directory for narrator.log and dashboard_error.log
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Settings file [default: <config dir>/polly-narrator/settings.json]
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// List audio output devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

/// settings.json shape. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub engine: Option<PollyEngine>,
    #[serde(default)]
    pub max_words: Option<usize>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub ffmpeg: Option<PathBuf>,
    #[serde(default)]
    pub output_device: Option<String>,
    #[serde(default)]
    pub volume: Option<f32>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no S3 bucket configured: pass --bucket, set NARRATOR_BUCKET or add \"bucket\" to the settings file")]
    MissingBucket,
    #[error("unknown Polly voice '{0}'")]
    UnknownVoice(String),
    #[error("--max-words must be at least 1")]
    InvalidMaxWords,
    #[error("--poll-interval must be at least 1 second")]
    InvalidPollInterval,
    #[error("--volume must be between 0.0 and 2.0, got {0}")]
    InvalidVolume(f32),
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    pub bucket: String,
    pub profile: String,
    pub region: String,
    pub voice: String,
    pub engine: Option<PollyEngine>,
    pub input: Option<PathBuf>,
    pub sink: OutputSink,
    pub max_words: usize,
    pub poll_interval: Duration,
    pub ffmpeg: PathBuf,
    pub output_device: Option<String>,
    pub volume: f32,
    pub headless: bool,
    pub log_dir: PathBuf,
}

impl NarratorConfig {
    /// Merge the command line over the settings file and validate.
    pub fn resolve(cli: Cli, settings: Settings) -> Result<Self, ConfigError> {
        let bucket = cli
            .bucket
            .or(settings.bucket)
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .ok_or(ConfigError::MissingBucket)?;

        let voice = cli
            .voice
            .or(settings.voice)
            .unwrap_or_else(|| DEFAULT_VOICE.to_string());
        if !is_known_voice(&voice) {
            return Err(ConfigError::UnknownVoice(voice));
        }

        let max_words = cli.max_words.or(settings.max_words).unwrap_or(DEFAULT_MAX_WORDS);
        if max_words == 0 {
            return Err(ConfigError::InvalidMaxWords);
        }

        let poll_secs = cli
            .poll_interval
            .or(settings.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        let volume = cli.volume.or(settings.volume).unwrap_or(1.0);
        if !(0.0..=2.0).contains(&volume) {
            return Err(ConfigError::InvalidVolume(volume));
        }

        let sink = match cli.output {
            Some(path) => OutputSink::File(path),
            None => OutputSink::Playback,
        };

        Ok(Self {
            bucket,
            profile: cli
                .profile
                .or(settings.profile)
                .unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
            region: cli
                .region
                .or(settings.region)
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            voice,
            engine: cli.engine.or(settings.engine),
            input: cli.input,
            sink,
            max_words,
            poll_interval: Duration::from_secs(poll_secs),
            ffmpeg: cli
                .ffmpeg
                .or(settings.ffmpeg)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            output_device: cli.output_device.or(settings.output_device),
            volume,
            headless: cli.headless,
            log_dir: cli
                .log_dir
                .or(settings.log_dir)
                .unwrap_or_else(paths::get_log_dir),
        })
    }

    /// Whether the terminal dashboard should run.
    pub fn uses_dashboard(&self) -> bool {
        self.sink == OutputSink::Playback && !self.headless
    }
}

/// Read the settings file. Missing is fine; unreadable or invalid warns.
pub fn load_settings(path: &Path) -> Settings {
    read_json_file(path).unwrap_or_default()
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}
