//! Audio length via an ffmpeg null decode.
//!
//! Polly results carry no duration, so each artifact is decoded once by
//! `ffmpeg -f null` and the `Duration:` banner line is parsed. Whole seconds
//! only; the fractional part is dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

/// Reports the playback length of an audio file in whole seconds.
pub trait DurationProbe: Send + Sync {
    fn probe<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<u64, ProbeError>>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {output}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        output: String,
    },
    #[error("no duration found in probe output: {output}")]
    Unparseable { output: String },
}

/// Runs `ffmpeg` as a child process, never through a shell.
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    program: PathBuf,
}

impl FfmpegProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegProbe {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl DurationProbe for FfmpegProbe {
    fn probe<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<u64, ProbeError>> {
        Box::pin(async move {
            let program = self.program.display().to_string();
            let output = Command::new(&self.program)
                .args(["-hide_banner", "-nostdin", "-i"])
                .arg(path)
                .args(["-f", "null", "-"])
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|source| ProbeError::Spawn {
                    program: program.clone(),
                    source,
                })?;

            // ffmpeg prints the banner on stderr; keep both streams for errors.
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));

            if !output.status.success() {
                return Err(ProbeError::Failed {
                    program,
                    status: output.status,
                    output: combined,
                });
            }

            let secs = parse_duration(&combined)?;
            debug!(path = %path.display(), secs, "Probed audio duration");
            Ok(secs)
        })
    }
}

static DURATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Duration:\s(\d{2}):(\d{2}):(\d{2})\.(\d{2})").expect("duration pattern compiles")
});

/// Extract `Duration: HH:MM:SS.ff` from probe output as whole seconds.
pub fn parse_duration(output: &str) -> Result<u64, ProbeError> {
    let unparseable = || ProbeError::Unparseable {
        output: output.to_string(),
    };

    let caps = DURATION_PATTERN.captures(output).ok_or_else(unparseable)?;
    let field = |i: usize| -> Result<u64, ProbeError> {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(unparseable)
    };

    let (hours, minutes, seconds) = (field(1)?, field(2)?, field(3)?);
    Ok(hours * 3600 + minutes * 60 + seconds)
}
