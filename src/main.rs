//! narrate: read long text aloud through Amazon Polly.
//!
//! Text is split into sentence-aligned segments, synthesized one Polly task
//! at a time, and played back while the next segment is being synthesized.
//! A terminal dashboard shows playback progress and a running log.

mod audio;
mod config;
mod dashboard;
mod input;
mod logging;
mod pipeline;
mod tts;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use aws_config::{BehaviorVersion, Region};
use clap::Parser;
use tracing::info;

use audio::{FfmpegProbe, RodioOutput};
use config::{paths, Cli, NarratorConfig};
use dashboard::{drain_headless, spawn_input_reader, Dashboard, DashboardExit, TerminalGuard};
use pipeline::{Pipeline, PipelineSettings};
use tts::polly::PollyBackend;
use tts::storage::S3ArtifactStore;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.list_devices {
        for name in audio::list_output_devices() {
            println!("{}", name);
        }
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings_path = cli.settings.clone().unwrap_or_else(paths::get_settings_path);
    let settings = config::load_settings(&settings_path);
    let config = NarratorConfig::resolve(cli, settings)?;

    let (_log_guards, diagnostics) = logging::init(&config.log_dir, !config.uses_dashboard())?;
    info!(?config, settings = %settings_path.display(), "Configuration loaded");

    let text = input::read_text(config.input.as_deref())?;
    let segments = tts::segment(&text, config.max_words);
    if segments.is_empty() {
        info!("Input is empty, nothing to narrate");
        return Ok(());
    }
    info!(segments = segments.len(), words = text.split_whitespace().count(), "Input segmented");

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .profile_name(&config.profile)
        .region(Region::new(config.region.clone()))
        .load()
        .await;

    let backend = PollyBackend::new(&sdk_config, &config.bucket, config.engine);
    let store = S3ArtifactStore::new(&sdk_config, &config.bucket, &config.region)?;
    let pipeline = Pipeline::new(
        Arc::new(backend),
        Arc::new(store),
        Arc::new(FfmpegProbe::new(&config.ffmpeg)),
        Arc::new(RodioOutput::new(config.output_device.clone(), config.volume)),
        PipelineSettings {
            voice: config.voice.clone(),
            poll_interval: config.poll_interval,
            sink: config.sink.clone(),
        },
    );

    if !config.uses_dashboard() {
        let (running, channels) = pipeline.start(segments);
        let cancel = running.cancellation();
        tokio::select! {
            _ = drain_headless(channels, &cancel) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                running.cancel();
            }
        }
        return running.finish().await.context("Narration failed");
    }

    // Terminal first, so a failure here leaves nothing running.
    let mut guard = TerminalGuard::enter().context("Failed to start dashboard")?;
    let (running, channels) = pipeline.start(segments);
    let cancel = running.cancellation();

    let dashboard = Dashboard::new();
    dashboard.attach(channels, &cancel);
    if let Err(e) = spawn_input_reader(dashboard.events(), cancel.clone()) {
        running.cancel();
        drop(guard);
        running.finish().await.ok();
        return Err(e).context("Failed to start keyboard reader");
    }

    let exit = dashboard.run(guard.terminal_mut(), &cancel, &diagnostics).await;
    drop(guard);

    if exit == DashboardExit::Quit {
        running.cancel();
    }

    running.finish().await.context("Narration failed")?;
    Ok(())
}
