//! Terminal dashboard: a playback gauge over a rolling log pane.
//!
//! One render loop owns all state. Two reader tasks forward pipeline log
//! lines and progress ticks into its event channel, and a keyboard thread
//! forwards terminal input. The loop ends on `q`/`Q`/Ctrl-C or when the
//! pipeline is cancelled.

mod diagnostics;
mod terminal;

use std::collections::VecDeque;

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::backend::Backend;
use ratatui::layout::{Alignment, Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Gauge, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pipeline::{LogLine, PipelineChannels, PlaybackProgress};

pub use diagnostics::Diagnostics;
pub use terminal::{spawn_input_reader, TerminalGuard};

/// Lines kept in the log pane; older lines are evicted first.
const LOG_CAPACITY: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error("progress {current}/{total} for section {segment} is out of range")]
    ProgressOutOfRange {
        segment: usize,
        current: u64,
        total: u64,
    },
    #[error("failed to draw frame: {0}")]
    Draw(#[source] std::io::Error),
    #[error("failed to set up terminal: {0}")]
    Terminal(#[source] std::io::Error),
}

/// Which pipeline stream a reader task was draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Logs,
    Progress,
}

#[derive(Debug)]
pub enum DashboardEvent {
    Log(LogLine),
    Progress(PlaybackProgress),
    Input(Event),
    Closed(Stream),
    /// Every stage finished without error or cancellation.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardExit {
    /// The user pressed the quit key.
    Quit,
    /// The pipeline was cancelled (usually by a fatal error).
    Cancelled,
}

/// Everything the view renders.
#[derive(Debug, Default)]
pub struct DashboardState {
    logs: VecDeque<String>,
    progress: Option<PlaybackProgress>,
    logs_closed: bool,
    progress_closed: bool,
    completed: bool,
}

impl DashboardState {
    pub fn push_log(&mut self, line: impl Into<String>) {
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(line.into());
    }

    /// Store a progress tick. An out-of-range tick is clamped and reported.
    pub fn apply_progress(&mut self, mut progress: PlaybackProgress) -> Result<(), DashboardError> {
        let result = if progress.current > progress.total {
            let err = DashboardError::ProgressOutOfRange {
                segment: progress.segment,
                current: progress.current,
                total: progress.total,
            };
            progress.current = progress.total;
            Err(err)
        } else {
            Ok(())
        };
        self.progress = Some(progress);
        result
    }

    fn stream_closed(&mut self, stream: Stream) {
        match stream {
            Stream::Logs => self.logs_closed = true,
            Stream::Progress => self.progress_closed = true,
        }
        self.announce_finish();
    }

    fn pipeline_completed(&mut self) {
        self.completed = true;
        self.announce_finish();
    }

    /// Streams also close on failure, so only a clean completion counts.
    fn announce_finish(&mut self) {
        if self.completed && self.logs_closed && self.progress_closed {
            self.push_log("Narration finished. Press q to quit.");
        }
    }

    /// Gauge fill in `0.0..=1.0`; zero when `total` is zero.
    pub fn ratio(&self) -> f64 {
        match self.progress {
            Some(p) if p.total > 0 => (p.current as f64 / p.total as f64).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }

    pub fn draw(&self, frame: &mut Frame) {
        let outer = Block::bordered()
            .title(" PRESS Q TO QUIT ")
            .title_alignment(Alignment::Center);
        let inner = outer.inner(frame.area());
        frame.render_widget(outer, frame.area());

        let [gauge_area, log_area] =
            Layout::vertical([Constraint::Length(3), Constraint::Min(3)]).areas(inner);

        let (segment, current, total) = self
            .progress
            .map(|p| (p.segment, p.current, p.total))
            .unwrap_or((1, 0, 0));
        let ratio = self.ratio();
        let gauge = Gauge::default()
            .block(Block::bordered().title(format!(" Section {} progress ", segment)))
            .gauge_style(
                Style::default()
                    .fg(Color::Cyan)
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD),
            )
            .ratio(ratio)
            .label(format!("{:.0}% ({}/{} s)", ratio * 100.0, current, total));
        frame.render_widget(gauge, gauge_area);

        // Newest lines that fit inside the borders, wrapped at words and
        // scrolled so the last row is always the newest text.
        let width = log_area.width.saturating_sub(2) as usize;
        let visible = log_area.height.saturating_sub(2) as usize;
        let mut rows = 0;
        let mut first = self.logs.len();
        while first > 0 && rows < visible {
            first -= 1;
            rows += wrapped_rows(&self.logs[first], width);
        }
        let scroll = u16::try_from(rows.saturating_sub(visible)).unwrap_or(u16::MAX);
        let lines: Vec<Line> = self
            .logs
            .range(first..)
            .map(|l| Line::raw(l.as_str()))
            .collect();
        let logs = Paragraph::new(lines)
            .block(Block::bordered().title(" Logs "))
            .wrap(Wrap { trim: true })
            .scroll((scroll, 0));
        frame.render_widget(logs, log_area);
    }
}

/// The render loop and its inbound event channel.
pub struct Dashboard {
    state: DashboardState,
    events: mpsc::UnboundedReceiver<DashboardEvent>,
    events_tx: mpsc::UnboundedSender<DashboardEvent>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Dashboard {
    pub fn new() -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            state: DashboardState::default(),
            events,
            events_tx,
        }
    }

    /// Sender for input sources such as the keyboard reader.
    pub fn events(&self) -> mpsc::UnboundedSender<DashboardEvent> {
        self.events_tx.clone()
    }

    /// Spawn the log, progress and completion reader tasks.
    pub fn attach(&self, channels: PipelineChannels, cancel: &CancellationToken) {
        let PipelineChannels {
            logs,
            progress,
            completed,
        } = channels;

        tokio::spawn(forward(
            logs,
            self.events(),
            DashboardEvent::Log,
            Stream::Logs,
            cancel.clone(),
        ));
        tokio::spawn(forward(
            progress,
            self.events(),
            DashboardEvent::Progress,
            Stream::Progress,
            cancel.clone(),
        ));

        let events = self.events();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Some(Ok(())) = cancel.run_until_cancelled(completed).await {
                let _ = events.send(DashboardEvent::Completed);
            }
        });
    }

    pub async fn run<B: Backend>(
        mut self,
        terminal: &mut Terminal<B>,
        cancel: &CancellationToken,
        diagnostics: &Diagnostics,
    ) -> DashboardExit {
        self.redraw(terminal, diagnostics);

        loop {
            let Some(next) = cancel.run_until_cancelled(self.events.recv()).await else {
                info!("Dashboard closing: pipeline cancelled");
                return DashboardExit::Cancelled;
            };
            // Unreachable while `events_tx` lives; treat as a quit.
            let Some(event) = next else {
                return DashboardExit::Quit;
            };

            match event {
                DashboardEvent::Log(line) => self.state.push_log(line.to_string()),
                DashboardEvent::Progress(progress) => {
                    if let Err(e) = self.state.apply_progress(progress) {
                        diagnostics.record(&e);
                    }
                }
                DashboardEvent::Closed(stream) => {
                    debug!(?stream, "Pipeline stream closed");
                    self.state.stream_closed(stream);
                }
                DashboardEvent::Completed => self.state.pipeline_completed(),
                DashboardEvent::Input(input) => {
                    if is_quit(&input) {
                        info!("Quit requested");
                        return DashboardExit::Quit;
                    }
                    if !matches!(input, Event::Resize(..)) {
                        continue;
                    }
                }
            }

            self.redraw(terminal, diagnostics);
        }
    }

    fn redraw<B: Backend>(&self, terminal: &mut Terminal<B>, diagnostics: &Diagnostics) {
        if let Err(e) = terminal.draw(|frame| self.state.draw(frame)) {
            diagnostics.record(&DashboardError::Draw(e));
        }
    }
}

async fn forward<T>(
    mut rx: mpsc::UnboundedReceiver<T>,
    tx: mpsc::UnboundedSender<DashboardEvent>,
    wrap: fn(T) -> DashboardEvent,
    stream: Stream,
    cancel: CancellationToken,
) {
    while let Some(Some(item)) = cancel.run_until_cancelled(rx.recv()).await {
        if tx.send(wrap(item)).is_err() {
            return;
        }
    }
    let _ = tx.send(DashboardEvent::Closed(stream));
}

/// Rows `text` takes when word-wrapped to `width` columns. Words wider than
/// the pane are broken across rows.
fn wrapped_rows(text: &str, width: usize) -> usize {
    if width == 0 {
        return 1;
    }
    let mut rows = 1;
    let mut used = 0;
    for word in text.split_whitespace() {
        let len = word.chars().count();
        let needed = if used == 0 { len } else { used + 1 + len };
        if needed <= width {
            used = needed;
            continue;
        }
        if used > 0 {
            rows += 1;
        }
        // Words are never empty here.
        let broken = (len - 1) / width;
        rows += broken;
        used = len - broken * width;
    }
    rows
}

fn is_quit(event: &Event) -> bool {
    match event {
        Event::Key(KeyEvent {
            code, modifiers, kind, ..
        }) if *kind == KeyEventKind::Press => match code {
            KeyCode::Char('q') | KeyCode::Char('Q') => true,
            KeyCode::Char('c') => modifiers.contains(KeyModifiers::CONTROL),
            _ => false,
        },
        _ => false,
    }
}

/// Consume the pipeline channels without a terminal, mirroring them into
/// the tracing log. Returns once both channels are closed or on cancellation.
pub async fn drain_headless(channels: PipelineChannels, cancel: &CancellationToken) {
    let PipelineChannels {
        mut logs,
        mut progress,
        ..
    } = channels;
    let (mut logs_open, mut progress_open) = (true, true);

    while logs_open || progress_open {
        tokio::select! {
            _ = cancel.cancelled() => return,
            line = logs.recv(), if logs_open => match line {
                Some(line) => info!(target: "narration", "{}", line.text),
                None => logs_open = false,
            },
            tick = progress.recv(), if progress_open => match tick {
                Some(p) if p.current == p.total => info!(
                    target: "narration",
                    segment = p.segment,
                    "Section playback window elapsed ({} s)",
                    p.total
                ),
                Some(p) => debug!(
                    target: "narration",
                    segment = p.segment,
                    "{}/{} s",
                    p.current,
                    p.total
                ),
                None => progress_open = false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::*;
    use crate::pipeline::{OutputSink, PipelineError};
    use crossterm::event::KeyEvent;
    use ratatui::backend::TestBackend;
    use std::sync::Arc;
    use std::time::Duration;

    fn screen(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let mut out = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                out.push_str(buffer[(x, y)].symbol());
            }
            out.push('\n');
        }
        out
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> DashboardEvent {
        DashboardEvent::Input(Event::Key(KeyEvent::new(code, modifiers)))
    }

    #[test]
    fn test_zero_total_renders() {
        let mut state = DashboardState::default();
        state
            .apply_progress(PlaybackProgress {
                segment: 1,
                current: 0,
                total: 0,
            })
            .unwrap();
        assert_eq!(state.ratio(), 0.0);

        let mut terminal = Terminal::new(TestBackend::new(60, 12)).unwrap();
        terminal.draw(|f| state.draw(f)).unwrap();
        let text = screen(&terminal);
        assert!(text.contains("PRESS Q TO QUIT"));
        assert!(text.contains("Section 1 progress"));
        assert!(text.contains("0% (0/0 s)"));
    }

    #[test]
    fn test_out_of_range_progress_is_clamped() {
        let mut state = DashboardState::default();
        let err = state
            .apply_progress(PlaybackProgress {
                segment: 2,
                current: 9,
                total: 4,
            })
            .unwrap_err();
        assert!(matches!(err, DashboardError::ProgressOutOfRange { segment: 2, .. }));
        assert_eq!(state.ratio(), 1.0);
    }

    #[test]
    fn test_log_buffer_evicts_oldest() {
        let mut state = DashboardState::default();
        for i in 0..LOG_CAPACITY + 3 {
            state.push_log(format!("line {i}"));
        }
        assert_eq!(state.logs.len(), LOG_CAPACITY);
        assert_eq!(state.logs.front().map(String::as_str), Some("line 3"));
    }

    #[test]
    fn test_log_pane_shows_latest_lines() {
        let mut state = DashboardState::default();
        for i in 0..40 {
            state.push_log(format!("entry-{i:02}"));
        }
        let mut terminal = Terminal::new(TestBackend::new(40, 12)).unwrap();
        terminal.draw(|f| state.draw(f)).unwrap();
        let text = screen(&terminal);
        assert!(text.contains("entry-39"));
        assert!(!text.contains("entry-00"));
    }

    #[test]
    fn test_finish_message_needs_clean_completion() {
        let mut state = DashboardState::default();
        state.stream_closed(Stream::Progress);
        state.stream_closed(Stream::Logs);
        assert!(!state.logs.iter().any(|l| l.contains("Narration finished")));

        state.pipeline_completed();
        let finished: Vec<_> = state
            .logs
            .iter()
            .filter(|l| l.contains("Narration finished"))
            .collect();
        assert_eq!(finished.len(), 1);
    }

    #[test]
    fn test_wrapped_rows() {
        assert_eq!(wrapped_rows("", 10), 1);
        assert_eq!(wrapped_rows("short line", 10), 1);
        assert_eq!(wrapped_rows("short line!", 10), 2);
        assert_eq!(wrapped_rows("one two three four", 10), 2);
        assert_eq!(wrapped_rows("one two three four", 9), 3);
        assert_eq!(wrapped_rows("abcdefghijklmnopqrstuvwxy", 10), 3);
        assert_eq!(wrapped_rows("a abcdefghijklmnopqrst b", 10), 4);
    }

    #[test]
    fn test_long_log_line_wraps_instead_of_cutting() {
        let mut state = DashboardState::default();
        for i in 0..20 {
            state.push_log(format!("entry-{i:02}"));
        }
        state.push_log(
            "segment 3: failed to fetch s3://bucket/tasks/abc123.mp3 from storage \
             because the object was not found END-OF-LINE",
        );
        let mut terminal = Terminal::new(TestBackend::new(40, 14)).unwrap();
        terminal.draw(|f| state.draw(f)).unwrap();
        let text = screen(&terminal);
        assert!(text.contains("segment 3: failed"));
        assert!(text.contains("END-OF-LINE"));
        assert!(text.contains("entry-19"));
        assert!(!text.contains("entry-00"));
    }

    #[test]
    fn test_quit_keys() {
        let ev = |code, mods| Event::Key(KeyEvent::new(code, mods));
        assert!(is_quit(&ev(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(is_quit(&ev(KeyCode::Char('Q'), KeyModifiers::SHIFT)));
        assert!(is_quit(&ev(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!is_quit(&ev(KeyCode::Char('c'), KeyModifiers::NONE)));
        assert!(!is_quit(&ev(KeyCode::Enter, KeyModifiers::NONE)));
        assert!(!is_quit(&Event::Resize(80, 24)));
    }

    #[tokio::test]
    async fn test_quit_key_ends_loop() {
        let dashboard = Dashboard::new();
        let events = dashboard.events();
        let (diagnostics, _) = Diagnostics::in_memory();
        let cancel = CancellationToken::new();
        let mut terminal = Terminal::new(TestBackend::new(60, 12)).unwrap();

        events
            .send(DashboardEvent::Log(LogLine::now("hello from the pipeline")))
            .unwrap();
        events.send(key(KeyCode::Char('q'), KeyModifiers::NONE)).unwrap();

        let exit = dashboard.run(&mut terminal, &cancel, &diagnostics).await;
        assert_eq!(exit, DashboardExit::Quit);
        assert!(screen(&terminal).contains("hello from the pipeline"));
    }

    #[tokio::test]
    async fn test_out_of_range_tick_goes_to_diagnostics() {
        let dashboard = Dashboard::new();
        let events = dashboard.events();
        let (diagnostics, recorded) = Diagnostics::in_memory();
        let cancel = CancellationToken::new();
        let mut terminal = Terminal::new(TestBackend::new(60, 12)).unwrap();

        events
            .send(DashboardEvent::Progress(PlaybackProgress {
                segment: 1,
                current: 5,
                total: 2,
            }))
            .unwrap();
        events.send(key(KeyCode::Char('q'), KeyModifiers::NONE)).unwrap();

        assert_eq!(
            dashboard.run(&mut terminal, &cancel, &diagnostics).await,
            DashboardExit::Quit
        );
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].contains("out of range"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_failure_ends_waiting_dashboard() {
        let pipeline = fake_pipeline(
            Arc::new(FakeBackend::completing_after(1)),
            Arc::new(FakeStore::default()),
            FakeProbe::seconds(2),
            Arc::new(FakeOutput::failing()),
            OutputSink::Playback,
        );
        let (running, channels) = pipeline.start(segments(&["One.", "Two."]));
        let cancel = running.cancellation();

        // No input ever arrives; only cancellation can end the loop.
        let dashboard = Dashboard::new();
        dashboard.attach(channels, &cancel);
        let (diagnostics, _) = Diagnostics::in_memory();
        let mut terminal = Terminal::new(TestBackend::new(60, 12)).unwrap();

        let exit = tokio::time::timeout(
            Duration::from_secs(60),
            dashboard.run(&mut terminal, &cancel, &diagnostics),
        )
        .await
        .expect("dashboard did not observe cancellation");
        assert_eq!(exit, DashboardExit::Cancelled);
        assert!(!screen(&terminal).contains("Narration finished"));

        let err = running.finish().await.unwrap_err();
        assert!(matches!(err, PipelineError::Playback { segment: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_pipeline_waits_for_quit() {
        let pipeline = fake_pipeline(
            Arc::new(FakeBackend::completing_after(1)),
            Arc::new(FakeStore::default()),
            FakeProbe::seconds(1),
            Arc::new(FakeOutput::default()),
            OutputSink::Playback,
        );
        let (running, channels) = pipeline.start(segments(&["Only."]));
        let cancel = running.cancellation();

        let dashboard = Dashboard::new();
        let events = dashboard.events();
        dashboard.attach(channels, &cancel);
        let (diagnostics, _) = Diagnostics::in_memory();
        let mut terminal = Terminal::new(TestBackend::new(60, 14)).unwrap();

        let quitter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            events.send(key(KeyCode::Char('q'), KeyModifiers::NONE)).unwrap();
        });

        let exit = dashboard.run(&mut terminal, &cancel, &diagnostics).await;
        quitter.await.unwrap();
        assert_eq!(exit, DashboardExit::Quit);
        assert!(!cancel.is_cancelled());
        assert!(screen(&terminal).contains("Narration finished"));
        running.finish().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_headless_returns_when_streams_close() {
        let pipeline = fake_pipeline(
            Arc::new(FakeBackend::completing_after(2)),
            Arc::new(FakeStore::default()),
            FakeProbe::seconds(1),
            Arc::new(FakeOutput::default()),
            OutputSink::Playback,
        );
        let (running, channels) = pipeline.start(segments(&["A.", "B."]));
        let cancel = running.cancellation();

        drain_headless(channels, &cancel).await;
        running.finish().await.unwrap();
    }
}
