//! Raw-mode terminal ownership and the keyboard reader thread.

use std::io::{self, Stdout};
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::cursor;
use crossterm::event;
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{DashboardError, DashboardEvent};

/// Alternate screen in raw mode for as long as this value lives.
///
/// The terminal is restored on drop and from the panic hook, so every exit
/// path leaves the shell usable.
pub struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalGuard {
    pub fn enter() -> Result<Self, DashboardError> {
        install_panic_hook();
        enable_raw_mode().map_err(DashboardError::Terminal)?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen, cursor::Hide) {
            restore_terminal();
            return Err(DashboardError::Terminal(e));
        }

        let terminal = match Terminal::new(CrosstermBackend::new(io::stdout())) {
            Ok(terminal) => terminal,
            Err(e) => {
                restore_terminal();
                return Err(DashboardError::Terminal(e));
            }
        };
        Ok(Self { terminal })
    }

    pub fn terminal_mut(&mut self) -> &mut Terminal<CrosstermBackend<Stdout>> {
        &mut self.terminal
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

fn restore_terminal() {
    execute!(io::stdout(), LeaveAlternateScreen, cursor::Show).ok();
    disable_raw_mode().ok();
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        restore_terminal();
        default_hook(info);
    }));
}

/// Forward terminal events to the dashboard until cancelled or the
/// dashboard goes away. crossterm reads block, so this is a plain thread.
pub fn spawn_input_reader(
    events: mpsc::UnboundedSender<DashboardEvent>,
    cancel: CancellationToken,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("dashboard-input".into())
        .spawn(move || {
            while !cancel.is_cancelled() && !events.is_closed() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => match event::read() {
                        Ok(ev) => {
                            if events.send(DashboardEvent::Input(ev)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Failed to read terminal event: {}", e);
                            break;
                        }
                    },
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to poll terminal events: {}", e);
                        break;
                    }
                }
            }
        })
}
