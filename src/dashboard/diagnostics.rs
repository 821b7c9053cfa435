//! Where the dashboard reports per-update failures.
//!
//! These never stop the render loop. They go to `dashboard_error.log`, plus a
//! `warn` event for the main log.

use std::fmt::Display;
use std::io::Write;
#[cfg(test)]
use std::sync::{Arc, Mutex};

use chrono::Local;
use tracing_appender::non_blocking::NonBlocking;

#[derive(Clone)]
pub struct Diagnostics {
    sink: Sink,
}

#[derive(Clone)]
enum Sink {
    File(NonBlocking),
    #[cfg(test)]
    Memory(Arc<Mutex<Vec<String>>>),
}

impl Diagnostics {
    pub fn new(writer: NonBlocking) -> Self {
        Self {
            sink: Sink::File(writer),
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let diagnostics = Self {
            sink: Sink::Memory(Arc::clone(&lines)),
        };
        (diagnostics, lines)
    }

    pub fn record(&self, error: &dyn Display) {
        tracing::warn!(target: "dashboard", "{}", error);
        match &self.sink {
            Sink::File(writer) => {
                let mut writer = writer.clone();
                // Nowhere left to report a failure to write the error log.
                let _ = writeln!(writer, "{} {}", Local::now().to_rfc3339(), error);
            }
            #[cfg(test)]
            Sink::Memory(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(error.to_string());
                }
            }
        }
    }
}
