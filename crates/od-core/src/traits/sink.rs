//! Job log sinks

use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Destination for human-readable job log lines
pub trait LogSink: Send + Sync {
    /// Append one line (without terminator)
    fn line(&self, line: &str);
}

/// Sink shared between the wrapper, launchers and tunnel managers
pub type SharedSink = Arc<dyn LogSink>;

impl<W: Write + Send> LogSink for Mutex<W> {
    fn line(&self, line: &str) {
        let mut writer = self.lock();
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            tracing::debug!("Dropping job log line: {}", e);
        }
    }
}

/// Sink that forwards lines to `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    target: Option<String>,
}

impl TracingSink {
    /// Sink tagging each line with `target` (a job or request)
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
        }
    }
}

impl LogSink for TracingSink {
    fn line(&self, line: &str) {
        match &self.target {
            Some(target) => tracing::info!(origin = %target, "{}", line),
            None => tracing::info!("{}", line),
        }
    }
}
