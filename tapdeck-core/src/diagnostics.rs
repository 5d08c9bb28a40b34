//! Diagnostic sink for user-facing status lines.
//!
//! The `Diagnostics` trait is the line-oriented channel the link and the
//! recorder use to report what they are doing (motor notices, refused
//! transitions, connection status). `LogDiagnostics` forwards to the `log`
//! facade; `MemoryDiagnostics` captures lines for tests.

use std::sync::Mutex;

/// Line-oriented diagnostic output.
pub trait Diagnostics: Send + Sync {
    /// Write one message line.
    fn write(&self, message: &str);
}

/// Forwards every line to `log` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn write(&self, message: &str) {
        log::info!(target: "tapdeck", "{}", message);
    }
}

/// Headless sink for testing - keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    lines: Mutex<Vec<String>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Check whether any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    /// Drop captured lines.
    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn write(&self, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_diagnostics_capture() {
        let diag = MemoryDiagnostics::new();
        diag.write("Cassette motor on");
        diag.write("Tape end reached");

        assert_eq!(diag.lines().len(), 2);
        assert!(diag.contains("motor on"));
        assert!(!diag.contains("Error"));

        diag.clear();
        assert!(diag.lines().is_empty());
    }
}
