//! Build Log - explicit logging sink for the loader and the orchestrator

use std::sync::Mutex;

use crate::pipeline::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Info(String),
    StageOutput { stage: Stage, output: String },
}

/// Sink for build progress and captured stage output.
pub trait BuildLog {
    fn info(&self, message: &str);
    fn stage_output(&self, stage: Stage, output: &str);
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl BuildLog for TracingLog {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn stage_output(&self, stage: Stage, output: &str) {
        tracing::info!(stage = %stage, "{}", output);
    }
}

/// Keeps entries in memory, in the order they were logged.
#[derive(Debug, Default)]
pub struct CapturedLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl CapturedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    /// Output logged for `stage`, if the stage completed.
    pub fn output_of(&self, stage: Stage) -> Option<String> {
        self.lock().iter().find_map(|e| match e {
            LogEntry::StageOutput { stage: s, output } if *s == stage => Some(output.clone()),
            _ => None,
        })
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lock().iter().any(|e| match e {
            LogEntry::Info(m) => m.contains(needle),
            LogEntry::StageOutput { output, .. } => output.contains(needle),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEntry>> {
        // A poisoned log still holds every entry pushed before the panic.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BuildLog for CapturedLog {
    fn info(&self, message: &str) {
        self.lock().push(LogEntry::Info(message.to_string()));
    }

    fn stage_output(&self, stage: Stage, output: &str) {
        self.lock().push(LogEntry::StageOutput {
            stage,
            output: output.to_string(),
        });
    }
}
