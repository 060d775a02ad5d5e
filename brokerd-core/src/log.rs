//! Leveled log output consumed by the config and lifecycle layers.
//!
//! The daemon logs through [`tracing`] like everything else; this trait
//! exists so the validator's per-field diagnostics and the coordinator's
//! state transitions go through an injectable seam that tests can capture.

use std::sync::Mutex;

use crate::settings::LogLevel;

/// Leveled log output plus runtime verbosity adjustment.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    /// Apply a new verbosity level. The default implementation ignores the
    /// request; sinks wired to a reloadable subscriber override it.
    fn set_level(&self, level: LogLevel) {
        let _ = level;
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn notice(&self, message: &str) {
        self.log(LogLevel::Notice, message);
    }

    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Err, message);
    }

    fn critical(&self, message: &str) {
        self.log(LogLevel::Crit, message);
    }
}

/// Production sink: forwards everything to the `tracing` macros.
#[derive(Default)]
pub struct TracingLogSink {
    apply_level: Option<Box<dyn Fn(LogLevel) + Send + Sync>>,
}

impl TracingLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that can also push a validated log level into the process-wide
    /// subscriber (e.g. through a `tracing_subscriber::reload` handle).
    pub fn with_level_applier(apply_level: impl Fn(LogLevel) + Send + Sync + 'static) -> Self {
        Self {
            apply_level: Some(Box::new(apply_level)),
        }
    }
}

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info | LogLevel::Notice => tracing::info!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Err | LogLevel::Crit | LogLevel::Alert | LogLevel::Emerg => {
                tracing::error!("{message}")
            }
        }
    }

    fn set_level(&self, level: LogLevel) {
        match &self.apply_level {
            Some(apply) => apply(level),
            None => tracing::debug!("Log level {level} requested, no level applier installed"),
        }
    }
}

/// Collects log entries in memory. Used by tests to assert on diagnostics.
#[derive(Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|(_, message)| message)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, level: LogLevel, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}
