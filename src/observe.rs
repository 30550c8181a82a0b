//! Observability sink handed to the orchestrator and the remote client.

use std::sync::Mutex;

pub trait Observer: Send + Sync {
    fn debug(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards to `tracing`.
#[derive(Clone, Debug, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn debug(&self, message: &str) {
        tracing::debug!("{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Debug,
    Error,
}

/// Keeps every message in memory; used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    entries: Mutex<Vec<(Level, String)>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(level, _)| *level == Level::Error)
            .map(|(_, message)| message)
            .collect()
    }

    fn push(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
        match level {
            Level::Debug => tracing::debug!("{message}"),
            Level::Error => tracing::error!("{message}"),
        }
    }
}

impl Observer for RecordingObserver {
    fn debug(&self, message: &str) {
        self.push(Level::Debug, message);
    }

    fn error(&self, message: &str) {
        self.push(Level::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_observer_keeps_order_and_level() {
        let observer = RecordingObserver::new();
        observer.debug("first");
        observer.error("second");
        observer.debug("third");

        assert_eq!(
            observer.entries(),
            vec![
                (Level::Debug, "first".to_string()),
                (Level::Error, "second".to_string()),
                (Level::Debug, "third".to_string()),
            ]
        );
        assert_eq!(observer.errors(), vec!["second".to_string()]);
    }
}
