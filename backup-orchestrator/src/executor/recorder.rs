//! Per-run log trail.
//!
//! Every entry is masked, appended to an ordered buffer and forwarded to an
//! optional [`LogSink`]. Forwarding uses an unbounded channel and never blocks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;

use crate::models::{LogEntry, LogType};
use crate::utils::SecretMasker;

/// Live observer of a run's log entries.
pub type LogSink = mpsc::UnboundedSender<LogEntry>;

#[derive(Default)]
struct Inner {
    entries: Mutex<Vec<LogEntry>>,
    sink: Mutex<Option<LogSink>>,
    masker: Mutex<SecretMasker>,
}

#[derive(Clone, Default)]
pub struct LogRecorder {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LogRecorder {
    pub fn new(sink: Option<LogSink>) -> Self {
        let recorder = Self::default();
        *lock(&recorder.inner.sink) = sink;
        recorder
    }

    pub fn register_secret(&self, secret: &str) {
        lock(&self.inner.masker).register(secret);
    }

    pub fn register_secrets<I, S>(&self, secrets: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut masker = lock(&self.inner.masker);
        for s in secrets {
            masker.register(s.as_ref());
        }
    }

    pub fn mask(&self, text: &str) -> String {
        lock(&self.inner.masker).mask(text)
    }

    pub fn log(&self, log_type: LogType, message: &str) -> LogEntry {
        let entry = LogEntry {
            log_type,
            message: self.mask(message),
            timestamp: Utc::now(),
        };
        tracing::trace!(kind = %log_type, message = %entry.message, "run log");

        lock(&self.inner.entries).push(entry.clone());

        let mut sink = lock(&self.inner.sink);
        if let Some(tx) = sink.as_ref() {
            if tx.send(entry.clone()).is_err() {
                // Receiver gone; stop trying.
                *sink = None;
            }
        }
        entry
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        lock(&self.inner.entries).clone()
    }

    /// Messages of every `error` entry, in order.
    pub fn errors(&self) -> Vec<String> {
        lock(&self.inner.entries)
            .iter()
            .filter(|e| e.log_type == LogType::Error)
            .map(|e| e.message.clone())
            .collect()
    }

    /// Drop the live sink so the receiving side sees end of stream.
    pub fn close_sink(&self) {
        lock(&self.inner.sink).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_masked_and_ordered() {
        let rec = LogRecorder::new(None);
        rec.register_secret("secret123");
        rec.log(LogType::Cmd, "export BORG_PASSPHRASE=secret123; borg list");
        rec.log(LogType::Error, "oops");
        let entries = rec.entries();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].message.contains("secret123"));
        assert_eq!(rec.errors(), vec!["oops"]);
    }

    #[tokio::test]
    async fn test_sink_receives_entries_until_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let rec = LogRecorder::new(Some(tx));
        rec.log(LogType::Info, "one");
        rec.close_sink();
        rec.log(LogType::Info, "two");
        assert_eq!(rx.recv().await.map(|e| e.message), Some("one".into()));
        assert!(rx.recv().await.is_none());
        assert_eq!(rec.entries().len(), 2);
    }

    #[test]
    fn test_dropped_receiver_does_not_fail_logging() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let rec = LogRecorder::new(Some(tx));
        rec.log(LogType::Info, "still recorded");
        assert_eq!(rec.entries().len(), 1);
    }
}
