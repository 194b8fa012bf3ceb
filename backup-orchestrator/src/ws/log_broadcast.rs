use dashmap::DashMap;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::executor::LogSink;
use crate::models::{LogEntry, LogType};
use crate::utils::SecretMasker;

/// One observer of a job's log stream.
pub trait StreamSink: Send + Sync {
    /// Push one serialized line. `false` means the sink is dead.
    fn send_line(&self, line: &str) -> bool;
    fn close(&self);
}

/// Sink backed by an unbounded channel; the receiver side feeds a transport.
pub struct ChannelSink {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Mutex::new(Some(tx)) }, rx)
    }
}

impl StreamSink for ChannelSink {
    fn send_line(&self, line: &str) -> bool {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        tx.as_ref().is_some_and(|tx| tx.send(line.to_string()).is_ok())
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

type Subscriber = (Uuid, Arc<dyn StreamSink>);

/// Fans run logs out to every observer of a job id.
#[derive(Clone, Default)]
pub struct LogBroadcaster {
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, job_id: &str, sink: Arc<dyn StreamSink>) -> Uuid {
        let id = Uuid::new_v4();
        let hello = json!({
            "type": "connected",
            "message": format!("Subscribed to logs for job {job_id}"),
            "timestamp": chrono::Utc::now(),
        });
        if !sink.send_line(&hello.to_string()) {
            tracing::debug!(job_id, "Sink failed before registration");
            return id;
        }
        self.subscribers
            .entry(job_id.to_string())
            .or_default()
            .push((id, sink));
        tracing::debug!(job_id, subscription = %id, "Log subscriber added");
        id
    }

    pub fn unsubscribe(&self, job_id: &str, subscription: Uuid) {
        if let Some(mut subs) = self.subscribers.get_mut(job_id) {
            subs.retain(|(id, _)| *id != subscription);
        }
        self.subscribers.remove_if(job_id, |_, subs| subs.is_empty());
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.subscribers.get(job_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Returns how many sinks received the message. Failed sinks are dropped.
    /// Secret assignments and key blocks are masked before anything is sent.
    pub fn broadcast(&self, job_id: &str, log_type: LogType, message: &str) -> usize {
        let entry = LogEntry {
            log_type,
            message: message.to_string(),
            timestamp: chrono::Utc::now(),
        };
        self.broadcast_entry(job_id, &entry)
    }

    pub fn broadcast_entry(&self, job_id: &str, entry: &LogEntry) -> usize {
        let masked = LogEntry { message: SecretMasker::new().mask(&entry.message), ..entry.clone() };
        match serde_json::to_string(&masked) {
            Ok(line) => self.send_to_all(job_id, &line),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to serialize log entry");
                0
            }
        }
    }

    fn send_to_all(&self, job_id: &str, line: &str) -> usize {
        let delivered = match self.subscribers.get_mut(job_id) {
            Some(mut subs) => {
                subs.retain(|(_, sink)| sink.send_line(line));
                subs.len()
            }
            None => 0,
        };
        self.subscribers.remove_if(job_id, |_, subs| subs.is_empty());
        delivered
    }

    /// Terminal message, then every sink for the job is closed and forgotten.
    pub fn complete(&self, job_id: &str, success: bool) -> usize {
        let Some((_, subs)) = self.subscribers.remove(job_id) else {
            return 0;
        };
        let message = if success { "Operation completed" } else { "Operation failed" };
        let line = json!({
            "type": "complete",
            "success": success,
            "message": message,
            "timestamp": chrono::Utc::now(),
        })
        .to_string();

        let mut delivered = 0;
        for (_, sink) in subs {
            if sink.send_line(&line) {
                delivered += 1;
            }
            sink.close();
        }
        tracing::debug!(job_id, delivered, success, "Log stream completed");
        delivered
    }

    /// A [`LogSink`] whose entries are forwarded to this job's subscribers.
    pub fn relay(&self, job_id: &str) -> LogRelay {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogEntry>();
        let broadcaster = self.clone();
        let id = job_id.to_string();
        let task = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                broadcaster.broadcast_entry(&id, &entry);
            }
        });
        LogRelay {
            broadcaster: self.clone(),
            job_id: job_id.to_string(),
            sink: tx,
            task,
        }
    }
}

pub struct LogRelay {
    broadcaster: LogBroadcaster,
    job_id: String,
    sink: LogSink,
    task: JoinHandle<()>,
}

impl LogRelay {
    pub fn sink(&self) -> LogSink {
        self.sink.clone()
    }

    /// Waits for every queued entry to go out, then completes the stream.
    /// All clones of [`LogRelay::sink`] must be dropped first.
    pub async fn finish(self, success: bool) -> usize {
        drop(self.sink);
        if let Err(e) = self.task.await {
            tracing::warn!(job_id = %self.job_id, error = %e, "Log relay task failed");
        }
        self.broadcaster.complete(&self.job_id, success)
    }
}
