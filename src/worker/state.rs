//! Progress counters shared between a worker and the stats reporter.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

/// Lifecycle of a partition worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Connecting,
    Consuming,
    /// Closing sinks after a fatal error.
    Draining,
    Terminated,
}

impl WorkerPhase {
    fn as_u8(self) -> u8 {
        match self {
            WorkerPhase::Connecting => 0,
            WorkerPhase::Consuming => 1,
            WorkerPhase::Draining => 2,
            WorkerPhase::Terminated => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerPhase::Connecting,
            1 => WorkerPhase::Consuming,
            2 => WorkerPhase::Draining,
            _ => WorkerPhase::Terminated,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerPhase::Connecting => "connecting",
            WorkerPhase::Consuming => "consuming",
            WorkerPhase::Draining => "draining",
            WorkerPhase::Terminated => "terminated",
        }
    }
}

const NO_COMMIT: i64 = -1;

/// Counters written by the worker task and read by the reporter.
#[derive(Debug)]
pub struct WorkerState {
    phase: AtomicU8,
    messages: AtomicU64,
    bytes: AtomicU64,
    uploads: AtomicU64,
    committed_offset: AtomicI64,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            phase: AtomicU8::new(WorkerPhase::Connecting.as_u8()),
            messages: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            uploads: AtomicU64::new(0),
            committed_offset: AtomicI64::new(NO_COMMIT),
        }
    }
}

impl WorkerState {
    pub fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase.as_u8(), Ordering::Relaxed);
    }

    pub fn record_message(&self, bytes: u64) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn set_uploads(&self, uploads: u64) {
        self.uploads.store(uploads, Ordering::Relaxed);
    }

    pub fn set_committed(&self, offset: i64) {
        self.committed_offset.store(offset, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let committed = self.committed_offset.load(Ordering::Relaxed);
        WorkerSnapshot {
            phase: WorkerPhase::from_u8(self.phase.load(Ordering::Relaxed)),
            messages: self.messages.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            committed_offset: (committed != NO_COMMIT).then_some(committed),
        }
    }
}

/// Point-in-time copy of a worker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub phase: WorkerPhase,
    pub messages: u64,
    pub bytes: u64,
    pub uploads: u64,
    pub committed_offset: Option<i64>,
}

/// Read-only view of a worker, kept by the supervisor for reporting.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    topic: String,
    partition: i32,
    state: Arc<WorkerState>,
}

impl WorkerHandle {
    pub fn new(topic: impl Into<String>, partition: i32, state: Arc<WorkerState>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            state,
        }
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        self.state.snapshot()
    }
}

impl fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.snapshot();
        write!(
            f,
            "PartitionWorker(topic={}, partition={}, phase={}, messages={}, bytes={}, uploads={}",
            self.topic,
            self.partition,
            s.phase.as_str(),
            s.messages,
            s.bytes,
            s.uploads
        )?;
        match s.committed_offset {
            Some(offset) => write!(f, ", committed={offset})"),
            None => write!(f, ")"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_updates() {
        let state = WorkerState::default();
        assert_eq!(state.snapshot().phase, WorkerPhase::Connecting);
        assert_eq!(state.snapshot().committed_offset, None);

        state.set_phase(WorkerPhase::Consuming);
        state.record_message(10);
        state.record_message(5);
        state.set_uploads(1);
        state.set_committed(2);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.phase, WorkerPhase::Consuming);
        assert_eq!(snapshot.messages, 2);
        assert_eq!(snapshot.bytes, 15);
        assert_eq!(snapshot.uploads, 1);
        assert_eq!(snapshot.committed_offset, Some(2));
    }

    #[test]
    fn test_handle_display() {
        let state = Arc::new(WorkerState::default());
        state.record_message(3);
        let handle = WorkerHandle::new("events", 4, state);
        assert_eq!(
            handle.to_string(),
            "PartitionWorker(topic=events, partition=4, phase=connecting, messages=1, bytes=3, uploads=0)"
        );
    }
}
