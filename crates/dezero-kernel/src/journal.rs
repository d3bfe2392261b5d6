//! Bounded journal of recent lifecycle events, served by `get_logs`.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use tracing::warn;

use dezero_payload::PayloadEvent;

/// Events kept by the journal.
pub const JOURNAL_CAPACITY: usize = 64;

/// One journaled event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    /// Milliseconds since boot when the event was collected.
    pub uptime_ms: u64,
    /// The event.
    #[serde(flatten)]
    pub event: PayloadEvent,
}

struct JournalState {
    rx: broadcast::Receiver<PayloadEvent>,
    entries: VecDeque<JournalEntry>,
    dropped: u64,
}

/// Ring of the last [`JOURNAL_CAPACITY`] events.
///
/// Events are pulled from the manager's broadcast channel whenever the
/// journal is collected, so a caller always sees everything published
/// before its read.
pub struct EventJournal {
    state: Mutex<JournalState>,
    booted: Instant,
}

impl EventJournal {
    /// Journal fed by `rx`, timestamping relative to `booted`.
    #[must_use]
    pub fn new(rx: broadcast::Receiver<PayloadEvent>, booted: Instant) -> Self {
        Self {
            state: Mutex::new(JournalState {
                rx,
                entries: VecDeque::with_capacity(JOURNAL_CAPACITY),
                dropped: 0,
            }),
            booted,
        }
    }

    /// Pull pending events into the ring. Returns how many were added.
    pub async fn collect(&self) -> usize {
        let mut state = self.state.lock().await;
        let mut added = 0_usize;
        loop {
            match state.rx.try_recv() {
                Ok(event) => {
                    let uptime_ms =
                        u64::try_from(self.booted.elapsed().as_millis()).unwrap_or(u64::MAX);
                    if state.entries.len() >= JOURNAL_CAPACITY {
                        state.entries.pop_front();
                    }
                    state.entries.push_back(JournalEntry { uptime_ms, event });
                    added = added.saturating_add(1);
                },
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Event journal lagged");
                    state.dropped = state.dropped.saturating_add(missed);
                },
                Err(_) => break,
            }
        }
        added
    }

    /// The newest `limit` entries, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<JournalEntry> {
        self.collect().await;
        let state = self.state.lock().await;
        let skip = state.entries.len().saturating_sub(limit);
        state.entries.iter().skip(skip).cloned().collect()
    }

    /// Events lost because the journal fell behind the channel.
    pub async fn dropped(&self) -> u64 {
        self.state.lock().await.dropped
    }
}

impl std::fmt::Debug for EventJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventJournal").finish_non_exhaustive()
    }
}
