//! Subject-scoped entry buffer
//!
//! The store is exclusively owned by the actor that feeds it; readers get
//! lock-free snapshots through `ArcSwap`. A subject change resets the
//! buffer synchronously and bumps the generation; frames tagged with an
//! older generation are discarded silently, so nothing delivered late for
//! a previous subject can leak into the new sequence.

use std::sync::Arc;

use arc_swap::ArcSwap;
use downlink_protocol::{LogEntry, StreamFrame, Subject};
use tracing::debug;

use crate::error::ClientError;
use crate::reducer::{LogReducer, Reduction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawChannel {
    Stdout,
    Stderr,
}

/// One element of a subject's entry sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Typed payload with optional timestamp
    Normalized(LogEntry),
    /// Verbatim output chunk
    Raw {
        channel: RawChannel,
        content: String,
    },
}

impl Entry {
    pub fn as_normalized(&self) -> Option<&LogEntry> {
        match self {
            Entry::Normalized(entry) => Some(entry),
            Entry::Raw { .. } => None,
        }
    }
}

/// Immutable view of a store at one point in time.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub subject: Subject,
    pub generation: u64,
    pub entries: Arc<Vec<Entry>>,
    /// Set when the server delivered its terminator frame
    pub finished: bool,
}

impl EntrySnapshot {
    fn empty(subject: Subject, generation: u64) -> Self {
        Self {
            subject,
            generation,
            entries: Arc::new(Vec::new()),
            finished: false,
        }
    }
}

/// Ordered, subject-scoped buffer of entries with strict
/// reset-on-subject-change semantics.
pub struct EntryStore {
    subject: Subject,
    generation: u64,
    entries: Vec<Entry>,
    finished: bool,
    reducer: LogReducer,
    snapshot: Arc<ArcSwap<EntrySnapshot>>,
}

impl EntryStore {
    pub fn new(subject: Subject) -> Self {
        let snapshot = Arc::new(ArcSwap::from_pointee(EntrySnapshot::empty(subject, 1)));
        Self {
            subject,
            generation: 1,
            entries: Vec::new(),
            finished: false,
            reducer: LogReducer,
            snapshot,
        }
    }

    pub fn subject(&self) -> Subject {
        self.subject
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Lock-free snapshot handle for readers.
    pub fn snapshot_handle(&self) -> Arc<ArcSwap<EntrySnapshot>> {
        Arc::clone(&self.snapshot)
    }

    pub fn snapshot(&self) -> Arc<EntrySnapshot> {
        self.snapshot.load_full()
    }

    /// Retarget the store to a new subject. Empties the buffer and
    /// publishes the empty snapshot before returning, so no frame for the
    /// new subject can observe stale entries; the generation bump makes
    /// every in-flight frame for the old subject stale.
    pub fn reset(&mut self, subject: Subject) -> u64 {
        self.subject = subject;
        self.generation += 1;
        self.entries = Vec::new();
        self.finished = false;
        self.publish();
        self.generation
    }

    /// Drop buffered entries without changing subject or generation.
    /// A reconnected stream re-delivers its full history, so the buffer
    /// restarts empty to keep re-delivered frames from duplicating.
    pub fn clear_for_reopen(&mut self) {
        self.entries.clear();
        self.finished = false;
        self.publish();
    }

    /// Apply one frame attributed to `generation`. Stale generations are
    /// discarded silently; the error value exists for tests and callers
    /// that want the diagnostic, and must never be surfaced.
    pub fn accept(
        &mut self,
        generation: u64,
        frame: &StreamFrame,
    ) -> Result<Reduction, ClientError> {
        if generation != self.generation {
            debug!(
                component = "entry_store",
                event = "store.stale_frame_dropped",
                subject = %self.subject,
                frame_generation = generation,
                current_generation = self.generation,
                "Discarding frame for stale subject"
            );
            return Err(ClientError::StaleSubject {
                frame: generation,
                current: self.generation,
            });
        }

        let reduction = self.reducer.accept(&mut self.entries, frame);
        match &reduction {
            Reduction::Changed { .. } => self.publish(),
            Reduction::Finished => {
                self.finished = true;
                self.publish();
            }
            Reduction::None => {}
        }
        Ok(reduction)
    }

    // Copies the whole buffer; per-frame cost is linear in the entry
    // count. TODO: share the unchanged prefix if raw-log subjects grow
    // past tens of thousands of chunks.
    fn publish(&self) {
        self.snapshot.store(Arc::new(EntrySnapshot {
            subject: self.subject,
            generation: self.generation,
            entries: Arc::new(self.entries.clone()),
            finished: self.finished,
        }));
    }
}

/// Convenience over a snapshot: normalized entries only.
pub fn normalized_entries(snapshot: &EntrySnapshot) -> impl Iterator<Item = &LogEntry> {
    snapshot.entries.iter().filter_map(Entry::as_normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn entry_frame(index: usize, content: &str) -> StreamFrame {
        StreamFrame::JsonPatch(
            serde_json::from_value(json!([{
                "op": "add",
                "path": format!("/entries/{index}"),
                "value": {
                    "entry_type": { "type": "assistant_message" },
                    "content": content,
                },
            }]))
            .expect("valid patch"),
        )
    }

    #[test]
    fn reset_clears_synchronously_and_bumps_generation() {
        let subject_a = Subject::ProcessLogs(Uuid::new_v4());
        let subject_b = Subject::ProcessLogs(Uuid::new_v4());
        let mut store = EntryStore::new(subject_a);
        let gen_a = store.generation();

        store.accept(gen_a, &entry_frame(0, "from A")).unwrap();
        assert_eq!(store.snapshot().entries.len(), 1);

        let gen_b = store.reset(subject_b);
        assert!(gen_b > gen_a);
        let snap = store.snapshot();
        assert!(snap.entries.is_empty());
        assert_eq!(snap.subject, subject_b);
    }

    #[test]
    fn stale_generation_frame_never_lands() {
        let mut store = EntryStore::new(Subject::ProcessLogs(Uuid::new_v4()));
        let old_gen = store.generation();
        let new_gen = store.reset(Subject::ProcessLogs(Uuid::new_v4()));

        // Frame delivered late for the old subject
        let result = store.accept(old_gen, &entry_frame(0, "stale"));
        assert!(matches!(result, Err(ClientError::StaleSubject { .. })));
        assert!(store.snapshot().entries.is_empty());

        store.accept(new_gen, &entry_frame(0, "fresh")).unwrap();
        assert_eq!(store.snapshot().entries.len(), 1);
    }

    #[test]
    fn terminator_marks_snapshot_finished() {
        let mut store = EntryStore::new(Subject::ProcessLogs(Uuid::new_v4()));
        let generation = store.generation();
        store.accept(generation, &StreamFrame::Finished(true)).unwrap();
        assert!(store.snapshot().finished);
    }

    #[test]
    fn reopen_clear_keeps_generation() {
        let mut store = EntryStore::new(Subject::ProcessRaw(Uuid::new_v4()));
        let generation = store.generation();
        store
            .accept(generation, &StreamFrame::Stdout("partial".to_string()))
            .unwrap();

        store.clear_for_reopen();
        assert_eq!(store.generation(), generation);
        assert!(store.snapshot().entries.is_empty());

        // Re-delivered history after reconnect lands once
        store
            .accept(generation, &StreamFrame::Stdout("partial".to_string()))
            .unwrap();
        assert_eq!(store.snapshot().entries.len(), 1);
    }
}
