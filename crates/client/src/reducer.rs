//! Patch reducers
//!
//! Two reductions share the same wire framing. `LogReducer` projects
//! entry-bearing operations out of a patch batch into an append-ordered
//! entry list; everything else in the batch is bookkeeping and filtered.
//! `DocumentReducer` applies whole batches to a generic JSON document
//! (atomically, in order) for subjects that are documents rather than
//! append-only logs.

use downlink_protocol::{LogEntry, StreamFrame};
use json_patch::{Patch, PatchOperation};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::store::{Entry, RawChannel};

const ENTRIES_PREFIX: &str = "/entries/";

/// Outcome of feeding one frame to a log reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    /// Entry list changed; indices that were appended or replaced
    Changed { touched: usize },
    /// Frame carried nothing relevant to the entry view
    None,
    /// Server-side terminator
    Finished,
}

/// Projects stream frames into a subject's entry sequence.
///
/// Application is strictly ordered: an add/replace at index `len` appends,
/// an index below `len` replaces in place (re-delivered frames after a
/// reconnect land here), and an index beyond `len` is a protocol error —
/// the operation is dropped with a diagnostic and the stream continues.
#[derive(Debug, Default)]
pub struct LogReducer;

impl LogReducer {
    /// Apply one frame to `entries`. Protocol errors inside a batch skip
    /// the offending operation only; they never poison the batch.
    pub fn accept(&self, entries: &mut Vec<Entry>, frame: &StreamFrame) -> Reduction {
        match frame {
            StreamFrame::JsonPatch(batch) => self.apply_batch(entries, batch),
            StreamFrame::Stdout(chunk) => {
                entries.push(Entry::Raw {
                    channel: RawChannel::Stdout,
                    content: chunk.clone(),
                });
                Reduction::Changed { touched: 1 }
            }
            StreamFrame::Stderr(chunk) => {
                entries.push(Entry::Raw {
                    channel: RawChannel::Stderr,
                    content: chunk.clone(),
                });
                Reduction::Changed { touched: 1 }
            }
            StreamFrame::Finished(_) => Reduction::Finished,
        }
    }

    fn apply_batch(&self, entries: &mut Vec<Entry>, batch: &Patch) -> Reduction {
        let mut touched = 0usize;
        for op in batch.0.iter() {
            match self.apply_op(entries, op) {
                Ok(true) => touched += 1,
                Ok(false) => {}
                Err(ClientError::Protocol(msg)) => {
                    warn!(
                        component = "log_reducer",
                        event = "reducer.op_dropped",
                        error = %msg,
                        "Dropping malformed patch operation"
                    );
                }
                Err(other) => {
                    warn!(
                        component = "log_reducer",
                        event = "reducer.op_dropped",
                        error = %other,
                        "Dropping patch operation"
                    );
                }
            }
        }
        if touched > 0 {
            Reduction::Changed { touched }
        } else {
            Reduction::None
        }
    }

    /// Returns Ok(true) when the operation changed the entry list.
    fn apply_op(&self, entries: &mut Vec<Entry>, op: &PatchOperation) -> Result<bool, ClientError> {
        let (path, value) = match op {
            PatchOperation::Add(add) => (add.path.to_string(), &add.value),
            PatchOperation::Replace(replace) => (replace.path.to_string(), &replace.value),
            // Removals and structural moves never reach the entry view
            other => {
                debug!(
                    component = "log_reducer",
                    event = "reducer.op_filtered",
                    op = ?other,
                    "Filtered non-entry operation"
                );
                return Ok(false);
            }
        };

        let Some(index) = parse_entry_index(&path) else {
            // Bookkeeping path (counters, cursors, whole-document resets)
            return Ok(false);
        };

        let entry: LogEntry = serde_json::from_value(value.clone()).map_err(|e| {
            ClientError::Protocol(format!("unrecognized entry payload at {path}: {e}"))
        })?;

        match index.cmp(&entries.len()) {
            std::cmp::Ordering::Less => {
                entries[index] = Entry::Normalized(entry);
                Ok(true)
            }
            std::cmp::Ordering::Equal => {
                entries.push(Entry::Normalized(entry));
                Ok(true)
            }
            std::cmp::Ordering::Greater => Err(ClientError::Protocol(format!(
                "out-of-order entry index {index} (have {})",
                entries.len()
            ))),
        }
    }
}

fn parse_entry_index(path: &str) -> Option<usize> {
    path.strip_prefix(ENTRIES_PREFIX)?.parse().ok()
}

/// Applies patch batches to a generic JSON document.
///
/// `json_patch::patch` is atomic: a failing batch leaves the document
/// untouched, which is what lets a malformed frame be dropped without
/// corrupting the view.
#[derive(Debug)]
pub struct DocumentReducer {
    document: Value,
}

impl Default for DocumentReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentReducer {
    pub fn new() -> Self {
        Self {
            document: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Apply one frame; returns true when the document changed.
    pub fn accept(&mut self, frame: &StreamFrame) -> Result<bool, ClientError> {
        match frame {
            StreamFrame::JsonPatch(batch) => {
                json_patch::patch(&mut self.document, &batch.0)
                    .map_err(|e| ClientError::Protocol(format!("patch failed: {e}")))?;
                Ok(true)
            }
            StreamFrame::Stdout(_) | StreamFrame::Stderr(_) => Err(ClientError::Protocol(
                "raw output frame on a document stream".to_string(),
            )),
            StreamFrame::Finished(_) => Ok(false),
        }
    }

    /// Clear the document back to an empty object (subject change).
    pub fn reset(&mut self) {
        self.document = Value::Object(serde_json::Map::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use downlink_protocol::EntryType;
    use serde_json::json;

    fn patch_frame(ops: Value) -> StreamFrame {
        StreamFrame::JsonPatch(serde_json::from_value(ops).expect("valid patch"))
    }

    fn entry_value(content: &str) -> Value {
        json!({
            "entry_type": { "type": "assistant_message" },
            "content": content,
        })
    }

    #[test]
    fn appends_in_order_and_replaces_in_place() {
        let reducer = LogReducer;
        let mut entries = Vec::new();

        let frame = patch_frame(json!([
            { "op": "add", "path": "/entries/0", "value": entry_value("first") },
            { "op": "add", "path": "/entries/1", "value": entry_value("second") },
        ]));
        assert_eq!(
            reducer.accept(&mut entries, &frame),
            Reduction::Changed { touched: 2 }
        );

        let frame = patch_frame(json!([
            { "op": "replace", "path": "/entries/0", "value": entry_value("first, edited") },
        ]));
        assert_eq!(
            reducer.accept(&mut entries, &frame),
            Reduction::Changed { touched: 1 }
        );
        assert_eq!(entries.len(), 2);
        match &entries[0] {
            Entry::Normalized(entry) => assert_eq!(entry.content, "first, edited"),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn out_of_order_index_is_dropped_not_misapplied() {
        let reducer = LogReducer;
        let mut entries = Vec::new();

        let frame = patch_frame(json!([
            { "op": "add", "path": "/entries/5", "value": entry_value("orphan") },
        ]));
        assert_eq!(reducer.accept(&mut entries, &frame), Reduction::None);
        assert!(entries.is_empty());
    }

    #[test]
    fn bookkeeping_ops_are_filtered() {
        let reducer = LogReducer;
        let mut entries = Vec::new();

        let frame = patch_frame(json!([
            { "op": "replace", "path": "/entry_count", "value": 7 },
            { "op": "remove", "path": "/entries/0" },
            { "op": "add", "path": "/entries/0", "value": entry_value("kept") },
        ]));
        assert_eq!(
            reducer.accept(&mut entries, &frame),
            Reduction::Changed { touched: 1 }
        );
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn malformed_entry_payload_skips_only_that_op() {
        let reducer = LogReducer;
        let mut entries = Vec::new();

        let frame = patch_frame(json!([
            { "op": "add", "path": "/entries/0", "value": { "bogus": true } },
            { "op": "add", "path": "/entries/0", "value": entry_value("valid") },
        ]));
        assert_eq!(
            reducer.accept(&mut entries, &frame),
            Reduction::Changed { touched: 1 }
        );
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn raw_chunks_append_with_channel() {
        let reducer = LogReducer;
        let mut entries = Vec::new();
        reducer.accept(&mut entries, &StreamFrame::Stdout("building...\n".to_string()));
        reducer.accept(&mut entries, &StreamFrame::Stderr("warning: x\n".to_string()));
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            entries[1],
            Entry::Raw {
                channel: RawChannel::Stderr,
                ..
            }
        ));
    }

    #[test]
    fn incremental_equals_batch_application() {
        // Associativity: applying N frames one at a time must equal
        // applying the concatenated operation list at once.
        let reducer = LogReducer;

        let ops: Vec<Value> = (0..6)
            .map(|i| json!({ "op": "add", "path": format!("/entries/{i}"), "value": entry_value(&format!("e{i}")) }))
            .collect();

        let mut incremental = Vec::new();
        for op in &ops {
            reducer.accept(&mut incremental, &patch_frame(json!([op])));
        }

        let mut batch = Vec::new();
        reducer.accept(&mut batch, &patch_frame(Value::Array(ops)));

        assert_eq!(incremental, batch);
        assert_eq!(incremental.len(), 6);
    }

    #[test]
    fn document_reducer_applies_and_resets() {
        let mut reducer = DocumentReducer::new();
        let frame = patch_frame(json!([
            { "op": "add", "path": "/execution_processes", "value": {} },
        ]));
        assert!(reducer.accept(&frame).unwrap());
        assert!(reducer.document()["execution_processes"].is_object());

        reducer.reset();
        assert_eq!(reducer.document(), &json!({}));
    }

    #[test]
    fn document_reducer_failed_batch_leaves_document_untouched() {
        let mut reducer = DocumentReducer::new();
        let seed = patch_frame(json!([
            { "op": "add", "path": "/a", "value": 1 },
        ]));
        reducer.accept(&seed).unwrap();

        let bad = patch_frame(json!([
            { "op": "replace", "path": "/missing/deep", "value": 2 },
        ]));
        assert!(reducer.accept(&bad).is_err());
        assert_eq!(reducer.document(), &json!({ "a": 1 }));
    }

    #[test]
    fn context_usage_entries_survive_projection() {
        let reducer = LogReducer;
        let mut entries = Vec::new();
        let frame = patch_frame(json!([
            { "op": "add", "path": "/entries/0", "value": {
                "entry_type": {
                    "type": "context_usage",
                    "usage": {
                        "input_tokens": 1000,
                        "output_tokens": 200,
                        "total_tokens": 1200,
                        "context_window_size": 200000,
                        "context_used_percent": 0.6,
                        "context_remaining": 198800,
                        "model": "claude-sonnet",
                        "warning_level": "none",
                        "is_estimated": false
                    }
                },
                "content": "",
            }},
        ]));
        reducer.accept(&mut entries, &frame);
        match &entries[0] {
            Entry::Normalized(entry) => {
                assert!(matches!(entry.entry_type, EntryType::ContextUsage { .. }))
            }
            other => panic!("unexpected entry: {other:?}"),
        }
    }
}
