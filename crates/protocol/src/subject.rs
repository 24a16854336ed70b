//! Subject — the identity a stream is scoped to

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one logical stream. Every frame a connection delivers is
/// attributed to exactly one subject; switching subjects invalidates all
/// in-flight frames for the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Subject {
    /// Execution-process document stream for one task attempt
    Attempt(Uuid),
    /// Normalized log stream for one execution process
    ProcessLogs(Uuid),
    /// Raw stdout/stderr stream for one execution process
    ProcessRaw(Uuid),
    /// Generic patched document (e.g. a draft or scratch record)
    Document(Uuid),
}

impl Subject {
    /// WebSocket path for this subject, relative to the server origin.
    pub fn ws_path(&self) -> String {
        match self {
            Subject::Attempt(id) => {
                format!("/api/execution-processes/stream/ws?task_attempt_id={id}")
            }
            Subject::ProcessLogs(id) => {
                format!("/api/execution-processes/{id}/normalized-logs/ws")
            }
            Subject::ProcessRaw(id) => format!("/api/execution-processes/{id}/raw-logs/ws"),
            Subject::Document(id) => format!("/api/documents/{id}/stream/ws"),
        }
    }

    /// The underlying record id, regardless of scope.
    pub fn id(&self) -> Uuid {
        match self {
            Subject::Attempt(id)
            | Subject::ProcessLogs(id)
            | Subject::ProcessRaw(id)
            | Subject::Document(id) => *id,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Attempt(id) => write!(f, "attempt/{id}"),
            Subject::ProcessLogs(id) => write!(f, "process-logs/{id}"),
            Subject::ProcessRaw(id) => write!(f, "process-raw/{id}"),
            Subject::Document(id) => write!(f, "document/{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_path_embeds_record_id() {
        let id = Uuid::new_v4();
        let path = Subject::ProcessLogs(id).ws_path();
        assert_eq!(
            path,
            format!("/api/execution-processes/{id}/normalized-logs/ws")
        );
    }

    #[test]
    fn subjects_with_same_id_but_different_scope_are_distinct() {
        let id = Uuid::new_v4();
        assert_ne!(Subject::ProcessLogs(id), Subject::ProcessRaw(id));
    }
}
