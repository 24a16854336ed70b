//! Execution process records delivered on the attempt document stream

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Completed,
    Failed,
    Killed,
}

/// Why a process was started. Primary run kinds drive the aggregate
/// running flag; a dev server is auxiliary and never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunReason {
    SetupScript,
    CleanupScript,
    CodingAgent,
    DevServer,
}

impl RunReason {
    pub fn is_primary(&self) -> bool {
        matches!(
            self,
            RunReason::SetupScript | RunReason::CleanupScript | RunReason::CodingAgent
        )
    }
}

/// One process row as streamed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: Uuid,
    pub task_attempt_id: Uuid,
    pub run_reason: RunReason,
    pub status: ProcessStatus,
    pub exit_code: Option<i64>,
    /// Tombstone: excluded from the current history view but still present
    /// on the wire so consumers that want full history can keep it.
    #[serde(default)]
    pub dropped: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessRecord {
    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_reason_primary_split() {
        assert!(RunReason::CodingAgent.is_primary());
        assert!(RunReason::SetupScript.is_primary());
        assert!(RunReason::CleanupScript.is_primary());
        assert!(!RunReason::DevServer.is_primary());
    }

    #[test]
    fn record_roundtrip_preserves_tombstone() {
        let record = ProcessRecord {
            id: Uuid::new_v4(),
            task_attempt_id: Uuid::new_v4(),
            run_reason: RunReason::DevServer,
            status: ProcessStatus::Running,
            exit_code: None,
            dropped: true,
            started_at: Utc::now(),
            completed_at: None,
        };
        let json = serde_json::to_string(&record).expect("serialize");
        let reparsed: ProcessRecord = serde_json::from_str(&json).expect("deserialize");
        assert!(reparsed.dropped);
        assert_eq!(reparsed.run_reason, RunReason::DevServer);
    }

    #[test]
    fn dropped_defaults_to_false() {
        let raw = serde_json::json!({
            "id": Uuid::new_v4(),
            "task_attempt_id": Uuid::new_v4(),
            "run_reason": "codingagent",
            "status": "running",
            "exit_code": null,
            "started_at": Utc::now(),
        });
        let record: ProcessRecord = serde_json::from_value(raw).expect("deserialize");
        assert!(!record.dropped);
    }
}
