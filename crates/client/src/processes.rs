//! Execution-state aggregation
//!
//! Merges the raw process records of one attempt into the views consumers
//! actually read: everything (history included), the visible subset with
//! tombstoned records removed, a by-id index, and the aggregate running
//! flag. Only primary run kinds (agent, setup script, cleanup script)
//! drive the running flag; a dev server keeps spinning without making the
//! attempt "running".

use std::collections::HashMap;

use downlink_protocol::{ProcessRecord, Subject};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::ClientError;

const PROCESSES_KEY: &str = "execution_processes";

#[derive(Debug, Clone, Default)]
pub struct ProcessSet {
    /// Every record on the wire, dropped ones included, ordered by start time
    pub all: Vec<ProcessRecord>,
    /// Records not tombstoned, same ordering
    pub visible: Vec<ProcessRecord>,
    pub by_id: HashMap<Uuid, ProcessRecord>,
    /// True iff a visible primary-kind record is running
    pub running: bool,
}

impl ProcessSet {
    pub fn from_records(mut records: Vec<ProcessRecord>) -> Self {
        records.sort_by_key(|record| record.started_at);

        let by_id = records
            .iter()
            .map(|record| (record.id, record.clone()))
            .collect();
        let visible: Vec<ProcessRecord> = records
            .iter()
            .filter(|record| !record.dropped)
            .cloned()
            .collect();
        let running = visible
            .iter()
            .any(|record| record.is_running() && record.run_reason.is_primary());

        Self {
            all: records,
            visible,
            by_id,
            running,
        }
    }

    /// Build from the attempt's patched document. Records that fail to
    /// parse are skipped with a diagnostic; a half-written record must not
    /// hide the rest of the attempt.
    pub fn from_document(subject: &Subject, document: &Value) -> Result<Self, ClientError> {
        let Some(map) = document.get(PROCESSES_KEY) else {
            return Ok(Self::default());
        };
        let map = map.as_object().ok_or_else(|| {
            ClientError::Protocol(format!("{PROCESSES_KEY} is not an object"))
        })?;

        let mut records = Vec::with_capacity(map.len());
        for (key, value) in map {
            match serde_json::from_value::<ProcessRecord>(value.clone()) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        component = "process_set",
                        event = "processes.record_skipped",
                        subject = %subject,
                        record_id = %key,
                        error = %e,
                        "Skipping unparseable process record"
                    );
                }
            }
        }
        Ok(Self::from_records(records))
    }

    pub fn get(&self, id: &Uuid) -> Option<&ProcessRecord> {
        self.by_id.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use downlink_protocol::{ProcessStatus, RunReason};
    use serde_json::json;

    fn record(run_reason: RunReason, status: ProcessStatus, dropped: bool) -> ProcessRecord {
        ProcessRecord {
            id: Uuid::new_v4(),
            task_attempt_id: Uuid::new_v4(),
            run_reason,
            status,
            exit_code: None,
            dropped,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn dev_server_alone_never_sets_running() {
        let set = ProcessSet::from_records(vec![
            record(RunReason::DevServer, ProcessStatus::Running, false),
            record(RunReason::CodingAgent, ProcessStatus::Completed, false),
        ]);
        assert!(!set.running);
    }

    #[test]
    fn primary_kind_running_sets_flag() {
        for reason in [
            RunReason::CodingAgent,
            RunReason::SetupScript,
            RunReason::CleanupScript,
        ] {
            let set = ProcessSet::from_records(vec![record(
                reason,
                ProcessStatus::Running,
                false,
            )]);
            assert!(set.running, "{reason:?} should count as running");
        }
    }

    #[test]
    fn dropped_records_stay_in_all_but_not_visible() {
        let kept = record(RunReason::CodingAgent, ProcessStatus::Completed, false);
        let tombstoned = record(RunReason::CodingAgent, ProcessStatus::Running, true);
        let set = ProcessSet::from_records(vec![kept.clone(), tombstoned.clone()]);

        assert_eq!(set.all.len(), 2);
        assert_eq!(set.visible.len(), 1);
        assert_eq!(set.visible[0].id, kept.id);
        // A dropped running agent is logical absence for the flag too
        assert!(!set.running);
        // ...but history consumers can still index it
        assert!(set.get(&tombstoned.id).is_some());
    }

    #[test]
    fn ordering_follows_start_time() {
        let now = Utc::now();
        let mut older = record(RunReason::SetupScript, ProcessStatus::Completed, false);
        older.started_at = now - TimeDelta::seconds(60);
        let mut newer = record(RunReason::CodingAgent, ProcessStatus::Running, false);
        newer.started_at = now;

        let set = ProcessSet::from_records(vec![newer.clone(), older.clone()]);
        assert_eq!(set.all[0].id, older.id);
        assert_eq!(set.all[1].id, newer.id);
    }

    #[test]
    fn from_document_skips_bad_records() {
        let good = record(RunReason::CodingAgent, ProcessStatus::Running, false);
        let mut map = serde_json::Map::new();
        map.insert(
            good.id.to_string(),
            serde_json::to_value(&good).unwrap(),
        );
        map.insert("broken".to_string(), json!({ "status": "running" }));
        let doc = json!({ "execution_processes": map });
        let subject = Subject::Attempt(good.task_attempt_id);
        let set = ProcessSet::from_document(&subject, &doc).unwrap();
        assert_eq!(set.all.len(), 1);
        assert!(set.running);
    }

    #[test]
    fn missing_map_is_empty_set() {
        let subject = Subject::Attempt(Uuid::new_v4());
        let set = ProcessSet::from_document(&subject, &json!({})).unwrap();
        assert!(set.all.is_empty());
        assert!(!set.running);
    }
}
