//! `downlink processes` - execution processes of one task attempt.

use anyhow::bail;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use console::style;
use downlink_client::{
    ClientConfig, CloseReason, ConnectionState, ProcessSet, ProcessStream,
};
use downlink_protocol::{ProcessRecord, Subject};
use uuid::Uuid;

pub async fn run(
    config: ClientConfig,
    attempt_id: Uuid,
    all: bool,
    watch: bool,
) -> anyhow::Result<()> {
    let stream = ProcessStream::open(config, Subject::Attempt(attempt_id))?;
    let mut revisions = stream.revisions();
    let mut state_rx = stream.connection_state();

    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                render(&stream.snapshot(), all);
                if !watch {
                    return Ok(());
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                if let ConnectionState::Closed { reason } = *state_rx.borrow() {
                    match reason {
                        CloseReason::Finished | CloseReason::Deactivated => return Ok(()),
                        CloseReason::RetriesExhausted { attempts } => {
                            bail!("connection lost after {attempts} reconnect attempts")
                        }
                    }
                }
            }
        }
    }
}

fn render(set: &ProcessSet, all: bool) {
    let flag = if set.running {
        style("running").green()
    } else {
        style("not running").dim()
    };
    println!("attempt: {flag}");

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["ID", "KIND", "STATUS", "EXIT", "STARTED", "COMPLETED"]);
    let records: &[ProcessRecord] = if all { &set.all } else { &set.visible };
    for record in records {
        table.add_row([
            record.id.to_string(),
            format!("{:?}", record.run_reason),
            format!("{:?}", record.status),
            record
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.started_at.to_rfc3339(),
            record
                .completed_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    println!("{table}");
}
