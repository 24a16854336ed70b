//! `downlink status` - derived view of one attempt: running flag, idle
//! countdown and context-window usage of its latest agent process.

use std::time::Duration;

use anyhow::bail;
use chrono::Utc;
use console::style;
use downlink_client::{
    ClientConfig, CloseReason, ConnectionState, DerivedSnapshot, IdleTimer, LogStream,
    ProcessStream,
};
use downlink_protocol::{RunReason, Subject};
use uuid::Uuid;

pub async fn run(
    config: ClientConfig,
    attempt_id: Uuid,
    process: Option<Uuid>,
    watch: bool,
) -> anyhow::Result<()> {
    let processes = ProcessStream::open(config.clone(), Subject::Attempt(attempt_id))?;
    let mut process_revisions = processes.revisions();
    let mut state_rx = processes.connection_state();

    // Wait for the first aggregated document before picking a process
    loop {
        tokio::select! {
            changed = process_revisions.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                break;
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

    let process_id = match process {
        Some(id) => id,
        None => {
            let set = processes.snapshot();
            let Some(agent) = set
                .visible
                .iter()
                .filter(|record| record.run_reason == RunReason::CodingAgent)
                .last()
            else {
                bail!("attempt {attempt_id} has no agent process");
            };
            agent.id
        }
    };

    let logs = LogStream::open(config.clone(), Subject::ProcessLogs(process_id))?;
    let mut log_revisions = logs.revisions();
    let timer = IdleTimer::new(config.idle_timeout);
    // The tick only redraws; the countdown itself is recomputed from the
    // baseline each pass
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        let derived = DerivedSnapshot::compute(
            &logs.snapshot(),
            &processes.snapshot(),
            &timer,
            Utc::now(),
        );
        render(process_id, &derived);
        if !watch {
            return Ok(());
        }

        tokio::select! {
            _ = ticker.tick() => {}
            changed = log_revisions.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            changed = process_revisions.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

fn render(process_id: Uuid, derived: &DerivedSnapshot) {
    let running = if derived.running {
        style("running").green()
    } else {
        style("not running").dim()
    };
    println!("process {process_id}: {running}");

    match derived.idle_time_left {
        Some(left) => println!("idle timeout in {}s", left.as_secs()),
        None => println!("idle countdown not started"),
    }

    match &derived.context_usage {
        Some(usage) => {
            let percent = format!("{:.1}%", usage.context_used_percent);
            let styled = match usage.warning_level {
                downlink_protocol::ContextWarningLevel::Critical => style(percent).red(),
                downlink_protocol::ContextWarningLevel::Approaching => style(percent).yellow(),
                downlink_protocol::ContextWarningLevel::None => style(percent).green(),
            };
            println!(
                "context: {styled} of {} ({} tokens, {})",
                usage.context_window_size, usage.total_tokens, usage.model
            );
        }
        None => println!("context: no usage reported"),
    }
}
