//! `downlink tail` - follow the normalized conversation log of a process.

use anyhow::bail;
use console::style;
use downlink_client::{
    ClientConfig, CloseReason, ConnectionState, Entry, LogStream, RawChannel,
};
use downlink_protocol::{EntryType, Subject};
use uuid::Uuid;

pub async fn run(config: ClientConfig, process_id: Uuid) -> anyhow::Result<()> {
    let stream = LogStream::open(config, Subject::ProcessLogs(process_id))?;
    follow(&stream).await
}

pub async fn follow(stream: &LogStream) -> anyhow::Result<()> {
    let mut revisions = stream.revisions();
    let mut state_rx = stream.connection_state();
    let mut printed = 0usize;

    loop {
        let snapshot = stream.snapshot();
        if snapshot.entries.len() < printed {
            // Reconnect re-delivers history from the start
            printed = 0;
            println!("{}", style("--- reconnected ---").dim());
        }
        for entry in snapshot.entries.iter().skip(printed) {
            print_entry(entry);
        }
        printed = snapshot.entries.len();
        if snapshot.finished {
            println!("{}", style("stream finished").dim());
            return Ok(());
        }

        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
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

fn print_entry(entry: &Entry) {
    match entry {
        Entry::Normalized(entry) => {
            let prefix = match &entry.entry_type {
                EntryType::UserMessage => style("user".to_string()).cyan(),
                EntryType::UserFeedback { denied_tool } => match denied_tool {
                    Some(tool) => style(format!("feedback (denied {tool})")).cyan(),
                    None => style("feedback".to_string()).cyan(),
                },
                EntryType::AssistantMessage => style("agent".to_string()).green(),
                EntryType::Thinking => style("thinking".to_string()).dim(),
                EntryType::ToolUse { tool_name, status } => {
                    style(format!("tool {tool_name} [{status:?}]")).yellow()
                }
                EntryType::SystemMessage => style("system".to_string()).dim(),
                EntryType::ErrorMessage => style("error".to_string()).red(),
                EntryType::ContextUsage { usage } => {
                    style(format!("context {:.1}%", usage.context_used_percent)).magenta()
                }
            };
            println!("{prefix} {}", entry.content);
        }
        Entry::Raw { channel, content } => match channel {
            RawChannel::Stdout => print!("{content}"),
            RawChannel::Stderr => print!("{}", style(content).red()),
        },
    }
}
