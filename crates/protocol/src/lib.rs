//! Downlink Protocol
//!
//! Shared types for the streaming subscriptions a Downlink client consumes.
//! Frames are serialized as JSON over WebSocket; terminal I/O additionally
//! uses raw binary frames.

use uuid::Uuid;

pub mod entries;
pub mod frames;
pub mod processes;
pub mod subject;
pub mod terminal;

pub use entries::{ContextUsage, ContextWarningLevel, EntryType, LogEntry, ToolStatus};
pub use frames::StreamFrame;
pub use processes::{ProcessRecord, ProcessStatus, RunReason};
pub use subject::Subject;
pub use terminal::{TerminalControl, TerminalParams};

/// Generate a new unique ID
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}
