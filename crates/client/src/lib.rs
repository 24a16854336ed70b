//! Downlink client engine
//!
//! Client-side sync engine for live monitoring streams: reconnecting
//! WebSocket connections with exponential backoff, ordered patch
//! reduction into entry sequences and attempt documents, derived
//! idle/context/running state, and an interactive terminal channel.
//! Consumers read lock-free snapshots and follow revision watches;
//! all mutation happens inside per-subject actor tasks.

pub mod config;
pub mod connection;
pub mod derived;
pub mod error;
pub mod processes;
pub mod reducer;
pub mod registry;
pub mod store;
pub mod stream;
pub mod terminal;

pub use config::{ClientConfig, RetryPolicy, DEFAULT_IDLE_TIMEOUT};
pub use connection::{
    CloseReason, ConnectionEvent, ConnectionEventKind, ConnectionState, StreamConnection,
};
pub use derived::{latest_context_usage, latest_user_activity, DerivedSnapshot, IdleTimer};
pub use error::ClientError;
pub use processes::ProcessSet;
pub use reducer::{DocumentReducer, LogReducer, Reduction};
pub use registry::{StreamLease, StreamRegistry};
pub use store::{Entry, EntrySnapshot, EntryStore, RawChannel};
pub use stream::{LogStream, ProcessStream};
pub use terminal::{TerminalChannel, TerminalDisplay};
