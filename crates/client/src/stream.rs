//! Per-subject stream supervisors
//!
//! A `LogStream` (entry sequence) or `ProcessStream` (attempt document)
//! owns the whole chain for one subject: the reconnecting connection, the
//! reducer, the buffered state and its published snapshots. Each runs as
//! one actor task, so every transport callback for the subject is applied
//! serially in delivery order. Subject switches close the old connection
//! intentionally, reset the buffer synchronously, and rely on generation
//! tags to discard anything the old connection still had in flight.

use std::sync::Arc;

use arc_swap::ArcSwap;
use downlink_protocol::Subject;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::connection::{
    ConnectionEvent, ConnectionEventKind, ConnectionState, StreamConnection,
};
use crate::error::ClientError;
use crate::processes::ProcessSet;
use crate::reducer::{DocumentReducer, Reduction};
use crate::store::{EntrySnapshot, EntryStore};

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 256;

enum StreamCommand {
    SetSubject { subject: Subject, endpoint: Url },
}

/// Live entry sequence for one log-like subject.
pub struct LogStream {
    command_tx: mpsc::Sender<StreamCommand>,
    shutdown_tx: watch::Sender<bool>,
    snapshot: Arc<ArcSwap<EntrySnapshot>>,
    state_rx: watch::Receiver<ConnectionState>,
    revision_rx: watch::Receiver<u64>,
    config: ClientConfig,
}

impl LogStream {
    /// Activate a consumer for `subject`: opens the connection and starts
    /// accumulating entries immediately.
    pub fn open(config: ClientConfig, subject: Subject) -> Result<Self, ClientError> {
        let endpoint = config.ws_endpoint(&subject)?;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (revision_tx, revision_rx) = watch::channel(0u64);

        let store = EntryStore::new(subject);
        let snapshot = store.snapshot_handle();

        tokio::spawn(log_actor(
            config.clone(),
            store,
            endpoint,
            command_rx,
            shutdown_rx,
            state_tx,
            revision_tx,
        ));

        Ok(Self {
            command_tx,
            shutdown_tx,
            snapshot,
            state_rx,
            revision_rx,
            config,
        })
    }

    /// Retarget to another subject. The old connection is flagged
    /// intentional and closed, and the buffer is cleared before any frame
    /// of the new subject can land.
    pub async fn set_subject(&self, subject: Subject) -> Result<(), ClientError> {
        let endpoint = self.config.ws_endpoint(&subject)?;
        self.command_tx
            .send(StreamCommand::SetSubject { subject, endpoint })
            .await
            .map_err(|_| ClientError::Transport("stream actor gone".to_string()))
    }

    /// Lock-free snapshot of the current entry sequence.
    pub fn snapshot(&self) -> Arc<EntrySnapshot> {
        self.snapshot.load_full()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Bumped on every snapshot change; await `changed()` to follow along.
    pub fn revisions(&self) -> watch::Receiver<u64> {
        self.revision_rx.clone()
    }

    /// Intentional deactivation. Dropping the stream has the same effect.
    /// The signal is level triggered and cannot be lost to a busy command
    /// buffer.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn log_actor(
    config: ClientConfig,
    mut store: EntryStore,
    endpoint: Url,
    mut command_rx: mpsc::Receiver<StreamCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ConnectionState>,
    revision_tx: watch::Sender<u64>,
) {
    let (event_tx, mut event_rx) = mpsc::channel::<ConnectionEvent>(EVENT_BUFFER);
    let mut connection = Some(StreamConnection::open(
        endpoint,
        store.subject(),
        store.generation(),
        config.retry,
        event_tx.clone(),
    ));
    let mut revision = 0u64;

    loop {
        tokio::select! {
            // Shutdown outranks everything, then subject switches: the
            // reset must take effect before anything else is applied
            biased;

            _ = shutdown_rx.wait_for(|stop| *stop) => {
                if let Some(connection) = connection.take() {
                    connection.close();
                }
                return;
            }

            command = command_rx.recv() => match command {
                Some(StreamCommand::SetSubject { subject, endpoint }) => {
                    if let Some(old) = connection.take() {
                        old.close();
                    }
                    let generation = store.reset(subject);
                    revision += 1;
                    let _ = revision_tx.send(revision);
                    connection = Some(StreamConnection::open(
                        endpoint,
                        subject,
                        generation,
                        config.retry,
                        event_tx.clone(),
                    ));
                }
                None => {
                    if let Some(connection) = connection.take() {
                        connection.close();
                    }
                    return;
                }
            },

            event = event_rx.recv() => {
                let Some(event) = event else { return };
                if event.generation != store.generation() {
                    // Stale connection still draining; discard silently
                    debug!(
                        component = "log_stream",
                        event = "stream.stale_event_dropped",
                        subject = %event.subject,
                        "Dropping event from stale connection"
                    );
                    continue;
                }
                match event.kind {
                    ConnectionEventKind::State(state) => {
                        if state == ConnectionState::Open {
                            // Reconnects re-deliver history from the start
                            store.clear_for_reopen();
                            revision += 1;
                            let _ = revision_tx.send(revision);
                        }
                        let _ = state_tx.send(state);
                    }
                    ConnectionEventKind::Frame(frame) => {
                        match store.accept(event.generation, &frame) {
                            Ok(Reduction::Changed { .. }) | Ok(Reduction::Finished) => {
                                revision += 1;
                                let _ = revision_tx.send(revision);
                            }
                            Ok(Reduction::None) => {}
                            Err(e) => {
                                // Stale guard only; never surfaced
                                debug!(
                                    component = "log_stream",
                                    event = "stream.frame_discarded",
                                    error = %e,
                                    "Discarded frame"
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Live process view for one task attempt.
pub struct ProcessStream {
    command_tx: mpsc::Sender<StreamCommand>,
    shutdown_tx: watch::Sender<bool>,
    snapshot: Arc<ArcSwap<ProcessSet>>,
    state_rx: watch::Receiver<ConnectionState>,
    revision_rx: watch::Receiver<u64>,
    config: ClientConfig,
}

impl ProcessStream {
    pub fn open(config: ClientConfig, subject: Subject) -> Result<Self, ClientError> {
        let endpoint = config.ws_endpoint(&subject)?;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (revision_tx, revision_rx) = watch::channel(0u64);
        let snapshot = Arc::new(ArcSwap::from_pointee(ProcessSet::default()));

        tokio::spawn(process_actor(
            config.clone(),
            subject,
            endpoint,
            Arc::clone(&snapshot),
            command_rx,
            shutdown_rx,
            state_tx,
            revision_tx,
        ));

        Ok(Self {
            command_tx,
            shutdown_tx,
            snapshot,
            state_rx,
            revision_rx,
            config,
        })
    }

    pub async fn set_subject(&self, subject: Subject) -> Result<(), ClientError> {
        let endpoint = self.config.ws_endpoint(&subject)?;
        self.command_tx
            .send(StreamCommand::SetSubject { subject, endpoint })
            .await
            .map_err(|_| ClientError::Transport("stream actor gone".to_string()))
    }

    /// Current aggregated views (all / visible / by-id / running flag).
    pub fn snapshot(&self) -> Arc<ProcessSet> {
        self.snapshot.load_full()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn revisions(&self) -> watch::Receiver<u64> {
        self.revision_rx.clone()
    }

    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn process_actor(
    config: ClientConfig,
    mut subject: Subject,
    endpoint: Url,
    snapshot: Arc<ArcSwap<ProcessSet>>,
    mut command_rx: mpsc::Receiver<StreamCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ConnectionState>,
    revision_tx: watch::Sender<u64>,
) {
    let (event_tx, mut event_rx) = mpsc::channel::<ConnectionEvent>(EVENT_BUFFER);
    let mut generation: u64 = 1;
    let mut reducer = DocumentReducer::new();
    let mut connection = Some(StreamConnection::open(
        endpoint,
        subject,
        generation,
        config.retry,
        event_tx.clone(),
    ));
    let mut revision = 0u64;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.wait_for(|stop| *stop) => {
                if let Some(connection) = connection.take() {
                    connection.close();
                }
                return;
            }

            command = command_rx.recv() => match command {
                Some(StreamCommand::SetSubject { subject: next, endpoint }) => {
                    if let Some(old) = connection.take() {
                        old.close();
                    }
                    subject = next;
                    generation += 1;
                    reducer.reset();
                    snapshot.store(Arc::new(ProcessSet::default()));
                    revision += 1;
                    let _ = revision_tx.send(revision);
                    connection = Some(StreamConnection::open(
                        endpoint,
                        subject,
                        generation,
                        config.retry,
                        event_tx.clone(),
                    ));
                }
                None => {
                    if let Some(connection) = connection.take() {
                        connection.close();
                    }
                    return;
                }
            },

            event = event_rx.recv() => {
                let Some(event) = event else { return };
                if event.generation != generation {
                    continue;
                }
                match event.kind {
                    ConnectionEventKind::State(state) => {
                        if state == ConnectionState::Open {
                            reducer.reset();
                        }
                        let _ = state_tx.send(state);
                    }
                    ConnectionEventKind::Frame(frame) => match reducer.accept(&frame) {
                        Ok(true) => {
                            match ProcessSet::from_document(&subject, reducer.document()) {
                                Ok(set) => {
                                    snapshot.store(Arc::new(set));
                                    revision += 1;
                                    let _ = revision_tx.send(revision);
                                }
                                Err(e) => {
                                    warn!(
                                        component = "process_stream",
                                        event = "stream.aggregate_failed",
                                        subject = %subject,
                                        error = %e,
                                        "Process aggregation failed"
                                    );
                                }
                            }
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(
                                component = "process_stream",
                                event = "stream.frame_dropped",
                                subject = %subject,
                                error = %e,
                                "Dropping bad document frame"
                            );
                        }
                    },
                }
            }
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl Drop for ProcessStream {
    fn drop(&mut self) {
        self.close();
    }
}
