//! Stream connection — one reconnecting transport per logical subject
//!
//! Owns the WebSocket for a single subject and runs as an independent
//! tokio task. Everything it observes — state changes and decoded frames —
//! is emitted in order on one mpsc channel, so the consumer applies
//! transport callbacks serially. Events carry the generation the
//! connection was opened with; a consumer that has since moved to another
//! subject discards them by generation without any shared mutable state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use downlink_protocol::{StreamFrame, Subject};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RetryPolicy;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Observable lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Retrying { attempt: u32, next_retry: Instant },
    Closed { reason: CloseReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Server terminator frame or clean close code
    Finished,
    /// Local intentional close (subject switch or consumer deactivation)
    Deactivated,
    /// Attempt ceiling reached; surfaced exactly once
    RetriesExhausted { attempts: u32 },
}

/// One ordered event from a connection task.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub subject: Subject,
    pub generation: u64,
    pub kind: ConnectionEventKind,
}

#[derive(Debug, Clone)]
pub enum ConnectionEventKind {
    State(ConnectionState),
    Frame(StreamFrame),
}

/// Handle to a running connection task.
///
/// Dropping the handle closes intentionally: the flag is set before the
/// socket is torn down, so the retry logic can never observe the teardown
/// as an abnormal close.
pub struct StreamConnection {
    subject: Subject,
    generation: u64,
    intentional: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
}

impl StreamConnection {
    /// Spawn the connection task for `subject`, tagging every event with
    /// `generation`.
    pub fn open(
        endpoint: Url,
        subject: Subject,
        generation: u64,
        retry: RetryPolicy,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let intentional = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(connection_loop(
            endpoint,
            subject,
            generation,
            retry,
            events,
            Arc::clone(&intentional),
            shutdown_rx,
        ));

        Self {
            subject,
            generation,
            intentional,
            shutdown_tx,
        }
    }

    pub fn subject(&self) -> Subject {
        self.subject
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Close intentionally. Safe to call more than once. The intentional
    /// flag is raised before the signal so no retry can fire, and the
    /// signal is level triggered: a close issued before the task has even
    /// polled once still lands.
    pub fn close(&self) {
        self.intentional.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
    }
}

struct Emitter {
    subject: Subject,
    generation: u64,
    events: mpsc::Sender<ConnectionEvent>,
}

impl Emitter {
    /// Returns false when the consumer is gone.
    async fn emit(&self, kind: ConnectionEventKind) -> bool {
        self.events
            .send(ConnectionEvent {
                subject: self.subject,
                generation: self.generation,
                kind,
            })
            .await
            .is_ok()
    }

    async fn state(&self, state: ConnectionState) -> bool {
        self.emit(ConnectionEventKind::State(state)).await
    }
}

enum ReadOutcome {
    /// Terminator frame or clean close code
    Finished,
    /// Local shutdown or consumer gone
    Shutdown,
    /// Abnormal close; retry candidate
    Lost(String),
}

async fn connection_loop(
    endpoint: Url,
    subject: Subject,
    generation: u64,
    retry: RetryPolicy,
    events: mpsc::Sender<ConnectionEvent>,
    intentional: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let emitter = Emitter {
        subject,
        generation,
        events,
    };
    let mut attempt: u32 = 0;

    loop {
        if !emitter.state(ConnectionState::Connecting).await {
            return;
        }

        let connect = tokio::select! {
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                emitter
                    .state(ConnectionState::Closed { reason: CloseReason::Deactivated })
                    .await;
                return;
            }
            result = connect_async(endpoint.as_str()) => result,
        };

        match connect {
            Ok((mut ws, _response)) => {
                // Any successful open resets the retry counter
                attempt = 0;
                info!(
                    component = "stream_connection",
                    event = "connection.opened",
                    subject = %subject,
                    "Stream connection open"
                );
                if !emitter.state(ConnectionState::Open).await {
                    let _ = ws.close(None).await;
                    return;
                }

                match read_frames(&mut ws, &emitter, &mut shutdown).await {
                    ReadOutcome::Finished => {
                        // Server ended the stream; an intentional close,
                        // not a failure
                        intentional.store(true, Ordering::SeqCst);
                        let _ = ws.close(None).await;
                        emitter
                            .state(ConnectionState::Closed { reason: CloseReason::Finished })
                            .await;
                        return;
                    }
                    ReadOutcome::Shutdown => {
                        let _ = ws.close(None).await;
                        emitter
                            .state(ConnectionState::Closed { reason: CloseReason::Deactivated })
                            .await;
                        return;
                    }
                    ReadOutcome::Lost(reason) => {
                        warn!(
                            component = "stream_connection",
                            event = "connection.lost",
                            subject = %subject,
                            reason = %reason,
                            "Stream connection lost"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(
                    component = "stream_connection",
                    event = "connection.connect_failed",
                    subject = %subject,
                    error = %e,
                    "Stream connect failed"
                );
            }
        }

        if intentional.load(Ordering::SeqCst) {
            emitter
                .state(ConnectionState::Closed { reason: CloseReason::Deactivated })
                .await;
            return;
        }

        attempt += 1;
        if attempt > retry.max_attempts {
            emitter
                .state(ConnectionState::Closed {
                    reason: CloseReason::RetriesExhausted {
                        attempts: retry.max_attempts,
                    },
                })
                .await;
            return;
        }

        let delay = retry.delay_for(attempt);
        let next_retry = Instant::now() + delay;
        debug!(
            component = "stream_connection",
            event = "connection.retry_scheduled",
            subject = %subject,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        if !emitter
            .state(ConnectionState::Retrying {
                attempt,
                next_retry,
            })
            .await
        {
            return;
        }

        tokio::select! {
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                emitter
                    .state(ConnectionState::Closed { reason: CloseReason::Deactivated })
                    .await;
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn read_frames(
    ws: &mut WsStream,
    emitter: &Emitter,
    shutdown: &mut watch::Receiver<bool>,
) -> ReadOutcome {
    loop {
        let message = tokio::select! {
            // Level triggered: a close issued between polls is still seen
            _ = shutdown.wait_for(|stop| *stop) => return ReadOutcome::Shutdown,
            message = ws.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<StreamFrame>(text.as_str()) {
                    Ok(frame) => {
                        let terminator = frame.is_terminator();
                        if !emitter.emit(ConnectionEventKind::Frame(frame)).await {
                            return ReadOutcome::Shutdown;
                        }
                        if terminator {
                            return ReadOutcome::Finished;
                        }
                    }
                    // One bad frame never kills the stream
                    Err(e) => {
                        warn!(
                            component = "stream_connection",
                            event = "connection.frame_dropped",
                            subject = %emitter.subject,
                            error = %e,
                            payload_bytes = text.len(),
                            "Dropping unparseable frame"
                        );
                    }
                }
            }
            Some(Ok(Message::Binary(payload))) => {
                warn!(
                    component = "stream_connection",
                    event = "connection.frame_dropped",
                    subject = %emitter.subject,
                    payload_bytes = payload.len(),
                    "Dropping unexpected binary frame"
                );
            }
            Some(Ok(Message::Close(close_frame))) => {
                let clean = close_frame
                    .as_ref()
                    .map(|frame| frame.code == CloseCode::Normal || frame.code == CloseCode::Away)
                    .unwrap_or(false);
                if clean {
                    return ReadOutcome::Finished;
                }
                let reason = close_frame
                    .map(|frame| format!("close code {}", frame.code))
                    .unwrap_or_else(|| "close without code".to_string());
                return ReadOutcome::Lost(reason);
            }
            // Pings are answered by the protocol layer on next read/write
            Some(Ok(_)) => {}
            Some(Err(e)) => return ReadOutcome::Lost(e.to_string()),
            None => return ReadOutcome::Lost("socket ended".to_string()),
        }
    }
}
