//! Interactive terminal channel
//!
//! A duplex channel with its own framing, independent of the patch
//! protocol: binary frames both ways for I/O, one JSON control frame for
//! resize. The remote shell is sized once at spawn, so activation fits
//! the local display *first* and only then opens the transport with that
//! geometry. Rendering stays behind the `TerminalDisplay` seam.

use bytes::Bytes;
use downlink_protocol::{TerminalControl, TerminalParams};
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

const CLOSED_MARKER: &str = "\r\n[connection closed]\r\n";
const ERROR_MARKER: &str = "\r\n[connection error]\r\n";
const COMMAND_BUFFER: usize = 64;

/// Seam to the glyph renderer. `fit` measures the container and returns
/// None when it is hidden or has zero size.
pub trait TerminalDisplay: Send + 'static {
    fn fit(&mut self) -> Option<(u16, u16)>;
    fn write_output(&mut self, bytes: &[u8]);
    fn show_marker(&mut self, text: &str);
}

enum TerminalCommand {
    Input(Bytes),
    SetVisible(bool),
    Resize,
}

/// Handle to a live terminal channel.
pub struct TerminalChannel {
    command_tx: mpsc::Sender<TerminalCommand>,
    shutdown_tx: watch::Sender<bool>,
}

impl TerminalChannel {
    /// Activate: fit the display, then connect using that geometry.
    /// `on_close` fires when the server side goes away; it does not fire
    /// for a caller-initiated close.
    pub fn activate(
        config: ClientConfig,
        cwd: Option<String>,
        display: Box<dyn TerminalDisplay>,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(terminal_actor(
            config,
            cwd,
            display,
            Box::new(on_close),
            command_rx,
            shutdown_rx,
        ));
        Self {
            command_tx,
            shutdown_tx,
        }
    }

    /// Keystrokes, sent verbatim as one binary frame.
    pub async fn send_input(&self, bytes: impl Into<Bytes>) -> Result<(), ClientError> {
        self.command_tx
            .send(TerminalCommand::Input(bytes.into()))
            .await
            .map_err(|_| ClientError::Transport("terminal channel gone".to_string()))
    }

    /// The owning surface was shown or hidden. Resizes requested while
    /// hidden are held back; one coalesced resize goes out when the
    /// surface becomes visible again.
    pub async fn set_visible(&self, visible: bool) -> Result<(), ClientError> {
        self.command_tx
            .send(TerminalCommand::SetVisible(visible))
            .await
            .map_err(|_| ClientError::Transport("terminal channel gone".to_string()))
    }

    /// The container changed size; refit and notify the remote shell.
    pub async fn request_resize(&self) -> Result<(), ClientError> {
        self.command_tx
            .send(TerminalCommand::Resize)
            .await
            .map_err(|_| ClientError::Transport("terminal channel gone".to_string()))
    }

    /// Caller-initiated close; the close callback does not fire. Level
    /// triggered, so it cannot be lost to a busy command buffer.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for TerminalChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn terminal_actor(
    config: ClientConfig,
    cwd: Option<String>,
    mut display: Box<dyn TerminalDisplay>,
    on_close: Box<dyn FnOnce() + Send>,
    mut command_rx: mpsc::Receiver<TerminalCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut on_close = Some(on_close);

    // Geometry first: the remote shell is sized once at spawn
    let (cols, rows) = display.fit().unwrap_or((DEFAULT_COLS, DEFAULT_ROWS));
    let mut params = TerminalParams::new(cols, rows);
    if let Some(cwd) = cwd {
        params = params.with_cwd(cwd);
    }

    let endpoint = match config.terminal_endpoint(&params) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!(
                component = "terminal_channel",
                event = "terminal.endpoint_invalid",
                error = %e,
                "Cannot derive terminal endpoint"
            );
            display.show_marker(CLOSED_MARKER);
            notify_close(&mut on_close);
            return;
        }
    };

    let connect = tokio::select! {
        _ = shutdown_rx.wait_for(|stop| *stop) => return,
        result = connect_async(endpoint.as_str()) => result,
    };
    let mut ws = match connect {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!(
                component = "terminal_channel",
                event = "terminal.connect_failed",
                error = %e,
                "Terminal connect failed"
            );
            display.show_marker(CLOSED_MARKER);
            notify_close(&mut on_close);
            return;
        }
    };

    let mut visible = true;
    let mut pending_resize = false;

    loop {
        tokio::select! {
            biased;

            _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => {
                let _ = ws.close(None).await;
                return;
            }

            command = command_rx.recv() => match command {
                Some(TerminalCommand::Input(bytes)) => {
                    if ws.send(Message::Binary(bytes)).await.is_err() {
                        display.show_marker(CLOSED_MARKER);
                        notify_close(&mut on_close);
                        return;
                    }
                }
                Some(TerminalCommand::SetVisible(now_visible)) => {
                    let was_visible = visible;
                    visible = now_visible;
                    if now_visible && !was_visible && pending_resize {
                        pending_resize = false;
                        send_resize(&mut ws, display.as_mut()).await;
                    }
                }
                Some(TerminalCommand::Resize) => {
                    if visible {
                        send_resize(&mut ws, display.as_mut()).await;
                    } else {
                        // Hidden container reports zero dimensions;
                        // hold the request until the surface is back
                        pending_resize = true;
                    }
                }
                None => {
                    let _ = ws.close(None).await;
                    return;
                }
            },

            message = ws.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    display.write_output(&data);
                }
                Some(Ok(Message::Text(text))) => {
                    display.write_output(text.as_str().as_bytes());
                }
                Some(Ok(Message::Close(_))) | None => {
                    display.show_marker(CLOSED_MARKER);
                    notify_close(&mut on_close);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    // A transport error is shown but never ends the
                    // channel; only a close frame or stream end does
                    warn!(
                        component = "terminal_channel",
                        event = "terminal.transport_error",
                        error = %e,
                        "Terminal transport error"
                    );
                    display.show_marker(ERROR_MARKER);
                }
            }
        }
    }
}

async fn send_resize<S>(ws: &mut S, display: &mut dyn TerminalDisplay)
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let Some((cols, rows)) = display.fit() else {
        debug!(
            component = "terminal_channel",
            event = "terminal.resize_skipped",
            "Display reports no geometry, resize skipped"
        );
        return;
    };
    let control = TerminalControl::Resize { cols, rows };
    match serde_json::to_string(&control) {
        Ok(json) => {
            if ws.send(Message::Text(json.into())).await.is_err() {
                warn!(
                    component = "terminal_channel",
                    event = "terminal.resize_send_failed",
                    "Resize control frame not delivered"
                );
            }
        }
        Err(e) => {
            warn!(
                component = "terminal_channel",
                event = "terminal.resize_encode_failed",
                error = %e,
                "Resize control frame not encodable"
            );
        }
    }
}

fn notify_close(on_close: &mut Option<Box<dyn FnOnce() + Send>>) {
    if let Some(callback) = on_close.take() {
        callback();
    }
}
