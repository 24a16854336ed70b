//! Terminal channel framing
//!
//! The interactive terminal uses a framing of its own, independent of the
//! patch protocol: raw binary frames both ways for I/O, plus one JSON
//! control frame shape sent client → server.

use serde::{Deserialize, Serialize};

/// Connection parameters sent as query parameters when the terminal
/// socket is opened. The remote shell is sized once at spawn, so the
/// geometry must be known before the connection is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalParams {
    pub cols: u16,
    pub rows: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl TerminalParams {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Query string for the terminal endpoint, with cwd percent-encoded.
    pub fn query_string(&self) -> String {
        let mut query = format!("cols={}&rows={}", self.cols, self.rows);
        if let Some(cwd) = &self.cwd {
            query.push_str("&cwd=");
            query.push_str(&urlencoding::encode(cwd));
        }
        query
    }
}

/// Control frames sent client → server as JSON text messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalControl {
    Resize { cols: u16, rows: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_wire_shape() {
        let json =
            serde_json::to_string(&TerminalControl::Resize { cols: 120, rows: 40 }).expect("serialize");
        assert_eq!(json, r#"{"type":"resize","cols":120,"rows":40}"#);
    }

    #[test]
    fn query_string_encodes_cwd() {
        let params = TerminalParams::new(80, 24).with_cwd("/tmp/my project");
        assert_eq!(params.query_string(), "cols=80&rows=24&cwd=%2Ftmp%2Fmy%20project");
    }
}
