//! Normalized conversation entries carried inside patch frames

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized entry in an execution's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub entry_type: EntryType,
    pub content: String,
}

/// Discriminated entry kind. Consumers match exhaustively; adding a kind
/// is a compile-time decision, never a silent fallthrough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryType {
    UserMessage,
    UserFeedback {
        #[serde(skip_serializing_if = "Option::is_none")]
        denied_tool: Option<String>,
    },
    AssistantMessage,
    Thinking,
    ToolUse {
        tool_name: String,
        status: ToolStatus,
    },
    SystemMessage,
    ErrorMessage,
    ContextUsage {
        usage: ContextUsage,
    },
}

impl EntryType {
    /// True for entry kinds that represent human activity on the run.
    /// These (and only these) advance the idle baseline.
    pub fn is_user_activity(&self) -> bool {
        matches!(
            self,
            EntryType::UserMessage | EntryType::UserFeedback { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Created,
    Success,
    Failed,
}

/// Context-window consumption reported by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub context_window_size: u64,
    pub context_used_percent: f64,
    pub context_remaining: u64,
    pub model: String,
    pub warning_level: ContextWarningLevel,
    pub is_estimated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextWarningLevel {
    None,
    Approaching,
    Critical,
}

impl ContextUsage {
    /// Build a usage record from raw token counts.
    pub fn from_tokens(
        input_tokens: u64,
        output_tokens: u64,
        context_window_size: u64,
        model: impl Into<String>,
    ) -> Self {
        let total_tokens = input_tokens + output_tokens;
        let context_used_percent = if context_window_size > 0 {
            (total_tokens as f64 / context_window_size as f64) * 100.0
        } else {
            0.0
        };
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
            context_window_size,
            context_used_percent,
            context_remaining: context_window_size.saturating_sub(total_tokens),
            model: model.into(),
            warning_level: warning_level_for(context_used_percent),
            is_estimated: false,
        }
    }
}

/// Warning thresholds: 70% of the window is approaching, 85% is critical.
pub fn warning_level_for(percent: f64) -> ContextWarningLevel {
    if percent >= 85.0 {
        ContextWarningLevel::Critical
    } else if percent >= 70.0 {
        ContextWarningLevel::Approaching
    } else {
        ContextWarningLevel::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_type_wire_tag() {
        let entry = LogEntry {
            timestamp: None,
            entry_type: EntryType::ToolUse {
                tool_name: "bash".to_string(),
                status: ToolStatus::Success,
            },
            content: "ls -la".to_string(),
        };
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["entry_type"]["type"], "tool_use");
        assert_eq!(json["entry_type"]["tool_name"], "bash");
    }

    #[test]
    fn user_activity_excludes_agent_entries() {
        assert!(EntryType::UserMessage.is_user_activity());
        assert!(EntryType::UserFeedback { denied_tool: None }.is_user_activity());
        assert!(!EntryType::AssistantMessage.is_user_activity());
        assert!(!EntryType::ToolUse {
            tool_name: "edit".to_string(),
            status: ToolStatus::Created,
        }
        .is_user_activity());
    }

    #[test]
    fn usage_warning_levels() {
        assert_eq!(warning_level_for(50.0), ContextWarningLevel::None);
        assert_eq!(warning_level_for(70.0), ContextWarningLevel::Approaching);
        assert_eq!(warning_level_for(85.0), ContextWarningLevel::Critical);

        let usage = ContextUsage::from_tokens(150_000, 30_000, 200_000, "claude-sonnet");
        assert_eq!(usage.total_tokens, 180_000);
        assert_eq!(usage.context_remaining, 20_000);
        assert_eq!(usage.warning_level, ContextWarningLevel::Critical);
    }
}
