//! The typed session event set.
//!
//! Every `session.event` notification carries a payload whose `type` field
//! selects one of the variants below. The tag may arrive bare (`created`) or
//! namespaced (`session.created`); both dispatch identically. A payload whose
//! tag we do not recognize becomes [`SessionEvent::Unknown`] with the
//! original string and raw payload preserved, so no event is ever silently
//! discarded.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::CopilotError;

/// A terminal assistant message (not a streaming delta).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub content: String,
}

/// Token accounting attached to usage events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// One event in a session's stream.
///
/// The set is closed for matching but open for forward compatibility via
/// [`SessionEvent::Unknown`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    remote = "Self",
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum SessionEvent {
    // Session lifecycle.
    #[serde(rename = "created", alias = "start")]
    SessionStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_path: Option<String>,
    },
    #[serde(rename = "resumed", alias = "resume")]
    SessionResume {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    #[serde(rename = "idle")]
    SessionIdle {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    #[serde(rename = "shutdown")]
    SessionShutdown {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "error")]
    SessionError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fatal: Option<bool>,
    },
    #[serde(rename = "info")]
    SessionInfo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        message: String,
    },
    #[serde(rename = "warning")]
    SessionWarning {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        message: String,
    },
    TaskComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    // Session state.
    TitleChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        title: String,
    },
    ModelChange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        model: String,
    },
    ModeChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        mode: String,
    },
    PlanChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan: Option<String>,
    },
    Truncation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        messages_dropped: Option<u64>,
    },
    ContextChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        used_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u64>,
    },
    UsageInfo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(flatten)]
        usage: TokenUsage,
    },
    SnapshotRewind {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot_id: Option<String>,
    },
    Handoff {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    WorkspaceFileChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        change: Option<String>,
    },
    CompactionStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    CompactionComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens_before: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens_after: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
    },

    // Messages.
    AssistantMessage(AssistantMessage),
    AssistantMessageDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        delta: String,
    },
    AssistantStreamingDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        delta: String,
    },
    AssistantReasoning {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        content: String,
    },
    AssistantReasoningDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        delta: String,
    },
    AssistantIntent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        intent: String,
    },
    AssistantUsage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(flatten)]
        usage: TokenUsage,
    },
    TurnStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<String>,
    },
    TurnEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<String>,
    },
    UserMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        content: String,
    },
    PendingMessagesModified {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pending_count: Option<u64>,
    },
    SystemMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        content: String,
    },
    Abort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    // Tools.
    ToolUserRequested {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
    },
    ToolExecutionStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    ToolExecutionPartialResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    ToolExecutionProgress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ToolExecutionComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    // Skills and subagents.
    SkillInvoked {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        skill: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
    },
    SubagentStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        subagent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    SubagentCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        subagent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    SubagentFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        subagent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SubagentSelected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        name: String,
    },

    // Hooks.
    HookStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        hook: String,
    },
    HookEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        hook: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
    },

    /// Forward-compatibility fallback: an event whose `type` this build does
    /// not know. `event_type` keeps the original string (prefix included)
    /// and `payload` the untouched value.
    Unknown { event_type: String, payload: Value },
}

impl SessionEvent {
    /// Parses an event payload, stripping any `session.` namespace from the
    /// tag and falling back to [`SessionEvent::Unknown`].
    pub fn from_value(value: Value) -> SessionEvent {
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let normalized = event_type
            .strip_prefix("session.")
            .unwrap_or(&event_type)
            .to_string();

        let mut candidate = value.clone();
        if let Some(object) = candidate.as_object_mut() {
            object.insert("type".to_string(), Value::String(normalized));
        }

        match Self::deserialize(&candidate) {
            Ok(event) => event,
            Err(_) => SessionEvent::Unknown {
                event_type,
                payload: value,
            },
        }
    }

    /// Whether this is one of the session lifecycle events.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            SessionEvent::SessionStart { .. }
                | SessionEvent::SessionResume { .. }
                | SessionEvent::SessionIdle { .. }
                | SessionEvent::SessionShutdown { .. }
                | SessionEvent::SessionError { .. }
                | SessionEvent::SessionInfo { .. }
                | SessionEvent::SessionWarning { .. }
                | SessionEvent::TaskComplete { .. }
        )
    }

    /// Whether receiving this event terminates the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::SessionShutdown { .. })
    }
}

impl Serialize for SessionEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Unknown events serialize back to their original payload.
            SessionEvent::Unknown { payload, .. } => payload.serialize(serializer),
            other => Self::serialize(other, serializer),
        }
    }
}

impl<'de> Deserialize<'de> for SessionEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(SessionEvent::from_value(value))
    }
}

/// A `session.event` notification: the owning session id plus the event.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionNotification {
    pub session_id: String,
    pub event: SessionEvent,
}

impl SessionNotification {
    /// Parses notification params. The event payload is either the params
    /// object itself or nested under `event`.
    pub fn from_params(params: Value) -> Result<Self, CopilotError> {
        let session_id = params
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CopilotError::Protocol("session.event params missing sessionId".to_string())
            })?
            .to_string();

        let payload = match params.get("event") {
            Some(event) => event.clone(),
            None => params,
        };

        Ok(Self {
            session_id,
            event: SessionEvent::from_value(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_and_namespaced_tags_both_dispatch() {
        let bare = SessionEvent::from_value(json!({"type": "created"}));
        let namespaced = SessionEvent::from_value(json!({"type": "session.created"}));
        assert!(matches!(bare, SessionEvent::SessionStart { .. }));
        assert_eq!(bare, namespaced);

        let legacy = SessionEvent::from_value(json!({"type": "start"}));
        assert!(matches!(legacy, SessionEvent::SessionStart { .. }));
    }

    #[test]
    fn known_variants_round_trip() {
        let events = vec![
            SessionEvent::SessionStart {
                timestamp: Some("2026-01-01T00:00:00Z".into()),
                model: Some("gpt-5".into()),
                workspace_path: None,
            },
            SessionEvent::SessionIdle { timestamp: None },
            SessionEvent::AssistantMessage(AssistantMessage {
                timestamp: None,
                message_id: Some("m1".into()),
                content: "4".into(),
            }),
            SessionEvent::AssistantMessageDelta {
                timestamp: None,
                message_id: None,
                delta: "4".into(),
            },
            SessionEvent::ToolExecutionComplete {
                timestamp: None,
                tool_call_id: "t1".into(),
                success: Some(true),
                result: Some(json!({"ok": true})),
            },
            SessionEvent::UsageInfo {
                timestamp: None,
                usage: TokenUsage {
                    input_tokens: Some(10),
                    output_tokens: Some(3),
                    total_tokens: Some(13),
                },
            },
            SessionEvent::HookEnd {
                timestamp: None,
                hook: "preToolUse".into(),
                success: Some(true),
            },
            SessionEvent::SubagentFailed {
                timestamp: None,
                subagent_id: "sub-1".into(),
                error: Some("exploded".into()),
            },
        ];

        for event in events {
            let value = serde_json::to_value(&event).expect("serialize");
            let back: SessionEvent = serde_json::from_value(value).expect("deserialize");
            assert_eq!(back, event);
        }
    }

    #[test]
    fn wire_tags_are_camel_case() {
        let value = serde_json::to_value(SessionEvent::ToolExecutionStart {
            timestamp: None,
            tool_call_id: "t9".into(),
            name: Some("get_weather".into()),
        })
        .expect("serialize");
        assert_eq!(value["type"], "toolExecutionStart");
        assert_eq!(value["toolCallId"], "t9");
    }

    #[test]
    fn unknown_event_preserves_type_and_payload() {
        let payload = json!({"type": "session.holodeck", "gridRef": [1, 2]});
        let event = SessionEvent::from_value(payload.clone());
        match &event {
            SessionEvent::Unknown {
                event_type,
                payload: raw,
            } => {
                assert_eq!(event_type, "session.holodeck");
                assert_eq!(raw, &payload);
            }
            other => panic!("expected Unknown, got {other:?}"),
        }

        // Round trip: serializing an Unknown event re-emits the raw payload.
        assert_eq!(serde_json::to_value(&event).expect("serialize"), payload);
    }

    #[test]
    fn malformed_known_event_falls_back_to_unknown() {
        // Right tag, missing required field.
        let event = SessionEvent::from_value(json!({"type": "titleChanged"}));
        assert!(matches!(event, SessionEvent::Unknown { .. }));
    }

    #[test]
    fn lifecycle_classification() {
        assert!(SessionEvent::SessionIdle { timestamp: None }.is_lifecycle());
        assert!(SessionEvent::TaskComplete {
            timestamp: None,
            result: None
        }
        .is_lifecycle());
        assert!(!SessionEvent::TurnStart {
            timestamp: None,
            turn_id: None
        }
        .is_lifecycle());
        assert!(SessionEvent::SessionShutdown {
            timestamp: None,
            reason: None
        }
        .is_terminal());
    }

    #[test]
    fn notification_extracts_session_id() {
        let notification = SessionNotification::from_params(json!({
            "sessionId": "s1",
            "type": "idle",
        }))
        .expect("parse");
        assert_eq!(notification.session_id, "s1");
        assert_eq!(
            notification.event,
            SessionEvent::SessionIdle { timestamp: None }
        );

        let nested = SessionNotification::from_params(json!({
            "sessionId": "s2",
            "event": {"type": "modeChanged", "mode": "plan"},
        }))
        .expect("parse");
        assert_eq!(
            nested.event,
            SessionEvent::ModeChanged {
                timestamp: None,
                mode: "plan".into()
            }
        );

        assert!(SessionNotification::from_params(json!({"type": "idle"})).is_err());
    }
}
