//! Lifecycle hooks: named extension points at which the agent invites the
//! client to observe or mutate an operation.

use std::{path::PathBuf, sync::Arc};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::PermissionDecision;

/// The hook kinds the agent can invoke, as `hook.<kind>` requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HookKind {
    PreToolUse,
    PostToolUse,
    UserPromptSubmitted,
    SessionStart,
    SessionEnd,
    ErrorOccurred,
}

impl HookKind {
    pub const ALL: [HookKind; 6] = [
        HookKind::PreToolUse,
        HookKind::PostToolUse,
        HookKind::UserPromptSubmitted,
        HookKind::SessionStart,
        HookKind::SessionEnd,
        HookKind::ErrorOccurred,
    ];

    /// The wire name of the kind, as it appears after the `hook.` prefix.
    pub fn wire_name(&self) -> &'static str {
        match self {
            HookKind::PreToolUse => "preToolUse",
            HookKind::PostToolUse => "postToolUse",
            HookKind::UserPromptSubmitted => "userPromptSubmitted",
            HookKind::SessionStart => "sessionStart",
            HookKind::SessionEnd => "sessionEnd",
            HookKind::ErrorOccurred => "errorOccurred",
        }
    }

    /// The full JSON-RPC method name, e.g. `hook.preToolUse`.
    pub fn method(&self) -> String {
        format!("{}{}", crate::protocol::HOOK_METHOD_PREFIX, self.wire_name())
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.wire_name() == name)
    }
}

/// Input handed to every hook handler. Kind-specific fields are populated
/// when present on the wire; `timestamp` and `cwd` always accompany them.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookInput {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What a hook handler may change. Field names match the wire exactly:
/// `modifiedArgs`, `modifiedResult`, `modifiedPrompt`, `permissionDecision`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<PermissionDecision>,
}

impl HookOutput {
    /// Folds handler outputs in registration order: the last writer wins for
    /// every scalar, while `additional_context` concatenates.
    pub fn merge(outputs: impl IntoIterator<Item = HookOutput>) -> HookOutput {
        let mut merged = HookOutput::default();
        for output in outputs {
            if output.modified_args.is_some() {
                merged.modified_args = output.modified_args;
            }
            if output.modified_result.is_some() {
                merged.modified_result = output.modified_result;
            }
            if output.modified_prompt.is_some() {
                merged.modified_prompt = output.modified_prompt;
            }
            if let Some(context) = output.additional_context {
                merged.additional_context = Some(match merged.additional_context.take() {
                    Some(existing) => format!("{existing}\n{context}"),
                    None => context,
                });
            }
            if output.suppress_output.is_some() {
                merged.suppress_output = output.suppress_output;
            }
            if output.permission_decision.is_some() {
                merged.permission_decision = output.permission_decision;
            }
        }
        merged
    }
}

/// Async hook handler. Multiple handlers per kind run in registration order.
pub type HookHandler = Arc<dyn Fn(HookInput) -> BoxFuture<'static, HookOutput> + Send + Sync>;

/// Wraps a closure into a [`HookHandler`].
pub fn hook_handler<F, Fut>(handler: F) -> HookHandler
where
    F: Fn(HookInput) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = HookOutput> + Send + 'static,
{
    Arc::new(move |input| Box::pin(handler(input)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names_round_trip() {
        for kind in HookKind::ALL {
            assert_eq!(HookKind::from_wire_name(kind.wire_name()), Some(kind));
        }
        assert_eq!(HookKind::PreToolUse.method(), "hook.preToolUse");
        assert!(HookKind::from_wire_name("afterEverything").is_none());
    }

    #[test]
    fn merge_is_last_writer_wins_for_scalars() {
        let first = HookOutput {
            modified_args: Some(json!({"a": 1})),
            permission_decision: Some(PermissionDecision::Allow),
            ..HookOutput::default()
        };
        let second = HookOutput {
            permission_decision: Some(PermissionDecision::Deny),
            ..HookOutput::default()
        };

        let merged = HookOutput::merge([first, second]);
        assert_eq!(merged.modified_args, Some(json!({"a": 1})));
        assert_eq!(merged.permission_decision, Some(PermissionDecision::Deny));
    }

    #[test]
    fn merge_concatenates_additional_context() {
        let outputs = [
            HookOutput {
                additional_context: Some("first".into()),
                ..HookOutput::default()
            },
            HookOutput::default(),
            HookOutput {
                additional_context: Some("second".into()),
                ..HookOutput::default()
            },
        ];
        let merged = HookOutput::merge(outputs);
        assert_eq!(merged.additional_context.as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn output_serializes_wire_field_names() {
        let output = HookOutput {
            modified_prompt: Some("redacted".into()),
            permission_decision: Some(PermissionDecision::Allow),
            ..HookOutput::default()
        };
        let value = serde_json::to_value(&output).expect("serialize");
        assert_eq!(
            value,
            json!({"modifiedPrompt": "redacted", "permissionDecision": "allow"})
        );
    }

    #[test]
    fn input_parses_timestamp_and_cwd() {
        let input: HookInput = serde_json::from_value(json!({
            "sessionId": "s1",
            "timestamp": "2026-01-01T00:00:00Z",
            "cwd": "/workspace",
            "toolName": "bash",
        }))
        .expect("parse");
        assert_eq!(input.cwd, Some(PathBuf::from("/workspace")));
        assert_eq!(input.tool_name.as_deref(), Some("bash"));
    }
}
