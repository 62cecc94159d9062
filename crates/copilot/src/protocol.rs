//! JSON-RPC method names and typed payloads of the ACP surface.
//!
//! Reply structs default every optional field so newer agents can add keys
//! without breaking hosts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Handshake issued by [`CopilotClient::start`](crate::CopilotClient::start).
pub const METHOD_PING: &str = "ping";
pub const METHOD_STATUS: &str = "status";
pub const METHOD_AUTH_STATUS: &str = "auth.status";
pub const METHOD_MODELS_LIST: &str = "models.list";
pub const METHOD_TOOLS_LIST: &str = "tools.list";
pub const METHOD_ACCOUNT_QUOTA: &str = "account.quota";
pub const METHOD_SESSIONS_LIST: &str = "sessions.list";
pub const METHOD_SESSIONS_DELETE: &str = "sessions.delete";
pub const METHOD_AGENTS_LIST: &str = "agents.list";
pub const METHOD_AGENTS_CURRENT: &str = "agents.current";
pub const METHOD_AGENTS_SELECT: &str = "agents.select";
pub const METHOD_AGENTS_DESELECT: &str = "agents.deselect";
pub const METHOD_SESSION_CREATE: &str = "session.create";
pub const METHOD_SESSION_RESUME: &str = "session.resume";
pub const METHOD_SESSION_START: &str = "session.start";
pub const METHOD_SESSION_SEND_MESSAGE: &str = "session.sendMessage";
pub const METHOD_SESSION_ABORT: &str = "session.abort";
pub const METHOD_SESSION_DESTROY: &str = "session.destroy";
pub const METHOD_SESSION_COMPACT: &str = "session.compact";
pub const METHOD_SESSION_GET_MODEL: &str = "session.getModel";
pub const METHOD_SESSION_SWITCH_MODEL: &str = "session.switchModel";
pub const METHOD_SESSION_SET_MODE: &str = "session.setMode";
pub const METHOD_SESSION_READ_PLAN: &str = "session.readPlan";
pub const METHOD_SESSION_UPDATE_PLAN: &str = "session.updatePlan";
pub const METHOD_SESSION_LIST_WORKSPACE_FILES: &str = "session.listWorkspaceFiles";
pub const METHOD_SESSION_READ_WORKSPACE_FILE: &str = "session.readWorkspaceFile";
pub const METHOD_SESSION_START_FLEET: &str = "session.startFleet";
pub const METHOD_CLIENT_FORCE_STOP: &str = "client.forceStop";
pub const METHOD_CLIENT_GET_LAST_SESSION_ID: &str = "client.getLastSessionId";
pub const METHOD_CLIENT_GET_FOREGROUND_SESSION_ID: &str = "client.getForegroundSessionId";
pub const METHOD_CLIENT_SET_FOREGROUND_SESSION_ID: &str = "client.setForegroundSessionId";

/// Notification channel carrying every session event.
pub const METHOD_SESSION_EVENT: &str = "session.event";

/// Server-to-client request methods.
pub const METHOD_TOOL_EXECUTE: &str = "tool.execute";
pub const METHOD_PERMISSION_REQUEST: &str = "permission.request";
pub const METHOD_USER_INPUT_REQUEST: &str = "userInput.request";
/// Hook requests arrive as `hook.<kind>`, e.g. `hook.preToolUse`.
pub const HOOK_METHOD_PREFIX: &str = "hook.";

/// JSON-RPC reserved code: no handler registered for the method.
pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;
/// Application error code used for handler failures.
pub const ERROR_APPLICATION: i64 = -32000;

/// Process exit codes for applications wrapping the SDK.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_RUNTIME_ERROR: i32 = 1;
pub const EXIT_BAD_USAGE: i32 = 64;

/// Result of the `status` RPC.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub protocol_version: Option<i64>,
}

/// Result of the `auth.status` RPC. The SDK only observes authentication;
/// logging in belongs to the CLI itself.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
}

/// One entry of the `models.list` result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub default: Option<bool>,
}

/// One entry of the `tools.list` result: a tool the agent itself offers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One named quota bucket of the `account.quota` result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    #[serde(default)]
    pub entitlement: Option<f64>,
    #[serde(default)]
    pub remaining: Option<f64>,
    #[serde(default)]
    pub percent_remaining: Option<f64>,
    #[serde(default)]
    pub unlimited: bool,
}

/// Result of the `account.quota` RPC.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountQuota {
    #[serde(default)]
    pub quota_snapshots: BTreeMap<String, QuotaSnapshot>,
    #[serde(default)]
    pub quota_reset_date: Option<String>,
}

/// One entry of the `sessions.list` result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_id: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// One entry of the `agents.list` result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Result of `session.create` and `session.resume`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: String,
    #[serde(default)]
    pub workspace_path: Option<String>,
}

/// Result of `session.compact`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub tokens_before: Option<u64>,
    #[serde(default)]
    pub tokens_after: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of `session.readPlan`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanContents {
    #[serde(default)]
    pub plan: Option<String>,
}

/// One entry of the `session.listWorkspaceFiles` result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceFileEntry {
    pub path: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Result of `session.readWorkspaceFile`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceFileContents {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

/// One agent slot of a [`FleetConfig`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetAgentSpec {
    pub name: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Params of `session.startFleet`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub agents: Vec<FleetAgentSpec>,
}

/// Result of `session.startFleet`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStarted {
    #[serde(default)]
    pub fleet_id: Option<String>,
    #[serde(default)]
    pub agent_count: Option<u64>,
}

/// Helper for results that wrap a lone session id, e.g.
/// `client.getLastSessionId`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdResult {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Pulls a typed value out of an RPC `result`.
pub(crate) fn from_result<T: for<'de> Deserialize<'de>>(
    value: Value,
) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

/// Lifts `{"models": [...]}`-style results to the inner list, tolerating
/// agents that return the bare list.
pub(crate) fn unwrap_list(result: Value, key: &str) -> Value {
    match result.get(key) {
        Some(list) => list.clone(),
        None => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_structs_tolerate_missing_optional_fields() {
        let status: ServerStatus = serde_json::from_value(json!({})).expect("status");
        assert!(status.version.is_none());

        let auth: AuthStatus =
            serde_json::from_value(json!({"authenticated": true})).expect("auth");
        assert!(auth.authenticated);
        assert!(auth.login.is_none());

        let quota: AccountQuota = serde_json::from_value(json!({
            "quotaSnapshots": {"chat": {"remaining": 10.0, "unlimited": false}}
        }))
        .expect("quota");
        assert_eq!(
            quota.quota_snapshots.get("chat").and_then(|q| q.remaining),
            Some(10.0)
        );
    }

    #[test]
    fn fleet_config_serializes_camel_case() {
        let config = FleetConfig {
            name: Some("review".into()),
            agents: vec![FleetAgentSpec {
                name: "critic".into(),
                prompt: "review the diff".into(),
                model: None,
            }],
        };
        let value = serde_json::to_value(&config).expect("serialize");
        assert_eq!(value["agents"][0]["name"], "critic");
        assert!(value["agents"][0].get("model").is_none());
    }
}
