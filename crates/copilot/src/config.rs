//! Session configuration: what a host declares when creating or resuming an
//! agent session, plus the message options used when sending into one.

use std::{collections::BTreeMap, collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    hooks::{HookHandler, HookKind},
    tools::{PermissionHandler, Tool, UserInputHandler},
};

/// How an MCP server is reached. Serialized untagged: the variants are
/// discriminated by their fields (`command` vs `url`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    Local {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    Remote {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

/// Compaction policy for sessions that should never run out of context.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfiniteSessionConfig {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_compaction: Option<bool>,
}

/// How environment variable values in MCP server configs are transmitted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvValueMode {
    /// Values are sent verbatim.
    Inline,
    /// Values are replaced with references the agent resolves locally.
    Redacted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
    Xhigh,
}

/// Azure-specific provider settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureProviderConfig {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
}

/// Bring-your-own-key provider settings.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wire_api: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureProviderConfig>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("wire_api", &self.wire_api)
            .field("azure", &self.azure)
            .finish()
    }
}

/// Everything a host can declare when creating a session.
///
/// Handlers registered here (tools, hooks, permission, user input) determine
/// the capability flags sent with `session.create`; the agent only issues
/// the corresponding server-to-client requests when the flag was declared.
#[derive(Clone)]
pub struct SessionConfig {
    pub model: Option<String>,
    pub mode: Option<String>,
    pub workspace_path: Option<PathBuf>,
    /// Extra system instructions appended to the agent's prompt.
    pub instructions: Option<String>,
    /// Custom tools the host executes on the agent's behalf.
    pub tools: Vec<Tool>,
    /// Agent-side tools to enable; everything else stays available when unset.
    pub available_tools: Option<Vec<String>>,
    pub excluded_tools: Option<Vec<String>>,
    pub allow_all_tools: Option<bool>,
    pub hooks: HashMap<HookKind, Vec<HookHandler>>,
    pub on_permission_request: Option<PermissionHandler>,
    pub on_user_input_request: Option<UserInputHandler>,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    pub infinite_sessions: Option<InfiniteSessionConfig>,
    pub env_value_mode: Option<EnvValueMode>,
    pub provider_config: Option<ProviderConfig>,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Issue `session.start` immediately after `session.create`.
    pub auto_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            model: None,
            mode: None,
            workspace_path: None,
            instructions: None,
            tools: Vec::new(),
            available_tools: None,
            excluded_tools: None,
            allow_all_tools: None,
            hooks: HashMap::new(),
            on_permission_request: None,
            on_user_input_request: None,
            mcp_servers: BTreeMap::new(),
            infinite_sessions: None,
            env_value_mode: None,
            provider_config: None,
            reasoning_effort: None,
            auto_start: true,
        }
    }

    /// The `session.create` params, capability flags included.
    pub(crate) fn create_params(&self) -> Value {
        let mut params = Map::new();
        insert_opt(&mut params, "model", &self.model);
        insert_opt(&mut params, "mode", &self.mode);
        insert_opt(&mut params, "workspacePath", &self.workspace_path);
        insert_opt(&mut params, "instructions", &self.instructions);
        if !self.tools.is_empty() {
            let descriptors: Vec<Value> = self.tools.iter().map(Tool::descriptor).collect();
            params.insert("tools".into(), Value::Array(descriptors));
        }
        insert_opt(&mut params, "availableTools", &self.available_tools);
        insert_opt(&mut params, "excludedTools", &self.excluded_tools);
        insert_opt(&mut params, "allowAllTools", &self.allow_all_tools);
        if !self.mcp_servers.is_empty() {
            params.insert(
                "mcpServers".into(),
                serde_json::to_value(&self.mcp_servers).unwrap_or(Value::Null),
            );
        }
        insert_opt(&mut params, "infiniteSessions", &self.infinite_sessions);
        insert_opt(&mut params, "providerConfig", &self.provider_config);
        insert_opt(&mut params, "reasoningEffort", &self.reasoning_effort);
        insert_opt(&mut params, "envValueMode", &self.env_value_mode);
        params.insert("capabilities".into(), self.capabilities());
        Value::Object(params)
    }

    /// Capability flags computed from the populated registries, never from
    /// static defaults.
    fn capabilities(&self) -> Value {
        let hooks: Vec<&str> = HookKind::ALL
            .iter()
            .filter(|kind| self.hooks.get(*kind).is_some_and(|list| !list.is_empty()))
            .map(|kind| kind.wire_name())
            .collect();

        let mut capabilities = Map::new();
        capabilities.insert(
            "requestPermission".into(),
            json!(self.on_permission_request.is_some()),
        );
        capabilities.insert(
            "requestUserInput".into(),
            json!(self.on_user_input_request.is_some()),
        );
        capabilities.insert("hooks".into(), json!(hooks));
        if let Some(mode) = &self.env_value_mode {
            capabilities.insert("envValueMode".into(), json!(mode));
        }
        Value::Object(capabilities)
    }

    pub fn register_hook(&mut self, kind: HookKind, handler: HookHandler) {
        self.hooks.entry(kind).or_default().push(handler);
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("model", &self.model)
            .field("mode", &self.mode)
            .field("workspace_path", &self.workspace_path)
            .field("tools", &self.tools.len())
            .field("hooks", &self.hooks.values().map(Vec::len).sum::<usize>())
            .field("on_permission_request", &self.on_permission_request.is_some())
            .field("on_user_input_request", &self.on_user_input_request.is_some())
            .field("mcp_servers", &self.mcp_servers.keys().collect::<Vec<_>>())
            .field("auto_start", &self.auto_start)
            .finish()
    }
}

/// Configuration for resuming a previously created session. Every field of
/// the create-side config is forwarded, not only the id.
#[derive(Clone, Debug)]
pub struct ResumeSessionConfig {
    pub session_id: String,
    pub config: SessionConfig,
}

impl ResumeSessionConfig {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            config: SessionConfig::new(),
        }
    }

    pub fn with_config(session_id: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            session_id: session_id.into(),
            config,
        }
    }

    pub(crate) fn resume_params(&self) -> Value {
        let mut params = match self.config.create_params() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        params.insert("sessionId".into(), json!(self.session_id));
        Value::Object(params)
    }
}

/// Delivery mode of a user message.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageMode {
    /// Queue behind whatever the agent is doing.
    #[default]
    Enqueue,
    /// Interrupt the current turn.
    Immediate,
}

/// A resource attached to a user message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Attachment {
    File {
        path: PathBuf,
    },
    Directory {
        path: PathBuf,
    },
    /// A selected range. Positions are line/character pairs, zero-based.
    Selection {
        path: PathBuf,
        start_line: u32,
        start_character: u32,
        end_line: u32,
        end_character: u32,
    },
}

/// Options accompanying [`Session::send`](crate::Session::send).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageOptions {
    pub mode: MessageMode,
    pub attachments: Vec<Attachment>,
}

impl MessageOptions {
    pub fn immediate() -> Self {
        Self {
            mode: MessageMode::Immediate,
            attachments: Vec::new(),
        }
    }
}

fn insert_opt<T: Serialize>(params: &mut Map<String, Value>, key: &str, value: &Option<T>) {
    if let Some(value) = value {
        if let Ok(value) = serde_json::to_value(value) {
            params.insert(key.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;
    use serde_json::json;

    #[test]
    fn mcp_servers_serialize_as_an_object_keyed_by_name() {
        let mut servers = BTreeMap::new();
        servers.insert(
            "files".to_string(),
            McpServerConfig::Local {
                command: "mcp-files".into(),
                args: vec!["--root".into(), "/tmp".into()],
                env: BTreeMap::new(),
            },
        );
        servers.insert(
            "search".to_string(),
            McpServerConfig::Remote {
                url: "https://mcp.example.com".into(),
                headers: BTreeMap::new(),
            },
        );

        let value = serde_json::to_value(&servers).expect("serialize");
        assert!(value.is_object());
        assert_eq!(value["files"]["command"], "mcp-files");
        assert_eq!(value["search"]["url"], "https://mcp.example.com");
    }

    #[test]
    fn mcp_server_variants_deserialize_by_shape() {
        let local: McpServerConfig =
            serde_json::from_value(json!({"command": "mcp-files"})).expect("local");
        assert!(matches!(local, McpServerConfig::Local { .. }));

        let remote: McpServerConfig =
            serde_json::from_value(json!({"url": "wss://example.com"})).expect("remote");
        assert!(matches!(remote, McpServerConfig::Remote { .. }));
    }

    #[test]
    fn message_mode_serializes_exact_strings() {
        assert_eq!(
            serde_json::to_value(MessageMode::Enqueue).expect("serialize"),
            json!("enqueue")
        );
        assert_eq!(
            serde_json::to_value(MessageMode::Immediate).expect("serialize"),
            json!("immediate")
        );
    }

    #[test]
    fn selection_serializes_character_fields() {
        let attachment = Attachment::Selection {
            path: PathBuf::from("src/main.rs"),
            start_line: 3,
            start_character: 0,
            end_line: 7,
            end_character: 12,
        };
        let value = serde_json::to_value(&attachment).expect("serialize");
        assert_eq!(value["type"], "selection");
        assert_eq!(value["startCharacter"], 0);
        assert_eq!(value["endCharacter"], 12);
        assert!(value.get("startColumn").is_none());
    }

    #[test]
    fn capability_flags_reflect_registered_handlers() {
        let mut config = SessionConfig::new();
        assert!(config.auto_start);

        let params = config.create_params();
        assert_eq!(params["capabilities"]["requestPermission"], false);
        assert_eq!(params["capabilities"]["hooks"], json!([]));

        config.on_permission_request = Some(std::sync::Arc::new(|_request| {
            Box::pin(async { crate::tools::PermissionReply::allow() })
        }));
        config.register_hook(
            HookKind::PreToolUse,
            crate::hooks::hook_handler(|_input| async { crate::hooks::HookOutput::default() }),
        );
        config.tools.push(Tool::new(
            "echo",
            "echo the input",
            json!({"type": "object"}),
            |args, _context| async move { ToolResult::success(args.to_string()) },
        ));

        let params = config.create_params();
        assert_eq!(params["capabilities"]["requestPermission"], true);
        assert_eq!(params["capabilities"]["requestUserInput"], false);
        assert_eq!(params["capabilities"]["hooks"], json!(["preToolUse"]));
        assert_eq!(params["tools"][0]["name"], "echo");
    }

    #[test]
    fn resume_params_forward_all_configured_fields() {
        let mut config = SessionConfig::new();
        config.model = Some("gpt-5".into());
        config.reasoning_effort = Some(ReasoningEffort::Xhigh);
        let resume = ResumeSessionConfig::with_config("session-9", config);

        let params = resume.resume_params();
        assert_eq!(params["sessionId"], "session-9");
        assert_eq!(params["model"], "gpt-5");
        assert_eq!(params["reasoningEffort"], "xhigh");
    }
}
