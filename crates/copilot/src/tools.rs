//! Client-side capabilities the agent may invoke mid-turn: custom tools,
//! permission prompts, and user-input prompts.

use std::{collections::BTreeMap, future::Future, sync::Arc};

use base64::Engine as _;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Reason sent with the deny reply when no permission handler is registered.
pub const DEFAULT_DENY_REASON: &str = "no permission handler is registered";

/// Context passed to a tool handler alongside its arguments.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub session_id: String,
    pub tool_call_id: String,
}

/// Outcome of one tool invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolResult {
    /// Text or structured content serialized to a string.
    Success { content: String },
    /// Raw bytes with their MIME type; sent base64-encoded.
    Binary { content: Vec<u8>, mime_type: String },
    Failure { error: String },
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self::Success {
            content: content.into(),
        }
    }

    pub fn binary(content: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self::Binary {
            content: content.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    /// The `tool.execute` reply payload.
    pub(crate) fn into_reply(self) -> Value {
        match self {
            ToolResult::Success { content } => json!({"success": true, "content": content}),
            ToolResult::Binary { content, mime_type } => json!({
                "success": true,
                "content": base64::engine::general_purpose::STANDARD.encode(content),
                "mimeType": mime_type,
            }),
            ToolResult::Failure { error } => json!({"success": false, "error": error}),
        }
    }
}

type ToolFn = Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, ToolResult> + Send + Sync>;

/// A tool the host offers to the agent: a name, a description, a JSON Schema
/// for its arguments, and the async handler that executes it.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the handler's arguments.
    pub parameters: Value,
    handler: ToolFn,
}

impl Tool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, context| Box::pin(handler(args, context))),
        }
    }

    pub(crate) fn invoke(&self, args: Value, context: ToolContext) -> BoxFuture<'static, ToolResult> {
        (self.handler)(args, context)
    }

    /// The declaration sent with `session.create`.
    pub(crate) fn descriptor(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// A permission prompt from the agent, e.g. before running a shell command.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Kind-specific fields, preserved verbatim.
    #[serde(flatten)]
    pub details: BTreeMap<String, Value>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny,
}

/// Reply to a permission request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionReply {
    pub decision: PermissionDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PermissionReply {
    pub fn allow() -> Self {
        Self {
            decision: PermissionDecision::Allow,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: PermissionDecision::Deny,
            reason: Some(reason.into()),
        }
    }
}

/// Handler deciding permission requests.
pub type PermissionHandler =
    Arc<dyn Fn(PermissionRequest) -> BoxFuture<'static, PermissionReply> + Send + Sync>;

/// A free-form input prompt from the agent.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub choices: Vec<String>,
}

/// Reply to a user-input request: an answer or a cancellation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInputReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
}

impl UserInputReply {
    pub fn answer(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            response: None,
            cancelled: true,
        }
    }
}

/// Handler answering user-input requests.
pub type UserInputHandler =
    Arc<dyn Fn(UserInputRequest) -> BoxFuture<'static, UserInputReply> + Send + Sync>;
