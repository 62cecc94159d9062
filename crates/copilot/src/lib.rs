#![forbid(unsafe_code)]
//! Async SDK for driving the Copilot CLI agent over JSON-RPC 2.0.
//!
//! The crate spawns (or connects to) an agent speaking the ACP protocol and
//! exposes it as a typed, event-driven session API. Four layers, leaves
//! first: the Content-Length framing [`codec`], the byte-stream
//! [`transport`]s (child process stdio, TCP, WebSocket), the JSON-RPC
//! [`connection`] correlating requests to responses and dispatching inbound
//! traffic, and the [`CopilotClient`] / [`Session`] surface on top.
//!
//! ## Setup
//! - The stdio transport resolves the agent from `COPILOT_CLI_PATH` or
//!   `copilot` on `PATH` and launches it with `--acp --no-auto-update`; pin a
//!   binary with [`CopilotClientBuilder::binary`].
//! - [`CopilotClientBuilder::tcp`] and [`CopilotClientBuilder::websocket`]
//!   reach an agent that is already running. All transports speak the same
//!   Content-Length framing, WebSocket frames included.
//! - `start` performs a `ping` handshake (5 s default) and fails without
//!   leaving the transport up. `stop` destroys live sessions and reaps the
//!   child, recording its exit code.
//!
//! ```rust,no_run
//! use copilot::{CopilotClient, SessionConfig};
//! # use std::time::Duration;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CopilotClient::builder().build();
//! client.start().await?;
//!
//! let session = client.create_session(SessionConfig::new()).await?;
//! if let Some(reply) = session
//!     .send_and_wait("What is 2+2?", Duration::from_secs(30))
//!     .await?
//! {
//!     println!("{}", reply.content);
//! }
//!
//! client.stop().await?;
//! # Ok(()) }
//! ```
//!
//! ## Sessions, events, and capabilities
//! - [`Session::events`] subscribes to the 46-variant [`SessionEvent`]
//!   stream; subscribers see wire order, and a subscriber that falls more
//!   than 1024 events behind loses the oldest ones (logged as a warning)
//!   rather than blocking the connection. Unrecognized event types surface
//!   as [`SessionEvent::Unknown`] with the raw payload preserved.
//! - Custom [`Tool`]s, [`HookKind`] hooks, and permission / user-input
//!   handlers registered on [`SessionConfig`] are declared to the agent as
//!   capability flags at `session.create` time; the agent then issues
//!   `tool.execute`, `permission.request`, `userInput.request`, and
//!   `hook.*` requests, which the SDK answers from the registered handlers
//!   without ever blocking the inbound loop.
//! - Session RPCs cover model switching, modes, the plan, workspace files,
//!   fleets, aborts, and compaction; top-level RPCs cover status, auth,
//!   models, tools, quota, session listings, and agent selection.

mod client;
pub mod codec;
mod config;
pub mod connection;
mod error;
mod events;
mod hooks;
pub mod protocol;
mod session;
mod tools;
pub mod transport;

pub use client::{CopilotClient, CopilotClientBuilder};
pub use codec::{encode_frame, CodecError, FrameDecoder, MAX_HEADER_BYTES};
pub use config::{
    Attachment, AzureProviderConfig, EnvValueMode, InfiniteSessionConfig, McpServerConfig,
    MessageMode, MessageOptions, ProviderConfig, ReasoningEffort, ResumeSessionConfig,
    SessionConfig,
};
pub use connection::{Connection, ConnectionCallbacks, NotificationHandler, RequestHandler};
pub use error::CopilotError;
pub use events::{AssistantMessage, SessionEvent, SessionNotification, TokenUsage};
pub use hooks::{hook_handler, HookHandler, HookInput, HookKind, HookOutput};
pub use protocol::{
    AccountQuota, AgentInfo, AuthStatus, CompactionResult, FleetAgentSpec, FleetConfig,
    FleetStarted, ModelInfo, PlanContents, QuotaSnapshot, ServerStatus, ServerToolInfo,
    SessionCreated, SessionMetadata, WorkspaceFileContents, WorkspaceFileEntry,
};
pub use session::{Session, SessionState};
pub use tools::{
    PermissionDecision, PermissionHandler, PermissionReply, PermissionRequest, Tool, ToolContext,
    ToolResult, UserInputHandler, UserInputReply, UserInputRequest, DEFAULT_DENY_REASON,
};

#[cfg(test)]
mod tests;
