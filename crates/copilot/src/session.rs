//! A live agent session: one `sessionId`, a typed event stream, session
//! RPCs, and the dispatch of server-to-client requests (tools, permissions,
//! user input, hooks) to the handlers the host registered.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use futures_util::future::BoxFuture;
use serde_json::{json, Map, Value};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, warn};

use crate::{
    config::MessageOptions,
    connection::Connection,
    events::{AssistantMessage, SessionEvent},
    hooks::{HookHandler, HookInput, HookKind, HookOutput},
    protocol::{
        self, from_result, unwrap_list, CompactionResult, FleetConfig, FleetStarted, ModelInfo,
        PlanContents, WorkspaceFileContents, WorkspaceFileEntry,
    },
    tools::{
        PermissionHandler, PermissionReply, PermissionRequest, Tool, ToolContext, UserInputHandler,
        UserInputReply, UserInputRequest, DEFAULT_DENY_REASON,
    },
    CopilotError,
};

/// Per-subscriber buffer of the broadcast event stream. A subscriber that
/// falls further behind than this loses its oldest buffered events (logged
/// as a warning); the inbound loop is never blocked.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle of a session as seen by this client.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Created,
    Running,
    Idle,
    Destroyed,
}

pub(crate) type SessionRegistry = Mutex<HashMap<String, Arc<SessionInner>>>;

pub(crate) struct SessionInner {
    session_id: String,
    workspace_path: Option<PathBuf>,
    connection: Arc<Connection>,
    rpc_timeout: Duration,
    state: Mutex<SessionState>,
    /// Taken on destroy so every receiver observes end-of-stream.
    events: Mutex<Option<broadcast::Sender<SessionEvent>>>,
    tools: Mutex<HashMap<String, Tool>>,
    permission_handler: Mutex<Option<PermissionHandler>>,
    user_input_handler: Mutex<Option<UserInputHandler>>,
    hooks: Mutex<HashMap<HookKind, Vec<HookHandler>>>,
    registry: Weak<SessionRegistry>,
    on_error: Arc<dyn Fn(CopilotError) + Send + Sync>,
}

/// Handle to one agent session. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(
        session_id: String,
        workspace_path: Option<PathBuf>,
        connection: Arc<Connection>,
        rpc_timeout: Duration,
        registry: Weak<SessionRegistry>,
        on_error: Arc<dyn Fn(CopilotError) + Send + Sync>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                session_id,
                workspace_path,
                connection,
                rpc_timeout,
                state: Mutex::new(SessionState::Created),
                events: Mutex::new(Some(events)),
                tools: Mutex::new(HashMap::new()),
                permission_handler: Mutex::new(None),
                user_input_handler: Mutex::new(None),
                hooks: Mutex::new(HashMap::new()),
                registry,
                on_error,
            }),
        }
    }

    pub(crate) fn inner(&self) -> Arc<SessionInner> {
        self.inner.clone()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn workspace_path(&self) -> Option<&PathBuf> {
        self.inner.workspace_path.as_ref()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock().expect("state lock")
    }

    /// Starts the agent loop for a session created with `auto_start: false`.
    pub async fn start(&self) -> Result<(), CopilotError> {
        self.inner.ensure_live()?;
        self.inner
            .call(protocol::METHOD_SESSION_START, Map::new())
            .await?;
        self.inner.set_state(SessionState::Running);
        Ok(())
    }

    /// Sends one user message. Fire-and-forget: responses arrive as events.
    pub async fn send(
        &self,
        message: impl Into<String>,
        options: MessageOptions,
    ) -> Result<(), CopilotError> {
        self.inner.ensure_live()?;

        let mut params = Map::new();
        params.insert("sessionId".into(), json!(self.inner.session_id));
        params.insert("message".into(), json!(message.into()));
        params.insert("mode".into(), json!(options.mode));
        if !options.attachments.is_empty() {
            params.insert(
                "attachments".into(),
                serde_json::to_value(&options.attachments)?,
            );
        }

        self.inner
            .connection
            .notify(protocol::METHOD_SESSION_SEND_MESSAGE, Value::Object(params))
            .await?;
        self.inner.set_state(SessionState::Running);
        Ok(())
    }

    /// Sends a message and waits for the next terminal assistant message.
    ///
    /// Returns `None` when the session goes idle without replying or the
    /// timeout fires; the timeout cancels only the wait, never the agent's
    /// work.
    pub async fn send_and_wait(
        &self,
        message: impl Into<String>,
        timeout: Duration,
    ) -> Result<Option<AssistantMessage>, CopilotError> {
        let mut events = self.events()?;
        self.send(message, MessageOptions::default()).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let event = match time::timeout_at(deadline, events.recv()).await {
                Err(_) => return Ok(None),
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(CopilotError::SessionDestroyed(
                        self.inner.session_id.clone(),
                    ))
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!(skipped, "event subscriber lagged while awaiting reply");
                    continue;
                }
                Ok(Ok(event)) => event,
            };

            match event {
                SessionEvent::AssistantMessage(message) => return Ok(Some(message)),
                SessionEvent::SessionIdle { .. } => return Ok(None),
                _ => {}
            }
        }
    }

    /// Subscribes to the session's event stream. Every subscriber sees the
    /// same wire-ordered events from the moment it subscribes.
    pub fn events(&self) -> Result<broadcast::Receiver<SessionEvent>, CopilotError> {
        let events = self.inner.events.lock().expect("events lock");
        match events.as_ref() {
            Some(sender) => Ok(sender.subscribe()),
            None => Err(CopilotError::SessionDestroyed(
                self.inner.session_id.clone(),
            )),
        }
    }

    /// Runs `callback` for every event on a spawned task. Abort the returned
    /// handle to unsubscribe.
    pub fn on<F>(&self, mut callback: F) -> Result<JoinHandle<()>, CopilotError>
    where
        F: FnMut(SessionEvent) + Send + 'static,
    {
        let mut events = self.events()?;
        Ok(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event subscriber lagged; oldest events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    /// A stream filtered to the session lifecycle events.
    pub fn lifecycle_events(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, CopilotError> {
        let mut events = self.events()?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_lifecycle() => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "lifecycle subscriber lagged; oldest events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }

    pub fn register_tools(&self, tools: impl IntoIterator<Item = Tool>) {
        let mut registry = self.inner.tools.lock().expect("tools lock");
        for tool in tools {
            registry.insert(tool.name.clone(), tool);
        }
    }

    pub fn register_permission_handler(&self, handler: PermissionHandler) {
        *self
            .inner
            .permission_handler
            .lock()
            .expect("permission lock") = Some(handler);
    }

    pub fn register_user_input_handler(&self, handler: UserInputHandler) {
        *self
            .inner
            .user_input_handler
            .lock()
            .expect("user input lock") = Some(handler);
    }

    /// Appends a hook handler; handlers of one kind run in registration
    /// order when the agent invokes the hook.
    pub fn register_hook(&self, kind: HookKind, handler: HookHandler) {
        self.inner
            .hooks
            .lock()
            .expect("hooks lock")
            .entry(kind)
            .or_default()
            .push(handler);
    }

    pub async fn get_model(&self) -> Result<ModelInfo, CopilotError> {
        self.inner.ensure_live()?;
        let result = self
            .inner
            .call(protocol::METHOD_SESSION_GET_MODEL, Map::new())
            .await?;
        Ok(from_result(result)?)
    }

    pub async fn switch_model(&self, model: impl Into<String>) -> Result<(), CopilotError> {
        self.inner.ensure_live()?;
        let mut params = Map::new();
        params.insert("model".into(), json!(model.into()));
        self.inner
            .call(protocol::METHOD_SESSION_SWITCH_MODEL, params)
            .await?;
        Ok(())
    }

    pub async fn set_mode(&self, mode: impl Into<String>) -> Result<(), CopilotError> {
        self.inner.ensure_live()?;
        let mut params = Map::new();
        params.insert("mode".into(), json!(mode.into()));
        self.inner
            .call(protocol::METHOD_SESSION_SET_MODE, params)
            .await?;
        Ok(())
    }

    pub async fn read_plan(&self) -> Result<Option<String>, CopilotError> {
        self.inner.ensure_live()?;
        let result = self
            .inner
            .call(protocol::METHOD_SESSION_READ_PLAN, Map::new())
            .await?;
        let contents: PlanContents = from_result(result)?;
        Ok(contents.plan)
    }

    pub async fn update_plan(&self, plan: impl Into<String>) -> Result<(), CopilotError> {
        self.inner.ensure_live()?;
        let mut params = Map::new();
        params.insert("plan".into(), json!(plan.into()));
        self.inner
            .call(protocol::METHOD_SESSION_UPDATE_PLAN, params)
            .await?;
        Ok(())
    }

    pub async fn list_workspace_files(
        &self,
        path: Option<&str>,
    ) -> Result<Vec<WorkspaceFileEntry>, CopilotError> {
        self.inner.ensure_live()?;
        let mut params = Map::new();
        if let Some(path) = path {
            params.insert("path".into(), json!(path));
        }
        let result = self
            .inner
            .call(protocol::METHOD_SESSION_LIST_WORKSPACE_FILES, params)
            .await?;
        Ok(from_result(unwrap_list(result, "files"))?)
    }

    pub async fn read_workspace_file(
        &self,
        path: impl Into<String>,
    ) -> Result<WorkspaceFileContents, CopilotError> {
        self.inner.ensure_live()?;
        let mut params = Map::new();
        params.insert("path".into(), json!(path.into()));
        let result = self
            .inner
            .call(protocol::METHOD_SESSION_READ_WORKSPACE_FILE, params)
            .await?;
        Ok(from_result(result)?)
    }

    pub async fn start_fleet(&self, config: FleetConfig) -> Result<FleetStarted, CopilotError> {
        self.inner.ensure_live()?;
        let params = match serde_json::to_value(&config)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let result = self
            .inner
            .call(protocol::METHOD_SESSION_START_FLEET, params)
            .await?;
        Ok(from_result(result)?)
    }

    /// Asks the agent to stop the current turn.
    pub async fn abort(&self) -> Result<(), CopilotError> {
        self.inner.ensure_live()?;
        self.inner
            .call(protocol::METHOD_SESSION_ABORT, Map::new())
            .await?;
        Ok(())
    }

    /// Compacts the session's context and reports the result.
    pub async fn compact(&self) -> Result<CompactionResult, CopilotError> {
        self.inner.ensure_live()?;
        let result = self
            .inner
            .call(protocol::METHOD_SESSION_COMPACT, Map::new())
            .await?;
        Ok(from_result(result)?)
    }

    /// Destroys the session. Further calls fail and the event stream ends.
    pub async fn destroy(&self) -> Result<(), CopilotError> {
        self.inner.ensure_live()?;
        let outcome = self
            .inner
            .call(protocol::METHOD_SESSION_DESTROY, Map::new())
            .await;
        self.inner.mark_destroyed();
        outcome.map(|_| ())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.inner.session_id)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionInner {
    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }

    fn ensure_live(&self) -> Result<(), CopilotError> {
        if *self.state.lock().expect("state lock") == SessionState::Destroyed {
            return Err(CopilotError::SessionDestroyed(self.session_id.clone()));
        }
        Ok(())
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().expect("state lock");
        if *state != SessionState::Destroyed {
            *state = next;
        }
    }

    /// Session-scoped call: injects `sessionId` into the params.
    async fn call(&self, method: &str, mut params: Map<String, Value>) -> Result<Value, CopilotError> {
        params.insert("sessionId".into(), json!(self.session_id));
        self.connection
            .call(method, Value::Object(params), self.rpc_timeout)
            .await
    }

    /// Routes one `session.event` payload into the broadcast stream,
    /// updating lifecycle state along the way.
    pub(crate) fn ingest(&self, event: SessionEvent) {
        match &event {
            SessionEvent::SessionStart { .. } | SessionEvent::SessionResume { .. } => {
                self.set_state(SessionState::Running)
            }
            SessionEvent::TurnStart { .. } | SessionEvent::UserMessage { .. } => {
                self.set_state(SessionState::Running)
            }
            SessionEvent::SessionIdle { .. } => self.set_state(SessionState::Idle),
            _ => {}
        }

        let terminal = event.is_terminal();
        if let Some(sender) = self.events.lock().expect("events lock").as_ref() {
            // Send only fails when no subscriber is listening right now.
            let _ = sender.send(event);
        }

        if terminal {
            self.mark_destroyed();
        }
    }

    pub(crate) fn mark_destroyed(&self) {
        *self.state.lock().expect("state lock") = SessionState::Destroyed;
        self.events.lock().expect("events lock").take();
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .expect("session registry lock")
                .remove(&self.session_id);
        }
    }

    pub(crate) fn install_config_handlers(
        &self,
        tools: Vec<Tool>,
        hooks: HashMap<HookKind, Vec<HookHandler>>,
        permission: Option<PermissionHandler>,
        user_input: Option<UserInputHandler>,
    ) {
        {
            let mut registry = self.tools.lock().expect("tools lock");
            for tool in tools {
                registry.insert(tool.name.clone(), tool);
            }
        }
        {
            let mut registry = self.hooks.lock().expect("hooks lock");
            for (kind, handlers) in hooks {
                registry.entry(kind).or_default().extend(handlers);
            }
        }
        if permission.is_some() {
            *self.permission_handler.lock().expect("permission lock") = permission;
        }
        if user_input.is_some() {
            *self.user_input_handler.lock().expect("user input lock") = user_input;
        }
    }

    /// Dispatches one server-to-client request addressed to this session.
    pub(crate) fn handle_request(
        self: &Arc<Self>,
        method: String,
        params: Option<Value>,
    ) -> BoxFuture<'static, Result<Value, String>> {
        let session = self.clone();
        Box::pin(async move {
            let params = params.unwrap_or(Value::Null);
            match method.as_str() {
                protocol::METHOD_TOOL_EXECUTE => session.execute_tool(params).await,
                protocol::METHOD_PERMISSION_REQUEST => session.decide_permission(params).await,
                protocol::METHOD_USER_INPUT_REQUEST => session.request_user_input(params).await,
                other => match other.strip_prefix(protocol::HOOK_METHOD_PREFIX) {
                    Some(name) => match HookKind::from_wire_name(name) {
                        Some(kind) => session.run_hooks(kind, params).await,
                        None => Err(format!("unknown hook kind `{name}`")),
                    },
                    None => Err(format!("unsupported method `{other}`")),
                },
            }
        })
    }

    async fn execute_tool(&self, params: Value) -> Result<Value, String> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| "tool.execute params missing tool name".to_string())?
            .to_string();
        let args = params
            .get("args")
            .or_else(|| params.get("arguments"))
            .cloned()
            .unwrap_or(Value::Null);
        let tool_call_id = params
            .get("toolCallId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let tool = self
            .tools
            .lock()
            .expect("tools lock")
            .get(&name)
            .cloned()
            .ok_or_else(|| format!("unknown tool `{name}`"))?;

        let context = ToolContext {
            session_id: self.session_id.clone(),
            tool_call_id,
        };

        debug!(tool = %name, "executing tool request");
        // The handler runs in its own task so a panic inside user code is
        // contained and becomes a failure reply.
        let result = match tokio::spawn(tool.invoke(args, context)).await {
            Ok(result) => result,
            Err(join_error) => {
                let message = format!("tool handler panicked: {join_error}");
                (self.on_error)(CopilotError::Handler {
                    method: format!("tool.execute/{name}"),
                    message: message.clone(),
                });
                crate::tools::ToolResult::failure(message)
            }
        };

        Ok(result.into_reply())
    }

    async fn decide_permission(&self, params: Value) -> Result<Value, String> {
        let request: PermissionRequest =
            serde_json::from_value(params).map_err(|err| format!("bad permission request: {err}"))?;

        let handler = self.permission_handler.lock().expect("permission lock").clone();
        let reply = match handler {
            Some(handler) => handler(request).await,
            None => PermissionReply::deny(DEFAULT_DENY_REASON),
        };

        serde_json::to_value(&reply).map_err(|err| err.to_string())
    }

    async fn request_user_input(&self, params: Value) -> Result<Value, String> {
        let request: UserInputRequest =
            serde_json::from_value(params).map_err(|err| format!("bad user input request: {err}"))?;

        let handler = self.user_input_handler.lock().expect("user input lock").clone();
        let reply = match handler {
            Some(handler) => handler(request).await,
            None => UserInputReply::cancelled(),
        };

        serde_json::to_value(&reply).map_err(|err| err.to_string())
    }

    async fn run_hooks(&self, kind: HookKind, params: Value) -> Result<Value, String> {
        let input: HookInput =
            serde_json::from_value(params).map_err(|err| format!("bad hook input: {err}"))?;

        let handlers = self
            .hooks
            .lock()
            .expect("hooks lock")
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut outputs = Vec::with_capacity(handlers.len());
        for handler in handlers {
            outputs.push(handler(input.clone()).await);
        }

        serde_json::to_value(HookOutput::merge(outputs)).map_err(|err| err.to_string())
    }
}
