//! High-level client: owns the connection, performs top-level RPCs, and
//! tracks the sessions living on it.

use std::{
    collections::HashMap,
    ffi::OsString,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    config::{ResumeSessionConfig, SessionConfig},
    connection::{Connection, ConnectionCallbacks, NotificationHandler, RequestHandler},
    events::SessionNotification,
    hooks::HookKind,
    protocol::{
        self, from_result, unwrap_list, AccountQuota, AgentInfo, AuthStatus, ModelInfo,
        ServerStatus, ServerToolInfo, SessionCreated, SessionIdResult, SessionMetadata,
    },
    session::{Session, SessionRegistry},
    transport::{
        ChildProcessConfig, ChildProcessTransport, TcpTransport, Transport, WebSocketTransport,
    },
    CopilotError,
};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(60);

enum TransportKind {
    Stdio,
    Tcp {
        host: String,
        port: u16,
        connect_timeout: Option<Duration>,
    },
    WebSocket {
        uri: String,
    },
    Custom(Box<dyn Transport>),
}

/// Builder for [`CopilotClient`]. Defaults to spawning the Copilot CLI
/// (`COPILOT_CLI_PATH` or `copilot` on `PATH`) in ACP server mode.
pub struct CopilotClientBuilder {
    stdio: ChildProcessConfig,
    transport: TransportKind,
    handshake_timeout: Duration,
    rpc_timeout: Duration,
    on_error: Arc<dyn Fn(CopilotError) + Send + Sync>,
}

impl Default for CopilotClientBuilder {
    fn default() -> Self {
        Self {
            stdio: ChildProcessConfig::default(),
            transport: TransportKind::Stdio,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            on_error: Arc::new(|error| warn!("copilot client error: {error}")),
        }
    }
}

impl CopilotClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the agent binary instead of consulting `COPILOT_CLI_PATH`.
    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.stdio.binary = binary.into();
        self
    }

    /// Replaces the arguments passed to the agent binary.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.stdio.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Adds one environment entry for the spawned agent.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.stdio.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stdio.current_dir = Some(dir.into());
        self
    }

    /// Number of agent stderr lines retained for diagnostics.
    pub fn stderr_capacity(mut self, lines: usize) -> Self {
        self.stdio.stderr_capacity = lines;
        self
    }

    /// Grace window between closing the agent's stdin and killing it.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.stdio.shutdown_grace = grace;
        self
    }

    /// Connects over TCP instead of spawning the agent.
    pub fn tcp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.transport = TransportKind::Tcp {
            host: host.into(),
            port,
            connect_timeout: None,
        };
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        if let TransportKind::Tcp {
            connect_timeout, ..
        } = &mut self.transport
        {
            *connect_timeout = Some(timeout);
        }
        self
    }

    /// Connects over a WebSocket instead of spawning the agent.
    pub fn websocket(mut self, uri: impl Into<String>) -> Self {
        self.transport = TransportKind::WebSocket { uri: uri.into() };
        self
    }

    /// Supplies a custom transport implementation.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = TransportKind::Custom(Box::new(transport));
        self
    }

    /// Timeout for the `ping` handshake performed by `start`.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Timeout applied to every RPC issued through the client and its
    /// sessions.
    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Callback receiving connection-level errors: framing and transport
    /// failures, protocol violations, handler failures.
    pub fn on_error(mut self, callback: impl Fn(CopilotError) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(callback);
        self
    }

    pub fn build(self) -> CopilotClient {
        let transport: Box<dyn Transport> = match self.transport {
            TransportKind::Stdio => Box::new(ChildProcessTransport::new(self.stdio)),
            TransportKind::Tcp {
                host,
                port,
                connect_timeout,
            } => {
                let mut transport = TcpTransport::new(host, port);
                if let Some(timeout) = connect_timeout {
                    transport = transport.connect_timeout(timeout);
                }
                Box::new(transport)
            }
            TransportKind::WebSocket { uri } => Box::new(WebSocketTransport::new(uri)),
            TransportKind::Custom(transport) => transport,
        };

        CopilotClient {
            inner: Arc::new(ClientInner {
                transport: tokio::sync::Mutex::new(transport),
                connection: Mutex::new(None),
                sessions: Arc::new(Mutex::new(HashMap::new())),
                handshake_timeout: self.handshake_timeout,
                rpc_timeout: self.rpc_timeout,
                on_error: self.on_error,
                started: AtomicBool::new(false),
            }),
        }
    }
}

struct ClientInner {
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    connection: Mutex<Option<Arc<Connection>>>,
    sessions: Arc<SessionRegistry>,
    handshake_timeout: Duration,
    rpc_timeout: Duration,
    on_error: Arc<dyn Fn(CopilotError) + Send + Sync>,
    started: AtomicBool,
}

/// Client for one agent connection. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct CopilotClient {
    inner: Arc<ClientInner>,
}

impl CopilotClient {
    /// Returns a builder preloaded with the stdio transport defaults.
    pub fn builder() -> CopilotClientBuilder {
        CopilotClientBuilder::default()
    }

    /// Starts the transport and connection, then performs the `ping`
    /// handshake. On any failure the transport is torn back down and the
    /// client stays unstarted.
    pub async fn start(&self) -> Result<(), CopilotError> {
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(CopilotError::AlreadyStarted);
        }

        let channels = {
            let mut transport = self.inner.transport.lock().await;
            transport.start().await?
        };

        let callbacks = ConnectionCallbacks {
            on_error: self.inner.on_error.clone(),
            on_close: on_close_callback(self.inner.sessions.clone()),
        };
        let connection = Connection::start(channels, callbacks);
        self.register_routers(&connection);

        match connection
            .call(protocol::METHOD_PING, Value::Null, self.inner.handshake_timeout)
            .await
        {
            Ok(_) => {}
            Err(error) => {
                connection.close();
                self.inner.transport.lock().await.close().await;
                return Err(CopilotError::Handshake(error.to_string()));
            }
        }

        *self.inner.connection.lock().expect("connection lock") = Some(connection);
        self.inner.started.store(true, Ordering::SeqCst);
        debug!("copilot client started");
        Ok(())
    }

    /// Destroys live sessions, closes the connection, closes the transport.
    /// Idempotent.
    pub async fn stop(&self) -> Result<(), CopilotError> {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let connection = self
            .inner
            .connection
            .lock()
            .expect("connection lock")
            .take();

        if let Some(connection) = &connection {
            let sessions: Vec<_> = {
                let registry = self.inner.sessions.lock().expect("session registry lock");
                registry.values().cloned().collect()
            };
            for session in sessions {
                let params = json!({"sessionId": session.session_id()});
                if let Err(error) = connection
                    .call(protocol::METHOD_SESSION_DESTROY, params, Duration::from_secs(2))
                    .await
                {
                    debug!(
                        session_id = session.session_id(),
                        "session.destroy during stop failed: {error}"
                    );
                }
                session.mark_destroyed();
            }
            connection.close();
        }

        self.inner.transport.lock().await.close().await;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> Result<ServerStatus, CopilotError> {
        let result = self.call(protocol::METHOD_STATUS, Value::Null).await?;
        Ok(from_result(result)?)
    }

    pub async fn auth_status(&self) -> Result<AuthStatus, CopilotError> {
        let result = self.call(protocol::METHOD_AUTH_STATUS, Value::Null).await?;
        Ok(from_result(result)?)
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, CopilotError> {
        let result = self.call(protocol::METHOD_MODELS_LIST, Value::Null).await?;
        Ok(from_result(unwrap_list(result, "models"))?)
    }

    /// Lists the tools the agent itself offers (not the client-registered
    /// custom tools).
    pub async fn list_tools(&self) -> Result<Vec<ServerToolInfo>, CopilotError> {
        let result = self.call(protocol::METHOD_TOOLS_LIST, Value::Null).await?;
        Ok(from_result(unwrap_list(result, "tools"))?)
    }

    pub async fn account_quota(&self) -> Result<AccountQuota, CopilotError> {
        let result = self
            .call(protocol::METHOD_ACCOUNT_QUOTA, Value::Null)
            .await?;
        Ok(from_result(result)?)
    }

    /// Lists sessions persisted by the agent, including ones this client
    /// never opened.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>, CopilotError> {
        let result = self.call(protocol::METHOD_SESSIONS_LIST, Value::Null).await?;
        Ok(from_result(unwrap_list(result, "sessions"))?)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), CopilotError> {
        self.call(
            protocol::METHOD_SESSIONS_DELETE,
            json!({"sessionId": session_id}),
        )
        .await?;
        Ok(())
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentInfo>, CopilotError> {
        let result = self.call(protocol::METHOD_AGENTS_LIST, Value::Null).await?;
        Ok(from_result(unwrap_list(result, "agents"))?)
    }

    pub async fn current_agent(&self) -> Result<Option<AgentInfo>, CopilotError> {
        let result = self
            .call(protocol::METHOD_AGENTS_CURRENT, Value::Null)
            .await?;
        Ok(from_result(result)?)
    }

    pub async fn select_agent(&self, agent_id: &str) -> Result<(), CopilotError> {
        self.call(protocol::METHOD_AGENTS_SELECT, json!({"agentId": agent_id}))
            .await?;
        Ok(())
    }

    pub async fn deselect_agent(&self) -> Result<(), CopilotError> {
        self.call(protocol::METHOD_AGENTS_DESELECT, Value::Null)
            .await?;
        Ok(())
    }

    /// Asks the agent to stop all in-flight work. Server-side semantics
    /// only; the transport stays up.
    pub async fn force_stop(&self) -> Result<(), CopilotError> {
        self.call(protocol::METHOD_CLIENT_FORCE_STOP, Value::Null)
            .await?;
        Ok(())
    }

    pub async fn last_session_id(&self) -> Result<Option<String>, CopilotError> {
        let result = self
            .call(protocol::METHOD_CLIENT_GET_LAST_SESSION_ID, Value::Null)
            .await?;
        let result: SessionIdResult = from_result(result)?;
        Ok(result.session_id)
    }

    pub async fn foreground_session_id(&self) -> Result<Option<String>, CopilotError> {
        let result = self
            .call(protocol::METHOD_CLIENT_GET_FOREGROUND_SESSION_ID, Value::Null)
            .await?;
        let result: SessionIdResult = from_result(result)?;
        Ok(result.session_id)
    }

    pub async fn set_foreground_session_id(&self, session_id: &str) -> Result<(), CopilotError> {
        self.call(
            protocol::METHOD_CLIENT_SET_FOREGROUND_SESSION_ID,
            json!({"sessionId": session_id}),
        )
        .await?;
        Ok(())
    }

    /// Creates a session. Capability flags are computed from the handlers
    /// populated on `config`; with `auto_start` (the default) the agent loop
    /// begins immediately.
    pub async fn create_session(&self, config: SessionConfig) -> Result<Session, CopilotError> {
        let connection = self.connection()?;
        let result = connection
            .call(
                protocol::METHOD_SESSION_CREATE,
                config.create_params(),
                self.inner.rpc_timeout,
            )
            .await?;
        let created: SessionCreated = from_result(result)?;

        self.adopt_session(connection, created, config).await
    }

    /// Resumes a persisted session, forwarding every configured field.
    pub async fn resume_session(
        &self,
        resume: ResumeSessionConfig,
    ) -> Result<Session, CopilotError> {
        let connection = self.connection()?;
        let result = connection
            .call(
                protocol::METHOD_SESSION_RESUME,
                resume.resume_params(),
                self.inner.rpc_timeout,
            )
            .await?;
        let created = from_result::<SessionCreated>(result).unwrap_or(SessionCreated {
            session_id: resume.session_id.clone(),
            workspace_path: None,
        });

        self.adopt_session(connection, created, resume.config).await
    }

    async fn adopt_session(
        &self,
        connection: Arc<Connection>,
        created: SessionCreated,
        config: SessionConfig,
    ) -> Result<Session, CopilotError> {
        let session = Session::new(
            created.session_id.clone(),
            created.workspace_path.map(PathBuf::from),
            connection,
            self.inner.rpc_timeout,
            Arc::downgrade(&self.inner.sessions),
            self.inner.on_error.clone(),
        );
        session.inner().install_config_handlers(
            config.tools,
            config.hooks,
            config.on_permission_request,
            config.on_user_input_request,
        );

        self.inner
            .sessions
            .lock()
            .expect("session registry lock")
            .insert(created.session_id, session.inner());

        if config.auto_start {
            if let Err(error) = session.start().await {
                session.inner().mark_destroyed();
                return Err(error);
            }
        }

        Ok(session)
    }

    fn connection(&self) -> Result<Arc<Connection>, CopilotError> {
        self.inner
            .connection
            .lock()
            .expect("connection lock")
            .clone()
            .ok_or(CopilotError::NotStarted)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, CopilotError> {
        self.connection()?
            .call(method, params, self.inner.rpc_timeout)
            .await
    }

    /// Registers the inbound routers: session events plus the server-to-client
    /// request methods, all keyed off the `sessionId` in their params.
    fn register_routers(&self, connection: &Arc<Connection>) {
        connection.set_notification_handler(
            protocol::METHOD_SESSION_EVENT,
            event_router(self.inner.sessions.clone(), self.inner.on_error.clone()),
        );

        for method in [
            protocol::METHOD_TOOL_EXECUTE,
            protocol::METHOD_PERMISSION_REQUEST,
            protocol::METHOD_USER_INPUT_REQUEST,
        ] {
            connection
                .set_request_handler(method, request_router(self.inner.sessions.clone(), method));
        }
        for kind in HookKind::ALL {
            connection.set_request_handler(
                kind.method(),
                request_router_owned(self.inner.sessions.clone(), kind.method()),
            );
        }
    }
}

impl std::fmt::Debug for CopilotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopilotClient")
            .field("started", &self.is_started())
            .field(
                "sessions",
                &self
                    .inner
                    .sessions
                    .lock()
                    .expect("session registry lock")
                    .len(),
            )
            .finish()
    }
}

fn on_close_callback(sessions: Arc<SessionRegistry>) -> Arc<dyn Fn() + Send + Sync> {
    Arc::new(move || {
        let live: Vec<_> = {
            let registry = sessions.lock().expect("session registry lock");
            registry.values().cloned().collect()
        };
        for session in live {
            session.mark_destroyed();
        }
    })
}

fn event_router(
    sessions: Arc<SessionRegistry>,
    on_error: Arc<dyn Fn(CopilotError) + Send + Sync>,
) -> NotificationHandler {
    Arc::new(move |params| {
        let sessions = sessions.clone();
        let on_error = on_error.clone();
        Box::pin(async move {
            let Some(params) = params else {
                on_error(CopilotError::Protocol(
                    "session.event notification missing params".to_string(),
                ));
                return;
            };

            match SessionNotification::from_params(params) {
                Ok(notification) => {
                    let session = sessions
                        .lock()
                        .expect("session registry lock")
                        .get(&notification.session_id)
                        .cloned();
                    match session {
                        Some(session) => session.ingest(notification.event),
                        None => debug!(
                            session_id = notification.session_id,
                            "event for unknown session dropped"
                        ),
                    }
                }
                Err(error) => on_error(error),
            }
        })
    })
}

fn request_router(sessions: Arc<SessionRegistry>, method: &'static str) -> RequestHandler {
    request_router_owned(sessions, method.to_string())
}

fn request_router_owned(sessions: Arc<SessionRegistry>, method: String) -> RequestHandler {
    Arc::new(move |params| {
        let sessions = sessions.clone();
        let method = method.clone();
        Box::pin(async move {
            let params = params.unwrap_or(Value::Null);
            let session_id = params
                .get("sessionId")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("`{method}` request missing sessionId"))?
                .to_string();

            let session = sessions
                .lock()
                .expect("session registry lock")
                .get(&session_id)
                .cloned()
                .ok_or_else(|| format!("unknown session `{session_id}`"))?;

            session.handle_request(method, Some(params)).await
        })
    })
}

