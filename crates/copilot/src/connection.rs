//! Framed JSON-RPC 2.0 connection over a [`Transport`](crate::transport::Transport).
//!
//! The connection pairs the codec with a transport's channel triple: it
//! correlates outbound requests to inbound responses by id, routes inbound
//! requests and notifications to registered method handlers, and owns the
//! serialized write lane. Decoder and transport failures are fatal; they fail
//! every pending call and fire `on_close` exactly once.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures_util::future::BoxFuture;
use serde_json::{json, Map, Value};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time,
};
use tracing::{debug, warn};

use crate::{
    codec::{encode_frame, FrameDecoder},
    protocol::{ERROR_APPLICATION, ERROR_METHOD_NOT_FOUND},
    transport::{TransportChannels, TransportEvent},
    CopilotError,
};

/// Handler for a server-originated request. The `Err` string becomes the
/// message of a `-32000` error reply.
pub type RequestHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Handler for a server-originated notification. Runs on the inbound loop so
/// that delivery order is preserved; it must hand long work off to a task.
pub type NotificationHandler = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callbacks wired up by the owner of the connection.
#[derive(Clone)]
pub struct ConnectionCallbacks {
    pub on_error: Arc<dyn Fn(CopilotError) + Send + Sync>,
    pub on_close: Arc<dyn Fn() + Send + Sync>,
}

impl Default for ConnectionCallbacks {
    fn default() -> Self {
        Self {
            on_error: Arc::new(|error| warn!("connection error: {error}")),
            on_close: Arc::new(|| {}),
        }
    }
}

type PendingCalls = Mutex<HashMap<i64, oneshot::Sender<Result<Value, CopilotError>>>>;

struct Shared {
    writer: mpsc::Sender<Vec<u8>>,
    pending: PendingCalls,
    request_handlers: Mutex<HashMap<String, RequestHandler>>,
    notification_handlers: Mutex<HashMap<String, NotificationHandler>>,
    closed: AtomicBool,
    callbacks: ConnectionCallbacks,
}

/// A live JSON-RPC connection.
pub struct Connection {
    shared: Arc<Shared>,
    next_id: AtomicI64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Wires the codec onto a started transport's channels and begins
    /// reading. Handlers may be registered before or after this returns;
    /// requests for unregistered methods are answered with `-32601`.
    pub fn start(channels: TransportChannels, callbacks: ConnectionCallbacks) -> Arc<Self> {
        let TransportChannels {
            outgoing,
            incoming,
            events,
        } = channels;

        let shared = Arc::new(Shared {
            writer: outgoing,
            pending: Mutex::new(HashMap::new()),
            request_handlers: Mutex::new(HashMap::new()),
            notification_handlers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            callbacks,
        });

        let inbound = tokio::spawn(inbound_loop(incoming, shared.clone()));
        let transport_events = tokio::spawn(transport_event_loop(events, shared.clone()));

        Arc::new(Self {
            shared,
            next_id: AtomicI64::new(1),
            tasks: Mutex::new(vec![inbound, transport_events]),
        })
    }

    /// Registers the handler invoked for inbound requests named `method`.
    pub fn set_request_handler(&self, method: impl Into<String>, handler: RequestHandler) {
        self.shared
            .request_handlers
            .lock()
            .expect("request handlers lock")
            .insert(method.into(), handler);
    }

    /// Registers the handler invoked for inbound notifications named `method`.
    pub fn set_notification_handler(&self, method: impl Into<String>, handler: NotificationHandler) {
        self.shared
            .notification_handlers
            .lock()
            .expect("notification handlers lock")
            .insert(method.into(), handler);
    }

    /// Sends a request and suspends until its response, the timeout, or
    /// connection closure. A response arriving after the timeout is dropped.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CopilotError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(CopilotError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = encode_frame(&envelope(Some(id), method, params))?;

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .expect("pending lock")
            .insert(id, tx);

        if self.shared.writer.send(frame).await.is_err() {
            self.shared.pending.lock().expect("pending lock").remove(&id);
            return Err(CopilotError::ConnectionClosed);
        }

        match time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CopilotError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.lock().expect("pending lock").remove(&id);
                Err(CopilotError::Timeout(timeout))
            }
        }
    }

    /// Sends a fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), CopilotError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(CopilotError::ConnectionClosed);
        }

        let frame = encode_frame(&envelope(None, method, params))?;
        self.shared
            .writer
            .send(frame)
            .await
            .map_err(|_| CopilotError::ConnectionClosed)
    }

    /// Closes the connection, failing every outstanding call. Idempotent.
    pub fn close(&self) {
        close_shared(&self.shared);
        for task in self.tasks.lock().expect("tasks lock").drain(..) {
            task.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn envelope(id: Option<i64>, method: &str, params: Value) -> Value {
    let mut message = Map::new();
    message.insert("jsonrpc".into(), json!("2.0"));
    if let Some(id) = id {
        message.insert("id".into(), json!(id));
    }
    message.insert("method".into(), json!(method));
    if !params.is_null() {
        message.insert("params".into(), params);
    }
    Value::Object(message)
}

/// Marks the connection closed, failing pending calls and firing `on_close`
/// the first time only.
fn close_shared(shared: &Shared) {
    if shared.closed.swap(true, Ordering::SeqCst) {
        return;
    }

    let pending: Vec<_> = shared
        .pending
        .lock()
        .expect("pending lock")
        .drain()
        .collect();
    for (_, tx) in pending {
        let _ = tx.send(Err(CopilotError::ConnectionClosed));
    }

    (shared.callbacks.on_close)();
}

async fn inbound_loop(mut incoming: mpsc::Receiver<Vec<u8>>, shared: Arc<Shared>) {
    let mut decoder = FrameDecoder::new();

    while let Some(chunk) = incoming.recv().await {
        match decoder.push(&chunk) {
            Ok(messages) => {
                for message in messages {
                    dispatch(message, &shared).await;
                }
            }
            Err(error) => {
                // The stream's framing is now ambiguous; nothing after this
                // point can be trusted.
                (shared.callbacks.on_error)(CopilotError::Framing(error));
                break;
            }
        }
    }

    close_shared(&shared);
}

async fn transport_event_loop(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    shared: Arc<Shared>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Error(error) => {
                (shared.callbacks.on_error)(CopilotError::Transport(error));
            }
            TransportEvent::Closed { exit_code } => {
                debug!(?exit_code, "transport closed");
                close_shared(&shared);
                break;
            }
        }
    }
}

async fn dispatch(message: Value, shared: &Arc<Shared>) {
    let has_id = message.get("id").is_some();
    let has_method = message.get("method").is_some();
    let has_outcome = message.get("result").is_some() || message.get("error").is_some();

    if has_id && has_outcome {
        complete_pending(message, shared);
    } else if has_id && has_method {
        dispatch_request(message, shared);
    } else if has_method {
        dispatch_notification(message, shared).await;
    } else {
        (shared.callbacks.on_error)(CopilotError::Protocol(format!(
            "message is neither request, response, nor notification: {message}"
        )));
    }
}

fn complete_pending(message: Value, shared: &Arc<Shared>) {
    let id = message.get("id").and_then(Value::as_i64);
    let sender = id.and_then(|id| {
        shared
            .pending
            .lock()
            .expect("pending lock")
            .remove(&id)
    });

    let Some(sender) = sender else {
        // Unknown or late response; log and drop.
        (shared.callbacks.on_error)(CopilotError::Protocol(format!(
            "response with no matching pending call: id {:?}",
            message.get("id")
        )));
        return;
    };

    let outcome = if let Some(error) = message.get("error") {
        Err(CopilotError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            data: error.get("data").cloned(),
        })
    } else if let Some(result) = message.get("result") {
        Ok(result.clone())
    } else {
        Err(CopilotError::Protocol(
            "response carries neither result nor error".to_string(),
        ))
    };

    let _ = sender.send(outcome);
}

/// Runs the request handler in its own task so the inbound loop keeps
/// receiving while user code (which may itself issue calls on this
/// connection) is still working. The reply goes out through the write lane.
fn dispatch_request(message: Value, shared: &Arc<Shared>) {
    // Server-originated ids are echoed verbatim, whatever their JSON shape.
    let id = message.get("id").cloned().unwrap_or(Value::Null);
    let method = message
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = message.get("params").cloned();

    let handler = shared
        .request_handlers
        .lock()
        .expect("request handlers lock")
        .get(&method)
        .cloned();

    let shared = shared.clone();
    tokio::spawn(async move {
        let reply = match handler {
            None => error_reply(&id, ERROR_METHOD_NOT_FOUND, "Method not found"),
            Some(handler) => match handler(params).await {
                Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                Err(message) => {
                    (shared.callbacks.on_error)(CopilotError::Handler {
                        method: method.clone(),
                        message: message.clone(),
                    });
                    error_reply(&id, ERROR_APPLICATION, &message)
                }
            },
        };

        match encode_frame(&reply) {
            Ok(frame) => {
                if shared.writer.send(frame).await.is_err() {
                    debug!(%method, "reply dropped: connection closed");
                }
            }
            Err(error) => {
                (shared.callbacks.on_error)(CopilotError::Serialization(error));
            }
        }
    });
}

async fn dispatch_notification(message: Value, shared: &Arc<Shared>) {
    let method = message
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = message.get("params").cloned();

    let handler = shared
        .notification_handlers
        .lock()
        .expect("notification handlers lock")
        .get(&method)
        .cloned();

    match handler {
        Some(handler) => handler(params).await,
        None => debug!(%method, "notification with no handler dropped"),
    }
}

fn error_reply(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    })
}
