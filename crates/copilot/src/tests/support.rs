use std::{fs, path::PathBuf, time::Duration};

use tokio::{sync::broadcast, time};

use crate::{CopilotClient, SessionEvent};

pub(super) const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Writes an executable fake agent speaking Content-Length-framed JSON-RPC
/// over stdio. Behaviors are keyed off the message text sent into a session;
/// every inbound message is appended to `FAKE_AGENT_LOG` when set.
pub(super) fn write_fake_agent() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("fake-copilot");
    let script = r#"#!/usr/bin/env python3
import json
import os
import sys
import threading
import time

stdout_lock = threading.Lock()
id_lock = threading.Lock()
next_id = 1000
pending = {}
log_path = os.environ.get("FAKE_AGENT_LOG")


def read_message(stdin):
    header = b""
    while b"\r\n\r\n" not in header:
        ch = stdin.read(1)
        if not ch:
            return None
        header += ch
    length = None
    for line in header.split(b"\r\n"):
        if line.lower().startswith(b"content-length:"):
            length = int(line.split(b":", 1)[1].strip())
    if length is None:
        return None
    body = stdin.read(length)
    if body is None or len(body) < length:
        return None
    return json.loads(body)


def send(payload):
    body = json.dumps(payload).encode("utf-8")
    with stdout_lock:
        sys.stdout.buffer.write(b"Content-Length: " + str(len(body)).encode() + b"\r\n\r\n")
        sys.stdout.buffer.write(body)
        sys.stdout.buffer.flush()


def log_message(message):
    if log_path:
        with open(log_path, "a", encoding="utf-8") as fh:
            fh.write(json.dumps(message) + "\n")


def event(session_id, payload):
    params = {"sessionId": session_id}
    params.update(payload)
    send({"jsonrpc": "2.0", "method": "session.event", "params": params})


def request(method, params, callback):
    global next_id
    with id_lock:
        rid = next_id
        next_id += 1
        pending[str(rid)] = callback
    send({"jsonrpc": "2.0", "id": rid, "method": method, "params": params})


def handle_send_message(params):
    session_id = params.get("sessionId", "")
    text = params.get("message", "")

    # Crash synchronously so no later request sneaks in a reply first.
    if text == "crash":
        os._exit(137)

    def worker():
        if text == "What is 2+2?":
            event(session_id, {"type": "turnStart", "turnId": "turn-1"})
            event(session_id, {"type": "assistantMessageDelta", "delta": "4"})
            event(session_id, {"type": "session.assistantMessage", "content": "4", "messageId": "m1"})
            event(session_id, {"type": "idle"})
        elif text == "stay quiet":
            event(session_id, {"type": "idle"})
        elif text == "big payload":
            event(session_id, {"type": "assistantMessage", "content": "x" * (32 * 1024)})
            event(session_id, {"type": "idle"})
        elif text == "mystery event":
            event(session_id, {"type": "session.quantumLeap", "detail": {"level": 9}})
            event(session_id, {"type": "assistantMessage", "content": "sent"})
            event(session_id, {"type": "idle"})
        elif text == "use the weather tool":
            def on_reply(message):
                result = message.get("result") or {}
                if result.get("success"):
                    content = result.get("content", "")
                else:
                    content = "tool failed: " + str(result.get("error"))
                event(session_id, {"type": "assistantMessage", "content": content})
                event(session_id, {"type": "idle"})
            request(
                "tool.execute",
                {"sessionId": session_id, "name": "get_weather", "args": {"city": "Seattle"}, "toolCallId": "t1"},
                on_reply,
            )
        elif text == "use the missing tool":
            def on_reply(message):
                error = message.get("error") or {}
                event(session_id, {"type": "systemMessage", "content": "rpc error %s" % error.get("code")})
                event(session_id, {"type": "idle"})
            request(
                "tool.execute",
                {"sessionId": session_id, "name": "nonexistent", "args": {}, "toolCallId": "t2"},
                on_reply,
            )
        elif text == "need permission":
            def on_reply(message):
                result = message.get("result") or {}
                event(session_id, {"type": "systemMessage", "content": json.dumps(result)})
                event(session_id, {"type": "assistantMessage", "content": "continuing"})
                event(session_id, {"type": "idle"})
            request(
                "permission.request",
                {"sessionId": session_id, "kind": "shell", "toolCallId": "t3", "command": "ls"},
                on_reply,
            )
        elif text == "run hook":
            def on_reply(message):
                result = message.get("result") or {}
                event(session_id, {"type": "systemMessage", "content": json.dumps(result)})
                event(session_id, {"type": "idle"})
            request(
                "hook.preToolUse",
                {
                    "sessionId": session_id,
                    "timestamp": "2026-01-01T00:00:00Z",
                    "cwd": "/tmp",
                    "toolName": "bash",
                    "args": {"command": "ls"},
                },
                on_reply,
            )
        else:
            event(session_id, {"type": "idle"})

    threading.Thread(target=worker, daemon=True).start()


session_counter = 0

while True:
    message = read_message(sys.stdin.buffer)
    if message is None:
        break
    log_message(message)
    method = message.get("method")
    if method is None:
        callback = pending.pop(str(message.get("id")), None)
        if callback:
            callback(message)
        continue

    mid = message.get("id")
    params = message.get("params", {})
    if method == "ping":
        send({"jsonrpc": "2.0", "id": mid, "result": {}})
    elif method == "status":
        send({"jsonrpc": "2.0", "id": mid, "result": {"version": "0.1.0-test", "protocolVersion": 1}})
    elif method == "models.list":
        send({"jsonrpc": "2.0", "id": mid, "result": {"models": [{"id": "gpt-5", "default": True}]}})
    elif method == "session.create":
        session_counter += 1
        sid = "sess-%d" % session_counter
        send({"jsonrpc": "2.0", "id": mid, "result": {"sessionId": sid, "workspacePath": "/tmp/workspace"}})
    elif method == "session.resume":
        send({"jsonrpc": "2.0", "id": mid, "result": {"sessionId": params.get("sessionId")}})
    elif method == "session.start":
        send({"jsonrpc": "2.0", "id": mid, "result": {}})
        event(params.get("sessionId", ""), {"type": "created", "model": "gpt-5"})
    elif method == "session.sendMessage":
        handle_send_message(params)
    elif method == "session.getModel":
        send({"jsonrpc": "2.0", "id": mid, "result": {"id": "gpt-5", "name": "GPT-5"}})
    elif method == "session.compact":
        send({"jsonrpc": "2.0", "id": mid, "result": {"success": True, "tokensBefore": 1000, "tokensAfter": 100}})
    elif method == "session.destroy":
        send({"jsonrpc": "2.0", "id": mid, "result": {}})
    elif method == "slow.call":
        def reply_later(rid=mid):
            time.sleep(0.5)
            send({"jsonrpc": "2.0", "id": rid, "result": {"late": True}})
        threading.Thread(target=reply_later, daemon=True).start()
    elif mid is not None:
        send({"jsonrpc": "2.0", "id": mid, "error": {"code": -32601, "message": "Method not found"}})
"#;

    fs::write(&script_path, script).expect("write script");
    make_executable(&script_path);
    (dir, script_path)
}

pub(super) fn make_executable(path: &std::path::Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }
}

pub(super) fn fake_client(binary: PathBuf) -> CopilotClient {
    CopilotClient::builder()
        .binary(binary)
        .args(Vec::<String>::new())
        .handshake_timeout(Duration::from_secs(5))
        .rpc_timeout(Duration::from_secs(5))
        .build()
}

pub(super) async fn start_fake_client() -> (tempfile::TempDir, CopilotClient) {
    let (dir, script) = write_fake_agent();
    let client = fake_client(script);
    client.start().await.expect("start client");
    (dir, client)
}

pub(super) async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("event timeout")
        .expect("event stream open")
}

/// Waits for the next event that is not a lifecycle/bookkeeping one the
/// test does not care about.
pub(super) async fn next_event_where(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut predicate: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}
