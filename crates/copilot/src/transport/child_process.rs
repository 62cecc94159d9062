//! Child-process transport: spawns the Copilot CLI and owns its lifetime.

use std::{
    collections::VecDeque,
    env,
    ffi::OsString,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    process::{Child, Command},
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, warn};

use super::{EventSink, Transport, TransportChannels, TransportError, CHANNEL_CAPACITY};

/// Environment variable that overrides the agent binary path.
pub const COPILOT_CLI_PATH_ENV: &str = "COPILOT_CLI_PATH";

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Delays between spawn attempts when the binary is still open for writing
/// (ETXTBSY, typically an installer that just finished unpacking it).
const SPAWN_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(10),
    Duration::from_millis(25),
    Duration::from_millis(60),
];

/// Launch configuration for the spawned agent process.
#[derive(Clone, Debug)]
pub struct ChildProcessConfig {
    /// Agent binary. Defaults to `COPILOT_CLI_PATH` when set, else `copilot`
    /// on `PATH`.
    pub binary: PathBuf,
    /// Arguments passed to the binary. Defaults to the ACP server flags.
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
    /// Number of stderr lines retained for diagnostics (oldest dropped).
    pub stderr_capacity: usize,
    /// How long to wait for a clean exit after stdin closes before killing.
    pub shutdown_grace: Duration,
}

impl Default for ChildProcessConfig {
    fn default() -> Self {
        Self {
            binary: env::var_os(COPILOT_CLI_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("copilot")),
            args: vec![OsString::from("--acp"), OsString::from("--no-auto-update")],
            current_dir: None,
            env: Vec::new(),
            stderr_capacity: 256,
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

type ExitHook = Box<dyn Fn(Option<i32>) + Send + Sync>;

struct Running {
    shutdown_tx: watch::Sender<bool>,
    exited_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Transport backed by the stdio pipes of a spawned agent process.
///
/// The transport owns the child: it reaps it on close, records the final
/// exit code, and fires `on_process_exit` callbacks exactly once.
pub struct ChildProcessTransport {
    config: ChildProcessConfig,
    stderr_ring: Arc<Mutex<VecDeque<String>>>,
    last_exit_code: Arc<Mutex<Option<i32>>>,
    exit_hooks: Arc<Mutex<Vec<ExitHook>>>,
    running: Option<Running>,
}

impl ChildProcessTransport {
    pub fn new(config: ChildProcessConfig) -> Self {
        Self {
            config,
            stderr_ring: Arc::new(Mutex::new(VecDeque::new())),
            last_exit_code: Arc::new(Mutex::new(None)),
            exit_hooks: Arc::new(Mutex::new(Vec::new())),
            running: None,
        }
    }

    /// Registers a callback invoked once when the agent process terminates,
    /// with the exit code when one is available.
    pub fn on_process_exit(&self, hook: impl Fn(Option<i32>) + Send + Sync + 'static) {
        self.exit_hooks
            .lock()
            .expect("exit hooks lock")
            .push(Box::new(hook));
    }

    /// The exit code recorded after the agent process terminated.
    pub fn last_exit_code(&self) -> Option<i32> {
        *self.last_exit_code.lock().expect("exit code lock")
    }

    /// The most recent stderr lines from the agent, oldest first.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_ring
            .lock()
            .expect("stderr lock")
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for ChildProcessTransport {
    async fn start(&mut self) -> Result<TransportChannels, TransportError> {
        if self.running.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let mut command = Command::new(&self.config.binary);
        command
            .args(&self.config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        // A binary that was just written can briefly refuse to execute; walk
        // the retry schedule before reporting the spawn failure.
        let mut delays = SPAWN_RETRY_DELAYS.iter();
        let mut child = loop {
            match command.spawn() {
                Ok(child) => break child,
                Err(source) if source.kind() == std::io::ErrorKind::ExecutableFileBusy => {
                    match delays.next() {
                        Some(delay) => time::sleep(*delay).await,
                        None => {
                            return Err(TransportError::Spawn {
                                binary: self.config.binary.clone(),
                                source,
                            })
                        }
                    }
                }
                Err(source) => {
                    return Err(TransportError::Spawn {
                        binary: self.config.binary.clone(),
                        source,
                    })
                }
            }
        };

        let stdin = child
            .stdin
            .take()
            .ok_or(TransportError::StdioUnavailable("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TransportError::StdioUnavailable("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(TransportError::StdioUnavailable("stderr"))?;

        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (sink, events) = EventSink::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (exited_tx, exited_rx) = watch::channel(false);

        let writer = tokio::spawn(writer_task(
            stdin,
            outgoing_rx,
            shutdown_rx.clone(),
            sink.clone(),
        ));
        let reader = tokio::spawn(reader_task(stdout, incoming_tx, sink.clone()));
        let stderr_task = tokio::spawn(stderr_task(
            stderr,
            self.stderr_ring.clone(),
            self.config.stderr_capacity,
        ));
        let monitor = tokio::spawn(monitor_task(
            child,
            shutdown_rx,
            self.config.shutdown_grace,
            self.last_exit_code.clone(),
            self.exit_hooks.clone(),
            exited_tx,
            sink,
        ));

        self.running = Some(Running {
            shutdown_tx,
            exited_rx,
            tasks: vec![writer, reader, stderr_task, monitor],
        });

        Ok(TransportChannels {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
            events,
        })
    }

    async fn close(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        let mut exited = running.exited_rx;
        let deadline = self.config.shutdown_grace + Duration::from_secs(2);
        let wait = async {
            while !*exited.borrow() {
                if exited.changed().await.is_err() {
                    break;
                }
            }
        };
        if time::timeout(deadline, wait).await.is_err() {
            warn!("agent process did not report exit before deadline");
        }

        for task in running.tasks {
            task.abort();
        }
    }
}

async fn writer_task(
    mut stdin: tokio::process::ChildStdin,
    mut outgoing: mpsc::Receiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
    sink: EventSink,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            frame = outgoing.recv() => {
                let Some(frame) = frame else { break };
                if let Err(source) = stdin.write_all(&frame).await {
                    sink.error(TransportError::Io(source));
                    return;
                }
                if let Err(source) = stdin.flush().await {
                    sink.error(TransportError::Io(source));
                    return;
                }
            }
        }
    }

    // Closing stdin is the ACP shutdown signal; the monitor handles the rest.
    let _ = stdin.shutdown().await;
}

async fn reader_task(
    mut stdout: tokio::process::ChildStdout,
    incoming: mpsc::Sender<Vec<u8>>,
    sink: EventSink,
) {
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if incoming.send(chunk[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(source) => {
                sink.error(TransportError::Io(source));
                break;
            }
        }
    }
}

async fn stderr_task(
    stderr: tokio::process::ChildStderr,
    ring: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("agent stderr: {line}");
        let mut ring = ring.lock().expect("stderr lock");
        if ring.len() == capacity {
            ring.pop_front();
        }
        ring.push_back(line);
    }
}

async fn monitor_task(
    mut child: Child,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
    last_exit_code: Arc<Mutex<Option<i32>>>,
    exit_hooks: Arc<Mutex<Vec<ExitHook>>>,
    exited_tx: watch::Sender<bool>,
    sink: EventSink,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = watch_for_shutdown(&mut shutdown) => {
            match time::timeout(grace, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    debug!("agent did not exit within the grace window; killing");
                    let _ = child.start_kill();
                    child.wait().await
                }
            }
        }
    };

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(source) => {
            sink.error(TransportError::Io(source));
            None
        }
    };

    *last_exit_code.lock().expect("exit code lock") = exit_code;
    debug!(?exit_code, "agent process exited");

    for hook in exit_hooks.lock().expect("exit hooks lock").iter() {
        hook(exit_code);
    }

    sink.closed(exit_code);
    let _ = exited_tx.send(true);
}

async fn watch_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Transport dropped without close; rely on kill_on_drop.
            std::future::pending::<()>().await;
        }
    }
}

impl std::fmt::Debug for ChildProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcessTransport")
            .field("binary", &self.config.binary)
            .field("args", &self.config.args)
            .field("running", &self.running.is_some())
            .finish()
    }
}

impl Drop for ChildProcessTransport {
    fn drop(&mut self) {
        // Dropping the monitor task drops the child, and kill_on_drop reaps.
        if let Some(running) = self.running.take() {
            for task in running.tasks {
                task.abort();
            }
        }
    }
}
