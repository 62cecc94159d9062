//! TCP transport: a full-duplex byte stream to an already-running agent.

use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
    task::JoinHandle,
    time,
};

use super::{EventSink, Transport, TransportChannels, TransportError, CHANNEL_CAPACITY};

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Transport connecting to an agent listening on `host:port`.
#[derive(Debug)]
pub struct TcpTransport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            tasks: Vec::new(),
            started: false,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start(&mut self) -> Result<TransportChannels, TransportError> {
        if self.started {
            return Err(TransportError::AlreadyStarted);
        }

        let endpoint = self.endpoint();
        let stream = match time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransportError::Connect { endpoint, source }),
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    endpoint,
                    timeout: self.connect_timeout,
                })
            }
        };

        let (read_half, write_half) = stream.into_split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (sink, events) = EventSink::new();

        self.tasks
            .push(tokio::spawn(writer_task(write_half, outgoing_rx, sink.clone())));
        self.tasks
            .push(tokio::spawn(reader_task(read_half, incoming_tx, sink)));
        self.started = true;

        Ok(TransportChannels {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
            events,
        })
    }

    async fn close(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn writer_task(
    mut write_half: OwnedWriteHalf,
    mut outgoing: mpsc::Receiver<Vec<u8>>,
    sink: EventSink,
) {
    while let Some(frame) = outgoing.recv().await {
        if let Err(source) = write_half.write_all(&frame).await {
            sink.error(TransportError::Io(source));
            return;
        }
        if let Err(source) = write_half.flush().await {
            sink.error(TransportError::Io(source));
            return;
        }
    }

    let _ = write_half.shutdown().await;
}

async fn reader_task(mut read_half: OwnedReadHalf, incoming: mpsc::Sender<Vec<u8>>, sink: EventSink) {
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        match read_half.read(&mut chunk).await {
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

    sink.closed(None);
}
