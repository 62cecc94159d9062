//! WebSocket transport.
//!
//! Each WebSocket frame carries one complete Content-Length-framed JSON-RPC
//! message, so the same codec drives every transport. Outbound messages are
//! sent as binary frames; inbound binary and text frames both feed the
//! decoder.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use super::{EventSink, Transport, TransportChannels, TransportError, CHANNEL_CAPACITY};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;
type WsSource = futures_util::stream::SplitStream<WsStream>;

/// Transport connecting to an agent behind a WebSocket endpoint.
#[derive(Debug)]
pub struct WebSocketTransport {
    uri: String,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl WebSocketTransport {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            tasks: Vec::new(),
            started: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn start(&mut self) -> Result<TransportChannels, TransportError> {
        if self.started {
            return Err(TransportError::AlreadyStarted);
        }

        let (stream, _response) = connect_async(&self.uri).await.map_err(|source| {
            TransportError::WebSocketHandshake {
                uri: self.uri.clone(),
                message: source.to_string(),
            }
        })?;
        let (ws_sink, ws_source) = stream.split();

        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (sink, events) = EventSink::new();

        self.tasks
            .push(tokio::spawn(writer_task(ws_sink, outgoing_rx, sink.clone())));
        self.tasks
            .push(tokio::spawn(reader_task(ws_source, incoming_tx, sink)));
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

async fn writer_task(mut ws_sink: WsSink, mut outgoing: mpsc::Receiver<Vec<u8>>, sink: EventSink) {
    while let Some(frame) = outgoing.recv().await {
        if let Err(source) = ws_sink.send(Message::Binary(frame.into())).await {
            sink.error(ws_error(source));
            return;
        }
    }

    let _ = ws_sink.send(Message::Close(None)).await;
}

async fn reader_task(mut ws_source: WsSource, incoming: mpsc::Sender<Vec<u8>>, sink: EventSink) {
    while let Some(message) = ws_source.next().await {
        match message {
            Ok(Message::Binary(payload)) => {
                if incoming.send(payload.to_vec()).await.is_err() {
                    break;
                }
            }
            Ok(Message::Text(payload)) => {
                if incoming.send(payload.as_bytes().to_vec()).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                debug!(?frame, "websocket closed by peer");
                break;
            }
            Ok(_) => {}
            Err(source) => {
                sink.error(ws_error(source));
                break;
            }
        }
    }

    sink.closed(None);
}

fn ws_error(source: tungstenite::Error) -> TransportError {
    match source {
        tungstenite::Error::Io(source) => TransportError::Io(source),
        other => TransportError::Io(std::io::Error::other(other.to_string())),
    }
}
