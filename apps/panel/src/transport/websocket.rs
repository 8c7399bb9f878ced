use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::error::ProtocolError as WsProtocolError;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{Transport, TransportError, TransportEvent};

/// Signaling socket backed by `tokio-tungstenite`.
///
/// A single connection task owns both halves of the stream. Outbound text is
/// handed to it over a channel; inbound frames and lifecycle changes are
/// reported as [`TransportEvent`]s.
pub struct WebSocketTransport {
    url: String,
    open: Arc<AtomicBool>,
    send_tx: mpsc::UnboundedSender<Message>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn connect(
        url: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let parsed = validate_url(url)?;
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        let transport = Arc::new(Self {
            url: parsed.to_string(),
            open: Arc::clone(&open),
            send_tx,
            tasks: Mutex::new(Vec::new()),
        });
        let task = tokio::spawn(run_connection(parsed.to_string(), open, send_rx, events_tx));
        transport.tasks.lock().push(task);
        Ok((transport, events_rx))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn validate_url(url: &str) -> Result<Url, TransportError> {
    let parsed = Url::parse(url).map_err(|err| TransportError::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(TransportError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.send_tx
            .send(Message::Text(text))
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.send_tx.send(Message::Close(None));
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

async fn run_connection(
    url: String,
    open: Arc<AtomicBool>,
    mut send_rx: mpsc::UnboundedReceiver<Message>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let (stream, _) = match connect_async(url.as_str()).await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(target: "panel::wire", %url, error = %err, "signaling connect failed");
            let _ = events_tx.send(TransportEvent::Closed);
            return;
        }
    };
    info!(target: "panel::wire", %url, "signaling socket connected");
    let (mut ws_write, mut ws_read) = stream.split();
    open.store(true, Ordering::SeqCst);
    let _ = events_tx.send(TransportEvent::Opened);

    loop {
        tokio::select! {
            outbound = send_rx.recv() => match outbound {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(err) = ws_write.send(message).await {
                        warn!(target: "panel::wire", error = %err, "signaling write failed");
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                None => {
                    let _ = ws_write.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = ws_read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    trace!(target: "panel::wire", frame = %text, "inbound frame");
                    if events_tx.send(TransportEvent::Frame(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        if events_tx.send(TransportEvent::Frame(text)).is_err() {
                            break;
                        }
                    }
                    Err(err) => debug!(target: "panel::wire", error = %err, "ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(target: "panel::wire", ?frame, "signaling socket closed by peer");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    match err {
                        WsError::ConnectionClosed
                        | WsError::AlreadyClosed
                        | WsError::Protocol(WsProtocolError::ResetWithoutClosingHandshake) => {
                            debug!(target: "panel::wire", error = %err, "signaling socket reset");
                        }
                        other => warn!(target: "panel::wire", error = %other, "signaling read failed"),
                    }
                    break;
                }
                None => break,
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    info!(target: "panel::wire", %url, "signaling socket closed");
    let _ = events_tx.send(TransportEvent::Closed);
}
