//! Default [`Transport`] built on `tokio-tungstenite`.
//!
//! Construction validates the url and headers synchronously and spawns an
//! I/O task on the current tokio runtime. The task does not dial until
//! listeners for every [`EventKind`] are registered (or the transport is
//! closed), so no event is emitted before the logger is listening.

use crate::connection::TRANSPORT_TARGET as TARGET;
use crate::error::TransportError;
use crate::transport::{
    EventKind, EventTarget, Headers, Listener, ListenerId, Transport, TransportEvent,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

enum Command {
    Send(String),
    Close,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, EventKind, Listener)>,
}

impl Listeners {
    fn covers_all(&self) -> bool {
        EventKind::ALL
            .iter()
            .all(|kind| self.entries.iter().any(|(_, k, _)| k == kind))
    }
}

#[derive(Default)]
struct Shared {
    listeners: Mutex<Listeners>,
    armed: Notify,
    is_armed: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    fn arm(&self) {
        if !self.is_armed.swap(true, Ordering::AcqRel) {
            self.armed.notify_one();
        }
    }

    /// Invoke every listener for the event's kind outside the table lock.
    fn dispatch(&self, event: TransportEvent) {
        let targets: Vec<Listener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind())
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in targets {
            listener(&event);
        }
    }
}

/// WebSocket client transport (`ws://` and `wss://`).
pub struct WebSocketTransport {
    url: String,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl WebSocketTransport {
    /// [`TransportFactory`](crate::transport::TransportFactory)-compatible
    /// constructor.
    pub fn factory(
        url: &str,
        headers: Option<&Headers>,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(Self::connect(url, headers)?))
    }

    pub fn connect(url: &str, headers: Option<&Headers>) -> Result<Self, TransportError> {
        let request = build_request(url, headers)?;
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let shared = Arc::new(Shared::default());
        let (commands, rx) = mpsc::unbounded_channel();
        runtime.spawn(run(request, Arc::clone(&shared), rx));

        Ok(WebSocketTransport {
            url: url.to_string(),
            shared,
            commands,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, text: &str) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.commands
            .send(Command::Send(text.to_string()))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.arm();
        // The task may already be gone.
        let _ = self.commands.send(Command::Close);
        Ok(())
    }

    fn as_event_target(&self) -> Option<&dyn EventTarget> {
        Some(self)
    }
}

impl EventTarget for WebSocketTransport {
    fn add_event_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let (id, complete) = {
            let mut table = self.shared.listeners.lock();
            table.next_id += 1;
            let id = ListenerId(table.next_id);
            table.entries.push((id, kind, listener));
            (id, table.covers_all())
        };
        if complete {
            self.shared.arm();
        }
        id
    }

    fn remove_event_listener(&self, _kind: EventKind, id: ListenerId) -> Result<(), TransportError> {
        self.shared
            .listeners
            .lock()
            .entries
            .retain(|(lid, _, _)| *lid != id);
        Ok(())
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        // Lets a task that never got armed exit.
        self.shared.closed.store(true, Ordering::Release);
        self.shared.arm();
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url)
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

fn check_scheme(url: &str) -> Result<(), TransportError> {
    let lower = url.trim().to_ascii_lowercase();
    if lower.starts_with("ws://") || lower.starts_with("wss://") {
        Ok(())
    } else {
        let scheme = lower.split_once("://").map(|(s, _)| s).unwrap_or("");
        Err(TransportError::UnsupportedScheme(scheme.to_string()))
    }
}

fn build_request(url: &str, headers: Option<&Headers>) -> Result<Request, TransportError> {
    check_scheme(url)?;
    let mut request = url
        .trim()
        .into_client_request()
        .map_err(|e| TransportError::Construct(e.to_string()))?;

    for (name, value) in headers.into_iter().flatten() {
        let invalid = |reason: String| TransportError::InvalidHeader {
            name: name.clone(),
            reason,
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        request.headers_mut().insert(header_name, header_value);
    }
    Ok(request)
}

async fn run(
    request: Request,
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    shared.armed.notified().await;
    if shared.closed.load(Ordering::Acquire) {
        return;
    }

    let uri = request.uri().to_string();
    let stream = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            tracing::debug!(target: TARGET, %uri, error = %err, "handshake failed");
            shared.dispatch(TransportEvent::Error(err.to_string()));
            shared.dispatch(TransportEvent::Close {
                code: None,
                reason: String::new(),
            });
            return;
        }
    };
    tracing::debug!(target: TARGET, %uri, "connected");

    let (mut sink, mut source) = stream.split();
    shared.dispatch(TransportEvent::Open);

    let (code, reason) = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        shared.dispatch(TransportEvent::Error(err.to_string()));
                        break (None, String::new());
                    }
                }
                Some(Command::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break (Some(1000), String::new());
                }
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    shared.dispatch(TransportEvent::Message(json!({ "data": text })));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    shared.dispatch(TransportEvent::Message(json!({ "data": text })));
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    shared.dispatch(TransportEvent::Error(err.to_string()));
                    break (None, String::new());
                }
                None => break (None, String::new()),
            },
        }
    };

    let _ = sink.close().await;
    tracing::debug!(target: TARGET, %uri, ?code, "closed");
    shared.dispatch(TransportEvent::Close { code, reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn collect(transport: &WebSocketTransport) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in EventKind::ALL {
            let tx = tx.clone();
            transport.add_event_listener(
                kind,
                Arc::new(move |event: &TransportEvent| {
                    let _ = tx.send(event.clone());
                }),
            );
        }
        rx
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[rstest]
    #[case("http://example.com", "http")]
    #[case("tcp://example.com", "tcp")]
    #[case("example.com", "")]
    fn rejects_non_websocket_schemes(#[case] url: &str, #[case] scheme: &str) {
        match build_request(url, None) {
            Err(TransportError::UnsupportedScheme(s)) => assert_eq!(s, scheme),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn headers_are_validated_and_applied() {
        let mut headers = Headers::new();
        headers.insert("X-API-Key".into(), "secret".into());
        let request = build_request("wss://collector.example/logs", Some(&headers)).unwrap();
        assert_eq!(request.headers()["x-api-key"], "secret");

        headers.insert("bad header".into(), "v".into());
        assert!(matches!(
            build_request("ws://collector.example", Some(&headers)),
            Err(TransportError::InvalidHeader { name, .. }) if name == "bad header"
        ));
    }

    #[test]
    fn needs_a_runtime() {
        assert!(matches!(
            WebSocketTransport::connect("ws://127.0.0.1:9", None),
            Err(TransportError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn refused_connection_reports_error_then_close() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = WebSocketTransport::connect(&format!("ws://127.0.0.1:{port}"), None).unwrap();
        let mut events = collect(&transport);

        assert_eq!(next(&mut events).await.kind(), EventKind::Error);
        assert_eq!(next(&mut events).await.kind(), EventKind::Close);
    }

    #[tokio::test]
    async fn exchanges_frames_with_a_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text("ack".into())).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                if frame.is_close() {
                    break;
                }
            }
            first.into_text().unwrap()
        });

        let transport = WebSocketTransport::connect(&format!("ws://{addr}"), None).unwrap();
        let mut events = collect(&transport);

        assert_eq!(next(&mut events).await, TransportEvent::Open);
        transport.send("hello").unwrap();
        assert_eq!(
            next(&mut events).await,
            TransportEvent::Message(json!({ "data": "ack" }))
        );

        transport.close().unwrap();
        assert!(matches!(transport.send("late"), Err(TransportError::Closed)));
        assert_eq!(next(&mut events).await.kind(), EventKind::Close);
        assert_eq!(server.await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn does_not_dial_before_all_listeners_are_attached() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let transport = WebSocketTransport::connect(&format!("ws://{addr}"), None).unwrap();
        transport.add_event_listener(EventKind::Open, Arc::new(|_: &TransportEvent| {}));

        let accepted = timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err());
    }
}
