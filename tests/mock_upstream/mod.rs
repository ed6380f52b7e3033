//! Mock realtime upstream
//!
//! Accepts WebSocket connections the way the model service would. Frames the
//! gateway sends are parsed and handed to the test; frames the test scripts
//! are written back on the most recent connection.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MockUpstream {
    /// `http://127.0.0.1:<port>`, usable as a realtime endpoint.
    pub endpoint: String,
    received: Mutex<mpsc::UnboundedReceiver<Value>>,
    outgoing: mpsc::UnboundedSender<Message>,
    pub connections: Arc<AtomicU64>,
    pub last_request_uri: Arc<Mutex<Option<String>>>,
    pub last_api_key: Arc<Mutex<Option<String>>>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());

        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let outgoing_rx = Arc::new(Mutex::new(outgoing_rx));
        let connections = Arc::new(AtomicU64::new(0));
        let last_request_uri = Arc::new(Mutex::new(None));
        let last_api_key = Arc::new(Mutex::new(None));

        {
            let connections = connections.clone();
            let last_request_uri = last_request_uri.clone();
            let last_api_key = last_api_key.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let mut uri = None;
                    let mut api_key = None;
                    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        uri = Some(req.uri().to_string());
                        api_key = req
                            .headers()
                            .get("api-key")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        Ok(resp)
                    };
                    let Ok(ws) = accept_hdr_async(stream, callback).await else {
                        continue;
                    };
                    *last_request_uri.lock().await = uri;
                    *last_api_key.lock().await = api_key;
                    connections.fetch_add(1, Ordering::SeqCst);

                    let received_tx = received_tx.clone();
                    let outgoing_rx = outgoing_rx.clone();
                    tokio::spawn(async move {
                        let (mut write, mut read) = ws.split();
                        let mut outgoing = outgoing_rx.lock().await;
                        loop {
                            tokio::select! {
                                msg = read.next() => match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                            let _ = received_tx.send(value);
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                    Some(Ok(_)) => {}
                                },
                                out = outgoing.recv() => match out {
                                    Some(msg) => {
                                        let closing = matches!(msg, Message::Close(_));
                                        if write.send(msg).await.is_err() || closing {
                                            break;
                                        }
                                    }
                                    None => break,
                                },
                            }
                        }
                    });
                }
            });
        }

        Self {
            endpoint,
            received: Mutex::new(received_rx),
            outgoing: outgoing_tx,
            connections,
            last_request_uri,
            last_api_key,
        }
    }

    /// Send an event to the gateway.
    pub fn send(&self, event: Value) {
        let _ = self.outgoing.send(Message::Text(event.to_string().into()));
    }

    /// Close the upstream socket.
    pub fn close(&self) {
        let _ = self.outgoing.send(Message::Close(None));
    }

    /// Next event the gateway sent upstream.
    pub async fn recv(&self) -> Value {
        let mut received = self.received.lock().await;
        timeout(RECV_TIMEOUT, received.recv())
            .await
            .expect("timed out waiting for upstream event")
            .expect("upstream event channel closed")
    }

    /// Skip events until one of type `kind` arrives.
    pub async fn recv_type(&self, kind: &str) -> Value {
        loop {
            let event = self.recv().await;
            if event["type"] == kind {
                return event;
            }
        }
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }
}
