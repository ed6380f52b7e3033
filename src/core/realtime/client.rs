//! WebSocket connector for the upstream realtime endpoint.
//!
//! [`RealtimeConnector::connect`] performs the handshake and spawns a reader
//! and a writer task per session. Together they shuttle text frames between
//! the socket and the returned [`EventLink`] and answer pings. Both end, and
//! the link closes, when the socket closes or when the bridge drops its
//! sender.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::HeaderName;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::base::{
    EventLink, LINK_CHANNEL_CAPACITY, RealtimeError, RealtimeResult, UpstreamConnector,
};
use super::config::{RealtimeProvider, UpstreamConfig};
use crate::core::credential::Credential;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Realtime Connector
// =============================================================================

/// Opens upstream sessions against Azure OpenAI or OpenAI.
pub struct RealtimeConnector {
    config: UpstreamConfig,
    credential: Arc<dyn Credential>,
}

impl RealtimeConnector {
    pub fn new(config: UpstreamConfig, credential: Arc<dyn Credential>) -> Self {
        Self { config, credential }
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    async fn build_request(&self) -> RealtimeResult<http::Request<()>> {
        let url = self.config.build_ws_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;

        let token = self
            .credential
            .resolve()
            .await
            .map_err(|e| RealtimeError::AuthenticationFailed(e.to_string()))?;
        let (name, value) = token.header();
        let value = HeaderValue::from_str(&value)
            .map_err(|e| RealtimeError::AuthenticationFailed(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(HeaderName::from_static(name), value);
        if self.config.provider == RealtimeProvider::OpenAI {
            headers.insert(
                HeaderName::from_static("openai-beta"),
                HeaderValue::from_static("realtime=v1"),
            );
        }

        Ok(request)
    }
}

#[async_trait]
impl UpstreamConnector for RealtimeConnector {
    async fn connect(&self) -> RealtimeResult<EventLink> {
        let request = self.build_request().await?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        tracing::info!(
            provider = %self.config.provider,
            deployment = %self.config.deployment,
            "Connected to realtime endpoint"
        );

        let (ws_sink, ws_stream) = ws_stream.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<String>(LINK_CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel::<String>(LINK_CHANNEL_CAPACITY);

        tokio::spawn(run_connection(ws_sink, ws_stream, outgoing_rx, incoming_tx));

        Ok(EventLink::new(outgoing_tx, incoming_rx))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.config.provider, self.config.deployment)
    }
}

/// Connection task: one writer and one reader, so a slow consumer of
/// upstream events never holds back frames headed upstream.
async fn run_connection(
    ws_sink: SplitSink<UpstreamSocket, Message>,
    ws_stream: SplitStream<UpstreamSocket>,
    outgoing_rx: mpsc::Receiver<String>,
    incoming_tx: mpsc::Sender<String>,
) {
    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();
    let done = CancellationToken::new();

    let writer = tokio::spawn(write_upstream(ws_sink, outgoing_rx, control_rx, done.clone()));
    read_upstream(ws_stream, incoming_tx, control_tx, done).await;
    let _ = writer.await;
}

/// Bridge frames and pongs to the socket.
async fn write_upstream(
    mut ws_sink: SplitSink<UpstreamSocket, Message>,
    mut outgoing_rx: mpsc::Receiver<String>,
    mut control_rx: mpsc::UnboundedReceiver<Message>,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = done.cancelled() => {
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }

            control = control_rx.recv() => {
                let Some(message) = control else {
                    break;
                };
                if let Err(e) = ws_sink.send(message).await {
                    tracing::error!("Failed to send pong: {}", e);
                }
            }

            outgoing = outgoing_rx.recv() => {
                let Some(frame) = outgoing else {
                    tracing::debug!("Bridge released upstream link, closing socket");
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = ws_sink.send(Message::Text(frame.into())).await {
                    tracing::error!("Failed to send upstream WebSocket message: {}", e);
                    break;
                }
            }
        }
    }
    done.cancel();
}

/// Socket frames to the bridge. Dropping `incoming_tx` on exit closes the link.
async fn read_upstream(
    mut ws_stream: SplitStream<UpstreamSocket>,
    incoming_tx: mpsc::Sender<String>,
    control_tx: mpsc::UnboundedSender<Message>,
    done: CancellationToken,
) {
    loop {
        let incoming = tokio::select! {
            _ = done.cancelled() => break,
            incoming = ws_stream.next() => incoming,
        };

        match incoming {
            Some(Ok(Message::Text(text))) => {
                if incoming_tx.send(text.as_str().to_owned()).await.is_err() {
                    tracing::debug!("Bridge gone, dropping upstream connection");
                    break;
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = control_tx.send(Message::Pong(data));
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Upstream WebSocket closed by server");
                break;
            }
            Some(Ok(Message::Binary(data))) => {
                tracing::warn!(bytes = data.len(), "Ignoring binary frame from upstream");
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::error!("Upstream WebSocket error: {}", e);
                break;
            }
            None => {
                tracing::info!("Upstream WebSocket stream ended");
                break;
            }
        }
    }
    done.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credential::KeyCredential;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    fn connector_for(addr: std::net::SocketAddr, provider: RealtimeProvider) -> RealtimeConnector {
        let endpoint = match provider {
            RealtimeProvider::Azure => format!("http://{addr}"),
            RealtimeProvider::OpenAI => format!("ws://{addr}/v1/realtime"),
        };
        RealtimeConnector::new(
            UpstreamConfig {
                provider,
                endpoint,
                deployment: "rt-deployment".to_string(),
                api_version: "2024-10-01-preview".to_string(),
            },
            Arc::new(KeyCredential::new("test-key")),
        )
    }

    #[tokio::test]
    async fn test_connect_sends_key_and_relays_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (header_tx, header_rx) = tokio::sync::oneshot::channel();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut header_tx = Some(header_tx);
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let key = req
                    .headers()
                    .get("api-key")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let path = req.uri().to_string();
                if let Some(tx) = header_tx.take() {
                    let _ = tx.send((key, path));
                }
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"type":"session.created"}"#.into()))
                .await
                .unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.ok();
        });

        let connector = connector_for(addr, RealtimeProvider::Azure);
        let mut link = connector.connect().await.unwrap();

        let (key, path) = header_rx.await.unwrap();
        assert_eq!(key.as_deref(), Some("test-key"));
        assert!(path.contains("/openai/realtime"));
        assert!(path.contains("deployment=rt-deployment"));

        let first = link.receiver.recv().await.unwrap();
        assert_eq!(first, r#"{"type":"session.created"}"#);

        link.sender
            .send(r#"{"type":"input_audio_buffer.append"}"#.to_string())
            .await
            .unwrap();
        let echoed = link.receiver.recv().await.unwrap();
        assert_eq!(echoed, r#"{"type":"input_audio_buffer.append"}"#);

        // Server closes, link follows.
        let closed = tokio::time::timeout(Duration::from_secs(2), link.receiver.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_outgoing_frames_flow_while_incoming_backs_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for i in 0..(2 * LINK_CHANNEL_CAPACITY + 8) {
                ws.send(Message::Text(format!(r#"{{"type":"response.audio.delta","n":{i}}}"#).into()))
                    .await
                    .unwrap();
            }
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
                    Some(Ok(_)) => continue,
                    other => panic!("no frame from client: {other:?}"),
                }
            }
        });

        let connector = connector_for(addr, RealtimeProvider::Azure);
        // Never read the incoming side; the bridge is busy elsewhere.
        let link = connector.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        link.sender
            .send(r#"{"type":"input_audio_buffer.append"}"#.to_string())
            .await
            .unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("outgoing frame stalled behind incoming backlog")
            .unwrap();
        assert_eq!(received, r#"{"type":"input_audio_buffer.append"}"#);
    }

    #[tokio::test]
    async fn test_openai_sends_beta_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (header_tx, header_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut header_tx = Some(header_tx);
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let beta = req
                    .headers()
                    .get("openai-beta")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                if let Some(tx) = header_tx.take() {
                    let _ = tx.send(beta);
                }
                Ok(resp)
            };
            let _ws = tokio_tungstenite::accept_hdr_async(stream, callback).await;
        });

        let connector = connector_for(addr, RealtimeProvider::OpenAI);
        let _link = connector.connect().await.unwrap();
        assert_eq!(header_rx.await.unwrap().as_deref(), Some("realtime=v1"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to obtain a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = connector_for(addr, RealtimeProvider::Azure);
        let result = connector.connect().await;
        assert!(matches!(result, Err(RealtimeError::ConnectionFailed(_))));
    }

    #[test]
    fn test_describe() {
        let connector = connector_for("127.0.0.1:1".parse().unwrap(), RealtimeProvider::Azure);
        assert_eq!(connector.describe(), "azure:rt-deployment");
    }
}
