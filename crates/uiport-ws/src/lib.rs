//! WebSocket transport for uiport.
//!
//! Each WebSocket connection carries one port; text frames are protocol
//! messages. The endpoint name travels as the request path: opening
//! `counter` against `ws://127.0.0.1:8080` connects to
//! `ws://127.0.0.1:8080/counter`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use uiport_core::{Acceptor, Connector, Port, TransportError};

/// Accepts WebSocket connections and hands them out as ports.
#[derive(Debug)]
pub struct WsListener {
    local_addr: SocketAddr,
    ports: mpsc::UnboundedReceiver<Port>,
}

impl WsListener {
    /// Bind and start accepting. Must be called from within a Tokio runtime.
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, ports) = mpsc::unbounded_channel();
        tokio::spawn(accept_loop(listener, tx));

        tracing::info!("Listening on ws://{}", local_addr);
        Ok(Self { local_addr, ports })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Acceptor for WsListener {
    async fn accept(&mut self) -> Option<Port> {
        self.ports.recv().await
    }
}

/// Opens ports by connecting to `<base>/<name>`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base: String,
}

impl WsConnector {
    /// `base` is a `ws://` or `wss://` URL without the endpoint path.
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, name: &str) -> Result<Port, TransportError> {
        let url = format!("{}/{}", self.base, name);
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Other(Box::new(e)))?;

        tracing::debug!("Connected to {}", url);
        Ok(pump(name.to_string(), ws))
    }
}

async fn accept_loop(listener: TcpListener, ports: mpsc::UnboundedSender<Port>) {
    loop {
        let (stream, addr) = tokio::select! {
            _ = ports.closed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    break;
                }
            },
        };

        let ports = ports.clone();
        tokio::spawn(async move {
            match handshake(stream).await {
                Ok(port) => {
                    tracing::debug!("New connection from {} for '{}'", addr, port.name());
                    let _ = ports.send(port);
                }
                Err(e) => tracing::warn!("Connection error from {}: {}", addr, e),
            }
        });
    }
}

async fn handshake(stream: TcpStream) -> Result<Port, tungstenite::Error> {
    let mut name = String::new();
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            name = request.uri().path().trim_start_matches('/').to_string();
            Ok(response)
        },
    )
    .await?;
    Ok(pump(name, ws))
}

/// Bridge a WebSocket to a port: text frames in both directions until either
/// side closes.
fn pump<S>(name: String, ws: WebSocketStream<S>) -> Port
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (local, remote) = Port::pair(name);
    let (to_local, mut from_local) = remote.split();
    let (mut sink, mut stream) = ws.split();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Frame::Text(text))) => {
                        if to_local.send_frame(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Frame::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                },

                outgoing = from_local.recv() => match outgoing {
                    Some(frame) => {
                        if let Err(e) = sink.send(Frame::Text(frame.into())).await {
                            tracing::debug!("WebSocket error: {}", e);
                            break;
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        break;
                    }
                },
            }
        }
    });

    local
}
