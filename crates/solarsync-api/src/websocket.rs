//! WebSocket implementation of the event channel.
//!
//! [`WebSocketConnector`] performs a single handshake per
//! [`connect`](Connector::connect) call and spawns a pump task that moves
//! frames between the socket and the returned [`Link`]. It never retries:
//! reconnection and backoff are owned by the connection manager in
//! `solarsync-core`.
//!
//! # Example
//!
//! ```rust,ignore
//! use solarsync_api::{Connector, WebSocketConnector};
//! use url::Url;
//!
//! let connector = WebSocketConnector::new(Url::parse("wss://solar.example/events")?, None);
//! let mut link = connector.connect().await?;
//!
//! while let Some(event) = link.recv().await {
//!     println!("{}", event.name());
//! }
//! ```

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::link::{Connector, Link};
use crate::wire::{ClientMessage, ServerEvent, parse_frame};

// ── WebSocketConnector ───────────────────────────────────────────────

/// Opens event-channel sessions over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    token: Option<SecretString>,
}

impl WebSocketConnector {
    /// `token`, if present, is sent as a bearer `Authorization` header on
    /// the upgrade request.
    pub fn new(url: Url, token: Option<SecretString>) -> Self {
        Self { url, token }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Link, Error> {
        tracing::info!(url = %self.url, "Connecting to event channel");

        let uri: tungstenite::http::Uri = self.url.as_str().parse().map_err(
            |e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()),
        )?;

        let mut request = ClientRequestBuilder::new(uri);
        if let Some(ref token) = self.token {
            request = request.with_header("Authorization", format!("Bearer {}", token.expose_secret()));
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("Event channel connected");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(pump(ws_stream, in_tx, out_rx, cancel.clone()));

        Ok(Link::new(out_tx, in_rx, cancel))
    }
}

// ── Frame pump ───────────────────────────────────────────────────────

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Move frames between the socket and the link until either side goes away.
///
/// Transport loss is reported to the link as a synthetic
/// [`ServerEvent::Disconnect`] so the owner sees one uniform failure path.
async fn pump(
    ws_stream: WsStream,
    events: mpsc::UnboundedSender<ServerEvent>,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: CancellationToken,
) {
    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if let Err(e) = write.close().await {
                    tracing::debug!(error = %e, "WebSocket close failed");
                }
                tracing::debug!("Event channel torn down locally");
                return;
            }
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    break "link dropped".to_string();
                };
                if let Err(e) = write.send(tungstenite::Message::text(msg.to_frame())).await {
                    break format!("send failed: {e}");
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(event) = parse_frame(&text) {
                            if events.send(event).is_err() {
                                break "link dropped".to_string();
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("WebSocket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        break match frame {
                            Some(cf) => {
                                tracing::info!(code = %cf.code, reason = %cf.reason, "WebSocket close frame received");
                                format!("closed by server ({}): {}", cf.code, cf.reason)
                            }
                            None => "closed by server".to_string(),
                        };
                    }
                    Some(Err(e)) => break format!("transport error: {e}"),
                    None => break "stream ended".to_string(),
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    };

    tracing::info!(reason = %reason, "Event channel lost");
    let _ = events.send(ServerEvent::Disconnect { reason });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_handshake_is_a_connect_error() {
        // Port 1 is never listening; the handshake must fail cleanly.
        let connector = WebSocketConnector::new(Url::parse("ws://127.0.0.1:1/events").unwrap(), None);
        let result = connector.connect().await;
        assert!(matches!(result, Err(Error::WebSocketConnect(_))));
    }

    #[test]
    fn connector_keeps_url() {
        let url = Url::parse("wss://solar.example/events").unwrap();
        let connector = WebSocketConnector::new(url.clone(), None);
        assert_eq!(connector.url(), &url);
    }
}
