//! Ordered, message based channel to the game server.

use futures::{future::BoxFuture, FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    WebSocket(#[from] Box<tungstenite::Error>),
    #[error("binary frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("transport channel closed")]
    ChannelClosed,
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(err))
    }
}

pub trait Transport: Send {
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Next inbound text frame, `None` once the peer closed the connection.
    ///
    /// # Cancellation Safety
    /// This future must be safe to cancel.
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, TransportError>>>;

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;
}

pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    /// Connects to `url`; returning successfully is the transport's "open" event.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (stream, _resp) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            tracing::error!(err = %e, url, "websocket connection failed");
            e
        })?;
        tracing::info!(url, "connected");
        Ok(Self { stream })
    }
}

impl Transport for WebSocketTransport {
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            tracing::debug!(%frame, "sending >>>");
            self.stream
                .send(tungstenite::Message::Text(frame.into()))
                .await?;
            Ok(())
        }
        .boxed()
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, TransportError>>> {
        async move {
            loop {
                let msg = match self.stream.next().await? {
                    Ok(msg) => msg,
                    Err(err) => return Some(Err(err.into())),
                };
                match msg {
                    tungstenite::Message::Text(text) => {
                        tracing::debug!(frame = text.as_str(), "received <<<");
                        return Some(Ok(text.as_str().to_owned()));
                    }
                    tungstenite::Message::Binary(bytes) => {
                        return Some(String::from_utf8(bytes.to_vec()).map_err(Into::into));
                    }
                    tungstenite::Message::Close(frame) => {
                        tracing::info!(?frame, "server closed the connection");
                        return None;
                    }
                    // pings are answered by tungstenite itself
                    _ => continue,
                }
            }
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            match self.stream.close(None).await {
                Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
                Err(err) => Err(err.into()),
            }
        }
        .boxed()
    }
}

/// In-process transport, used to drive a session against a scripted peer.
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

/// The server side of a [`MemoryTransport`].
pub struct MemoryPeer {
    pub to_client: mpsc::UnboundedSender<String>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        (
            MemoryTransport { outbound, inbound },
            MemoryPeer {
                to_client,
                from_client,
            },
        )
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<(), TransportError>> {
        let res = self
            .outbound
            .send(frame)
            .map_err(|_| TransportError::ChannelClosed);
        async move { res }.boxed()
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, TransportError>>> {
        async move { self.inbound.recv().await.map(Ok) }.boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        self.inbound.close();
        async { Ok(()) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn memory_pair_is_ordered() {
        let (mut client, mut peer) = MemoryTransport::pair();
        client.send("a".into()).await.unwrap();
        client.send("b".into()).await.unwrap();
        assert_eq!(peer.from_client.recv().await.as_deref(), Some("a"));
        assert_eq!(peer.from_client.recv().await.as_deref(), Some("b"));

        peer.to_client.send("c".into()).unwrap();
        drop(peer);
        assert_eq!(client.recv().await.unwrap().unwrap(), "c");
        assert!(client.recv().await.is_none());
        assert!(matches!(
            client.send("d".into()).await,
            Err(TransportError::ChannelClosed)
        ));
    }
}
