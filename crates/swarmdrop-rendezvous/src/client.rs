//! Rendezvous client.

use crate::protocol::{RendezvousError, SignalMessage};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// WebSocket connection to a rendezvous server
///
/// Inbound messages are delivered on the receiver returned by
/// [`connect`](Self::connect); the receiver yielding `None` means the
/// connection is gone.
pub struct RendezvousClient {
    outbound: mpsc::UnboundedSender<SignalMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RendezvousClient {
    /// Connect to `url` (e.g. `ws://127.0.0.1:3001`)
    ///
    /// # Errors
    ///
    /// Returns [`RendezvousError::WebSocket`] if the handshake fails.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SignalMessage>), RendezvousError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut source) = ws.split();
        tracing::info!(url = %url, "connected to rendezvous server");

        let (outbound, mut out_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode signaling message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!(error = %e, "rendezvous write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SignalMessage::from_json(&text) {
                        Ok(msg) => {
                            if in_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "unparseable signaling frame dropped"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "rendezvous read failed");
                        break;
                    }
                }
            }
            tracing::info!("rendezvous connection closed");
        });

        Ok((
            Self {
                outbound,
                reader,
                writer,
            },
            in_rx,
        ))
    }

    /// Queue a message for the server
    ///
    /// # Errors
    ///
    /// Returns [`RendezvousError::Disconnected`] if the connection is gone.
    pub fn send(&self, msg: SignalMessage) -> Result<(), RendezvousError> {
        self.outbound
            .send(msg)
            .map_err(|_| RendezvousError::Disconnected)
    }

    /// A sender that feeds this connection
    #[must_use]
    pub fn sender(&self) -> mpsc::UnboundedSender<SignalMessage> {
        self.outbound.clone()
    }

    /// Drop the connection
    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for RendezvousClient {
    fn drop(&mut self) {
        self.close();
    }
}
