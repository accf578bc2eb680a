use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tandem_proto::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::driver::{Driver, NegotiationHandle};
use crate::error::NegotiationError;
use crate::machine::{NegotiatorConfig, SessionEvent};
use crate::media::MediaProvider;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const LOG_TARGET: &str = "tandem::signaling";

/// A live connection to the matchmaking server with a running negotiator.
pub struct ClientSession {
    handle: NegotiationHandle,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    driver: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl ClientSession {
    pub fn handle(&self) -> &NegotiationHandle {
        &self.handle
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Tear down the local session, then drop the connection.
    pub async fn shutdown(self) {
        let _ = self.handle.shutdown();
        let _ = self.driver.await;
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Connect to the server's WebSocket endpoint and start negotiating.
pub async fn connect(
    url: &str,
    provider: Arc<dyn MediaProvider>,
    config: NegotiatorConfig,
) -> Result<ClientSession, NegotiationError> {
    let (stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| NegotiationError::Connect(format!("timed out connecting to {url}")))?
        .map_err(|err| NegotiationError::Connect(err.to_string()))?;
    debug!(target: LOG_TARGET, url, "signaling websocket connected");

    let (mut ws_write, mut ws_read) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let (driver, handle, events) = Driver::new(provider, config, outbound_tx);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(err) => {
                    warn!(target: LOG_TARGET, error = %err, "failed to encode client message");
                    continue;
                }
            };
            if ws_write.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_write.close().await;
        debug!(target: LOG_TARGET, "signaling writer finished");
    });

    let reader_handle = handle.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = ws_read.next().await {
            let decoded = match frame {
                Ok(Message::Text(text)) => ServerMessage::decode(text.as_str()),
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => ServerMessage::decode(text),
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    debug!(target: LOG_TARGET, error = %err, "signaling websocket closed");
                    break;
                }
            };
            match decoded {
                Ok(message) => {
                    if reader_handle.deliver(message).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(target: LOG_TARGET, error = %err, "ignoring undecodable server frame");
                }
            }
        }
        reader_handle.signaling_closed();
    });

    let driver = tokio::spawn(driver.run());

    Ok(ClientSession {
        handle,
        events,
        driver,
        tasks: vec![writer, reader],
    })
}
