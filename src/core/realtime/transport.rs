//! WebSocket transport shared by the provider clients.
//!
//! The write half sits behind an async mutex so `send` reports transport
//! failures to its caller. The read half is handed to the provider's reader
//! task.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use super::base::{RealtimeError, RealtimeResult};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsReader = SplitStream<WsStream>;

/// How long `close` waits for the close frame to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Open a WebSocket within `connect_timeout`.
pub async fn open<R>(request: R, connect_timeout: Duration) -> RealtimeResult<(WsWriter, WsReader)>
where
    R: IntoClientRequest + Unpin,
{
    let (ws_stream, response) = match timeout(connect_timeout, connect_async(request)).await {
        Ok(Ok(connected)) => connected,
        Ok(Err(e)) => {
            return Err(RealtimeError::ConnectionFailed(format!(
                "WebSocket connection failed: {e}"
            )));
        }
        Err(_) => return Err(RealtimeError::Timeout("Connection timed out".to_string())),
    };

    info!("Upstream WebSocket connected (status: {})", response.status());

    let (sink, stream) = ws_stream.split();
    Ok((
        WsWriter {
            sink: Mutex::new(Some(sink)),
        },
        stream,
    ))
}

/// Write half of an upstream connection.
pub struct WsWriter {
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
}

impl WsWriter {
    pub async fn send_json<T: Serialize>(&self, message: &T) -> RealtimeResult<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(RealtimeError::NotConnected)?;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| RealtimeError::SendFailed(e.to_string()))
    }

    /// Send a close frame and drop the sink. Later sends fail with
    /// `NotConnected`.
    pub async fn close(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            match timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => debug!("Upstream WebSocket closed"),
                Ok(Err(e)) => debug!("Upstream WebSocket close error: {}", e),
                Err(_) => debug!("Upstream WebSocket close timed out"),
            }
        }
    }

    pub async fn is_open(&self) -> bool {
        self.sink.lock().await.is_some()
    }
}

/// JSON text carried by a frame. Some providers send JSON in binary frames.
pub fn json_payload(message: &Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.as_str().to_string()),
        Message::Binary(data) if data.first() == Some(&b'{') => {
            String::from_utf8(data.to_vec()).ok()
        }
        _ => None,
    }
}

/// Read frames until one carries JSON. `None` when the stream ends or the
/// provider closes normally.
pub async fn next_json(reader: &mut WsReader) -> Option<RealtimeResult<String>> {
    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Close(frame)) => {
                return match frame {
                    Some(f) if f.code != CloseCode::Normal => {
                        Some(Err(RealtimeError::ReceiveFailed(format!(
                            "closed by provider: {} {}",
                            u16::from(f.code),
                            f.reason.as_str()
                        ))))
                    }
                    _ => None,
                };
            }
            Ok(message) => {
                if let Some(json) = json_payload(&message) {
                    return Some(Ok(json));
                }
            }
            Err(e) => return Some(Err(RealtimeError::ReceiveFailed(e.to_string()))),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_payload_from_text_and_binary() {
        let text = Message::Text("{\"a\":1}".into());
        assert_eq!(json_payload(&text).as_deref(), Some("{\"a\":1}"));

        let binary = Message::Binary(b"{\"setupComplete\":{}}".to_vec().into());
        assert_eq!(
            json_payload(&binary).as_deref(),
            Some("{\"setupComplete\":{}}")
        );

        let audio = Message::Binary(vec![0u8, 1, 2].into());
        assert!(json_payload(&audio).is_none());
        assert!(json_payload(&Message::Ping(Vec::new().into())).is_none());
    }
}
