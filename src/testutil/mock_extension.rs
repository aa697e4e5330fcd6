//! A WebSocket client that speaks the `/extension` protocol documented in
//! [`crate::extension_protocol`], standing in for the real browser
//! extension (component F) in integration tests. Grounded on the
//! teacher's `cdp::mock::MockCdpConnection`: a deterministic test double
//! that implements just enough of the real contract to drive every relay
//! code path without a browser.

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::wire::Envelope;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A fake extension connection driven by test code.
pub struct MockExtension {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl MockExtension {
    /// Connect to `ws://<addr>/extension`, optionally with a `?token=`.
    pub async fn connect(addr: &str, token: Option<&str>) -> Self {
        let url = match token {
            Some(t) => format!("ws://{addr}/extension?token={t}"),
            None => format!("ws://{addr}/extension"),
        };
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("mock extension failed to connect");
        let (write, read) = stream.split();
        Self { write, read }
    }

    /// Send a bare event envelope `{"method": ..., "params": ...}`.
    pub async fn send_event(&mut self, method: &str, params: Value) {
        let envelope = Envelope::event(method, params);
        let text = envelope.to_text().expect("serialize event");
        self.write
            .send(Message::Text(text.into()))
            .await
            .expect("send event");
    }

    pub async fn tab_attached(&mut self, tab_id: i64, url: &str, title: &str) {
        self.send_event(
            crate::extension_protocol::TAB_ATTACHED,
            json!({ "tabId": tab_id, "url": url, "title": title }),
        )
        .await;
    }

    pub async fn tab_navigated(&mut self, tab_id: i64, url: &str, title: &str) {
        self.send_event(
            crate::extension_protocol::TAB_NAVIGATED,
            json!({ "tabId": tab_id, "url": url, "title": title }),
        )
        .await;
    }

    pub async fn tab_detached(&mut self, tab_id: i64, reason: &str) {
        self.send_event(
            crate::extension_protocol::TAB_DETACHED,
            json!({ "tabId": tab_id, "reason": reason }),
        )
        .await;
    }

    /// Emit a recording routing-label frame (see `src/recording.rs`).
    pub async fn recording_metadata(&mut self, tab_id: i64, is_final: bool) {
        self.send_event(
            crate::extension_protocol::RECORDING_DATA,
            json!({ "tabId": tab_id, "final": is_final }),
        )
        .await;
    }

    /// Send one binary recording chunk.
    pub async fn send_binary(&mut self, data: Bytes) {
        self.write
            .send(Message::Binary(data.to_vec().into()))
            .await
            .expect("send binary chunk");
    }

    /// Forward a CDP event tagged by `tabId` (e.g. `Page.frameNavigated`).
    pub async fn send_cdp_event(&mut self, tab_id: i64, method: &str, params: Value) {
        let envelope = Envelope::event(method, params).with_session(Some(tab_id.to_string()));
        let text = envelope.to_text().expect("serialize cdp event");
        self.write
            .send(Message::Text(text.into()))
            .await
            .expect("send cdp event");
    }

    /// Receive the next frame addressed to the extension, parsed as a
    /// command envelope. Panics on a non-text frame or a closed socket —
    /// tests should know exactly what they expect next.
    pub async fn recv_command(&mut self) -> Envelope {
        loop {
            match self.read.next().await.expect("extension socket closed") {
                Ok(Message::Text(text)) => return Envelope::parse(&text).expect("valid envelope"),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(other) => panic!("unexpected frame from relay: {other:?}"),
                Err(err) => panic!("extension socket error: {err}"),
            }
        }
    }

    /// Answer a command the relay forwarded, echoing its `id`.
    pub async fn answer(&mut self, id: u64, result: Value) {
        let envelope = Envelope::result(id, result);
        let text = envelope.to_text().expect("serialize response");
        self.write
            .send(Message::Text(text.into()))
            .await
            .expect("send response");
    }

    pub async fn answer_error(&mut self, id: u64, error: Value) {
        let envelope = Envelope::error(id, error);
        let text = envelope.to_text().expect("serialize error response");
        self.write
            .send(Message::Text(text.into()))
            .await
            .expect("send error response");
    }

    pub async fn close(mut self) {
        let _ = self.write.send(Message::Close(None)).await;
    }
}
