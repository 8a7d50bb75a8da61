//! Test WebSocket client.
//!
//! Sends intents as JSON frames and asserts on the events pushed back.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// A test relay client.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect to a test server.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (ws, _response) = connect_async(url).await?;
        Ok(Self { ws })
    }

    /// Connect with an `Origin` header.
    ///
    /// A handshake refusal surfaces as `tungstenite::Error::Http`.
    #[allow(dead_code)]
    pub async fn connect_with_origin(
        url: &str,
        origin: &str,
    ) -> Result<Self, tokio_tungstenite::tungstenite::Error> {
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Origin",
            http::HeaderValue::from_str(origin).map_err(http::Error::from)?,
        );
        let (ws, _response) = connect_async(request).await?;
        Ok(Self { ws })
    }

    /// Send a raw text frame.
    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Send one `{event, data}` frame.
    pub async fn send(&mut self, event: &str, data: Value) -> anyhow::Result<()> {
        self.send_raw(&json!({ "event": event, "data": data }).to_string())
            .await
    }

    /// Receive the next event.
    pub async fn recv(&mut self) -> anyhow::Result<Value> {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    /// Receive the next event, skipping control frames.
    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<Value> {
        loop {
            let frame = timeout(dur, self.ws.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
            match frame {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(_) => anyhow::bail!("connection closed"),
                _ => continue,
            }
        }
    }

    /// Receive events until one named `event` arrives; returns that one.
    pub async fn recv_event(&mut self, event: &str) -> anyhow::Result<Value> {
        loop {
            let value = self.recv().await?;
            if value["event"] == event {
                return Ok(value);
            }
        }
    }

    /// Assert nothing arrives within `dur`.
    #[allow(dead_code)]
    pub async fn expect_silence(&mut self, dur: Duration) -> anyhow::Result<()> {
        match self.recv_timeout(dur).await {
            Ok(value) => anyhow::bail!("expected silence, got {}", value),
            Err(_) => Ok(()),
        }
    }

    /// Send `join` and wait for the end of the join sequence.
    ///
    /// Returns every event up to `message_history` on success, or the
    /// `join_error` on rejection.
    pub async fn join(&mut self, name: &str, credential: &str) -> anyhow::Result<Vec<Value>> {
        self.send("join", json!({ "name": name, "credential": credential }))
            .await?;

        let mut events = Vec::new();
        loop {
            let value = self.recv().await?;
            let event = value["event"].as_str().unwrap_or_default().to_string();
            events.push(value);
            match event.as_str() {
                "message_history" | "join_error" => return Ok(events),
                _ => {}
            }
        }
    }

    /// Send a `send_message` intent.
    #[allow(dead_code)]
    pub async fn say(&mut self, from: &str, to: &str, body: &str) -> anyhow::Result<()> {
        self.send("send_message", json!({ "from": from, "to": to, "body": body }))
            .await
    }

    /// Send a `leave` intent.
    #[allow(dead_code)]
    pub async fn leave(&mut self) -> anyhow::Result<()> {
        self.send_raw(r#"{"event":"leave"}"#).await
    }

    /// Close the socket.
    #[allow(dead_code)]
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
