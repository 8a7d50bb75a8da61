//! Connection - handles one WebSocket client.
//!
//! ```text
//!   inbound frames ──► ClientIntent::parse ──► handlers::dispatch
//!                                                    │
//!           ┌──────────── tokio::select! ◄───────────┘
//!           │                    ▲
//!           ▼                    │ Matrix::push (try_send)
//!   outbound frames ◄── serde_json ◄── mpsc queue
//! ```
//!
//! Intents are handled one at a time, in arrival order. Pushes from other
//! connections land in the bounded queue and are written between intents.
//! A queue that overflows is closed by the Matrix, which ends the loop.

use crate::error::HandlerError;
use crate::handlers::{self, Context};
use crate::protocol::ClientIntent;
use crate::state::{ConnId, ConnectionState, Matrix};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, instrument, warn};

/// A client connection handler.
pub struct Connection {
    conn: ConnId,
    addr: SocketAddr,
    ws: WebSocketStream<TcpStream>,
    matrix: Arc<Matrix>,
}

impl Connection {
    pub fn new(
        conn: ConnId,
        addr: SocketAddr,
        ws: WebSocketStream<TcpStream>,
        matrix: Arc<Matrix>,
    ) -> Self {
        Self {
            conn,
            addr,
            ws,
            matrix,
        }
    }

    /// Run the connection until the client goes away.
    ///
    /// Whatever ends the loop, the disconnect path runs and the outbound
    /// queue is unregistered before returning.
    #[instrument(skip(self), fields(conn = %self.conn, addr = %self.addr), name = "connection")]
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            conn, ws, matrix, ..
        } = self;

        let (tx, mut rx) = mpsc::channel(matrix.config.outbound_queue);
        matrix.register_sender(&conn, tx);
        crate::metrics::connection_opened();

        let (mut writer, mut reader) = ws.split();
        let mut state = ConnectionState::new();

        let result: anyhow::Result<()> = loop {
            tokio::select! {
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&matrix, &conn, &mut state, &text).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => handle_text(&matrix, &conn, &mut state, text).await,
                        Err(_) => handlers::reject(
                            &matrix,
                            &conn,
                            None,
                            &HandlerError::Malformed("binary frame is not UTF-8".into()),
                        ),
                    },
                    Some(Ok(Message::Ping(_))) => {
                        // The pong is queued by the reader; flush it out.
                        if let Err(e) = writer.flush().await {
                            break Err(e.into());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client closed the connection");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                },
                event = rx.recv() => match event {
                    Some(event) => {
                        let text = match serde_json::to_string(&*event) {
                            Ok(text) => text,
                            Err(e) => break Err(e.into()),
                        };
                        if let Err(e) = writer.send(Message::Text(text)).await {
                            break Err(e.into());
                        }
                    }
                    // Matrix dropped our sender: the queue overflowed.
                    None => {
                        warn!("Closing connection that fell behind");
                        let _ = writer.close().await;
                        break Ok(());
                    }
                },
            }
        };

        handlers::disconnect(&matrix, &conn, &mut state).await;
        matrix.unregister_sender(&conn);
        crate::metrics::connection_closed();

        result
    }
}

/// Decode one text frame and hand it to the dispatcher.
async fn handle_text(matrix: &Arc<Matrix>, conn: &str, state: &mut ConnectionState, text: &str) {
    match ClientIntent::parse(text) {
        Ok(intent) => {
            let mut ctx = Context::new(conn, matrix, state);
            handlers::dispatch(&mut ctx, intent).await;
        }
        Err(e) => {
            let event = ClientIntent::peek_event(text);
            handlers::reject(matrix, conn, event.as_deref(), &e);
        }
    }
}
