//! Gateway - WebSocket listener that accepts incoming connections.
//!
//! The Gateway binds the listen socket, performs the WebSocket handshake
//! (including the Origin allow-list check) and spawns one Connection task per
//! client.

use crate::config::ListenConfig;
use crate::network::Connection;
use crate::state::Matrix;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};

/// The Gateway accepts incoming WebSocket connections and spawns handlers.
pub struct Gateway {
    listener: TcpListener,
    listen: Arc<ListenConfig>,
    matrix: Arc<Matrix>,
}

impl Gateway {
    /// Bind the gateway to the configured address.
    pub async fn bind(listen: ListenConfig, matrix: Arc<Matrix>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen.address).await?;
        info!(address = %listener.local_addr()?, "WebSocket listener bound");

        Ok(Self {
            listener,
            listen: Arc::new(listen),
            matrix,
        })
    }

    /// Address actually bound (useful when the configured port is 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(%addr, "WebSocket connection attempt");
                    let matrix = Arc::clone(&self.matrix);
                    let listen = Arc::clone(&self.listen);
                    tokio::spawn(Self::handshake(stream, addr, listen, matrix));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept WebSocket connection");
                }
            }
        }
    }

    async fn handshake(
        stream: TcpStream,
        addr: SocketAddr,
        listen: Arc<ListenConfig>,
        matrix: Arc<Matrix>,
    ) {
        let origin_check = |req: &Request, response: Response| {
            let origin = req.headers().get("Origin").and_then(|o| o.to_str().ok());
            if listen.origin_allowed(origin) {
                return Ok(response);
            }

            warn!(%addr, origin = origin.unwrap_or("<none>"), "WebSocket origin rejected");
            let mut rejection = ErrorResponse::new(Some("Origin not allowed".to_string()));
            *rejection.status_mut() = http::StatusCode::FORBIDDEN;
            Err(rejection)
        };

        match accept_hdr_async(stream, origin_check).await {
            Ok(ws_stream) => {
                let conn = matrix.conn_ids.next();
                info!(conn = %conn, %addr, "WebSocket handshake successful");

                let connection = Connection::new(conn.clone(), addr, ws_stream, matrix);
                if let Err(e) = connection.run().await {
                    warn!(conn = %conn, %addr, error = %e, "WebSocket connection error");
                }
                info!(conn = %conn, %addr, "WebSocket connection closed");
            }
            Err(e) => {
                warn!(%addr, error = %e, "WebSocket handshake failed");
            }
        }
    }
}
