//! The Matrix - central shared state for the relay.
//!
//! The Matrix holds the session registry, the per-connection outbound queues
//! and handles to the durable store, reachable from every connection task.

use crate::config::Config;
use crate::db::Database;
use crate::protocol::ServerEvent;
use crate::security::Credentials;
use crate::state::{ConnId, ConnIdGenerator, SessionRegistry};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Sending half of a connection's outbound queue.
pub type EventSender = mpsc::Sender<Arc<ServerEvent>>;

/// The Matrix - central shared state container.
pub struct Matrix {
    /// Identity name → connection id for online identities.
    pub sessions: SessionRegistry,

    /// Connection id → outbound queue, for every open connection.
    pub senders: DashMap<ConnId, EventSender>,

    /// Identity and message stores.
    pub db: Database,

    /// Credential hasher.
    pub credentials: Credentials,

    /// This server's identity.
    pub server_info: ServerInfo,

    /// Connection id generator.
    pub conn_ids: ConnIdGenerator,

    pub config: MatrixConfig,
}

/// Configuration accessible to handlers via Matrix.
#[derive(Debug, Clone)]
pub struct MatrixConfig {
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
}

/// This server's identity information.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub started_at: DateTime<Utc>,
}

impl Matrix {
    /// Create a new Matrix over an opened database.
    pub fn new(config: &Config, db: Database, credentials: Credentials) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            senders: DashMap::new(),
            db,
            credentials,
            server_info: ServerInfo {
                name: config.server.name.clone(),
                started_at: Utc::now(),
            },
            conn_ids: ConnIdGenerator::new(),
            config: MatrixConfig {
                outbound_queue: config.listen.outbound_queue.max(1),
            },
        }
    }

    /// Register a connection's outbound queue for routing.
    pub fn register_sender(&self, conn: &str, sender: EventSender) {
        self.senders.insert(conn.to_string(), sender);
    }

    /// Unregister a connection's outbound queue.
    pub fn unregister_sender(&self, conn: &str) {
        self.senders.remove(conn);
    }

    /// Push an event to one connection.
    ///
    /// Never waits: a full queue drops the event and disconnects its owner,
    /// and a gone connection is ignored. Returns whether the event was
    /// enqueued.
    pub fn send_to(&self, conn: &str, event: Arc<ServerEvent>) -> bool {
        let Some(sender) = self.senders.get(conn).map(|s| s.value().clone()) else {
            debug!(conn = %conn, event = event.name(), "Push to unknown connection dropped");
            crate::metrics::record_push_dropped("gone");
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                crate::metrics::record_push_dropped("full");
                self.request_disconnect(conn, event.name());
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!(conn = %conn, event = event.name(), "Outbound queue closed, event dropped");
                crate::metrics::record_push_dropped("closed");
                false
            }
        }
    }

    /// Cut off a connection that cannot keep up.
    ///
    /// Dropping the registered sender closes the queue once it drains; the
    /// connection task then runs the disconnect path, and the client rejoins
    /// with a fresh history.
    pub fn request_disconnect(&self, conn: &str, dropped: &str) {
        if self.senders.remove(conn).is_some() {
            warn!(conn = %conn, event = dropped, "Outbound queue full, disconnecting");
        }
    }

    /// Push an owned event to one connection.
    pub fn push(&self, conn: &str, event: ServerEvent) -> bool {
        self.send_to(conn, Arc::new(event))
    }

    /// Push an event to the connection bound to `name`, if online.
    pub fn push_to_identity(&self, name: &str, event: ServerEvent) -> bool {
        match self.sessions.connection_for(name) {
            Some(conn) => self.send_to(&conn, Arc::new(event)),
            None => false,
        }
    }

    /// Push one event to every bound connection. Returns the number enqueued.
    pub fn broadcast_bound(&self, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        self.sessions
            .bound_connections()
            .iter()
            .filter(|conn| self.send_to(conn, Arc::clone(&event)))
            .count()
    }
}
