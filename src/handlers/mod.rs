//! Client intent handlers.
//!
//! Every decoded [`ClientIntent`] is routed by [`dispatch`] to exactly one
//! handler. Handlers enforce who may act (bound connection, acting identity)
//! and delegate the effect to [`crate::services`].
//!
//! Errors never escape `dispatch`: they are logged, counted, and turned into
//! a reply to the originating connection.

mod connection;
mod messaging;
mod typing;

pub use connection::disconnect;

use crate::error::HandlerError;
use crate::protocol::ClientIntent;
use crate::state::{ConnectionState, Matrix};
use crate::telemetry::{IntentTimer, spans};
use std::sync::Arc;
use tracing::{Instrument, debug, warn};

/// Per-intent handler context.
pub struct Context<'a> {
    /// Originating connection.
    pub conn: &'a str,
    /// Shared relay state.
    pub matrix: &'a Arc<Matrix>,
    /// Lifecycle state of the originating connection.
    pub state: &'a mut ConnectionState,
}

impl<'a> Context<'a> {
    pub fn new(conn: &'a str, matrix: &'a Arc<Matrix>, state: &'a mut ConnectionState) -> Self {
        Self {
            conn,
            matrix,
            state,
        }
    }

    /// Bound identity, or `NotJoined` naming the refused intent.
    fn identity(&self, intent: &'static str) -> Result<String, HandlerError> {
        self.state
            .identity()
            .map(String::from)
            .ok_or(HandlerError::NotJoined(intent))
    }
}

/// The acting party of an intent must be the connection's own identity.
fn require_actor(claimed: &str, bound: &str) -> Result<(), HandlerError> {
    if claimed == bound {
        Ok(())
    } else {
        Err(HandlerError::IdentityMismatch {
            claimed: claimed.to_string(),
            bound: bound.to_string(),
        })
    }
}

/// Handle one intent from `ctx.conn`.
pub async fn dispatch(ctx: &mut Context<'_>, intent: ClientIntent) {
    let name = intent.name();
    let span = spans::intent(name, ctx.conn, ctx.state.identity());
    let _timer = IntentTimer::new(name);

    let result = async {
        match intent {
            ClientIntent::Join(req) => connection::join(ctx, req).await,
            ClientIntent::Leave => connection::leave(ctx).await,
            ClientIntent::SendMessage(req) => messaging::send_message(ctx, req).await,
            ClientIntent::MessagesRead(pair) => messaging::messages_read(ctx, pair).await,
            ClientIntent::Typing(pair) => typing::typing(ctx, pair, true),
            ClientIntent::StopTyping(pair) => typing::typing(ctx, pair, false),
        }
    }
    .instrument(span)
    .await;

    if let Err(error) = result {
        reject(ctx.matrix, ctx.conn, Some(name), &error);
    }
}

/// Report a failed intent to its originating connection.
///
/// `event` is the wire name of the failed intent, when known.
pub fn reject(matrix: &Matrix, conn: &str, event: Option<&str>, error: &HandlerError) {
    let code = error.error_code();
    let label = event.unwrap_or("unknown");
    crate::metrics::record_intent_error(label, code);

    if error.is_client_error() {
        debug!(conn = %conn, event = label, code, error = %error, "Intent rejected");
    } else {
        warn!(conn = %conn, event = label, code, error = %error, "Intent failed");
    }

    matrix.push(conn, error.to_reply(event));
}
