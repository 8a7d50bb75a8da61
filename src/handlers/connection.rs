//! Connection lifecycle handlers: join, leave and disconnect.
//!
//! Join, leave and disconnect for one identity are serialized by the
//! identity's lock in the session registry, so the store's presence mirror
//! and the roster broadcast follow the binding changes in order.

use super::Context;
use crate::db::DbError;
use crate::error::{HandlerError, HandlerResult};
use crate::protocol::{JoinRequest, ServerEvent};
use crate::services::{delivery, presence};
use crate::state::{ConnectionState, Matrix};
use chrono::Utc;
use tracing::{error, info, warn};

/// Handler for the `join` intent.
pub(super) async fn join(ctx: &mut Context<'_>, req: JoinRequest) -> HandlerResult {
    if let Some(name) = ctx.state.identity() {
        return Err(HandlerError::AlreadyJoined(name.to_string()));
    }
    if !ctx.state.begin_join(&req.name) {
        return Err(HandlerError::Internal(format!(
            "join on connection in state {:?}",
            ctx.state
        )));
    }

    let admitted = admit(ctx.matrix, ctx.conn, &req).await;
    ctx.state.finish_join(admitted.is_ok());

    if let Err(e) = &admitted {
        crate::metrics::record_join_rejected(e.error_code());
        warn!(conn = %ctx.conn, name = %req.name, reason = e.error_code(), "Join rejected");
        return admitted;
    }

    after_join(ctx.matrix, ctx.conn, &req.name).await;
    Ok(())
}

/// Authenticate `req` and bind its identity to `conn`.
async fn admit(matrix: &Matrix, conn: &str, req: &JoinRequest) -> HandlerResult {
    matrix
        .sessions
        .with_identity_lock(&req.name, admit_locked(matrix, conn, req))
        .await
}

async fn admit_locked(matrix: &Matrix, conn: &str, req: &JoinRequest) -> HandlerResult {
    let identities = matrix.db.identities();
    match identities.find(&req.name).await? {
        None => {
            let hash = matrix.credentials.hash(&req.credential).await?;
            identities.create(&req.name, Some(&hash)).await?;
            info!(conn = %conn, name = %req.name, "Identity created");
        }
        Some(identity) => match identity.password_hash {
            None => {
                let hash = matrix.credentials.hash(&req.credential).await?;
                if !identities.backfill_credential(&req.name, &hash).await? {
                    return Err(HandlerError::Internal(format!(
                        "credential of {} changed during backfill",
                        req.name
                    )));
                }
                info!(conn = %conn, name = %req.name, "Legacy identity adopted credential");
            }
            Some(stored) => {
                if !matrix.credentials.verify(&req.credential, &stored).await? {
                    return Err(HandlerError::InvalidCredential);
                }
            }
        },
    }

    matrix
        .sessions
        .bind(&req.name, conn)
        .map_err(|_| HandlerError::AlreadyOnline(req.name.clone()))?;

    if let Err(e) = identities.mark_online(&req.name).await {
        matrix.sessions.release(&req.name, conn);
        return Err(e.into());
    }

    info!(conn = %conn, name = %req.name, "Joined");
    Ok(())
}

/// Post-join fan-out. The session is committed by now: failures are logged
/// and reported to the caller but never undo the binding.
async fn after_join(matrix: &Matrix, conn: &str, name: &str) {
    matrix.push(
        conn,
        ServerEvent::JoinSuccess {
            name: name.to_string(),
        },
    );

    if let Err(e) = presence::broadcast_roster(matrix).await {
        report_after_join(matrix, conn, name, "presence", e);
    }

    if let Err(e) = delivery::reconcile(matrix, name).await {
        report_after_join(matrix, conn, name, "reconcile", e);
    }

    match delivery::history(matrix, name).await {
        Ok(messages) => {
            matrix.push(conn, ServerEvent::MessageHistory(messages));
        }
        Err(e) => report_after_join(matrix, conn, name, "history", e),
    }
}

fn report_after_join(matrix: &Matrix, conn: &str, name: &str, step: &str, e: DbError) {
    error!(conn = %conn, name = %name, step, error = %e, "Post-join step failed");
    let err = HandlerError::from(e);
    crate::metrics::record_intent_error("join", err.error_code());
    matrix.push(conn, err.to_error_event(Some("join")));
}

/// Handler for the `leave` intent. A no-op unless the connection is bound.
pub(super) async fn leave(ctx: &mut Context<'_>) -> HandlerResult {
    let Some(name) = ctx.state.leave() else {
        return Ok(());
    };
    release_session(ctx.matrix, ctx.conn, &name).await?;
    info!(conn = %ctx.conn, name = %name, "Left");
    Ok(())
}

/// Transport closed: release whatever identity `conn` held.
///
/// Idempotent; a never-bound connection only transitions to `Closed`.
pub async fn disconnect(matrix: &Matrix, conn: &str, state: &mut ConnectionState) {
    if state.is_closed() {
        return;
    }
    let Some(name) = state.close() else {
        return;
    };

    match release_session(matrix, conn, &name).await {
        Ok(true) => info!(conn = %conn, name = %name, "Disconnected"),
        Ok(false) => {}
        Err(e) => error!(conn = %conn, name = %name, error = %e, "Disconnect cleanup failed"),
    }
}

/// Unbind `name` from `conn`, record it offline and broadcast presence.
///
/// Returns `false` without side effects if `conn` no longer holds `name`.
async fn release_session(matrix: &Matrix, conn: &str, name: &str) -> Result<bool, DbError> {
    matrix
        .sessions
        .with_identity_lock(name, release_locked(matrix, conn, name))
        .await
}

async fn release_locked(matrix: &Matrix, conn: &str, name: &str) -> Result<bool, DbError> {
    if !matrix.sessions.release(name, conn) {
        return Ok(false);
    }

    let stored = matrix.db.identities().mark_offline(name, Utc::now()).await;
    let broadcast = presence::broadcast_roster(matrix).await;
    stored?;
    broadcast?;
    Ok(true)
}
