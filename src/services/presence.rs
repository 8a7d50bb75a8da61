//! Presence broadcaster.
//!
//! Every presence change re-sends the full roster to every bound connection.
//! `online` comes from the session registry; `lastSeenAt` from the identity
//! store, and is always null for an online identity.

use crate::db::DbError;
use crate::protocol::{RosterEntry, ServerEvent};
use crate::state::Matrix;
use tracing::debug;

/// Current roster of every known identity, in registration order.
pub async fn roster(matrix: &Matrix) -> Result<Vec<RosterEntry>, DbError> {
    let identities = matrix.db.identities().list().await?;

    Ok(identities
        .into_iter()
        .map(|identity| {
            let online = matrix.sessions.is_online(&identity.name);
            RosterEntry {
                last_seen_at: if online { None } else { identity.last_seen_at },
                name: identity.name,
                online,
            }
        })
        .collect())
}

/// Recompute the roster and push it to every bound connection.
///
/// Returns the number of connections reached.
pub async fn broadcast_roster(matrix: &Matrix) -> Result<usize, DbError> {
    crate::metrics::set_online(matrix.sessions.len());
    if matrix.sessions.is_empty() {
        return Ok(0);
    }

    let entries = roster(matrix).await?;

    let reached = matrix.broadcast_bound(ServerEvent::Users(entries));
    debug!(reached, "Roster broadcast");
    Ok(reached)
}
