//! Messaging handlers: `send_message` and `messages_read`.

use super::{Context, require_actor};
use crate::error::HandlerResult;
use crate::protocol::{ConversationPair, SendRequest};
use crate::services::delivery;
use tracing::debug;

/// Handler for `send_message`. The sender must be the bound identity.
pub(super) async fn send_message(ctx: &mut Context<'_>, req: SendRequest) -> HandlerResult {
    let identity = ctx.identity("send_message")?;
    require_actor(&req.from, &identity)?;

    let message = delivery::send(ctx.matrix, ctx.conn, &req.from, &req.to, &req.body).await?;
    debug!(
        message_id = message.id,
        from = %message.from,
        to = %message.to,
        status = ?message.status,
        "Message stored"
    );
    Ok(())
}

/// Handler for `messages_read`.
///
/// The reader is `to`: it marks everything it received from `from` as read.
pub(super) async fn messages_read(ctx: &mut Context<'_>, pair: ConversationPair) -> HandlerResult {
    let identity = ctx.identity("messages_read")?;
    require_actor(&pair.to, &identity)?;

    let ids = delivery::mark_read(ctx.matrix, &pair.from, &pair.to).await?;
    if !ids.is_empty() {
        debug!(from = %pair.from, to = %pair.to, count = ids.len(), "Messages read");
    }
    Ok(())
}
