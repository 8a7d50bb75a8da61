//! Typing indicator handler for `typing` and `stop_typing`.

use super::{Context, require_actor};
use crate::error::HandlerResult;
use crate::protocol::ConversationPair;
use crate::services;

pub(super) fn typing(ctx: &mut Context<'_>, pair: ConversationPair, active: bool) -> HandlerResult {
    let intent = if active { "typing" } else { "stop_typing" };
    let identity = ctx.identity(intent)?;
    require_actor(&pair.from, &identity)?;

    services::typing::relay(ctx.matrix, &pair.from, &pair.to, active);
    Ok(())
}
