//! Typing relay. Stateless: signals are forwarded if the target is online
//! and dropped otherwise.

use crate::protocol::ServerEvent;
use crate::state::Matrix;

/// Forward a typing (`active`) or stop-typing signal from `from` to `to`.
///
/// Returns whether the signal was handed to `to`'s connection.
pub fn relay(matrix: &Matrix, from: &str, to: &str, active: bool) -> bool {
    let event = if active {
        ServerEvent::Typing {
            from: from.to_string(),
        }
    } else {
        ServerEvent::StopTyping {
            from: from.to_string(),
        }
    };
    matrix.push_to_identity(to, event)
}
