//! Delivery engine: the `sent → delivered → read` lifecycle.
//!
//! Every status write goes through a forward-only conditional update, so a
//! status observed by any client is always a prefix of the lifecycle.

use crate::db::{DbError, DeliveryStatus, StoredMessage};
use crate::protocol::ServerEvent;
use crate::state::Matrix;
use tracing::{debug, info};

/// Persist and route a message from `from` to `to`.
///
/// `origin` is the sender's connection. The message becomes `delivered` only
/// once it is in the recipient's outbound queue; otherwise it stays `sent`
/// until the recipient's next join. The (possibly delivered) message is
/// always echoed back to `origin`.
pub async fn send(
    matrix: &Matrix,
    origin: &str,
    from: &str,
    to: &str,
    body: &str,
) -> Result<StoredMessage, DbError> {
    let mut message = matrix.db.messages().insert(from, to, body).await?;
    crate::metrics::record_message_sent();

    let Some(recipient) = matrix.sessions.connection_for(to) else {
        debug!(message_id = message.id, to = %to, "Recipient offline, message queued");
        matrix.push(origin, ServerEvent::ReceiveMessage(message.clone()));
        return Ok(message);
    };

    let mut delivered = message.clone();
    delivered.status = DeliveryStatus::Delivered;

    // A self-send is delivered by the echo below.
    let reached = recipient == origin
        || matrix.push(&recipient, ServerEvent::ReceiveMessage(delivered.clone()));

    if !reached {
        debug!(message_id = message.id, to = %to, "Recipient unreachable, message queued");
    } else if matrix
        .db
        .messages()
        .advance(message.id, DeliveryStatus::Delivered)
        .await?
    {
        message = delivered;
        crate::metrics::record_messages_delivered(1);
        matrix.push(
            origin,
            ServerEvent::MessageDelivered {
                message_id: message.id,
            },
        );
    } else if let Some(current) = matrix.db.messages().get(message.id).await? {
        // The recipient's join reconciled it first.
        message = current;
    }

    matrix.push(origin, ServerEvent::ReceiveMessage(message.clone()));
    Ok(message)
}

/// Mark every unread message from `from` to `to` as read.
///
/// Pushes one `messages_read` receipt to `from` if online and anything moved.
/// Returns the ids that moved; empty on a repeat call.
pub async fn mark_read(matrix: &Matrix, from: &str, to: &str) -> Result<Vec<i64>, DbError> {
    let ids = matrix.db.messages().mark_read(from, to).await?;
    if ids.is_empty() {
        return Ok(ids);
    }

    crate::metrics::record_messages_read(ids.len());
    matrix.push_to_identity(
        from,
        ServerEvent::MessagesRead {
            from: from.to_string(),
            to: to.to_string(),
            message_ids: ids.clone(),
        },
    );
    Ok(ids)
}

/// Deliver everything that was waiting for `recipient`.
///
/// Each original sender that is online gets a `message_delivered` per
/// message. Returns how many messages moved.
pub async fn reconcile(matrix: &Matrix, recipient: &str) -> Result<usize, DbError> {
    let moved = matrix.db.messages().deliver_pending(recipient).await?;
    if moved.is_empty() {
        return Ok(0);
    }

    crate::metrics::record_messages_delivered(moved.len());
    info!(name = %recipient, count = moved.len(), "Delivered queued messages");

    for (message_id, sender) in &moved {
        matrix.push_to_identity(
            sender,
            ServerEvent::MessageDelivered {
                message_id: *message_id,
            },
        );
    }
    Ok(moved.len())
}

/// Full conversation history of `name`, oldest first.
pub async fn history(matrix: &Matrix, name: &str) -> Result<Vec<StoredMessage>, DbError> {
    matrix.db.messages().history(name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_matrix;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::Receiver<Arc<ServerEvent>>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    fn connect(matrix: &Matrix, conn: &str, name: &str) -> mpsc::Receiver<Arc<ServerEvent>> {
        let (tx, rx) = mpsc::channel(32);
        matrix.register_sender(conn, tx);
        matrix.sessions.bind(name, conn).unwrap();
        rx
    }

    #[tokio::test]
    async fn send_to_online_recipient_delivers() {
        let matrix = test_matrix().await;
        let mut alice = connect(&matrix, "C1", "alice");
        let mut bob = connect(&matrix, "C2", "bob");

        let message = send(&matrix, "C1", "alice", "bob", "hi").await.unwrap();
        assert_eq!(message.status, DeliveryStatus::Delivered);

        assert_eq!(
            drain(&mut bob),
            vec![ServerEvent::ReceiveMessage(message.clone())]
        );
        assert_eq!(
            drain(&mut alice),
            vec![
                ServerEvent::MessageDelivered {
                    message_id: message.id
                },
                ServerEvent::ReceiveMessage(message),
            ]
        );
    }

    #[tokio::test]
    async fn recipient_with_full_queue_is_cut_off_and_message_stays_sent() {
        let matrix = test_matrix().await;
        let mut alice = connect(&matrix, "C1", "alice");
        let (tx, mut bob) = mpsc::channel(2);
        matrix.register_sender("C2", tx);
        matrix.sessions.bind("bob", "C2").unwrap();
        for _ in 0..2 {
            assert!(matrix.push("C2", ServerEvent::Typing { from: "carol".into() }));
        }

        let message = send(&matrix, "C1", "alice", "bob", "lost").await.unwrap();
        assert_eq!(message.status, DeliveryStatus::Sent);
        let stored = matrix.db.messages().get(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);

        // No receipt for a message bob never got; only the echo.
        assert_eq!(
            drain(&mut alice),
            vec![ServerEvent::ReceiveMessage(message.clone())]
        );

        // bob's queue is closed after the backlog, which ends his connection.
        assert!(!matrix.senders.contains_key("C2"));
        assert_eq!(drain(&mut bob).len(), 2);
        assert!(bob.recv().await.is_none());

        // His next join picks the message up.
        matrix.sessions.release("bob", "C2");
        assert_eq!(reconcile(&matrix, "bob").await.unwrap(), 1);
        let history = history(&matrix, "bob").await.unwrap();
        assert_eq!(history[0].id, message.id);
        assert_eq!(history[0].status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn send_to_offline_recipient_stays_sent() {
        let matrix = test_matrix().await;
        let mut alice = connect(&matrix, "C1", "alice");

        let message = send(&matrix, "C1", "alice", "bob", "later").await.unwrap();
        assert_eq!(message.status, DeliveryStatus::Sent);
        assert_eq!(drain(&mut alice), vec![ServerEvent::ReceiveMessage(message)]);
    }

    #[tokio::test]
    async fn self_send_is_echoed_once() {
        let matrix = test_matrix().await;
        let mut alice = connect(&matrix, "C1", "alice");

        let message = send(&matrix, "C1", "alice", "alice", "note").await.unwrap();
        let events = drain(&mut alice);
        let receipts = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::ReceiveMessage(_)))
            .count();
        assert_eq!(receipts, 1);
        assert!(events.contains(&ServerEvent::MessageDelivered {
            message_id: message.id
        }));
    }

    #[tokio::test]
    async fn reconcile_notifies_online_senders() {
        let matrix = test_matrix().await;
        let mut alice = connect(&matrix, "C1", "alice");

        let first = send(&matrix, "C1", "alice", "bob", "1").await.unwrap();
        let second = send(&matrix, "C1", "alice", "bob", "2").await.unwrap();
        send(&matrix, "C9", "carol", "bob", "3").await.unwrap();
        drain(&mut alice);

        assert_eq!(reconcile(&matrix, "bob").await.unwrap(), 3);
        assert_eq!(
            drain(&mut alice),
            vec![
                ServerEvent::MessageDelivered {
                    message_id: first.id
                },
                ServerEvent::MessageDelivered {
                    message_id: second.id
                },
            ]
        );

        assert_eq!(reconcile(&matrix, "bob").await.unwrap(), 0);
        let history = history(&matrix, "bob").await.unwrap();
        assert!(history.iter().all(|m| m.status == DeliveryStatus::Delivered));
    }

    #[tokio::test]
    async fn mark_read_pushes_receipt_once() {
        let matrix = test_matrix().await;
        let mut alice = connect(&matrix, "C1", "alice");

        let first = send(&matrix, "C1", "alice", "bob", "1").await.unwrap();
        let second = send(&matrix, "C1", "alice", "bob", "2").await.unwrap();
        drain(&mut alice);

        let ids = mark_read(&matrix, "alice", "bob").await.unwrap();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(
            drain(&mut alice),
            vec![ServerEvent::MessagesRead {
                from: "alice".into(),
                to: "bob".into(),
                message_ids: vec![first.id, second.id],
            }]
        );

        assert!(mark_read(&matrix, "alice", "bob").await.unwrap().is_empty());
        assert!(drain(&mut alice).is_empty());
    }

    #[tokio::test]
    async fn read_never_regresses_to_delivered() {
        let matrix = test_matrix().await;
        let message = send(&matrix, "C1", "alice", "bob", "x").await.unwrap();

        mark_read(&matrix, "alice", "bob").await.unwrap();
        assert_eq!(reconcile(&matrix, "bob").await.unwrap(), 0);

        let stored = matrix.db.messages().get(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Read);
    }
}
