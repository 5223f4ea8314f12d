use super::{ConnectionHandle, ConnectionRegistry};
use crate::session::{Outbound, SessionSender};
use crate::ws::protocol::ServerEvent;

/// Add a connection to the registry.
pub fn register_connection(
    registry: &ConnectionRegistry,
    user_id: &str,
    session_id: &str,
    tx: SessionSender,
) {
    let mut entry = registry.entry(user_id.to_string()).or_default();
    entry.push(ConnectionHandle {
        session_id: session_id.to_string(),
        tx,
    });
    tracing::debug!(
        user_id = %user_id,
        session_id = %session_id,
        connections = entry.len(),
        "Connection registered"
    );
}

/// Remove a connection from the registry, dropping the user's entry when it
/// was the last one.
pub fn unregister_connection(registry: &ConnectionRegistry, user_id: &str, session_id: &str) {
    if let Some(mut connections) = registry.get_mut(user_id) {
        connections.retain(|c| c.session_id != session_id && !c.tx.is_closed());
    }
    registry.remove_if(user_id, |_, connections| connections.is_empty());

    tracing::debug!(
        user_id = %user_id,
        session_id = %session_id,
        "Connection unregistered"
    );
}

/// Send an event to every connection of a user except `skip_session`.
/// Returns the number of connections it was queued for.
pub fn send_to_user(
    registry: &ConnectionRegistry,
    user_id: &str,
    event: &ServerEvent,
    skip_session: Option<&str>,
) -> usize {
    let Some(connections) = registry.get(user_id) else {
        return 0;
    };
    let mut sent = 0;
    for conn in connections.value() {
        if Some(conn.session_id.as_str()) == skip_session {
            continue;
        }
        if conn.tx.send(Outbound::Event(event.clone())).is_ok() {
            sent += 1;
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::new_connection_registry;
    use tokio::sync::mpsc;

    #[test]
    fn test_register_send_unregister() {
        let registry = new_connection_registry();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        register_connection(&registry, "u1", "s1", tx1);
        register_connection(&registry, "u1", "s2", tx2);
        assert_eq!(registry.get("u1").map(|e| e.len()), Some(2));

        let event = ServerEvent::LeftRoom {
            room_id: "r1".into(),
        };
        assert_eq!(send_to_user(&registry, "u1", &event, Some("s1")), 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());

        unregister_connection(&registry, "u1", "s1");
        assert_eq!(registry.get("u1").map(|e| e.len()), Some(1));
        unregister_connection(&registry, "u1", "s2");
        assert!(registry.get("u1").is_none());
    }

    #[test]
    fn test_send_to_unknown_user() {
        let registry = new_connection_registry();
        let event = ServerEvent::LeftRoom {
            room_id: "r1".into(),
        };
        assert_eq!(send_to_user(&registry, "nobody", &event, None), 0);
    }
}
