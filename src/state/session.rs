//! Session registry: which identity is bound to which connection.
//!
//! This is the single source of truth for "who is reachable right now".
//! All mutations are synchronous `DashMap` entry operations, so they complete
//! without yielding and are linearizable per identity name.
//!
//! Sequences that span the registry and the durable store (join, leave,
//! disconnect) additionally run under the identity's async lock via
//! [`SessionRegistry::with_identity_lock`], so the store's presence mirror is
//! written in the same order as the bindings change.

use crate::state::ConnId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{name} is already bound to {existing}")]
    AlreadyBound { name: String, existing: ConnId },
}

/// Identity name → connection id, for online identities only.
#[derive(Default)]
pub struct SessionRegistry {
    bindings: DashMap<String, ConnId>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `conn`.
    ///
    /// Fails if `name` already has a live binding; the existing binding is
    /// left in place.
    pub fn bind(&self, name: &str, conn: &str) -> Result<(), SessionError> {
        match self.bindings.entry(name.to_string()) {
            Entry::Occupied(existing) => Err(SessionError::AlreadyBound {
                name: name.to_string(),
                existing: existing.get().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(conn.to_string());
                Ok(())
            }
        }
    }

    /// Remove `name`'s binding, whatever connection holds it. No-op if absent.
    #[cfg(test)]
    pub fn unbind(&self, name: &str) -> Option<ConnId> {
        self.bindings.remove(name).map(|(_, conn)| conn)
    }

    /// Remove `name`'s binding only if it still belongs to `conn`.
    ///
    /// Returns whether a binding was removed.
    pub fn release(&self, name: &str, conn: &str) -> bool {
        self.bindings.remove_if(name, |_, bound| bound == conn).is_some()
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn connection_for(&self, name: &str) -> Option<ConnId> {
        self.bindings.get(name).map(|conn| conn.value().clone())
    }

    /// Connection ids of every bound session.
    pub fn bound_connections(&self) -> Vec<ConnId> {
        self.bindings.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of online identities.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Run `task` while holding `name`'s identity lock.
    ///
    /// Join, leave and disconnect sequences for one name never interleave.
    /// The lock entry is dropped again once nobody holds or awaits it.
    pub async fn with_identity_lock<F, T>(&self, name: &str, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self.identity_lock(name);
        let result = {
            let _guard = lock.lock().await;
            task.await
        };
        drop(lock);
        self.prune_lock(name);
        result
    }

    fn identity_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Forget `name`'s lock if the map holds the only reference.
    fn prune_lock(&self, name: &str) {
        self.locks
            .remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn bind_and_lookup() {
        let registry = SessionRegistry::new();
        assert!(!registry.is_online("bob"));

        registry.bind("bob", "C1").unwrap();
        assert!(registry.is_online("bob"));
        assert_eq!(registry.connection_for("bob").as_deref(), Some("C1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn second_bind_fails_and_keeps_first() {
        let registry = SessionRegistry::new();
        registry.bind("bob", "C1").unwrap();

        let err = registry.bind("bob", "C2").unwrap_err();
        assert_eq!(
            err,
            SessionError::AlreadyBound {
                name: "bob".into(),
                existing: "C1".into(),
            }
        );
        assert_eq!(registry.connection_for("bob").as_deref(), Some("C1"));
    }

    #[test]
    fn names_are_case_sensitive() {
        let registry = SessionRegistry::new();
        registry.bind("bob", "C1").unwrap();
        registry.bind("Bob", "C2").unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unbind_is_noop_when_absent() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.unbind("ghost"), None);

        registry.bind("bob", "C1").unwrap();
        assert_eq!(registry.unbind("bob").as_deref(), Some("C1"));
        assert_eq!(registry.unbind("bob"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn release_ignores_stale_connection() {
        let registry = SessionRegistry::new();
        registry.bind("bob", "C2").unwrap();

        assert!(!registry.release("bob", "C1"));
        assert!(registry.is_online("bob"));
        assert!(registry.release("bob", "C2"));
        assert!(!registry.is_online("bob"));
    }

    #[test]
    fn concurrent_binds_admit_exactly_one() {
        let registry = Arc::new(SessionRegistry::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.bind("bob", &format!("C{}", i)).is_ok()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn identity_lock_is_shared_per_name() {
        let registry = SessionRegistry::new();
        let a = registry.identity_lock("bob");
        let b = registry.identity_lock("bob");
        let c = registry.identity_lock("alice");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn lock_entries_are_dropped_after_use() {
        let registry = SessionRegistry::new();
        for name in ["bob", "mallory", "eve"] {
            let value = registry.with_identity_lock(name, async { 7 }).await;
            assert_eq!(value, 7);
        }
        assert!(registry.locks.is_empty());
    }

    #[tokio::test]
    async fn held_lock_survives_pruning() {
        let registry = Arc::new(SessionRegistry::new());
        let held = registry.identity_lock("bob");
        let guard = held.lock().await;

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.with_identity_lock("bob", async {}).await })
        };
        tokio::task::yield_now().await;

        registry.prune_lock("bob");
        assert!(registry.locks.contains_key("bob"));

        drop(guard);
        waiter.await.unwrap();
        drop(held);
        registry.prune_lock("bob");
        assert!(registry.locks.is_empty());
    }
}
