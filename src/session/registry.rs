//! # Session Registry
//!
//! The bounded set of concurrently active relay sessions. This is the only
//! state shared across sessions, so admission and removal each take one
//! short critical section; the capacity check and the insert happen under
//! the same lock so the cap cannot be exceeded under concurrent connects.

use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

/// Tracks active session ids and enforces the admission cap.
pub struct SessionRegistry {
    max_sessions: usize,
    active: Mutex<HashSet<String>>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Reserve a slot for a new session.
    ///
    /// ## Returns:
    /// - **true**: The slot is reserved; the caller must `remove` it on teardown
    /// - **false**: At capacity (or duplicate id); the caller must reject the connection
    pub fn admit(&self, session_id: &str) -> bool {
        let mut active = self.active.lock().unwrap();
        if active.len() >= self.max_sessions {
            debug!(
                "admission rejected for {}: {}/{} sessions active",
                session_id,
                active.len(),
                self.max_sessions
            );
            return false;
        }
        active.insert(session_id.to_string())
    }

    /// Release a session slot. Idempotent; removing an absent id is a no-op.
    pub fn remove(&self, session_id: &str) -> bool {
        self.active.lock().unwrap().remove(session_id)
    }

    /// Number of currently active sessions.
    pub fn size(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_succeeds_below_cap() {
        let registry = SessionRegistry::new(2);
        assert!(registry.admit("a"));
        assert_eq!(registry.size(), 1);
        assert!(registry.admit("b"));
        assert_eq!(registry.size(), 2);
    }

    #[test]
    fn test_admit_rejects_at_cap() {
        let registry = SessionRegistry::new(2);
        assert!(registry.admit("a"));
        assert!(registry.admit("b"));
        assert!(!registry.admit("c"));
        // A rejected admission must not change the active count.
        assert_eq!(registry.size(), 2);
    }

    #[test]
    fn test_slot_reusable_after_remove() {
        let registry = SessionRegistry::new(2);
        assert!(registry.admit("a"));
        assert!(registry.admit("b"));
        assert!(registry.remove("a"));
        assert_eq!(registry.size(), 1);
        assert!(registry.admit("c"));
        assert_eq!(registry.size(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new(2);
        assert!(registry.admit("a"));
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_duplicate_id_not_admitted_twice() {
        let registry = SessionRegistry::new(2);
        assert!(registry.admit("a"));
        assert!(!registry.admit("a"));
        assert_eq!(registry.size(), 1);
    }
}
