//! Process-wide PTY-session-to-device ownership, surviving any single
//! connection's lifetime.
//!
//! This is the one piece of state every connection handler needs to agree
//! on, so it lives behind a single mutex rather than being threaded through
//! call sites by reference.

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct SessionRegistry {
    owners: Mutex<HashMap<Uuid, String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, session_id: Uuid, device_id: &str) {
        self.owners
            .lock()
            .expect("session registry lock poisoned")
            .insert(session_id, device_id.to_string());
    }

    pub fn owner(&self, session_id: Uuid) -> Option<String> {
        self.owners
            .lock()
            .expect("session registry lock poisoned")
            .get(&session_id)
            .cloned()
    }

    pub fn release(&self, session_id: Uuid) {
        self.owners
            .lock()
            .expect("session registry lock poisoned")
            .remove(&session_id);
    }

    pub fn sessions_owned_by(&self, device_id: &str) -> Vec<Uuid> {
        self.owners
            .lock()
            .expect("session registry lock poisoned")
            .iter()
            .filter(|(_, owner)| owner.as_str() == device_id)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_then_owner() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.claim(id, "device-a");
        assert_eq!(registry.owner(id).as_deref(), Some("device-a"));
    }

    #[test]
    fn test_release_clears_ownership() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.claim(id, "device-a");
        registry.release(id);
        assert_eq!(registry.owner(id), None);
    }

    #[test]
    fn test_sessions_owned_by_is_derived() {
        let registry = SessionRegistry::new();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let s3 = Uuid::new_v4();
        registry.claim(s1, "device-a");
        registry.claim(s2, "device-a");
        registry.claim(s3, "device-b");

        let mut owned = registry.sessions_owned_by("device-a");
        owned.sort();
        let mut expected = vec![s1, s2];
        expected.sort();
        assert_eq!(owned, expected);
    }

    #[test]
    fn test_unknown_session_has_no_owner() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.owner(Uuid::new_v4()), None);
    }
}
