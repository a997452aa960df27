//! Per-connection client state: identity, subscriptions, and ownership,
//! all scoped to the lifetime of a single WebSocket connection.

use std::collections::HashSet;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Client {
    pub connection_id: Uuid,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub authenticated_at: Option<Instant>,
    pub is_local: bool,
    pub session_subscriptions: HashSet<Uuid>,
    pub owned_sessions: HashSet<Uuid>,
    pub service_subscriptions: HashSet<String>,
}

impl Client {
    pub fn new(is_local: bool) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            device_id: None,
            device_name: None,
            authenticated_at: None,
            is_local,
            session_subscriptions: HashSet::new(),
            owned_sessions: HashSet::new(),
            service_subscriptions: HashSet::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated_at.is_some()
    }

    pub fn authenticate(&mut self, device_id: String, device_name: Option<String>) {
        self.device_id = Some(device_id);
        self.device_name = device_name;
        self.authenticated_at = Some(Instant::now());
    }

    pub fn subscribe_session(&mut self, session_id: Uuid) {
        self.session_subscriptions.insert(session_id);
    }

    pub fn unsubscribe_session(&mut self, session_id: Uuid) {
        self.session_subscriptions.remove(&session_id);
    }

    pub fn owns_session(&self, session_id: Uuid) -> bool {
        self.owned_sessions.contains(&session_id)
    }

    pub fn claim_session(&mut self, session_id: Uuid) {
        self.owned_sessions.insert(session_id);
        self.session_subscriptions.insert(session_id);
    }

    pub fn release_session(&mut self, session_id: Uuid) {
        self.owned_sessions.remove(&session_id);
        self.session_subscriptions.remove(&session_id);
    }

    pub fn subscribe_service(&mut self, service_id: &str) {
        self.service_subscriptions.insert(service_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_client_is_unauthenticated() {
        let client = Client::new(false);
        assert!(!client.is_authenticated());
    }

    #[test]
    fn test_authenticate_sets_device_identity() {
        let mut client = Client::new(false);
        client.authenticate("device-1".into(), Some("Pixel".into()));
        assert!(client.is_authenticated());
        assert_eq!(client.device_id.as_deref(), Some("device-1"));
    }

    #[test]
    fn test_claim_session_also_subscribes() {
        let mut client = Client::new(true);
        let id = Uuid::new_v4();
        client.claim_session(id);
        assert!(client.owns_session(id));
        assert!(client.session_subscriptions.contains(&id));
    }

    #[test]
    fn test_release_session_clears_ownership_and_subscription() {
        let mut client = Client::new(true);
        let id = Uuid::new_v4();
        client.claim_session(id);
        client.release_session(id);
        assert!(!client.owns_session(id));
        assert!(!client.session_subscriptions.contains(&id));
    }
}
