//! Token validation and the 10-second authentication window.
//!
//! Token comparison is delegated to [`AuthToken::constant_time_eq`], which
//! rejects a length mismatch before looking at any byte — this module just
//! owns the current token and the timeout constant so the gateway's
//! per-connection task has a single thing to call.

use gateway_core::AuthToken;
use std::sync::RwLock;
use std::time::Duration;

pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AuthGate {
    token: RwLock<AuthToken>,
}

impl AuthGate {
    pub fn new(token: AuthToken) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    /// Constant-time check of a candidate token's raw bytes against the
    /// current token.
    pub fn validate(&self, candidate: &[u8]) -> bool {
        let token = self.token.read().expect("auth token lock poisoned");
        token.constant_time_eq(candidate)
    }

    /// Replace the token that future auth attempts are checked against.
    /// Connections already authenticated under the old token are unaffected
    /// until they reconnect.
    pub fn set_token(&self, token: AuthToken) {
        *self.token.write().expect("auth token lock poisoned") = token;
    }

    pub fn current_token(&self) -> AuthToken {
        *self.token.read().expect("auth token lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_current_token() {
        let token = AuthToken::generate();
        let gate = AuthGate::new(token);
        assert!(gate.validate(token.as_bytes()));
    }

    #[test]
    fn test_validate_rejects_wrong_token() {
        let gate = AuthGate::new(AuthToken::generate());
        let other = AuthToken::generate();
        assert!(!gate.validate(other.as_bytes()));
    }

    #[test]
    fn test_validate_rejects_wrong_length() {
        let token = AuthToken::generate();
        let gate = AuthGate::new(token);
        assert!(!gate.validate(&token.as_bytes()[..31]));
    }

    #[test]
    fn test_rotation_invalidates_old_token() {
        let old = AuthToken::generate();
        let gate = AuthGate::new(old);
        let new = AuthToken::generate();
        gate.set_token(new);
        assert!(!gate.validate(old.as_bytes()));
        assert!(gate.validate(new.as_bytes()));
    }
}
