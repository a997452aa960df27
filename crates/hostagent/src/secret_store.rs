//! Auth token storage.
//!
//! Tries the OS-native credential store first (Keychain / Secret Service /
//! Credential Manager via the `keyring` crate); falls back to a 0600 file
//! under the agent data directory when no platform backend is available.
//! Either way the token on disk/in-keyring is the only durable copy — logs
//! only ever see [`AuthToken::diagnostic_prefix`].

use gateway_core::error::AgentError;
use gateway_core::AuthToken;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SERVICE_NAME: &str = "remote-session-gateway";
const ACCOUNT_NAME: &str = "auth-token";

pub struct SecretStore {
    fallback_path: PathBuf,
}

impl SecretStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            fallback_path: data_dir.join("auth_token"),
        }
    }

    /// Return the current token, generating and persisting one on first use.
    pub fn get_auth_token(&self) -> Result<AuthToken, AgentError> {
        if let Some(token) = self.read()? {
            return Ok(token);
        }
        let token = AuthToken::generate();
        self.write(&token)?;
        info!(token_prefix = %token.diagnostic_prefix(), "generated new auth token");
        Ok(token)
    }

    /// Replace the stored token unconditionally. A failure to durably
    /// persist the new token must not hand it out as authoritative.
    pub fn rotate_auth_token(&self) -> Result<AuthToken, AgentError> {
        let token = AuthToken::generate();
        self.write(&token)?;
        info!(token_prefix = %token.diagnostic_prefix(), "rotated auth token");
        Ok(token)
    }

    /// Persist a token handed in from elsewhere (the config-migration path)
    /// as the current one, rather than generating a fresh value.
    pub fn adopt_token(&self, token: &AuthToken) -> Result<(), AgentError> {
        self.write(token)?;
        info!(token_prefix = %token.diagnostic_prefix(), "adopted auth token from legacy config");
        Ok(())
    }

    fn read(&self) -> Result<Option<AuthToken>, AgentError> {
        match self.keyring_entry().get_password() {
            Ok(hex) => return Ok(Some(AuthToken::from_hex(&hex)?)),
            Err(keyring::Error::NoEntry) => {}
            Err(e) => warn!(error = %e, "keyring backend unavailable, falling back to file"),
        }

        if !self.fallback_path.exists() {
            return Ok(None);
        }
        let hex = std::fs::read_to_string(&self.fallback_path)?;
        Ok(Some(AuthToken::from_hex(hex.trim())?))
    }

    fn write(&self, token: &AuthToken) -> Result<(), AgentError> {
        match self.keyring_entry().set_password(&token.to_hex()) {
            Ok(()) => return Ok(()),
            Err(e) => warn!(error = %e, "keyring backend unavailable, falling back to file"),
        }
        self.write_fallback_file(token)
    }

    fn write_fallback_file(&self, token: &AuthToken) -> Result<(), AgentError> {
        if let Some(parent) = self.fallback_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.fallback_path, token.to_hex())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = std::fs::metadata(&self.fallback_path)?.permissions();
            perm.set_mode(0o600);
            std::fs::set_permissions(&self.fallback_path, perm)?;
        }
        Ok(())
    }

    fn keyring_entry(&self) -> keyring::Entry {
        // Entry::new only fails on malformed service/account strings, both
        // of which are compile-time constants here.
        keyring::Entry::new(SERVICE_NAME, ACCOUNT_NAME).expect("static service/account names")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // The platform keyring isn't available in CI sandboxes, so these tests
    // exercise the file-fallback path directly.

    #[test]
    fn test_file_fallback_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path());
        let token = AuthToken::generate();
        store.write_fallback_file(&token).unwrap();
        let hex = std::fs::read_to_string(&store.fallback_path).unwrap();
        assert_eq!(AuthToken::from_hex(hex.trim()).unwrap(), token);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_fallback_permissions_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path());
        store.write_fallback_file(&AuthToken::generate()).unwrap();
        let mode = std::fs::metadata(&store.fallback_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
