//! `config.json`: connection settings and the managed-service roster.
//!
//! The auth token must never live here. If an older config on disk still
//! carries one (pre-secret-store migration), [`AgentConfig::load`] lifts it
//! out into the caller's hands and the next [`AgentConfig::save`] omits it.

use gateway_core::error::AgentError;
use gateway_core::types::ServiceDefinition;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_port() -> u16 {
    9876
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(rename = "directPort", default = "default_port")]
    pub direct_port: u16,
    #[serde(rename = "restrictToTailscale", default = "default_true")]
    pub restrict_to_tailscale: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            direct_port: default_port(),
            restrict_to_tailscale: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
    #[serde(rename = "autoLaunch", default)]
    pub auto_launch: bool,
    #[serde(rename = "startMinimized", default)]
    pub start_minimized: bool,
    /// Legacy field: an auth token that predates the secret store. Read
    /// once during migration, never round-tripped back to disk.
    #[serde(rename = "authToken", default, skip_serializing)]
    pub legacy_auth_token: Option<String>,
}

impl AgentConfig {
    /// Load from `path`, defaulting when the file is absent. A present but
    /// unparseable file is a startup error.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| AgentError::Config(e.to_string()))
    }

    /// Pretty-printed save, always without `authToken` (see
    /// [`Self::legacy_auth_token`]).
    pub fn save(&self, path: &Path) -> Result<(), AgentError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| AgentError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Take the legacy token out, leaving `None` behind so a subsequent
    /// `save()` never writes it back.
    pub fn take_legacy_auth_token(&mut self) -> Option<String> {
        self.legacy_auth_token.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AgentConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.connection.direct_port, 9876);
        assert!(config.connection.restrict_to_tailscale);
        assert!(config.services.is_empty());
    }

    #[test]
    fn test_load_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(AgentConfig::load(&path).is_err());
    }

    #[test]
    fn test_save_omits_auth_token() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AgentConfig::default();
        config.legacy_auth_token = Some("deadbeef".into());
        config.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("authToken"));
    }

    #[test]
    fn test_migration_extracts_legacy_token() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"authToken":"abc123"}"#).unwrap();
        let mut config = AgentConfig::load(&path).unwrap();
        let token = config.take_legacy_auth_token();
        assert_eq!(token.as_deref(), Some("abc123"));
        assert!(config.legacy_auth_token.is_none());
    }

    #[test]
    fn test_roundtrip_preserves_services() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AgentConfig::default();
        config.services.push(ServiceDefinition {
            id: "s1".into(),
            name: "echo".into(),
            command: "/bin/echo".into(),
            args: vec!["hi".into()],
            cwd: None,
            env: Default::default(),
            auto_start: true,
            restart_on_failure: true,
        });
        config.save(&path).unwrap();
        let loaded = AgentConfig::load(&path).unwrap();
        assert_eq!(loaded.services.len(), 1);
        assert_eq!(loaded.services[0].id, "s1");
    }
}
