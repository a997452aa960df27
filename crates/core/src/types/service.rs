//! Managed-service domain types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A service the supervisor knows how to start, stop, and (optionally)
/// restart on failure. Loaded from configuration, never created over the
/// wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(rename = "autoStart", default)]
    pub auto_start: bool,
    #[serde(rename = "restartOnFailure", default)]
    pub restart_on_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub id: String,
    pub status: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(rename = "uptime", skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    #[serde(rename = "lastError", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ServiceStatus {
    pub fn stopped(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ServiceState::Stopped,
            pid: None,
            uptime_secs: None,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_definition_defaults() {
        let json = r#"{"id":"s1","name":"echo","command":"/bin/echo"}"#;
        let def: ServiceDefinition = serde_json::from_str(json).unwrap();
        assert!(def.args.is_empty());
        assert!(!def.auto_start);
        assert!(!def.restart_on_failure);
        assert!(def.cwd.is_none());
    }

    #[test]
    fn test_status_stopped_has_no_pid_or_uptime() {
        let status = ServiceStatus::stopped("s1");
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("pid"));
        assert!(!json.contains("uptime"));
    }
}
