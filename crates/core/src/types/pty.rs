//! PTY session domain types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied options for creating a PTY. Every field is optional;
/// [`crate::AgentError`]-free defaulting and validation happens in the pool.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PtyCreateOptions {
    pub name: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub cwd: Option<String>,
    pub shell: Option<String>,
}

/// A live PTY session as seen by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtySessionInfo {
    pub id: Uuid,
    pub name: String,
    pub cols: u16,
    pub rows: u16,
    pub cwd: String,
    pub shell: String,
    #[serde(rename = "createdAt")]
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_options_defaults_are_all_none() {
        let opts = PtyCreateOptions::default();
        assert!(opts.name.is_none());
        assert!(opts.cols.is_none());
        assert!(opts.rows.is_none());
        assert!(opts.cwd.is_none());
        assert!(opts.shell.is_none());
    }

    #[test]
    fn test_session_info_serializes_camel_case_created_at() {
        let info = PtySessionInfo {
            id: Uuid::nil(),
            name: "main".into(),
            cols: 80,
            rows: 24,
            cwd: "/tmp".into(),
            shell: "/bin/zsh".into(),
            created_at: 0,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"createdAt\""));
    }
}
