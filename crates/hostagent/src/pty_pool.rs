//! PTY pool: spawns, writes to, resizes, and closes pseudo-terminals, and
//! streams their output onto one shared event channel so the router can
//! fan it out without the pool knowing anything about subscribers.

use bytes::Bytes;
use gateway_core::error::AgentError;
use gateway_core::types::{PtyCreateOptions, PtySessionInfo};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Shells a client may request. Anything else is rejected and the default
/// substituted — short names like `zsh` are rejected because PATH isn't
/// trusted input.
const ALLOWED_SHELLS: &[&str] = &[
    "/bin/zsh",
    "/bin/bash",
    "/bin/sh",
    "/usr/bin/zsh",
    "/usr/bin/bash",
    "/usr/local/bin/zsh",
    "/usr/local/bin/bash",
];

fn default_cwd() -> String {
    dirs::home_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}

fn default_shell() -> String {
    ALLOWED_SHELLS
        .iter()
        .find(|candidate| std::path::Path::new(candidate).exists())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

#[derive(Debug, Clone)]
pub enum PtyEvent {
    Data { session_id: Uuid, bytes: Bytes },
    Exit { session_id: Uuid, exit_code: Option<i32> },
}

struct PtyHandle {
    master: Box<dyn portable_pty::MasterPty + Send>,
    child: Box<dyn portable_pty::Child + Send>,
    writer: Box<dyn Write + Send>,
    info: PtySessionInfo,
}

unsafe impl Send for PtyHandle {}

pub struct PtyPool {
    sessions: Arc<Mutex<HashMap<Uuid, PtyHandle>>>,
    events: mpsc::Sender<PtyEvent>,
}

impl PtyPool {
    pub fn new(events: mpsc::Sender<PtyEvent>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub async fn create(&self, opts: PtyCreateOptions) -> Result<PtySessionInfo, AgentError> {
        let cols = opts.cols.unwrap_or(80);
        let rows = opts.rows.unwrap_or(24);
        if cols == 0 || rows == 0 {
            return Err(AgentError::Terminal("cols and rows must be at least 1".into()));
        }

        let cwd = match opts.cwd {
            Some(cwd) if cwd.starts_with('/') && !cwd.contains("..") => cwd,
            Some(bad) => {
                tracing::warn!(requested = %bad, "rejected cwd, substituting home directory");
                default_cwd()
            }
            None => default_cwd(),
        };

        let shell = match opts.shell {
            Some(shell) if ALLOWED_SHELLS.contains(&shell.as_str()) => shell,
            Some(bad) => {
                tracing::warn!(requested = %bad, "rejected shell, substituting default");
                default_shell()
            }
            None => default_shell(),
        };

        let id = Uuid::new_v4();
        let name = opts.name.unwrap_or_else(|| id.to_string());

        let pty_system = native_pty_system();
        let pty_pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| AgentError::Terminal(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.cwd(&cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        let child = pty_pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| AgentError::Terminal(format!("failed to spawn shell: {e}")))?;
        drop(pty_pair.slave);

        let writer = pty_pair
            .master
            .take_writer()
            .map_err(|e| AgentError::Terminal(format!("failed to take PTY writer: {e}")))?;
        let reader = pty_pair
            .master
            .try_clone_reader()
            .map_err(|e| AgentError::Terminal(format!("failed to clone PTY reader: {e}")))?;

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let info = PtySessionInfo {
            id,
            name,
            cols,
            rows,
            cwd,
            shell,
            created_at,
        };

        self.spawn_reader(id, reader);

        let handle = PtyHandle {
            master: pty_pair.master,
            child,
            writer,
            info: info.clone(),
        };
        self.sessions.lock().await.insert(id, handle);
        tracing::info!(session_id = %id, "PTY session created");
        Ok(info)
    }

    fn spawn_reader(&self, id: Uuid, mut reader: Box<dyn Read + Send>) {
        let sessions = self.sessions.clone();
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        if events.blocking_send(PtyEvent::Data { session_id: id, bytes: data }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(session_id = %id, error = %e, "PTY read failed, treating as exit");
                        break;
                    }
                }
            }

            let exit_code = tokio::runtime::Handle::current().block_on(async {
                let mut sessions = sessions.lock().await;
                let code = sessions
                    .get_mut(&id)
                    .and_then(|h| h.child.try_wait().ok().flatten())
                    .map(|status| status.exit_code() as i32);
                sessions.remove(&id);
                code
            });

            let _ = events.blocking_send(PtyEvent::Exit { session_id: id, exit_code });
        });
    }

    pub async fn write(&self, session_id: Uuid, data: &[u8]) -> Result<(), AgentError> {
        let mut sessions = self.sessions.lock().await;
        let handle = sessions
            .get_mut(&session_id)
            .ok_or(AgentError::UnknownSession(session_id))?;
        handle
            .writer
            .write_all(data)
            .and_then(|_| handle.writer.flush())
            .map_err(|e| AgentError::Terminal(format!("write failed: {e}")))
    }

    pub async fn resize(&self, session_id: Uuid, cols: u16, rows: u16) -> Result<(), AgentError> {
        if cols == 0 || rows == 0 {
            return Err(AgentError::Terminal("cols and rows must be at least 1".into()));
        }
        let mut sessions = self.sessions.lock().await;
        let handle = sessions
            .get_mut(&session_id)
            .ok_or(AgentError::UnknownSession(session_id))?;
        handle
            .master
            .resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
            .map_err(|e| AgentError::Terminal(format!("resize failed: {e}")))?;
        handle.info.cols = cols;
        handle.info.rows = rows;
        Ok(())
    }

    /// Sends the platform's default termination signal and removes the
    /// session. The reader task observes the resulting EOF and emits the
    /// matching `exit` event, so this does not emit one itself.
    pub async fn close(&self, session_id: Uuid) -> Result<(), AgentError> {
        let mut sessions = self.sessions.lock().await;
        let handle = sessions
            .get_mut(&session_id)
            .ok_or(AgentError::UnknownSession(session_id))?;
        handle
            .child
            .kill()
            .map_err(|e| AgentError::Terminal(format!("kill failed: {e}")))
    }

    pub async fn get(&self, session_id: Uuid) -> Option<PtySessionInfo> {
        self.sessions.lock().await.get(&session_id).map(|h| h.info.clone())
    }

    pub async fn list(&self) -> Vec<PtySessionInfo> {
        self.sessions.lock().await.values().map(|h| h.info.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_rejects_zero_dimensions() {
        let (tx, _rx) = mpsc::channel(16);
        let pool = PtyPool::new(tx);
        let opts = PtyCreateOptions {
            cols: Some(0),
            rows: Some(24),
            ..Default::default()
        };
        assert!(pool.create(opts).await.is_err());
    }

    #[tokio::test]
    async fn test_create_accepts_minimum_dimensions() {
        let (tx, mut rx) = mpsc::channel(64);
        let pool = PtyPool::new(tx);
        let opts = PtyCreateOptions {
            cols: Some(1),
            rows: Some(1),
            shell: Some("/bin/sh".into()),
            ..Default::default()
        };
        let info = pool.create(opts).await.unwrap();
        assert_eq!(info.cols, 1);
        assert_eq!(info.rows, 1);
        pool.close(info.id).await.unwrap();
        // Drain until the reader task reports exit, proving it ran.
        loop {
            match rx.recv().await {
                Some(PtyEvent::Exit { session_id, .. }) if session_id == info.id => break,
                Some(_) => continue,
                None => panic!("event channel closed before exit"),
            }
        }
    }

    #[tokio::test]
    async fn test_create_rejects_path_traversal_cwd() {
        let (tx, _rx) = mpsc::channel(16);
        let pool = PtyPool::new(tx);
        let opts = PtyCreateOptions {
            cwd: Some("/tmp/../etc".into()),
            shell: Some("/bin/sh".into()),
            ..Default::default()
        };
        let info = pool.create(opts).await.unwrap();
        assert_ne!(info.cwd, "/tmp/../etc");
        pool.close(info.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_rejects_unlisted_shell() {
        let (tx, _rx) = mpsc::channel(16);
        let pool = PtyPool::new(tx);
        let opts = PtyCreateOptions {
            shell: Some("/bin/evil".into()),
            ..Default::default()
        };
        let info = pool.create(opts).await.unwrap();
        assert_ne!(info.shell, "/bin/evil");
        pool.close(info.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_to_unknown_session_is_error() {
        let (tx, _rx) = mpsc::channel(16);
        let pool = PtyPool::new(tx);
        let result = pool.write(Uuid::new_v4(), b"hi").await;
        assert!(matches!(result, Err(AgentError::UnknownSession(_))));
    }

    #[tokio::test]
    async fn test_resize_to_unknown_session_is_error() {
        let (tx, _rx) = mpsc::channel(16);
        let pool = PtyPool::new(tx);
        let result = pool.resize(Uuid::new_v4(), 80, 24).await;
        assert!(matches!(result, Err(AgentError::UnknownSession(_))));
    }
}
