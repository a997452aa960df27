//! Managed child process supervision: start, graceful stop, auto-restart,
//! and status/output fan-out onto one shared event channel.

use bytes::Bytes;
use gateway_core::error::AgentError;
use gateway_core::types::{ServiceDefinition, ServiceState, ServiceStatus};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::sleep;

const GRACEFUL_STOP_WAIT: Duration = Duration::from_secs(10);
const RESTART_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub enum ServiceEvent {
    Status { id: String, status: ServiceStatus },
    Output { id: String, stream: OutputStream, bytes: Bytes },
}

struct ManagedService {
    definition: ServiceDefinition,
    state: ServiceState,
    pid: Option<u32>,
    started_at: Option<Instant>,
    last_error: Option<String>,
    /// Set true right before a deliberate stop so the wait task doesn't
    /// treat the exit as a failure or trigger an auto-restart.
    stopping: bool,
    /// Notified once per process exit, by the task that owns `child.wait()`.
    exited: Arc<Notify>,
    /// Notified when a stop is requested, to cancel a pending restart
    /// backoff sleep.
    stop_requested: Arc<Notify>,
}

impl ManagedService {
    fn status(&self) -> ServiceStatus {
        ServiceStatus {
            id: self.definition.id.clone(),
            status: self.state,
            pid: self.pid,
            uptime_secs: self.started_at.map(|t| t.elapsed().as_secs()),
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ServiceSupervisor {
    services: Arc<Mutex<HashMap<String, ManagedService>>>,
    events: mpsc::Sender<ServiceEvent>,
}

impl ServiceSupervisor {
    pub fn new(events: mpsc::Sender<ServiceEvent>) -> Self {
        Self {
            services: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub async fn register(&self, definition: ServiceDefinition) -> Result<(), AgentError> {
        let mut services = self.services.lock().await;
        if services.contains_key(&definition.id) {
            return Err(AgentError::ServiceAlreadyRegistered(definition.id));
        }
        services.insert(
            definition.id.clone(),
            ManagedService {
                definition,
                state: ServiceState::Stopped,
                pid: None,
                started_at: None,
                last_error: None,
                stopping: false,
                exited: Arc::new(Notify::new()),
                stop_requested: Arc::new(Notify::new()),
            },
        );
        Ok(())
    }

    pub async fn start(&self, id: &str) -> Result<ServiceStatus, AgentError> {
        let definition = {
            let mut services = self.services.lock().await;
            let svc = services.get_mut(id).ok_or_else(|| AgentError::ServiceNotRegistered(id.to_string()))?;
            if svc.state == ServiceState::Running || svc.state == ServiceState::Starting {
                return Ok(svc.status());
            }
            svc.state = ServiceState::Starting;
            svc.last_error = None;
            svc.stopping = false;
            svc.definition.clone()
        };
        self.publish_status(id).await;
        self.spawn(definition).await
    }

    async fn spawn(&self, definition: ServiceDefinition) -> Result<ServiceStatus, AgentError> {
        let id = definition.id.clone();
        let mut cmd = Command::new(&definition.command);
        cmd.args(&definition.args);
        if let Some(cwd) = &definition.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(&definition.env);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(false);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let mut services = self.services.lock().await;
                if let Some(svc) = services.get_mut(&id) {
                    svc.state = ServiceState::Error;
                    svc.last_error = Some(format!("spawn failed: {e}"));
                }
                drop(services);
                self.publish_status(&id).await;
                return Err(AgentError::Other(anyhow::anyhow!("spawn failed: {e}")));
            }
        };

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        {
            let mut services = self.services.lock().await;
            if let Some(svc) = services.get_mut(&id) {
                svc.state = ServiceState::Running;
                svc.pid = pid;
                svc.started_at = Some(Instant::now());
            }
        }
        let status = self.publish_status(&id).await;

        self.spawn_output_pump(id.clone(), OutputStream::Stdout, stdout);
        self.spawn_output_pump(id.clone(), OutputStream::Stderr, stderr);
        self.spawn_wait(id.clone(), child, definition.restart_on_failure);

        status.ok_or_else(|| AgentError::ServiceNotRegistered(id.to_string()))
    }

    fn spawn_output_pump(
        &self,
        id: String,
        stream: OutputStream,
        pipe: Option<impl tokio::io::AsyncRead + Unpin + Send + 'static>,
    ) {
        let Some(mut pipe) = pipe else { return };
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match pipe.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let bytes = Bytes::copy_from_slice(&buf[..n]);
                        if events
                            .send(ServiceEvent::Output { id: id.clone(), stream, bytes })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn spawn_wait(&self, id: String, mut child: Child, restart_on_failure: bool) {
        let supervisor = self.clone();

        tokio::spawn(async move {
            let exit_status = child.wait().await;

            let (stop_requested, exited_notify, backoff_notify, status) = {
                let mut services = supervisor.services.lock().await;
                let Some(svc) = services.get_mut(&id) else { return };
                svc.pid = None;
                svc.started_at = None;
                let requested_stop = svc.stopping;
                match exit_status {
                    Ok(status) if status.success() || requested_stop => {
                        svc.state = ServiceState::Stopped;
                    }
                    Ok(status) => {
                        svc.state = ServiceState::Error;
                        svc.last_error = Some(format!("exited with {status}"));
                    }
                    Err(e) => {
                        svc.state = ServiceState::Error;
                        svc.last_error = Some(format!("wait failed: {e}"));
                    }
                }
                (requested_stop, svc.exited.clone(), svc.stop_requested.clone(), svc.status())
            };

            exited_notify.notify_waiters();
            let _ = supervisor
                .events
                .send(ServiceEvent::Status { id: id.clone(), status })
                .await;

            if stop_requested || !restart_on_failure {
                return;
            }

            tokio::select! {
                _ = sleep(RESTART_BACKOFF) => {}
                _ = backoff_notify.notified() => return,
            }

            let definition = {
                let services = supervisor.services.lock().await;
                services.get(&id).map(|s| s.definition.clone())
            };
            if let Some(definition) = definition {
                let _ = supervisor.spawn(definition).await;
            }
        });
    }

    pub async fn stop(&self, id: &str) -> Result<ServiceStatus, AgentError> {
        let (pid, exited) = {
            let mut services = self.services.lock().await;
            let svc = services.get_mut(id).ok_or_else(|| AgentError::ServiceNotRegistered(id.to_string()))?;
            // Always flag the stop and wake the backoff sleep, even if the
            // service isn't currently running: a stop requested mid-backoff
            // (state Error, process already exited) must still cancel the
            // pending auto-restart.
            svc.stopping = true;
            svc.stop_requested.notify_waiters();
            if svc.state != ServiceState::Running && svc.state != ServiceState::Starting {
                svc.state = ServiceState::Stopped;
                return Ok(svc.status());
            }
            (svc.pid, svc.exited.clone())
        };

        if let Some(pid) = pid {
            send_sigterm(pid);
            if tokio::time::timeout(GRACEFUL_STOP_WAIT, exited.notified()).await.is_err() {
                send_sigkill(pid);
                let _ = tokio::time::timeout(Duration::from_secs(2), exited.notified()).await;
            }
        }

        let mut services = self.services.lock().await;
        let svc = services.get_mut(id).ok_or_else(|| AgentError::ServiceNotRegistered(id.to_string()))?;
        svc.state = ServiceState::Stopped;
        svc.pid = None;
        Ok(svc.status())
    }

    pub async fn restart(&self, id: &str) -> Result<ServiceStatus, AgentError> {
        self.stop(id).await?;
        self.start(id).await
    }

    pub async fn status(&self, id: &str) -> Result<ServiceStatus, AgentError> {
        let services = self.services.lock().await;
        services.get(id).map(|s| s.status()).ok_or_else(|| AgentError::ServiceNotRegistered(id.to_string()))
    }

    pub async fn list_all(&self) -> Vec<ServiceStatus> {
        self.services.lock().await.values().map(|s| s.status()).collect()
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.services.lock().await.keys().cloned().collect();
        for id in ids {
            let _ = self.stop(&id).await;
        }
    }

    async fn publish_status(&self, id: &str) -> Option<ServiceStatus> {
        let status = {
            let services = self.services.lock().await;
            services.get(id).map(|s| s.status())
        };
        if let Some(status) = status.clone() {
            let _ = self.events.send(ServiceEvent::Status { id: id.to_string(), status }).await;
        }
        status
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(unix)]
fn send_sigkill(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

#[cfg(not(unix))]
fn send_sigkill(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_service(id: &str) -> ServiceDefinition {
        ServiceDefinition {
            id: id.to_string(),
            name: id.to_string(),
            command: "/bin/echo".to_string(),
            args: vec!["hello".to_string()],
            cwd: None,
            env: Default::default(),
            auto_start: false,
            restart_on_failure: false,
        }
    }

    fn sleep_service(id: &str) -> ServiceDefinition {
        ServiceDefinition {
            id: id.to_string(),
            name: id.to_string(),
            command: "/bin/sleep".to_string(),
            args: vec!["30".to_string()],
            cwd: None,
            env: Default::default(),
            auto_start: false,
            restart_on_failure: false,
        }
    }

    #[tokio::test]
    async fn test_register_duplicate_is_rejected() {
        let (tx, _rx) = mpsc::channel(16);
        let supervisor = ServiceSupervisor::new(tx);
        supervisor.register(echo_service("svc-a")).await.unwrap();
        let result = supervisor.register(echo_service("svc-a")).await;
        assert!(matches!(result, Err(AgentError::ServiceAlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn test_start_unregistered_service_errors() {
        let (tx, _rx) = mpsc::channel(16);
        let supervisor = ServiceSupervisor::new(tx);
        let result = supervisor.start("missing").await;
        assert!(matches!(result, Err(AgentError::ServiceNotRegistered(_))));
    }

    #[tokio::test]
    async fn test_start_then_status_running_or_stopped() {
        let (tx, _rx) = mpsc::channel(64);
        let supervisor = ServiceSupervisor::new(tx);
        supervisor.register(echo_service("svc-echo")).await.unwrap();
        supervisor.start("svc-echo").await.unwrap();
        let status = supervisor.status("svc-echo").await.unwrap();
        assert!(matches!(status.status, ServiceState::Running | ServiceState::Stopped));
    }

    #[tokio::test]
    async fn test_list_all_includes_registered_services() {
        let (tx, _rx) = mpsc::channel(16);
        let supervisor = ServiceSupervisor::new(tx);
        supervisor.register(echo_service("svc-1")).await.unwrap();
        supervisor.register(echo_service("svc-2")).await.unwrap();
        let all = supervisor.list_all().await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_unregistered_service_errors() {
        let (tx, _rx) = mpsc::channel(16);
        let supervisor = ServiceSupervisor::new(tx);
        let result = supervisor.stop("missing").await;
        assert!(matches!(result, Err(AgentError::ServiceNotRegistered(_))));
    }

    #[tokio::test]
    async fn test_stop_running_service_transitions_to_stopped() {
        let (tx, _rx) = mpsc::channel(64);
        let supervisor = ServiceSupervisor::new(tx);
        supervisor.register(sleep_service("svc-sleep")).await.unwrap();
        supervisor.start("svc-sleep").await.unwrap();
        let status = supervisor.stop("svc-sleep").await.unwrap();
        assert_eq!(status.status, ServiceState::Stopped);
    }
}
