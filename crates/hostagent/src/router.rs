//! Frame dispatch: decodes inbound frames, enforces per-device
//! authorization, mutates PTYPool/ServiceSupervisor, and fans out events
//! to the clients allowed to see them.

use crate::auth_gate::AuthGate;
use crate::client::Client;
use crate::pty_pool::{PtyEvent, PtyPool};
use crate::service_supervisor::{ServiceEvent, ServiceSupervisor};
use crate::session_registry::SessionRegistry;
use gateway_core::error::AgentError;
use gateway_core::protocol::{Frame, FrameType};
use gateway_core::types::{PtyCreateOptions, ServiceDefinition};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

struct ClientHandle {
    client: Client,
    outbox: mpsc::Sender<Frame>,
}

/// What the gateway's connection task should do after a frame was handled.
/// Only an invalid auth token demands a close; every other error is reported
/// back over the socket and the connection stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    CloseInvalidToken,
}

/// Bounded so a single slow client can't grow memory without limit; a full
/// queue means the client is dropped rather than the producer stalling.
const CLIENT_QUEUE_CAPACITY: usize = 256;

pub struct Router {
    clients: Mutex<HashMap<Uuid, ClientHandle>>,
    pty_pool: Arc<PtyPool>,
    supervisor: Arc<ServiceSupervisor>,
    session_registry: Arc<SessionRegistry>,
    auth_gate: Arc<AuthGate>,
}

impl Router {
    pub fn new(
        pty_pool: Arc<PtyPool>,
        supervisor: Arc<ServiceSupervisor>,
        session_registry: Arc<SessionRegistry>,
        auth_gate: Arc<AuthGate>,
    ) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            pty_pool,
            supervisor,
            session_registry,
            auth_gate,
        }
    }

    pub async fn register_connection(&self, is_local: bool) -> (Uuid, mpsc::Receiver<Frame>) {
        let client = Client::new(is_local);
        let connection_id = client.connection_id;
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        self.clients
            .lock()
            .await
            .insert(connection_id, ClientHandle { client, outbox: tx });
        (connection_id, rx)
    }

    /// Drops subscriptions but leaves ownership in the global registry, per
    /// the reconnection contract.
    pub async fn unregister_connection(&self, connection_id: Uuid) {
        self.clients.lock().await.remove(&connection_id);
    }

    pub async fn is_authenticated(&self, connection_id: Uuid) -> bool {
        self.clients
            .lock()
            .await
            .get(&connection_id)
            .map(|h| h.client.is_authenticated())
            .unwrap_or(false)
    }

    pub async fn handle_frame(&self, connection_id: Uuid, frame: Frame) -> FrameOutcome {
        let is_authenticated = {
            let clients = self.clients.lock().await;
            clients.get(&connection_id).map(|h| h.client.is_authenticated()).unwrap_or(false)
        };

        if frame.frame_type != FrameType::Auth && !is_authenticated {
            self.reply_error(connection_id, "not authenticated", frame.request_id.clone())
                .await;
            return FrameOutcome::Continue;
        }

        let result = match frame.frame_type {
            FrameType::Auth => self.handle_auth(connection_id, &frame).await,
            FrameType::Pty => self.handle_pty(connection_id, &frame).await,
            FrameType::Service => self.handle_service(connection_id, &frame).await,
            FrameType::System => self.handle_system(connection_id, &frame).await,
        };

        let is_invalid_token = frame.frame_type == FrameType::Auth && matches!(result, Err(AgentError::InvalidToken));

        if let Err(e) = result {
            self.reply_error(connection_id, &e.to_string(), frame.request_id.clone()).await;
        }

        if is_invalid_token {
            FrameOutcome::CloseInvalidToken
        } else {
            FrameOutcome::Continue
        }
    }

    async fn handle_auth(&self, connection_id: Uuid, frame: &Frame) -> Result<(), AgentError> {
        #[derive(serde::Deserialize)]
        struct AuthPayload {
            token: String,
            #[serde(rename = "clientId")]
            client_id: String,
            #[serde(rename = "deviceName")]
            device_name: Option<String>,
        }
        let payload: AuthPayload = frame.payload_as()?;
        let candidate = gateway_core::AuthToken::from_hex(&payload.token)
            .map_err(|_| AgentError::InvalidTokenFormat)?;
        if !self.auth_gate.validate(candidate.as_bytes()) {
            return Err(AgentError::InvalidToken);
        }

        let (owned_sessions, all_sessions, service_statuses) = {
            let mut clients = self.clients.lock().await;
            let handle = clients.get_mut(&connection_id).ok_or(AgentError::NotAuthenticated)?;
            handle.client.authenticate(payload.client_id.clone(), payload.device_name);

            let owned = self.session_registry.sessions_owned_by(&payload.client_id);
            for id in &owned {
                handle.client.claim_session(*id);
            }

            let visible = if handle.client.is_local {
                self.pty_pool.list().await.into_iter().map(|s| s.id).collect()
            } else {
                owned.clone()
            };

            let statuses = self.supervisor.list_all().await;
            (owned, visible, statuses)
        };

        self.send_to(
            connection_id,
            Frame::new(
                FrameType::System,
                "auth/success",
                json!({
                    "connectionId": connection_id,
                    "ownedSessions": owned_sessions,
                    "visibleSessions": all_sessions,
                    "services": service_statuses,
                }),
            )
            .with_request_id(frame.request_id.clone()),
        )
        .await;
        Ok(())
    }

    async fn handle_pty(&self, connection_id: Uuid, frame: &Frame) -> Result<(), AgentError> {
        match frame.action.as_str() {
            "create" => {
                let opts: PtyCreateOptions = frame.payload_as().unwrap_or_default();
                let info = self.pty_pool.create(opts).await?;
                let device_id = self.device_id_of(connection_id).await?;
                self.session_registry.claim(info.id, &device_id);
                {
                    let mut clients = self.clients.lock().await;
                    if let Some(h) = clients.get_mut(&connection_id) {
                        h.client.claim_session(info.id);
                    }
                }
                self.reply(connection_id, "pty/created", json!(info), frame.request_id.clone())
                    .await;
                Ok(())
            }
            "list" => {
                let sessions = self.pty_pool.list().await;
                self.reply(connection_id, "pty/list", json!(sessions), frame.request_id.clone())
                    .await;
                Ok(())
            }
            "write" => {
                let session_id = self.payload_session_id(frame)?;
                if !self.may_touch_session(connection_id, session_id).await {
                    return Err(AgentError::AccessDenied);
                }
                #[derive(serde::Deserialize)]
                struct WritePayload {
                    data: String,
                }
                let payload: WritePayload = frame.payload_as()?;
                // Any failure (unknown session, closed pipe) is a silent
                // no-op; a closed session's own exit event already covers it.
                let _ = self.pty_pool.write(session_id, payload.data.as_bytes()).await;
                Ok(())
            }
            "resize" => {
                let session_id = self.payload_session_id(frame)?;
                if !self.may_touch_session(connection_id, session_id).await {
                    return Err(AgentError::AccessDenied);
                }
                #[derive(serde::Deserialize)]
                struct ResizePayload {
                    cols: u16,
                    rows: u16,
                }
                let payload: ResizePayload = frame.payload_as()?;
                let _ = self.pty_pool.resize(session_id, payload.cols, payload.rows).await;
                Ok(())
            }
            "close" => {
                let session_id = self.payload_session_id(frame)?;
                if !self.may_touch_session(connection_id, session_id).await {
                    return Err(AgentError::AccessDenied);
                }
                let _ = self.pty_pool.close(session_id).await;
                self.session_registry.release(session_id);
                Ok(())
            }
            "subscribe" => {
                let session_id = self.payload_session_id(frame)?;
                let allowed = self.may_subscribe_session(connection_id, session_id).await;
                if !allowed {
                    return Err(AgentError::AccessDenied);
                }
                let mut clients = self.clients.lock().await;
                if let Some(h) = clients.get_mut(&connection_id) {
                    h.client.subscribe_session(session_id);
                }
                Ok(())
            }
            "unsubscribe" => {
                let session_id = self.payload_session_id(frame)?;
                let mut clients = self.clients.lock().await;
                if let Some(h) = clients.get_mut(&connection_id) {
                    h.client.unsubscribe_session(session_id);
                }
                Ok(())
            }
            other => Err(AgentError::UnknownMessageType(other.to_string())),
        }
    }

    async fn handle_service(&self, connection_id: Uuid, frame: &Frame) -> Result<(), AgentError> {
        match frame.action.as_str() {
            "register" => {
                let definition: ServiceDefinition = frame.payload_as()?;
                self.supervisor.register(definition).await?;
                Ok(())
            }
            "start" => {
                let id = self.payload_service_id(frame)?;
                let status = self.supervisor.start(&id).await?;
                self.reply(connection_id, "service/status", json!(status), frame.request_id.clone())
                    .await;
                Ok(())
            }
            "stop" => {
                let id = self.payload_service_id(frame)?;
                let status = self.supervisor.stop(&id).await?;
                self.reply(connection_id, "service/status", json!(status), frame.request_id.clone())
                    .await;
                Ok(())
            }
            "restart" => {
                let id = self.payload_service_id(frame)?;
                let status = self.supervisor.restart(&id).await?;
                self.reply(connection_id, "service/status", json!(status), frame.request_id.clone())
                    .await;
                Ok(())
            }
            "status" => {
                let id = self.payload_service_id(frame)?;
                let status = self.supervisor.status(&id).await?;
                self.reply(connection_id, "service/status", json!(status), frame.request_id.clone())
                    .await;
                Ok(())
            }
            "list" => {
                let statuses = self.supervisor.list_all().await;
                self.reply(connection_id, "service/list", json!(statuses), frame.request_id.clone())
                    .await;
                Ok(())
            }
            "subscribe" => {
                let id = self.payload_service_id(frame)?;
                // Confirm the service exists before granting a subscription.
                self.supervisor.status(&id).await?;
                let mut clients = self.clients.lock().await;
                if let Some(h) = clients.get_mut(&connection_id) {
                    h.client.subscribe_service(&id);
                }
                Ok(())
            }
            other => Err(AgentError::UnknownMessageType(other.to_string())),
        }
    }

    async fn handle_system(&self, connection_id: Uuid, frame: &Frame) -> Result<(), AgentError> {
        match frame.action.as_str() {
            "ping" => {
                let timestamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                self.reply(connection_id, "pong", json!({ "timestamp": timestamp }), frame.request_id.clone())
                    .await;
                Ok(())
            }
            "info" => {
                self.reply(
                    connection_id,
                    "info",
                    json!({
                        "platform": std::env::consts::OS,
                        "arch": std::env::consts::ARCH,
                        "protocolVersion": gateway_core::PROTOCOL_VERSION,
                        "appVersion": gateway_core::APP_VERSION_STRING,
                    }),
                    frame.request_id.clone(),
                )
                .await;
                Ok(())
            }
            other => Err(AgentError::UnknownMessageType(other.to_string())),
        }
    }

    /// Called from a task draining `PtyPool`'s shared event channel.
    pub async fn dispatch_pty_event(&self, event: PtyEvent) {
        match event {
            PtyEvent::Data { session_id, bytes } => {
                self.fan_out_to_session_subscribers(
                    session_id,
                    Frame::new(
                        FrameType::Pty,
                        "data",
                        json!({ "sessionId": session_id, "data": base64_encode(&bytes) }),
                    ),
                )
                .await;
            }
            PtyEvent::Exit { session_id, exit_code } => {
                self.fan_out_to_session_subscribers(
                    session_id,
                    Frame::new(
                        FrameType::Pty,
                        "exit",
                        json!({ "sessionId": session_id, "exitCode": exit_code }),
                    ),
                )
                .await;
                // Only the global registry entry is released here. A
                // client's own `ownedSessions` keeps the stale id until its
                // next auth handshake rebuilds it from the registry.
                self.session_registry.release(session_id);
            }
        }
    }

    /// Called from a task draining `ServiceSupervisor`'s shared event channel.
    pub async fn dispatch_service_event(&self, event: ServiceEvent) {
        match event {
            ServiceEvent::Status { id, status } => {
                self.broadcast(Frame::new(FrameType::Service, "status", json!(status))).await;
                let _ = id;
            }
            ServiceEvent::Output { id, stream, bytes } => {
                let stream_name = match stream {
                    crate::service_supervisor::OutputStream::Stdout => "stdout",
                    crate::service_supervisor::OutputStream::Stderr => "stderr",
                };
                self.fan_out_to_service_subscribers(
                    &id,
                    Frame::new(
                        FrameType::Service,
                        "output",
                        json!({ "id": id, "stream": stream_name, "data": base64_encode(&bytes) }),
                    ),
                )
                .await;
            }
        }
    }

    async fn fan_out_to_session_subscribers(&self, session_id: Uuid, frame: Frame) {
        let targets: Vec<(Uuid, mpsc::Sender<Frame>)> = {
            let clients = self.clients.lock().await;
            clients
                .iter()
                .filter(|(_, h)| h.client.session_subscriptions.contains(&session_id))
                .map(|(id, h)| (*id, h.outbox.clone()))
                .collect()
        };
        self.fan_out(targets, frame).await;
    }

    async fn fan_out_to_service_subscribers(&self, service_id: &str, frame: Frame) {
        let targets: Vec<(Uuid, mpsc::Sender<Frame>)> = {
            let clients = self.clients.lock().await;
            clients
                .iter()
                .filter(|(_, h)| h.client.service_subscriptions.contains(service_id))
                .map(|(id, h)| (*id, h.outbox.clone()))
                .collect()
        };
        self.fan_out(targets, frame).await;
    }

    async fn broadcast(&self, frame: Frame) {
        let targets: Vec<(Uuid, mpsc::Sender<Frame>)> = {
            let clients = self.clients.lock().await;
            clients
                .iter()
                .filter(|(_, h)| h.client.is_authenticated())
                .map(|(id, h)| (*id, h.outbox.clone()))
                .collect()
        };
        self.fan_out(targets, frame).await;
    }

    /// Non-blocking delivery to every target: a dead or full queue drops
    /// that one client instead of stalling delivery to everyone else, or
    /// stalling the producer (PTY reader / service output pump) feeding
    /// this fan-out in the first place.
    async fn fan_out(&self, targets: Vec<(Uuid, mpsc::Sender<Frame>)>, frame: Frame) {
        let mut overflowed = Vec::new();
        for (connection_id, outbox) in targets {
            if outbox.try_send(frame.clone()).is_err() {
                overflowed.push(connection_id);
            }
        }
        if !overflowed.is_empty() {
            let mut clients = self.clients.lock().await;
            for connection_id in overflowed {
                clients.remove(&connection_id);
            }
        }
    }

    async fn send_to(&self, connection_id: Uuid, frame: Frame) {
        let outbox = {
            let clients = self.clients.lock().await;
            clients.get(&connection_id).map(|h| h.outbox.clone())
        };
        if let Some(outbox) = outbox {
            let _ = outbox.send(frame).await;
        }
    }

    async fn reply(&self, connection_id: Uuid, action: &str, payload: serde_json::Value, request_id: Option<String>) {
        self.send_to(connection_id, Frame::new(FrameType::System, action, payload).with_request_id(request_id))
            .await;
    }

    async fn reply_error(&self, connection_id: Uuid, message: &str, request_id: Option<String>) {
        self.send_to(connection_id, Frame::system_error(message, request_id)).await;
    }

    async fn device_id_of(&self, connection_id: Uuid) -> Result<String, AgentError> {
        let clients = self.clients.lock().await;
        clients
            .get(&connection_id)
            .and_then(|h| h.client.device_id.clone())
            .ok_or(AgentError::NotAuthenticated)
    }

    async fn may_touch_session(&self, connection_id: Uuid, session_id: Uuid) -> bool {
        let clients = self.clients.lock().await;
        clients
            .get(&connection_id)
            .map(|h| h.client.is_local || h.client.owns_session(session_id) || h.client.session_subscriptions.contains(&session_id))
            .unwrap_or(false)
    }

    async fn may_subscribe_session(&self, connection_id: Uuid, session_id: Uuid) -> bool {
        let clients = self.clients.lock().await;
        clients
            .get(&connection_id)
            .map(|h| h.client.is_local || h.client.owns_session(session_id))
            .unwrap_or(false)
    }

    fn payload_session_id(&self, frame: &Frame) -> Result<Uuid, AgentError> {
        #[derive(serde::Deserialize)]
        struct P {
            #[serde(rename = "sessionId")]
            session_id: Uuid,
        }
        let p: P = frame.payload_as()?;
        Ok(p.session_id)
    }

    fn payload_service_id(&self, frame: &Frame) -> Result<String, AgentError> {
        #[derive(serde::Deserialize)]
        struct P {
            id: String,
        }
        let p: P = frame.payload_as()?;
        Ok(p.id)
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
