//! TLS-terminated WebSocket listener: accepts connections, runs the origin
//! filter and auth timer, and pumps frames between each socket and the
//! router.

use crate::auth_gate::AUTH_TIMEOUT;
use crate::origin_filter::OriginFilter;
use crate::router::{FrameOutcome, Router};
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router as AxumRouter;
use axum_server::tls_rustls::RustlsConfig;
use futures::{SinkExt, StreamExt};
use gateway_core::protocol::Frame;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct Gateway {
    router: Arc<Router>,
    origin_filter: OriginFilter,
    shutdown: broadcast::Sender<()>,
}

struct GatewayState {
    router: Arc<Router>,
    origin_filter: OriginFilter,
    shutdown: broadcast::Sender<()>,
}

impl Gateway {
    pub fn new(router: Arc<Router>, origin_filter: OriginFilter) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self { router, origin_filter, shutdown }
    }

    /// Binds and serves until `close()` is called or the listener fails.
    /// `cert_pem`/`key_pem` are the PEM bytes from [`crate::cert_manager::CertManager`].
    pub async fn serve(
        &self,
        bind_addr: SocketAddr,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<(), gateway_core::error::AgentError> {
        let tls_config = RustlsConfig::from_pem(cert_pem.to_vec(), key_pem.to_vec())
            .await
            .map_err(|e| gateway_core::error::AgentError::Certificate(e.to_string()))?;

        let state = Arc::new(GatewayState {
            router: self.router.clone(),
            origin_filter: self.origin_filter,
            shutdown: self.shutdown.clone(),
        });

        let app: AxumRouter = AxumRouter::new()
            .route("/", get(ws_handler))
            .fallback(get(ws_handler))
            .with_state(state);

        info!(%bind_addr, "gateway listening");
        let mut shutdown_rx = self.shutdown.subscribe();
        axum_server::bind_rustls(bind_addr, tls_config)
            .serve_with_graceful_shutdown(
                app.into_make_service_with_connect_info::<SocketAddr>(),
                async move {
                    let _ = shutdown_rx.recv().await;
                },
            )
            .await
            .map_err(|e| gateway_core::error::AgentError::BindFailed(std::io::Error::other(e)))
    }

    /// Terminates all live connections and stops the listener.
    pub fn close(&self) {
        let _ = self.shutdown.send(());
    }
}

async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !state.origin_filter.is_allowed(peer.ip()) {
        return axum::http::StatusCode::FORBIDDEN.into_response();
    }
    let is_local = peer.ip().is_loopback();
    ws.on_upgrade(move |socket| handle_socket(socket, state, is_local))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, is_local: bool) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, mut outbox) = state.router.register_connection(is_local).await;
    let mut shutdown_rx = state.shutdown.subscribe();

    let deadline = tokio::time::sleep(AUTH_TIMEOUT);
    tokio::pin!(deadline);
    let mut authenticated = false;

    loop {
        tokio::select! {
            _ = &mut deadline, if !authenticated => {
                warn!(%connection_id, "authentication timeout");
                let _ = sender.send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: 4001,
                    reason: "authentication timeout".into(),
                }))).await;
                break;
            }
            _ = shutdown_rx.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            outgoing = outbox.recv() => {
                match outgoing {
                    Some(frame) => {
                        if send_frame(&mut sender, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match Frame::decode(&text) {
                            Ok(frame) => {
                                let outcome = state.router.handle_frame(connection_id, frame).await;
                                if !authenticated && state.router.is_authenticated(connection_id).await {
                                    authenticated = true;
                                }
                                if outcome == FrameOutcome::CloseInvalidToken {
                                    warn!(%connection_id, "invalid authentication token");
                                    let _ = sender.send(Message::Close(Some(axum::extract::ws::CloseFrame {
                                        code: 4003,
                                        reason: "invalid authentication token".into(),
                                    }))).await;
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(%connection_id, error = %e, "malformed frame");
                                let _ = send_frame(&mut sender, &Frame::system_error(e.to_string(), None)).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%connection_id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    state.router.unregister_connection(connection_id).await;
}

async fn send_frame(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: &Frame,
) -> Result<(), ()> {
    let text = match frame.encode() {
        Ok(text) => text,
        Err(_) => return Err(()),
    };
    sender.send(Message::Text(text)).await.map_err(|_| ())
}
