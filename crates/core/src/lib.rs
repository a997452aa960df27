//! Shared domain types and protocol plumbing for the remote session gateway.
//!
//! This crate provides:
//! - Domain types (PTY sessions, managed services, pairing payloads)
//! - The JSON wire envelope shared by every connection
//! - The crate-wide error type and authentication token

pub const PROTOCOL_VERSION: u32 = 1;
pub const APP_VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

pub mod auth;
pub mod error;
pub mod fingerprint;
pub mod protocol;
pub mod types;

pub use auth::AuthToken;
pub use error::{AgentError, Result};
pub use protocol::{Frame, FrameType};
pub use types::{PairingPayload, PtySessionInfo, ServiceDefinition, ServiceStatus};
