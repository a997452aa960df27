//! Domain types shared by the gateway and its router.

mod pairing;
mod pty;
mod service;

pub use pairing::PairingPayload;
pub use pty::{PtyCreateOptions, PtySessionInfo};
pub use service::{ServiceDefinition, ServiceState, ServiceStatus};
