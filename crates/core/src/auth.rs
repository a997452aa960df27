//! Authentication token: a 256-bit opaque secret shared between a paired
//! client and this host.
//!
//! Comparison against a candidate presented on a connection MUST be
//! constant-time and MUST reject a length mismatch before looking at any
//! byte of either buffer — see [`AuthToken::constant_time_eq`].

use crate::error::AgentError;
use rand::Rng;
use serde::{Deserialize, Serialize};

const TOKEN_SIZE: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthToken([u8; TOKEN_SIZE]);

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the full token, even in debug output.
        write!(f, "AuthToken({}…)", &self.to_hex()[..8])
    }
}

impl AuthToken {
    /// Generate a new random token from a cryptographically secure source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_SIZE];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn from_hex(hex: &str) -> Result<Self, AgentError> {
        if hex.len() != TOKEN_SIZE * 2 {
            return Err(AgentError::InvalidTokenFormat);
        }
        let mut bytes = [0u8; TOKEN_SIZE];
        for i in 0..TOKEN_SIZE {
            bytes[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| AgentError::InvalidTokenFormat)?;
        }
        Ok(Self(bytes))
    }

    /// Lowercase hex encoding, as stored and as presented on the wire.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 8 hex characters only, safe to put in logs.
    pub fn diagnostic_prefix(&self) -> String {
        self.to_hex()[..8].to_string()
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    /// Constant-time comparison against a candidate's raw bytes.
    ///
    /// Rejects immediately (still in constant time relative to the token's
    /// own length) when lengths differ, without ever indexing into the
    /// longer buffer past the shorter one's length.
    pub fn constant_time_eq(&self, candidate: &[u8]) -> bool {
        if candidate.len() != self.0.len() {
            return false;
        }
        constant_time_eq::constant_time_eq(&self.0, candidate)
    }
}
