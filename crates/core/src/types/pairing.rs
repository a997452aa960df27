//! The pairing payload handed to a new client out-of-band (QR code or
//! manual entry) so it can establish a pinned, authenticated connection.

use crate::error::AgentError;
use crate::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingPayload {
    pub host: String,
    pub port: u16,
    pub token: String,
    #[serde(rename = "certFingerprint")]
    pub cert_fingerprint: String,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: u32,
}

impl PairingPayload {
    pub fn new(host: String, port: u16, token: String, cert_fingerprint: String) -> Self {
        Self {
            host,
            port,
            token,
            cert_fingerprint,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    pub fn to_json(&self) -> Result<String, AgentError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, AgentError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render as a scannable QR code for terminal display.
    pub fn to_qr_unicode(&self) -> Result<String, AgentError> {
        use qrcode::render::unicode;

        let json = self.to_json()?;
        let qr_code = qrcode::QrCode::new(json)
            .map_err(|e| AgentError::Certificate(format!("QR generation failed: {e}")))?;
        Ok(qr_code
            .render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PairingPayload {
        PairingPayload::new(
            "100.64.1.2".into(),
            9876,
            "deadbeef".into(),
            "AA:BB:CC".into(),
        )
    }

    #[test]
    fn test_json_roundtrip() {
        let payload = sample();
        let json = payload.to_json().unwrap();
        let back = PairingPayload::from_json(&json).unwrap();
        assert_eq!(back.host, payload.host);
        assert_eq!(back.port, payload.port);
        assert_eq!(back.token, payload.token);
        assert_eq!(back.cert_fingerprint, payload.cert_fingerprint);
    }

    #[test]
    fn test_field_names_match_pairing_contract() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"certFingerprint\""));
        assert!(json.contains("\"host\""));
        assert!(json.contains("\"port\""));
        assert!(json.contains("\"token\""));
    }

    #[test]
    fn test_qr_renders_nonempty() {
        let qr = sample().to_qr_unicode().unwrap();
        assert!(!qr.is_empty());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(PairingPayload::from_json("{}").is_err());
        assert!(PairingPayload::from_json("not json").is_err());
    }
}
