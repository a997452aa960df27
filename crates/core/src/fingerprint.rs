//! Certificate fingerprinting.
//!
//! The fingerprint a pinning client computes is SHA-256 over the exact DER
//! bytes embedded in the certificate's PEM body. Extraction must not go
//! through an X.509 parser and back out again — re-encoding can reorder or
//! re-canonicalize fields and silently change every fingerprint downstream.

use crate::error::AgentError;
use sha2::{Digest, Sha256};

/// Decode the DER payload directly out of a PEM-encoded certificate, by
/// stripping the `BEGIN`/`END` lines and whitespace and base64-decoding the
/// remainder — never by round-tripping through an X.509 library.
pub fn der_from_pem(pem: &str) -> Result<Vec<u8>, AgentError> {
    let mut body = String::new();
    let mut in_block = false;
    for line in pem.lines() {
        let line = line.trim();
        if line.starts_with("-----BEGIN") {
            in_block = true;
            continue;
        }
        if line.starts_with("-----END") {
            break;
        }
        if in_block {
            body.push_str(line);
        }
    }
    if body.is_empty() {
        return Err(AgentError::Certificate("no PEM block found".into()));
    }
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| AgentError::Certificate(format!("invalid base64 in PEM: {e}")))
}

/// SHA-256 of DER bytes, formatted as uppercase colon-separated hex pairs.
pub fn fingerprint_der(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Convenience: fingerprint straight from a PEM certificate string.
pub fn fingerprint_pem(cert_pem: &str) -> Result<String, AgentError> {
    Ok(fingerprint_der(&der_from_pem(cert_pem)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pem() -> String {
        let der = b"not a real certificate, just bytes to fingerprint".to_vec();
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD.encode(&der);
        let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
        for chunk in b64.as_bytes().chunks(64) {
            pem.push_str(std::str::from_utf8(chunk).unwrap());
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
        pem
    }

    #[test]
    fn test_der_from_pem_roundtrip() {
        let der = b"not a real certificate, just bytes to fingerprint".to_vec();
        let pem = sample_pem();
        assert_eq!(der_from_pem(&pem).unwrap(), der);
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint_pem(&sample_pem()).unwrap();
        // 32 bytes -> 64 hex chars + 31 colons
        assert_eq!(fp.len(), 95);
        assert_eq!(fp.chars().filter(|c| *c == ':').count(), 31);
        assert!(fp.chars().all(|c| c == ':' || c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let pem = sample_pem();
        assert_eq!(fingerprint_pem(&pem).unwrap(), fingerprint_pem(&pem).unwrap());
    }

    #[test]
    fn test_der_from_pem_rejects_garbage() {
        assert!(der_from_pem("not a pem at all").is_err());
    }
}
