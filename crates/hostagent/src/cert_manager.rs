//! TLS certificate lifecycle for pinning-based pairing.
//!
//! Generates (or loads) a self-signed RSA-2048 certificate under
//! `<dataDir>/certs/`. The fingerprint exposed to pairing clients is always
//! computed from the raw DER embedded in the PEM on disk — see
//! [`gateway_core::fingerprint`] for why that must not go through a
//! re-parse.

use gateway_core::error::AgentError;
use gateway_core::fingerprint::fingerprint_pem;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SanType,
};
use rsa::pkcs8::EncodePrivateKey;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const COMMON_NAME: &str = "Personal Agent";
const VALIDITY_YEARS: i64 = 10;

#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub cert_pem: String,
    pub key_pem: String,
    pub fingerprint: String,
}

pub struct CertManager {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CertManager {
    pub fn new(data_dir: &Path) -> Self {
        let certs_dir = data_dir.join("certs");
        Self {
            cert_path: certs_dir.join("server.crt"),
            key_path: certs_dir.join("server.key"),
        }
    }

    /// Load the cert/key pair from disk if both files exist and parse;
    /// otherwise generate and persist a fresh pair.
    pub fn initialize(&self, additional_ip: Option<Ipv4Addr>) -> Result<CertificateInfo, AgentError> {
        if let Some(info) = self.try_load()? {
            return Ok(info);
        }
        self.generate_and_save(additional_ip)
    }

    /// Unconditionally replace the on-disk pair.
    pub fn regenerate(&self, additional_ip: Option<Ipv4Addr>) -> Result<CertificateInfo, AgentError> {
        self.generate_and_save(additional_ip)
    }

    fn try_load(&self) -> Result<Option<CertificateInfo>, AgentError> {
        if !self.cert_path.exists() || !self.key_path.exists() {
            return Ok(None);
        }
        let cert_pem = std::fs::read_to_string(&self.cert_path)?;
        let key_pem = std::fs::read_to_string(&self.key_path)?;
        match fingerprint_pem(&cert_pem) {
            Ok(fingerprint) => Ok(Some(CertificateInfo {
                cert_pem,
                key_pem,
                fingerprint,
            })),
            Err(e) => {
                warn!(error = %e, "stored certificate failed to parse, regenerating");
                Ok(None)
            }
        }
    }

    fn generate_and_save(&self, additional_ip: Option<Ipv4Addr>) -> Result<CertificateInfo, AgentError> {
        let info = generate_certificate(additional_ip)?;

        if let Some(parent) = self.cert_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.cert_path, &info.cert_pem)?;
        std::fs::write(&self.key_path, &info.key_pem)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut cert_perm = std::fs::metadata(&self.cert_path)?.permissions();
            cert_perm.set_mode(0o644);
            std::fs::set_permissions(&self.cert_path, cert_perm)?;

            let mut key_perm = std::fs::metadata(&self.key_path)?.permissions();
            key_perm.set_mode(0o600);
            std::fs::set_permissions(&self.key_path, key_perm)?;
        }

        info!(fingerprint = %info.fingerprint, "generated new self-signed certificate");
        Ok(info)
    }
}

fn generate_certificate(additional_ip: Option<Ipv4Addr>) -> Result<CertificateInfo, AgentError> {
    let rsa_key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
        .map_err(|e| AgentError::Certificate(format!("RSA key generation failed: {e}")))?;
    let pkcs8_der = rsa_key
        .to_pkcs8_der()
        .map_err(|e| AgentError::Certificate(format!("PKCS8 encoding failed: {e}")))?;
    let key_pair = KeyPair::from_der(pkcs8_der.as_bytes())
        .map_err(|e| AgentError::Certificate(format!("rcgen key import failed: {e}")))?;

    let mut subject_alt_names = vec![
        SanType::DnsName("localhost".try_into().expect("valid dns name")),
        SanType::IpAddress(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST)),
    ];
    if let Some(ip) = additional_ip {
        subject_alt_names.push(SanType::IpAddress(std::net::IpAddr::V4(ip)));
    }

    let mut params = CertificateParams::default();
    params.subject_alt_names = subject_alt_names;
    params.distinguished_name = {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, COMMON_NAME);
        dn
    };
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(365 * VALIDITY_YEARS);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| AgentError::Certificate(format!("self-signing failed: {e}")))?;

    let cert_pem = cert.pem();
    let key_pem = key_pair.serialize_pem();
    let fingerprint = fingerprint_pem(&cert_pem)?;

    Ok(CertificateInfo {
        cert_pem,
        key_pem,
        fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_initialize_generates_then_loads() {
        let dir = TempDir::new().unwrap();
        let manager = CertManager::new(dir.path());

        let first = manager.initialize(None).unwrap();
        assert!(manager.cert_path.exists());
        assert!(manager.key_path.exists());

        let second = manager.initialize(None).unwrap();
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.cert_pem, second.cert_pem);
    }

    #[test]
    fn test_regenerate_produces_new_fingerprint() {
        let dir = TempDir::new().unwrap();
        let manager = CertManager::new(dir.path());

        let first = manager.initialize(None).unwrap();
        let second = manager.regenerate(None).unwrap();
        assert_ne!(first.fingerprint, second.fingerprint);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let manager = CertManager::new(dir.path());
        manager.initialize(None).unwrap();
        let mode = std::fs::metadata(&manager.key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_fingerprint_matches_stored_pem() {
        let dir = TempDir::new().unwrap();
        let manager = CertManager::new(dir.path());
        let info = manager.initialize(None).unwrap();
        assert_eq!(fingerprint_pem(&info.cert_pem).unwrap(), info.fingerprint);
    }
}
