//! Certificate public-key hashing.
//!
//! The digest covers the DER-encoded SubjectPublicKeyInfo of a certificate,
//! allowing a joining node to pin the cluster CA without carrying the full
//! chain.

use std::path::Path;

use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::io::cert_pem_to_der;
use crate::PkiError;

/// SHA-256 digest of the certificate's DER-encoded SubjectPublicKeyInfo.
pub fn generate_cert_hash(cert_pem: &str) -> Result<[u8; 32], PkiError> {
    let der = cert_pem_to_der(cert_pem)?;
    let (_, cert) =
        X509Certificate::from_der(&der).map_err(|e| PkiError::ParseCert(e.to_string()))?;
    let digest = Sha256::digest(cert.tbs_certificate.subject_pki.raw);
    Ok(digest.into())
}

/// [`generate_cert_hash`] over the contents of a certificate file.
pub fn generate_cert_hash_from_file(path: &Path) -> Result<[u8; 32], PkiError> {
    let data = std::fs::read_to_string(path).map_err(|source| PkiError::ReadCert {
        path: path.to_path_buf(),
        source,
    })?;
    generate_cert_hash(&data)
}

/// Hex rendering used by the CLI, prefixed with the digest algorithm.
pub fn format_cert_hash(hash: &[u8; 32]) -> String {
    format!("sha256:{}", hex::encode(hash))
}

#[cfg(test)]
mod tests {
    use crate::{CertificateAuthority, CertificateConfig};

    use super::*;

    #[test]
    fn test_hash_is_stable_per_key() {
        let ca = CertificateAuthority::new(
            "ca",
            &CertificateConfig {
                common_name: "ember".to_string(),
                ..CertificateConfig::default()
            },
        )
        .unwrap();
        let a = generate_cert_hash(ca.cert_pem()).unwrap();
        let b = generate_cert_hash(ca.cert_pem()).unwrap();
        assert_eq!(a, b);

        let other = CertificateAuthority::new(
            "ca",
            &CertificateConfig {
                common_name: "ember".to_string(),
                ..CertificateConfig::default()
            },
        )
        .unwrap();
        assert_ne!(a, generate_cert_hash(other.cert_pem()).unwrap());
    }

    #[test]
    fn test_format() {
        let hash = [0xab; 32];
        let formatted = format_cert_hash(&hash);
        assert!(formatted.starts_with("sha256:abab"));
        assert_eq!(formatted.len(), "sha256:".len() + 64);
    }
}
