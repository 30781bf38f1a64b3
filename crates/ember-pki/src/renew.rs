//! Certificate renewal.
//!
//! Renewal preserves a certificate's external identity (Subject, SANs,
//! usages) while rotating its key material: the prior certificate's fields
//! are copied into a fresh signing config and re-signed by the issuing CA
//! with a newly generated key.

use std::net::IpAddr;
use std::path::Path;

use tracing::info;
use x509_parser::prelude::*;

use crate::io::cert_pem_to_der;
use crate::{AltNames, CertificateAuthority, CertificateConfig, ExtendedUsage, PkiError, SignedKeyPair};

/// Build a signing config from an existing certificate, copying
/// CommonName, Organization, SANs, and extended key usages.
pub fn config_from_cert_pem(cert_pem: &str) -> Result<CertificateConfig, PkiError> {
    let der = cert_pem_to_der(cert_pem)?;
    let (_, cert) =
        X509Certificate::from_der(&der).map_err(|e| PkiError::ParseCert(e.to_string()))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|a| a.as_str().ok())
        .unwrap_or_default()
        .to_string();
    let organization = cert
        .subject()
        .iter_organization()
        .filter_map(|a| a.as_str().ok())
        .map(str::to_string)
        .collect();

    let mut alt_names = AltNames::default();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns) => alt_names.dns_names.push((*dns).to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        alt_names.ips.push(ip);
                    }
                }
                _ => {}
            }
        }
    }

    let mut usages = Vec::new();
    if let Ok(Some(eku)) = cert.extended_key_usage() {
        if eku.value.server_auth {
            usages.push(ExtendedUsage::ServerAuth);
        }
        if eku.value.client_auth {
            usages.push(ExtendedUsage::ClientAuth);
        }
    }

    Ok(CertificateConfig {
        common_name,
        organization,
        alt_names,
        usages,
    })
}

/// Renew `<dir>/<name>.{crt,key}` by re-signing a copy of the existing
/// certificate's identity with `ca` and a fresh key. The prior files are
/// overwritten unless `dry_run` is set.
pub fn renew_key_pair(
    dir: &Path,
    ca: &CertificateAuthority,
    name: &str,
    dry_run: bool,
) -> Result<SignedKeyPair, PkiError> {
    let cert_pem = crate::io::read_cert(dir, name)?;
    let config = config_from_cert_pem(&cert_pem)?;
    let kp = ca.new_signed_key_pair(name, &config)?;
    if dry_run {
        info!(name, "dry run, not writing renewed certificate");
        return Ok(kp);
    }
    kp.write_files(dir)?;
    Ok(kp)
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn test_ca() -> CertificateAuthority {
        CertificateAuthority::new(
            "ca",
            &CertificateConfig {
                common_name: "ember".to_string(),
                ..CertificateConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_renewal_preserves_identity_and_rotates_key() {
        let dir = tempfile::tempdir().unwrap();
        let ca = test_ca();

        let original = ca
            .new_signed_key_pair(
                "apiserver",
                &CertificateConfig {
                    common_name: "ember-apiserver".to_string(),
                    organization: vec!["ember".to_string()],
                    alt_names: AltNames {
                        dns_names: vec!["localhost".to_string(), "ember".to_string()],
                        ips: vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))],
                    },
                    usages: vec![ExtendedUsage::ServerAuth],
                },
            )
            .unwrap();
        original.write_files(dir.path()).unwrap();

        let renewed = renew_key_pair(dir.path(), &ca, "apiserver", false).unwrap();
        assert_ne!(renewed.key_pem, original.key_pem);
        assert_ne!(renewed.cert_pem, original.cert_pem);

        let config = config_from_cert_pem(&renewed.cert_pem).unwrap();
        assert_eq!(config.common_name, "ember-apiserver");
        assert_eq!(config.organization, vec!["ember".to_string()]);
        assert_eq!(
            config.alt_names.dns_names,
            vec!["localhost".to_string(), "ember".to_string()]
        );
        assert_eq!(
            config.alt_names.ips,
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))]
        );
        assert_eq!(config.usages, vec![ExtendedUsage::ServerAuth]);

        // The renewed files replaced the originals on disk.
        let on_disk = crate::load_key_pair(dir.path(), "apiserver").unwrap();
        assert_eq!(on_disk.cert_pem, renewed.cert_pem);
    }

    #[test]
    fn test_renewal_extends_not_after() {
        let dir = tempfile::tempdir().unwrap();
        let ca = test_ca();

        // Issue a certificate with a shortened validity by writing one and
        // renewing it later; the renewal always restarts the validity
        // clock, so NotAfter must be >= the original's.
        let original = ca
            .new_signed_key_pair(
                "front-proxy-client",
                &CertificateConfig {
                    common_name: "front-proxy-client".to_string(),
                    usages: vec![ExtendedUsage::ClientAuth],
                    ..CertificateConfig::default()
                },
            )
            .unwrap();
        original.write_files(dir.path()).unwrap();

        let renewed = renew_key_pair(dir.path(), &ca, "front-proxy-client", false).unwrap();

        let old_der = cert_pem_to_der(&original.cert_pem).unwrap();
        let new_der = cert_pem_to_der(&renewed.cert_pem).unwrap();
        let old_not_after = X509Certificate::from_der(&old_der)
            .unwrap()
            .1
            .validity()
            .not_after
            .timestamp();
        let new_not_after = X509Certificate::from_der(&new_der)
            .unwrap()
            .1
            .validity()
            .not_after
            .timestamp();
        assert!(new_not_after >= old_not_after);
    }

    #[test]
    fn test_dry_run_leaves_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ca = test_ca();
        let original = ca
            .new_signed_key_pair(
                "scheduler",
                &CertificateConfig {
                    common_name: "ember-scheduler".to_string(),
                    usages: vec![ExtendedUsage::ClientAuth],
                    ..CertificateConfig::default()
                },
            )
            .unwrap();
        original.write_files(dir.path()).unwrap();

        renew_key_pair(dir.path(), &ca, "scheduler", true).unwrap();
        let on_disk = crate::load_key_pair(dir.path(), "scheduler").unwrap();
        assert_eq!(on_disk.cert_pem, original.cert_pem);
    }
}
