//! Certificate authority management for ember.
//!
//! A [`CertificateAuthority`] is a self-signed key/certificate pair that is
//! the root of trust for a named domain (cluster CA, front-proxy CA, ...).
//! It is created once per cluster, persisted to durable storage, and
//! thereafter loaded, never regenerated. Leaf certificates are issued as
//! [`SignedKeyPair`]s and verify against exactly the CA that signed them.
//!
//! Uses rcgen to generate and sign certificates and x509-parser to parse
//! and validate persisted material.

use std::net::IpAddr;
use std::path::Path;

use chrono::{Datelike, Duration, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};

pub mod certhash;
pub mod io;
pub mod renew;
pub mod token;

mod error;

pub use certhash::{generate_cert_hash, generate_cert_hash_from_file};
pub use error::PkiError;
pub use renew::renew_key_pair;
pub use token::generate_bootstrap_token;

/// Validity of a certificate authority.
const CA_VALIDITY_DAYS: i64 = 3650;

/// Validity of a leaf certificate.
const LEAF_VALIDITY_DAYS: i64 = 365;

/// Extended key usages a leaf certificate can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedUsage {
    ServerAuth,
    ClientAuth,
}

/// Subject alternative names for a leaf certificate.
#[derive(Debug, Clone, Default)]
pub struct AltNames {
    pub dns_names: Vec<String>,
    pub ips: Vec<IpAddr>,
}

/// Template for a certificate: subject, alternative names, and usages.
#[derive(Debug, Clone, Default)]
pub struct CertificateConfig {
    pub common_name: String,
    pub organization: Vec<String>,
    pub alt_names: AltNames,
    pub usages: Vec<ExtendedUsage>,
}

/// A named leaf key/certificate pair signed by one certificate authority.
#[derive(Debug, Clone)]
pub struct SignedKeyPair {
    pub name: String,
    pub cert_pem: String,
    pub key_pem: String,
}

impl SignedKeyPair {
    /// Write `<name>.crt` and `<name>.key` into `dir`.
    pub fn write_files(&self, dir: &Path) -> Result<(), PkiError> {
        io::write_key(dir, &self.name, &self.key_pem)?;
        io::write_cert(dir, &self.name, &self.cert_pem)
    }
}

/// A self-signed certificate authority.
///
/// The private key never leaves this type: signing happens through
/// [`CertificateAuthority::new_signed_key_pair`] and persistence through
/// [`CertificateAuthority::write_files`].
pub struct CertificateAuthority {
    name: String,
    cert_pem: String,
    cert: Certificate,
    key: KeyPair,
}

impl CertificateAuthority {
    /// Generate a private key and a self-signed certificate with the given
    /// CommonName.
    pub fn new(name: impl Into<String>, config: &CertificateConfig) -> Result<Self, PkiError> {
        let key = KeyPair::generate().map_err(PkiError::KeyGeneration)?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, config.common_name.clone());
        for org in &config.organization {
            dn.push(DnType::OrganizationName, org.clone());
        }
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        set_validity(&mut params, CA_VALIDITY_DAYS);

        let cert = params.self_signed(&key).map_err(PkiError::CertGeneration)?;
        Ok(Self {
            name: name.into(),
            cert_pem: cert.pem(),
            cert,
            key,
        })
    }

    /// The CA name, matching its on-disk file names.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The CA certificate in PEM format.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Generate a new key and certificate from `config`, signed by this CA.
    pub fn new_signed_key_pair(
        &self,
        name: impl Into<String>,
        config: &CertificateConfig,
    ) -> Result<SignedKeyPair, PkiError> {
        let key = KeyPair::generate().map_err(PkiError::KeyGeneration)?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, config.common_name.clone());
        for org in &config.organization {
            dn.push(DnType::OrganizationName, org.clone());
        }
        params.distinguished_name = dn;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = config
            .usages
            .iter()
            .map(|u| match u {
                ExtendedUsage::ServerAuth => ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedUsage::ClientAuth => ExtendedKeyUsagePurpose::ClientAuth,
            })
            .collect();
        for dns in &config.alt_names.dns_names {
            let name = dns
                .clone()
                .try_into()
                .map_err(|_| PkiError::InvalidAltName(dns.clone()))?;
            params.subject_alt_names.push(rcgen::SanType::DnsName(name));
        }
        for ip in &config.alt_names.ips {
            params
                .subject_alt_names
                .push(rcgen::SanType::IpAddress(*ip));
        }
        set_validity(&mut params, LEAF_VALIDITY_DAYS);

        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .map_err(PkiError::Signing)?;
        Ok(SignedKeyPair {
            name: name.into(),
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    /// Write `<name>.crt` and `<name>.key` into `dir`.
    pub fn write_files(&self, dir: &Path) -> Result<(), PkiError> {
        io::write_key(dir, &self.name, &self.key.serialize_pem())?;
        io::write_cert(dir, &self.name, &self.cert_pem)
    }

    /// Write the CA public key as `<name>.pub` into `dir`. Used for the
    /// service-account signing key, where consumers only need the public
    /// half.
    pub fn write_public_key(&self, dir: &Path) -> Result<(), PkiError> {
        io::write_public_key(dir, &self.name, &self.key.public_key_pem())
    }
}

/// Load a certificate authority from `<dir>/<name>.crt` and
/// `<dir>/<name>.key`, validating the certificate's validity window against
/// the current time.
pub fn load_certificate_authority(dir: &Path, name: &str) -> Result<CertificateAuthority, PkiError> {
    let kp = load_key_pair(dir, name)?;
    let key = KeyPair::from_pem(&kp.key_pem).map_err(|e| PkiError::ParseKey(e.to_string()))?;

    // Rebuild signing state from the persisted certificate so issued leaf
    // certificates carry the original issuer name.
    let params = CertificateParams::from_ca_cert_pem(&kp.cert_pem)
        .map_err(|e| PkiError::ParseCert(e.to_string()))?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| PkiError::ParseCert(e.to_string()))?;

    Ok(CertificateAuthority {
        name: name.to_string(),
        cert_pem: kp.cert_pem,
        cert,
        key,
    })
}

/// Generate a bare signing key pair, persisted as `<name>.key` and
/// `<name>.pub`. Used for the service-account token signing key, whose
/// consumers only ever need the public half.
pub fn write_service_account_key(dir: &Path, name: &str) -> Result<(), PkiError> {
    let key = KeyPair::generate().map_err(PkiError::KeyGeneration)?;
    io::write_key(dir, name, &key.serialize_pem())?;
    io::write_public_key(dir, name, &key.public_key_pem())
}

/// Load a leaf key pair from `<dir>/<name>.crt` and `<dir>/<name>.key`,
/// validating the certificate's validity window against the current time.
pub fn load_key_pair(dir: &Path, name: &str) -> Result<SignedKeyPair, PkiError> {
    let cert_pem = io::read_cert(dir, name)?;
    let key_pem = io::read_key(dir, name)?;
    Ok(SignedKeyPair {
        name: name.to_string(),
        cert_pem,
        key_pem,
    })
}

fn set_validity(params: &mut CertificateParams, days: i64) {
    let not_before = Utc::now();
    let not_after = not_before + Duration::days(days);
    params.not_before = rcgen::date_time_ymd(
        not_before.year(),
        not_before.month() as u8,
        not_before.day() as u8,
    );
    params.not_after = rcgen::date_time_ymd(
        not_after.year(),
        not_after.month() as u8,
        not_after.day() as u8,
    );
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use x509_parser::prelude::*;

    use super::*;

    fn parse<'a>(der: &'a [u8]) -> X509Certificate<'a> {
        X509Certificate::from_der(der).unwrap().1
    }

    fn pem_to_der(pem: &str) -> Vec<u8> {
        ::pem::parse(pem).unwrap().contents().to_vec()
    }

    #[test]
    fn test_new_certificate_authority_is_self_signed() {
        let ca = CertificateAuthority::new(
            "ca",
            &CertificateConfig {
                common_name: "ember".to_string(),
                ..CertificateConfig::default()
            },
        )
        .unwrap();

        let der = pem_to_der(ca.cert_pem());
        let cert = parse(&der);
        let constraints = cert.basic_constraints().unwrap().unwrap();
        assert!(constraints.value.ca);
        assert_eq!(cert.subject(), cert.issuer());
        cert.verify_signature(Some(cert.public_key())).unwrap();
    }

    #[test]
    fn test_leaf_verifies_against_issuer_only() {
        let config = CertificateConfig {
            common_name: "ember".to_string(),
            ..CertificateConfig::default()
        };
        let ca_x = CertificateAuthority::new("ca", &config).unwrap();
        let ca_y = CertificateAuthority::new("other-ca", &config).unwrap();

        let leaf = ca_x
            .new_signed_key_pair(
                "apiserver",
                &CertificateConfig {
                    common_name: "ember-apiserver".to_string(),
                    usages: vec![ExtendedUsage::ServerAuth],
                    alt_names: AltNames {
                        dns_names: vec!["localhost".to_string()],
                        ips: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
                    },
                    ..CertificateConfig::default()
                },
            )
            .unwrap();

        let leaf_der = pem_to_der(&leaf.cert_pem);
        let x_der = pem_to_der(ca_x.cert_pem());
        let y_der = pem_to_der(ca_y.cert_pem());

        let leaf_cert = parse(&leaf_der);
        assert!(leaf_cert
            .verify_signature(Some(parse(&x_der).public_key()))
            .is_ok());
        assert!(leaf_cert
            .verify_signature(Some(parse(&y_der).public_key()))
            .is_err());
    }

    #[test]
    fn test_leaf_carries_config_fields() {
        let ca = CertificateAuthority::new(
            "ca",
            &CertificateConfig {
                common_name: "ember".to_string(),
                ..CertificateConfig::default()
            },
        )
        .unwrap();
        let leaf = ca
            .new_signed_key_pair(
                "agent-client",
                &CertificateConfig {
                    common_name: "system:node-agent".to_string(),
                    organization: vec!["system:masters".to_string()],
                    usages: vec![ExtendedUsage::ClientAuth],
                    ..CertificateConfig::default()
                },
            )
            .unwrap();

        let der = pem_to_der(&leaf.cert_pem);
        let cert = parse(&der);
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|a| a.as_str().ok())
            .unwrap();
        assert_eq!(cn, "system:node-agent");
        let org = cert
            .subject()
            .iter_organization()
            .next()
            .and_then(|a| a.as_str().ok())
            .unwrap();
        assert_eq!(org, "system:masters");
        let eku = cert.extended_key_usage().unwrap().unwrap().value;
        assert!(eku.client_auth);
        assert!(!eku.server_auth);
    }

    #[test]
    fn test_write_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(
            "ca",
            &CertificateConfig {
                common_name: "ember".to_string(),
                ..CertificateConfig::default()
            },
        )
        .unwrap();
        ca.write_files(dir.path()).unwrap();

        let loaded = load_certificate_authority(dir.path(), "ca").unwrap();
        assert_eq!(loaded.cert_pem(), ca.cert_pem());

        // A leaf issued by the reloaded CA still verifies against the
        // persisted certificate's public key.
        let leaf = loaded
            .new_signed_key_pair(
                "front-proxy-client",
                &CertificateConfig {
                    common_name: "front-proxy-client".to_string(),
                    usages: vec![ExtendedUsage::ClientAuth],
                    ..CertificateConfig::default()
                },
            )
            .unwrap();
        let leaf_der = pem_to_der(&leaf.cert_pem);
        let ca_der = pem_to_der(ca.cert_pem());
        assert!(parse(&leaf_der)
            .verify_signature(Some(parse(&ca_der).public_key()))
            .is_ok());
    }

    #[test]
    fn test_load_missing_key_pair() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_key_pair(dir.path(), "absent"),
            Err(PkiError::ReadCert { .. })
        ));
    }
}
