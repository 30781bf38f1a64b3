//! On-disk PKI layout.
//!
//! One directory per scope, `<name>.crt` and `<name>.key` per
//! authority/leaf. The issuer of a leaf is resolved purely by the filename
//! convention supplied by the caller; nothing is embedded in the files.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use chrono::Utc;
use x509_parser::prelude::*;

use crate::PkiError;

/// Read `<dir>/<name>.crt` and validate its NotBefore/NotAfter window
/// against the current time.
pub fn read_cert(dir: &Path, name: &str) -> Result<String, PkiError> {
    let path = dir.join(format!("{name}.crt"));
    let data = fs::read_to_string(&path).map_err(|source| PkiError::ReadCert {
        path: path.clone(),
        source,
    })?;
    validate_cert_window(&data, name)?;
    Ok(data)
}

/// Read `<dir>/<name>.key`.
pub fn read_key(dir: &Path, name: &str) -> Result<String, PkiError> {
    let path = dir.join(format!("{name}.key"));
    fs::read_to_string(&path).map_err(|source| PkiError::ReadKey { path, source })
}

/// Write `<dir>/<name>.crt` (0644), creating the directory when needed.
pub fn write_cert(dir: &Path, name: &str, cert_pem: &str) -> Result<(), PkiError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{name}.crt"));
    fs::write(&path, cert_pem)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
    Ok(())
}

/// Write `<dir>/<name>.key` (0600), creating the directory when needed.
pub fn write_key(dir: &Path, name: &str, key_pem: &str) -> Result<(), PkiError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{name}.key"));
    fs::write(&path, key_pem)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

/// Write `<dir>/<name>.pub` (0644), creating the directory when needed.
pub fn write_public_key(dir: &Path, name: &str, public_key_pem: &str) -> Result<(), PkiError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{name}.pub"));
    fs::write(&path, public_key_pem)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
    Ok(())
}

/// Decode the first PEM block of a certificate into DER bytes.
pub fn cert_pem_to_der(cert_pem: &str) -> Result<Vec<u8>, PkiError> {
    let block = ::pem::parse(cert_pem).map_err(|e| PkiError::ParseCert(e.to_string()))?;
    Ok(block.contents().to_vec())
}

fn validate_cert_window(cert_pem: &str, name: &str) -> Result<(), PkiError> {
    let der = cert_pem_to_der(cert_pem)?;
    let (_, cert) =
        X509Certificate::from_der(&der).map_err(|e| PkiError::ParseCert(e.to_string()))?;
    let now = Utc::now().timestamp();
    if now < cert.validity().not_before.timestamp() {
        return Err(PkiError::NotYetValid(name.to_string()));
    }
    if now > cert.validity().not_after.timestamp() {
        return Err(PkiError::Expired(name.to_string()));
    }
    Ok(())
}
