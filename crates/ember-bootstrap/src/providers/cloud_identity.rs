//! Cloud-identity verification.
//!
//! The joining node presents the signed instance identity document issued
//! by its cloud provider. Verification happens in a fixed order, short
//! circuiting on the first failure:
//!
//! 1. document signature against the provider public key
//! 2. inner document parse
//! 3. instance lookup through the cloud control API
//! 4. source address equals the instance's reported private IP
//! 5. operator-configured allow-list filters
//!
//! No cloud API call is made for a request whose signature does not verify.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::sha2::Sha256;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use x509_parser::prelude::*;

use crate::BootstrapError;

/// Verifies identity document signatures against the cloud provider's
/// published RSA public key.
#[derive(Clone)]
pub struct DocumentVerifier {
    key: RsaPublicKey,
}

impl DocumentVerifier {
    /// Accepts either a PUBLIC KEY (SPKI) PEM or a CERTIFICATE PEM carrying
    /// an RSA key, matching the two formats providers publish.
    pub fn from_pem(pem: &str) -> Result<Self, BootstrapError> {
        let key = if pem.contains("BEGIN CERTIFICATE") {
            let block = ::pem::parse(pem)
                .map_err(|e| BootstrapError::Signature(format!("invalid certificate: {e}")))?;
            let (_, cert) = X509Certificate::from_der(block.contents())
                .map_err(|e| BootstrapError::Signature(format!("invalid certificate: {e}")))?;
            RsaPublicKey::from_pkcs1_der(cert.public_key().subject_public_key.data.as_ref())
                .map_err(|e| BootstrapError::Signature(format!("certificate key is not RSA: {e}")))?
        } else {
            RsaPublicKey::from_public_key_pem(pem)
                .map_err(|e| BootstrapError::Signature(format!("invalid public key: {e}")))?
        };
        Ok(Self { key })
    }

    /// Verify a base64 RSA-SHA256 signature over `document`.
    pub fn verify(&self, document: &[u8], signature_b64: &str) -> Result<(), BootstrapError> {
        let cleaned: String = signature_b64
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let sig_bytes = BASE64
            .decode(cleaned)
            .map_err(|e| BootstrapError::Signature(format!("signature is not base64: {e}")))?;
        let signature = Signature::try_from(sig_bytes.as_slice())
            .map_err(|e| BootstrapError::Signature(e.to_string()))?;
        VerifyingKey::<Sha256>::new(self.key.clone())
            .verify(document, &signature)
            .map_err(|e| BootstrapError::Signature(e.to_string()))
    }
}

/// What the cloud control API reports for a running instance.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub private_ip: String,
    pub iam_profile: String,
}

/// Seam over the cloud provider's instance-description API.
#[async_trait]
pub trait InstanceApi: Send + Sync {
    async fn describe_instance(
        &self,
        region: &str,
        instance_id: &str,
    ) -> Result<InstanceInfo, BootstrapError>;
}

/// Thin adapter querying an operator-supplied instance-description
/// endpoint. The cloud SDK itself is an external collaborator.
pub struct RestInstanceApi {
    client: reqwest::Client,
    base_url: String,
}

impl RestInstanceApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BootstrapError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(BootstrapError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl InstanceApi for RestInstanceApi {
    async fn describe_instance(
        &self,
        region: &str,
        instance_id: &str,
    ) -> Result<InstanceInfo, BootstrapError> {
        let url = format!("{}/{}/instances/{}", self.base_url, region, instance_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BootstrapError::InstanceLookup(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BootstrapError::InstanceLookup(format!(
                "instance not found: {instance_id}"
            )));
        }
        resp.json()
            .await
            .map_err(|e| BootstrapError::InstanceLookup(e.to_string()))
    }
}
