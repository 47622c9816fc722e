//! Loads the operator-supplied CA certificate and private key once at
//! startup and hands out a read-only, thread-shared handle to each worker.
//!
//! Grounded on `certmanager.rs`'s PEM-loading `FileCertManager`, but this
//! server never bootstraps or generates CA material itself — the PEM files
//! are pre-existing, operator-managed input.

use anyhow::{Context, Result};
use x509_cert::der::Decode;

use crate::util::cryptoutil;

pub enum IssuerSigningKey {
    Rsa(rsa::RsaPrivateKey),
    Ec(p256::SecretKey),
}

pub struct IssuerMaterial {
    pub cert_der: Vec<u8>,
    pub cert: x509_cert::Certificate,
    pub key: IssuerSigningKey,
}

impl IssuerMaterial {
    /// Loads the CA certificate and key from a PEM file (concatenated or
    /// separate paths are both accepted by passing the same path twice).
    pub fn load(cert_path: &str, key_path: &str) -> Result<Self> {
        let cert_der = cryptoutil::read_data_from_pem(cert_path)
            .context("loading issuer certificate")?;
        let cert = x509_cert::Certificate::from_der(&cert_der)
            .context("parsing issuer certificate")?;
        let key = load_signing_key(key_path).context("loading issuer private key")?;
        Ok(Self {
            cert_der,
            cert,
            key,
        })
    }
}

fn load_signing_key(path: &str) -> Result<IssuerSigningKey> {
    let pem = std::fs::read_to_string(path).context(format!("reading {path}"))?;

    if let Ok(key) = p256::SecretKey::from_sec1_pem(&pem) {
        return Ok(IssuerSigningKey::Ec(key));
    }
    if let Ok(key) = p256::SecretKey::from_pkcs8_pem(&pem) {
        return Ok(IssuerSigningKey::Ec(key));
    }
    if let Ok(key) = <rsa::RsaPrivateKey as rsa::pkcs8::DecodePrivateKey>::from_pkcs8_pem(&pem) {
        return Ok(IssuerSigningKey::Rsa(key));
    }
    if let Ok(key) = <rsa::RsaPrivateKey as rsa::pkcs1::DecodeRsaPrivateKey>::from_pkcs1_pem(&pem) {
        return Ok(IssuerSigningKey::Rsa(key));
    }
    Err(anyhow::anyhow!(
        "{path}: not a recognized EC (SEC1/PKCS#8) or RSA (PKCS#1/PKCS#8) private key"
    ))
}
