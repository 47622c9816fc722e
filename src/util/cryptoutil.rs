//! Small digest and PEM helpers shared across the issuer and verifier.

use anyhow::{Context, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn sha1_enc(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn sha512(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Reads the DER payload out of a PEM file, regardless of its header label.
pub fn read_data_from_pem(fname: &str) -> Result<Vec<u8>> {
    let file_contents =
        std::fs::read_to_string(fname).context(format!("reading pem file {fname}"))?;
    Ok(pem::parse(file_contents)?.contents().to_vec())
}

pub fn write_pem(tag: &str, data: &[u8], fname: &str) -> Result<()> {
    let p = pem::Pem::new(tag, data);
    let enc = pem::encode(&p);
    std::fs::write(fname, enc).context(format!("writing pem file {fname}"))?;
    Ok(())
}
