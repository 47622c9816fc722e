//! Phone-side authentication: certificate chain check and the phone's raw
//! PKCS#1-v1.5-flavored and ECDSA signature checks.
//!
//! Grounded on `protocol/crypto/rsa.rs`'s `BoxedUint`-based key construction,
//! generalized from a single hardcoded Apple key to arbitrary RSA/EC issuer
//! and phone keys, and from a standard library-verified signature to the
//! manual modular-exponentiation check the phone's truncated encoding needs.

use anyhow::{Context, Result};
use crypto_bigint::modular::{BoxedMontyForm, BoxedMontyParams};
use crypto_bigint::{BoxedUint, Odd};
use sha2::Digest;
use x509_cert::der::{Decode, Encode};

use crate::error::AuthError;
use crate::util::cryptoutil;

pub struct TrustAnchor {
    pub cert: x509_cert::Certificate,
}

/// Loads the CAPF issuance CA plus any additional verify-certificate files,
/// in the order they should be tried.
pub fn load_trust_anchors(paths: &[String]) -> Result<Vec<TrustAnchor>> {
    paths
        .iter()
        .map(|path| {
            let der = cryptoutil::read_data_from_pem(path)
                .with_context(|| format!("loading trust anchor {path}"))?;
            let cert = x509_cert::Certificate::from_der(&der)
                .with_context(|| format!("parsing trust anchor {path}"))?;
            Ok(TrustAnchor { cert })
        })
        .collect()
}

enum PublicKey {
    Rsa(rsa::RsaPublicKey),
    Ec(p256::PublicKey),
}

fn public_key_from_spki(spki: &x509_cert::spki::SubjectPublicKeyInfoOwned) -> Result<PublicKey> {
    let der = spki.to_der().context("re-encoding subject public key info")?;
    if let Ok(key) = <rsa::RsaPublicKey as rsa::pkcs8::DecodePublicKey>::from_public_key_der(&der) {
        return Ok(PublicKey::Rsa(key));
    }
    if let Ok(key) = <p256::PublicKey as p256::pkcs8::DecodePublicKey>::from_public_key_der(&der) {
        return Ok(PublicKey::Ec(key));
    }
    Err(anyhow::anyhow!("unsupported public key algorithm in SubjectPublicKeyInfo"))
}

/// Hashes understood by the library-verified X.509 signature algorithm OIDs.
#[derive(Clone, Copy)]
enum SigHash {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

fn sig_alg_from_oid(oid: &str) -> Option<(bool, SigHash)> {
    // (is_rsa, hash)
    Some(match oid {
        "1.2.840.113549.1.1.5" => (true, SigHash::Sha1),
        "1.2.840.113549.1.1.11" => (true, SigHash::Sha256),
        "1.2.840.113549.1.1.12" => (true, SigHash::Sha384),
        "1.2.840.113549.1.1.13" => (true, SigHash::Sha512),
        "1.2.840.10045.4.1" => (false, SigHash::Sha1),
        "1.2.840.10045.4.3.2" => (false, SigHash::Sha256),
        "1.2.840.10045.4.3.3" => (false, SigHash::Sha384),
        "1.2.840.10045.4.3.4" => (false, SigHash::Sha512),
        _ => return None,
    })
}

fn verify_rsa_pkcs1v15(key: &rsa::RsaPublicKey, hash: SigHash, tbs: &[u8], sig: &[u8]) -> bool {
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::signature::Verifier;
    let Ok(sig) = Signature::try_from(sig) else {
        return false;
    };
    match hash {
        SigHash::Sha1 => VerifyingKey::<sha1::Sha1>::new(key.clone())
            .verify(tbs, &sig)
            .is_ok(),
        SigHash::Sha256 => VerifyingKey::<sha2::Sha256>::new(key.clone())
            .verify(tbs, &sig)
            .is_ok(),
        SigHash::Sha384 => VerifyingKey::<sha2::Sha384>::new(key.clone())
            .verify(tbs, &sig)
            .is_ok(),
        SigHash::Sha512 => VerifyingKey::<sha2::Sha512>::new(key.clone())
            .verify(tbs, &sig)
            .is_ok(),
    }
}

fn verify_ecdsa(key: &p256::PublicKey, hash: SigHash, tbs: &[u8], sig: &[u8]) -> bool {
    use p256::ecdsa::signature::hazmat::PrehashVerifier;
    use p256::ecdsa::{Signature, VerifyingKey};
    let verifying_key = VerifyingKey::from(key);
    let Ok(signature) = Signature::from_der(sig) else {
        return false;
    };
    let digest = match hash {
        SigHash::Sha1 => cryptoutil::sha1_enc(tbs),
        SigHash::Sha256 => cryptoutil::sha256(tbs),
        SigHash::Sha384 => {
            let mut h = sha2::Sha384::new();
            h.update(tbs);
            h.finalize().to_vec()
        }
        SigHash::Sha512 => cryptoutil::sha512(tbs),
    };
    verifying_key.verify_prehash(&digest, &signature).is_ok()
}

/// Validates a certificate's signature against exactly one candidate anchor,
/// per `verify_certificate`: the anchor's Subject must equal the candidate's
/// Issuer, and the anchor's key must validate the candidate's TBSCertificate
/// signature.
pub fn verify_certificate(
    candidate: &x509_cert::Certificate,
    anchors: &[TrustAnchor],
) -> Result<(), AuthError> {
    let tbs_der = candidate
        .tbs_certificate
        .to_der()
        .map_err(|e| AuthError::CertParse(e.to_string()))?;
    let sig_oid = candidate.signature_algorithm.oid.to_string();
    let Some((is_rsa, hash)) = sig_alg_from_oid(&sig_oid) else {
        return Err(AuthError::UnknownIssuer);
    };
    let sig_bits = candidate
        .signature
        .as_bytes()
        .ok_or_else(|| AuthError::CertParse("non-octet-aligned signature bits".into()))?;

    for anchor in anchors {
        if anchor.cert.tbs_certificate.subject != candidate.tbs_certificate.issuer {
            continue;
        }
        let Ok(key) = public_key_from_spki(&anchor.cert.tbs_certificate.subject_public_key_info)
        else {
            continue;
        };
        let ok = match (&key, is_rsa) {
            (PublicKey::Rsa(k), true) => verify_rsa_pkcs1v15(k, hash, &tbs_der, sig_bits),
            (PublicKey::Ec(k), false) => verify_ecdsa(k, hash, &tbs_der, sig_bits),
            _ => false,
        };
        if ok {
            return Ok(());
        }
    }
    Err(AuthError::UnknownIssuer)
}

/// A phone's own public key, extracted from its presented certificate, used
/// for the manual raw-signature check (not the standard library verify path
/// `verify_certificate` uses for chain validation).
pub enum PhoneKey {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec(p256::PublicKey),
}

pub fn extract_phone_key(cert: &x509_cert::Certificate) -> Result<PhoneKey, AuthError> {
    let spki = &cert.tbs_certificate.subject_public_key_info;
    match public_key_from_spki(spki).map_err(|e| AuthError::CertParse(e.to_string()))? {
        PublicKey::Rsa(key) => Ok(PhoneKey::Rsa {
            n: key.n().to_bytes_be(),
            e: key.e().to_bytes_be(),
        }),
        PublicKey::Ec(key) => Ok(PhoneKey::Ec(key)),
    }
}

fn boxed_uint_from_be_bytes(bytes: &[u8]) -> BoxedUint {
    let bits = (bytes.len() as u32 * 8).div_ceil(64) * 64;
    let bits = bits.max(64);
    Option::from(BoxedUint::from_be_slice(bytes, bits)).expect("bit precision covers byte length")
}

/// Computes `signed_data^e mod n` and returns the last `hashlen` bytes of
/// its big-endian representation — the "public decrypt" the phone's
/// truncated PKCS#1 v1.5 encoding requires instead of a library verifier.
fn raw_rsa_decrypt_tail(n: &[u8], e: &[u8], signed_data: &[u8], hashlen: usize) -> Vec<u8> {
    let n_big = boxed_uint_from_be_bytes(n);
    let modulus = Option::from(Odd::new(n_big)).expect("rsa modulus is odd");
    let params = BoxedMontyParams::new(modulus);
    let modulus_bits = params.modulus().as_ref().bits_precision();
    let base = boxed_uint_from_be_bytes(signed_data).widen(modulus_bits);
    let exp = boxed_uint_from_be_bytes(e);
    let form = BoxedMontyForm::new(base, params);
    let result = form.pow(&exp).retrieve();
    let bytes = result.to_be_bytes();
    let tail_start = bytes.len().saturating_sub(hashlen);
    bytes[tail_start..].to_vec()
}

#[derive(Clone, Copy)]
pub enum PhoneHash {
    Sha1,
    Sha512,
}

impl PhoneHash {
    fn len(self) -> usize {
        match self {
            PhoneHash::Sha1 => 20,
            PhoneHash::Sha512 => 64,
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            PhoneHash::Sha1 => cryptoutil::sha1_enc(data),
            PhoneHash::Sha512 => cryptoutil::sha512(data),
        }
    }
}

/// Verifies one of the phone's own signatures (SIGNED_DATA or the inner
/// signature of SHA2_SIGNED_DATA/SUDI) over `auth_data`.
pub fn verify_phone_signature(
    auth_data: &[u8],
    signed_data: &[u8],
    hash: PhoneHash,
    key: &PhoneKey,
) -> Result<(), AuthError> {
    let expected = hash.digest(auth_data);
    let ok = match key {
        PhoneKey::Rsa { n, e } => {
            let tail = raw_rsa_decrypt_tail(n, e, signed_data, hash.len());
            tail == expected
        }
        PhoneKey::Ec(pk) => {
            use p256::ecdsa::signature::hazmat::PrehashVerifier;
            use p256::ecdsa::{Signature, VerifyingKey};
            let verifying_key = VerifyingKey::from(pk);
            match Signature::from_der(signed_data).or_else(|_| Signature::from_slice(signed_data))
            {
                Ok(sig) => verifying_key.verify_prehash(&expected, &sig).is_ok(),
                Err(_) => false,
            }
        }
    };
    if ok {
        Ok(())
    } else {
        Err(AuthError::BadSignature)
    }
}

/// Parses `SHA2_SIGNED_DATA = hash_algo(u8) | len(u16 BE) | signature` and
/// validates the mandated hash algorithm (SHA-512, constant 3).
pub fn parse_sha2_signed_data(bytes: &[u8]) -> Result<Vec<u8>, AuthError> {
    if bytes.len() < 3 {
        return Err(AuthError::InvalidSha2HashAlgorithm);
    }
    let hash_algo = bytes[0];
    let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
    if hash_algo != crate::capf::wire::HASH_SHA512 {
        return Err(AuthError::InvalidSha2HashAlgorithm);
    }
    bytes
        .get(3..3 + len)
        .map(|s| s.to_vec())
        .ok_or(AuthError::InvalidSha2HashAlgorithm)
}

/// One of the three length-tagged segments inside SUDI_DATA.
struct SudiSegment<'a> {
    tag: u8,
    data: &'a [u8],
}

fn parse_sudi_segments(mut bytes: &[u8]) -> Option<Vec<SudiSegment<'_>>> {
    let mut segments = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < 3 {
            return None;
        }
        let tag = bytes[0];
        let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        let data = bytes.get(3..3 + len)?;
        segments.push(SudiSegment { tag, data });
        bytes = &bytes[3 + len..];
    }
    Some(segments)
}

/// Verifies the optional Cisco SUDI attestation chained to the phone's own
/// authentication. Skipped (returns `Ok`) when the SUDI key is not RSA.
pub fn verify_sudi(
    session_id: u32,
    sudi_data: &[u8],
    anchors: &[TrustAnchor],
) -> Result<(), AuthError> {
    let segments = parse_sudi_segments(sudi_data)
        .ok_or_else(|| AuthError::CertParse("malformed SUDI_DATA".into()))?;

    let cert_der = segments
        .iter()
        .find(|s| s.tag == 0x00)
        .map(|s| s.data)
        .ok_or_else(|| AuthError::CertParse("SUDI_DATA missing cert segment".into()))?;
    let signed_sha1 = segments.iter().find(|s| s.tag == 0x01).map(|s| s.data);
    let signed_sha512 = segments.iter().find(|s| s.tag == 0x03).map(|s| s.data);

    let sudi_cert = x509_cert::Certificate::from_der(cert_der)
        .map_err(|e| AuthError::CertParse(e.to_string()))?;
    verify_certificate(&sudi_cert, anchors)?;

    let key = extract_phone_key(&sudi_cert)?;
    let PhoneKey::Rsa { .. } = key else {
        return Ok(());
    };

    let mut auth_data = session_id.to_le_bytes().to_vec();
    auth_data.extend_from_slice(cert_der);

    if let Some(sig) = signed_sha1 {
        verify_phone_signature(&auth_data, sig, PhoneHash::Sha1, &key)?;
    }
    if let Some(sig) = signed_sha512 {
        verify_phone_signature(&auth_data, sig, PhoneHash::Sha512, &key)?;
    }
    Ok(())
}
