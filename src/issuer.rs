//! Builds and signs a leaf X.509 certificate off the operator-supplied CA.
//!
//! Grounded on `cert_x509.rs`'s `add_ext`/extension-ordering pattern, but the
//! Subject/Issuer construction, serial, and extension set are rewritten to
//! this service's field rules rather than Matter's node/fabric RDNs.

use anyhow::{Context, Result};
use rand::RngCore;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime, UtcOffset};
use x509_cert::der::Encode;

use crate::issuer_material::{IssuerMaterial, IssuerSigningKey};
use crate::util::asn1;

const OID_CN: &str = "2.5.4.3";
const OID_COPYABLE_SUBJECT_ATTRS: &[&str] = &[
    "2.5.4.10", // O
    "2.5.4.11", // OU
    "2.5.4.7",  // L
    "2.5.4.8",  // ST
    "2.5.4.6",  // C
];

const OID_SIG_SHA256_WITH_RSA: &str = "1.2.840.113549.1.1.11";
const OID_SIG_ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";

const OID_CE_BASIC_CONSTRAINTS: &str = "2.5.29.19";
const OID_CE_KEY_USAGE: &str = "2.5.29.15";
const OID_CE_EXT_KEY_USAGE: &str = "2.5.29.37";
const OID_CE_SUBJECT_ALT_NAME: &str = "2.5.29.17";

const OID_EKU_SERVER_AUTH: &str = "1.3.6.1.5.5.7.3.1";
const OID_EKU_CLIENT_AUTH: &str = "1.3.6.1.5.5.7.3.2";
const OID_EKU_IPSEC_END_SYSTEM: &str = "1.3.6.1.5.5.7.3.5";

fn add_ext(encoder: &mut asn1::Encoder, oid: &str, critical: bool, value: &[u8]) -> Result<()> {
    encoder.start_seq(0x30)?;
    encoder.write_oid(oid)?;
    if critical {
        encoder.write_bool(critical)?;
    }
    encoder.write_octet_string(value)?;
    encoder.end_seq();
    Ok(())
}

/// Formats as a DER UTCTime content string: `YYMMDDHHMMSSZ` in UTC.
fn x509_time(t: OffsetDateTime) -> Result<String> {
    let t = t.to_offset(UtcOffset::UTC);
    Ok(format!(
        "{:02}{:02}{:02}{:02}{:02}{:02}Z",
        t.year().rem_euclid(100),
        t.month() as u8,
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    ))
}

/// Copies `CN=<device_name>` plus any {O, OU, L, ST, C} attribute present on
/// the issuer's own Subject, in order of occurrence, duplicates included.
fn build_subject(issuer_subject: &x509_cert::name::Name, device_name: &str) -> Result<Vec<u8>> {
    let mut encoder = asn1::Encoder::new();
    encoder.start_seq(0x30)?;

    encoder.start_seq(0x31)?; // RDN
    encoder.start_seq(0x30)?; // AttributeTypeAndValue
    encoder.write_oid(OID_CN)?;
    encoder.write_string(device_name)?;
    encoder.end_seq();
    encoder.end_seq();

    for rdn in issuer_subject.0.iter() {
        for atv in rdn.iter() {
            let oid_str = atv.oid.to_string();
            if !OID_COPYABLE_SUBJECT_ATTRS.contains(&oid_str.as_str()) {
                continue;
            }
            let Some(value) = decode_directory_string(&atv.value) else {
                continue;
            };
            encoder.start_seq(0x31)?;
            encoder.start_seq(0x30)?;
            encoder.write_oid(&oid_str)?;
            encoder.write_string(&value)?;
            encoder.end_seq();
            encoder.end_seq();
        }
    }

    encoder.end_seq();
    Ok(encoder.encode())
}

/// RDN attribute values in the wild show up as UTF8String, PrintableString,
/// or IA5String; try each rather than assuming one.
fn decode_directory_string(value: &x509_cert::der::Any) -> Option<String> {
    if let Ok(s) = value.decode_as::<x509_cert::der::asn1::Utf8StringRef>() {
        return Some(s.as_str().to_owned());
    }
    if let Ok(s) = value.decode_as::<x509_cert::der::asn1::PrintableStringRef>() {
        return Some(s.as_str().to_owned());
    }
    if let Ok(s) = value.decode_as::<x509_cert::der::asn1::Ia5StringRef>() {
        return Some(s.as_str().to_owned());
    }
    None
}

fn extended_key_usage() -> Result<Vec<u8>> {
    let mut encoder = asn1::Encoder::new();
    encoder.start_seq(0x30)?;
    encoder.write_oid(OID_EKU_SERVER_AUTH)?;
    encoder.write_oid(OID_EKU_CLIENT_AUTH)?;
    encoder.write_oid(OID_EKU_IPSEC_END_SYSTEM)?;
    encoder.end_seq();
    Ok(encoder.encode())
}

fn subject_alt_name_uri(device_name: &str) -> Result<Vec<u8>> {
    let mut encoder = asn1::Encoder::new();
    encoder.start_seq(0x30)?;
    encoder.write_string_with_tag(0x86, device_name)?; // [6] IMPLICIT IA5String
    encoder.end_seq();
    Ok(encoder.encode())
}

/// Digital signature + key encipherment, as a minimally-encoded KeyUsage
/// BIT STRING (5 unused trailing bits).
fn key_usage() -> Vec<u8> {
    vec![0x03, 0x02, 0x05, 0xa0]
}

/// Empty BasicConstraints (CA defaults to false when omitted).
fn basic_constraints() -> Vec<u8> {
    vec![0x30, 0x00]
}

pub struct IssuedLeaf {
    pub der: Vec<u8>,
    pub serial_hex: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

/// Issues a signed leaf certificate. `phone_spki_der` is the phone's full
/// DER-encoded SubjectPublicKeyInfo, embedded verbatim.
pub fn issue_leaf(
    device_name: &str,
    phone_spki_der: &[u8],
    issuer: &IssuerMaterial,
    validity_days: i64,
) -> Result<IssuedLeaf> {
    let sig_oid = match issuer.key {
        IssuerSigningKey::Rsa(_) => OID_SIG_SHA256_WITH_RSA,
        IssuerSigningKey::Ec(_) => OID_SIG_ECDSA_WITH_SHA256,
    };

    let mut tbs = asn1::Encoder::new();
    tbs.start_seq(0x30)?; // TBSCertificate

    tbs.start_seq(0xa0)?;
    tbs.write_int(2)?; // version v3
    tbs.end_seq();

    let mut serial = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut serial);
    tbs.write_positive_integer(&serial)?;

    tbs.start_seq(0x30)?; // signature algorithm
    tbs.write_oid(sig_oid)?;
    if matches!(issuer.key, IssuerSigningKey::Rsa(_)) {
        tbs.write_null()?;
    }
    tbs.end_seq();

    let issuer_dn_der = issuer
        .cert
        .tbs_certificate
        .issuer
        .to_der()
        .context("re-encoding issuer DN")?;
    tbs.write_raw(&issuer_dn_der);

    let not_before = OffsetDateTime::now_utc();
    let not_after = not_before + Duration::days(validity_days);
    tbs.start_seq(0x30)?; // validity
    tbs.write_string_with_tag(0x17, &x509_time(not_before)?)?;
    tbs.write_string_with_tag(0x17, &x509_time(not_after)?)?;
    tbs.end_seq();

    let subject_der = build_subject(&issuer.cert.tbs_certificate.subject, device_name)?;
    tbs.write_raw(&subject_der);

    tbs.write_raw(phone_spki_der);

    let eku = extended_key_usage()?;
    let san = subject_alt_name_uri(device_name)?;
    tbs.start_seq(0xa3)?; // extensions
    tbs.start_seq(0x30)?;
    add_ext(&mut tbs, OID_CE_BASIC_CONSTRAINTS, true, &basic_constraints())?;
    add_ext(&mut tbs, OID_CE_KEY_USAGE, true, &key_usage())?;
    add_ext(&mut tbs, OID_CE_EXT_KEY_USAGE, false, &eku)?;
    add_ext(&mut tbs, OID_CE_SUBJECT_ALT_NAME, false, &san)?;
    tbs.end_seq();
    tbs.end_seq();

    tbs.end_seq(); // end TBSCertificate
    let tbs_der = tbs.encode();

    let signature = sign_tbs(&tbs_der, issuer)?;

    let mut cert = asn1::Encoder::new();
    cert.start_seq(0x30)?; // Certificate
    cert.write_raw(&tbs_der);

    cert.start_seq(0x30)?; // signatureAlgorithm (repeated, required by Certificate)
    cert.write_oid(sig_oid)?;
    if matches!(issuer.key, IssuerSigningKey::Rsa(_)) {
        cert.write_null()?;
    }
    cert.end_seq();

    cert.write_bit_string(0, &signature)?;

    cert.end_seq(); // end Certificate

    Ok(IssuedLeaf {
        der: cert.encode(),
        serial_hex: hex::encode(serial),
        not_before,
        not_after,
    })
}

fn sign_tbs(tbs_der: &[u8], issuer: &IssuerMaterial) -> Result<Vec<u8>> {
    match &issuer.key {
        IssuerSigningKey::Ec(secret) => {
            let signing_key = p256::ecdsa::SigningKey::from(secret.clone());
            let signature: p256::ecdsa::Signature =
                p256::ecdsa::signature::Signer::sign(&signing_key, tbs_der);
            Ok(signature.to_der().as_bytes().to_vec())
        }
        IssuerSigningKey::Rsa(key) => {
            let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.clone());
            let signature: rsa::pkcs1v15::Signature =
                rsa::signature::Signer::sign(&signing_key, tbs_der);
            Ok(signature.into())
        }
    }
}

/// SHA-256 fingerprint of a DER-encoded certificate, hex lowercase.
pub fn fingerprint_hex(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::pkcs8::EncodePublicKey;
    use x509_cert::der::Decode;

    /// A throwaway self-signed EC CA, standing in for an operator-supplied
    /// issuer. Only its Subject/Issuer naming and DER shape are used below.
    fn ec_issuer_material() -> IssuerMaterial {
        let rcgen::CertifiedKey { cert, signing_key } =
            rcgen::generate_simple_self_signed(vec!["ca.invalid".to_string()]).unwrap();
        let cert_der = cert.der().to_vec();
        let parsed = x509_cert::Certificate::from_der(&cert_der).unwrap();
        let secret = p256::SecretKey::from_pkcs8_pem(&signing_key.serialize_pem()).unwrap();
        IssuerMaterial { cert_der, cert: parsed, key: IssuerSigningKey::Ec(secret) }
    }

    fn phone_spki_der() -> Vec<u8> {
        let secret = p256::SecretKey::random(&mut rand::thread_rng());
        secret.public_key().to_public_key_der().unwrap().as_bytes().to_vec()
    }

    fn first_cn(name: &x509_cert::name::Name) -> Option<String> {
        name.0
            .iter()
            .flat_map(|rdn| rdn.iter())
            .find_map(|atv| (atv.oid.to_string() == OID_CN).then(|| decode_directory_string(&atv.value)).flatten())
    }

    #[test]
    fn issue_leaf_ec_has_expected_subject_issuer_serial_and_validity() {
        let issuer = ec_issuer_material();
        let spki = phone_spki_der();

        let issued = issue_leaf("SEP001122334455", &spki, &issuer, 30).unwrap();
        let cert = x509_cert::Certificate::from_der(&issued.der).unwrap();

        assert_eq!(issued.serial_hex.len(), 32);
        assert_eq!(issued.not_after - issued.not_before, Duration::days(30));
        assert_eq!(first_cn(&cert.tbs_certificate.subject), Some("SEP001122334455".to_string()));
        // Per the deliberate "Issuer DN copies the issuer cert's own Issuer"
        // design decision, not its Subject.
        assert_eq!(cert.tbs_certificate.issuer, issuer.cert.tbs_certificate.issuer);
    }

    #[test]
    fn issue_leaf_ec_signature_verifies_against_the_issuing_ca() {
        let issuer = ec_issuer_material();
        let spki = phone_spki_der();
        let issued = issue_leaf("SEP00AABBCCDDEE", &spki, &issuer, 30).unwrap();
        let cert = x509_cert::Certificate::from_der(&issued.der).unwrap();

        let anchor = crate::authverify::TrustAnchor { cert: issuer.cert };
        assert!(crate::authverify::verify_certificate(&cert, &[anchor]).is_ok());
    }

    #[test]
    fn issue_leaf_rsa_signature_verifies_against_the_issuer_key() {
        let shell = ec_issuer_material();
        let priv_key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let issuer = IssuerMaterial {
            cert_der: shell.cert_der,
            cert: shell.cert,
            key: IssuerSigningKey::Rsa(priv_key.clone()),
        };
        let spki = phone_spki_der();

        let issued = issue_leaf("SEP00112233AABB", &spki, &issuer, 90).unwrap();
        let cert = x509_cert::Certificate::from_der(&issued.der).unwrap();
        assert_eq!(cert.signature_algorithm.oid.to_string(), OID_SIG_SHA256_WITH_RSA);

        use rsa::pkcs1v15::{Signature, VerifyingKey};
        use rsa::signature::Verifier;
        let tbs_der = cert.tbs_certificate.to_der().unwrap();
        let sig_bytes = cert.signature.as_bytes().unwrap();
        let sig = Signature::try_from(sig_bytes).unwrap();
        let rsa_pub = rsa::RsaPublicKey::from(&priv_key);
        assert!(VerifyingKey::<Sha256>::new(rsa_pub).verify(&tbs_der, &sig).is_ok());
    }
}
