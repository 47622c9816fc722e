//! Bootstrap helper for standing up a throwaway CA cert/key pair during
//! development — not part of either served protocol. Operators normally
//! supply their own issuer material; this exists so `capfd`/`tvsd` can be
//! smoke-tested without a real PKI on hand.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rand::RngCore;
use time::{Duration, OffsetDateTime, UtcOffset};

use capf_tvs::util::asn1;

const OID_CN: &str = "2.5.4.3";
const OID_SIG_ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
const OID_CE_BASIC_CONSTRAINTS: &str = "2.5.29.19";
const OID_CE_KEY_USAGE: &str = "2.5.29.15";

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

fn name_der(cn: &str) -> Result<Vec<u8>> {
    let mut encoder = asn1::Encoder::new();
    encoder.start_seq(0x30)?;
    encoder.start_seq(0x31)?;
    encoder.start_seq(0x30)?;
    encoder.write_oid(OID_CN)?;
    encoder.write_string(cn)?;
    encoder.end_seq();
    encoder.end_seq();
    encoder.end_seq();
    Ok(encoder.encode())
}

/// CA:true BasicConstraints, no pathLenConstraint.
fn basic_constraints_ca() -> Vec<u8> {
    vec![0x30, 0x03, 0x01, 0x01, 0xff]
}

/// keyCertSign + cRLSign.
fn key_usage_ca() -> Vec<u8> {
    vec![0x03, 0x02, 0x01, 0x06]
}

/// Builds and self-signs a minimal EC P-256 root certificate: `subject ==
/// issuer == CN=<cn>`, `BasicConstraints{CA: true}`, key/cRL signing only.
fn self_signed_ca(cn: &str, validity_days: i64, key: &p256::SecretKey) -> Result<Vec<u8>> {
    let public_key = key.public_key();
    let spki_der = public_key
        .to_public_key_der()
        .context("encoding CA public key")?
        .as_bytes()
        .to_vec();

    let mut tbs = asn1::Encoder::new();
    tbs.start_seq(0x30)?; // TBSCertificate

    tbs.start_seq(0xa0)?;
    tbs.write_int(2)?; // version v3
    tbs.end_seq();

    let mut serial = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut serial);
    tbs.write_positive_integer(&serial)?;

    tbs.start_seq(0x30)?; // signature algorithm
    tbs.write_oid(OID_SIG_ECDSA_WITH_SHA256)?;
    tbs.end_seq();

    let name = name_der(cn)?;
    tbs.write_raw(&name); // issuer

    let not_before = OffsetDateTime::now_utc();
    let not_after = not_before + Duration::days(validity_days);
    tbs.start_seq(0x30)?; // validity
    tbs.write_string_with_tag(0x17, &x509_time(not_before)?)?;
    tbs.write_string_with_tag(0x17, &x509_time(not_after)?)?;
    tbs.end_seq();

    tbs.write_raw(&name); // subject == issuer

    tbs.write_raw(&spki_der);

    tbs.start_seq(0xa3)?; // extensions
    tbs.start_seq(0x30)?;
    add_ext(&mut tbs, OID_CE_BASIC_CONSTRAINTS, true, &basic_constraints_ca())?;
    add_ext(&mut tbs, OID_CE_KEY_USAGE, true, &key_usage_ca())?;
    tbs.end_seq();
    tbs.end_seq();

    tbs.end_seq(); // end TBSCertificate
    let tbs_der = tbs.encode();

    let signing_key = p256::ecdsa::SigningKey::from(key.clone());
    let signature: p256::ecdsa::Signature = p256::ecdsa::signature::Signer::sign(&signing_key, &tbs_der);

    let mut cert = asn1::Encoder::new();
    cert.start_seq(0x30)?; // Certificate
    cert.write_raw(&tbs_der);
    cert.start_seq(0x30)?;
    cert.write_oid(OID_SIG_ECDSA_WITH_SHA256)?;
    cert.end_seq();
    cert.write_bit_string(0, signature.to_der().as_bytes())?;
    cert.end_seq();

    Ok(cert.encode())
}

fn ca_create(out_dir: &std::path::Path, cn: &str, validity_days: i64) -> Result<()> {
    std::fs::create_dir_all(out_dir)?;

    let secret_key = p256::SecretKey::random(&mut rand::thread_rng());
    let key_pem = secret_key
        .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
        .context("encoding CA private key")?;
    std::fs::write(out_dir.join("ca-key.pem"), key_pem.as_bytes())?;

    let cert_der = self_signed_ca(cn, validity_days, &secret_key)?;
    capf_tvs::util::cryptoutil::write_pem("CERTIFICATE", &cert_der, &out_dir.join("ca-cert.pem").to_string_lossy())?;

    println!("wrote {}/ca-key.pem and {}/ca-cert.pem", out_dir.display(), out_dir.display());
    Ok(())
}

#[derive(Parser, Debug)]
#[command(about = "CAPF/TVS development CA bootstrap tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a throwaway self-signed EC root cert/key pair.
    CaCreate {
        #[arg(long, default_value = "./dev-ca")]
        out_dir: std::path::PathBuf,
        #[arg(long, default_value = "CAPF-TVS Dev CA")]
        cn: String,
        #[arg(long, default_value_t = 3560)]
        validity_days: i64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::CaCreate { out_dir, cn, validity_days } => ca_create(&out_dir, &cn, validity_days),
    }
}
