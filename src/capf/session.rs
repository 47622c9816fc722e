//! Per-connection CAPF state machine:
//! HELLO -> AUTHENTICATED -> (KEYGEN_WAIT -> STORE_WAIT) | FETCH_WAIT | DELETE_WAIT | END.
//!
//! Grounded on `controller.rs`'s sequential build-request/send/
//! read-response/validate flow, converted from async-over-UDP to
//! blocking-over-TLS with no retransmission.

use std::io::{Read, Write};
use std::sync::Arc;

use x509_cert::der::Decode;

use crate::authverify::{self, PhoneHash, TrustAnchor};
use crate::capf::wire::*;
use crate::codec::capf::Frame;
use crate::codec::element::{ElementSet, ElementWriter};
use crate::error::{AuthError, IoError, ProtocolError, SessionError};
use crate::issuer;
use crate::issuer_material::IssuerMaterial;
use crate::model::{AuthMode, KeySpec, Operation};
use crate::store::CapfStore;

pub struct CapfContext {
    pub store: Arc<dyn CapfStore>,
    pub issuer: Arc<IssuerMaterial>,
    pub trust_anchors: Arc<Vec<TrustAnchor>>,
    pub certificates_dir: std::path::PathBuf,
    pub validity_days: i64,
}

/// Drives one connection to completion. Never propagates an error past this
/// call: any failure is logged and answered with a best-effort `END_SESSION`.
pub fn run(stream: &mut (impl Read + Write), ctx: &CapfContext, session_id: u32, peer: &str) {
    match run_inner(stream, ctx, session_id, peer) {
        Ok(()) => {}
        Err(e) => {
            log::warn!("{peer}: session {session_id} failed: {e}");
            if let Some(reason) = reason_for_error(&e) {
                let mut w = ElementWriter::new();
                w.write_u8(TAG_REASON, reason);
                let _ = send_cmd(stream, CMD_END_SESSION, session_id, w);
            }
        }
    }
}

fn reason_for_error(e: &SessionError) -> Option<u8> {
    match e {
        SessionError::Auth(AuthError::UnknownDevice(_)) => Some(REASON_UNKNOWN_DEVICE),
        SessionError::Auth(_) => Some(REASON_INVALID_ELEMENT),
        SessionError::Protocol(_) => Some(REASON_INVALID_ELEMENT),
        SessionError::Store(_) => None,
        SessionError::Io(_) => None,
    }
}

fn send_cmd(stream: &mut impl Write, command: u8, session_id: u32, elements: ElementWriter) -> Result<(), IoError> {
    Frame::write(stream, command, session_id, &elements.into_bytes())
}

fn recv(
    stream: &mut impl Read,
    session_id: u32,
) -> Result<(u8, ElementSet), SessionError> {
    let frame = Frame::read(stream)?;
    if frame.session_id != session_id {
        return Err(ProtocolError::SessionIdMismatch {
            expected: session_id,
            got: frame.session_id,
        }
        .into());
    }
    let elements = ElementSet::decode(&frame.body, KNOWN_TAGS)?;
    Ok((frame.command, elements))
}

fn end_session(stream: &mut impl Write, session_id: u32, reason: u8) -> Result<(), SessionError> {
    let mut w = ElementWriter::new();
    w.write_u8(TAG_REASON, reason);
    send_cmd(stream, CMD_END_SESSION, session_id, w)?;
    Ok(())
}

fn run_inner(
    stream: &mut (impl Read + Write),
    ctx: &CapfContext,
    session_id: u32,
    peer: &str,
) -> Result<(), SessionError> {
    // HELLO
    let mut hello = ElementWriter::new();
    hello.write_u8(TAG_VERSION, PROTOCOL_VERSION);
    hello.write_u8(TAG_AUTH_TYPE, AUTH_TYPE_NONE);
    send_cmd(stream, CMD_AUTH_REQUEST, session_id, hello)?;

    let (cmd, els) = recv(stream, session_id)?;
    if cmd != CMD_AUTH_RESPONSE {
        return Err(ProtocolError::UnexpectedCommand(cmd).into());
    }
    let version = els.get_u8(TAG_VERSION).unwrap_or(0);
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got: version,
        }
        .into());
    }
    let device_name = els.require_str(TAG_DEVICE_NAME, "DEVICE_NAME")?;
    log::info!("{peer}: session {session_id} AUTH_RESPONSE device={device_name}");

    // AUTHENTICATED
    let device = ctx
        .store
        .get_device(&device_name)?
        .ok_or_else(|| AuthError::UnknownDevice(device_name.clone()))?;

    authenticate(&device_name, &device.auth, &els, session_id, &ctx.trust_anchors)?;

    match device.operation {
        Operation::Install(spec) => do_install(stream, ctx, session_id, &device_name, spec),
        Operation::Fetch => do_fetch(stream, ctx, session_id, &device_name),
        Operation::Delete => do_delete(stream, ctx, session_id, &device_name),
        Operation::None => end_session(stream, session_id, REASON_NO_ACTION),
    }
}

fn authenticate(
    device_name: &str,
    auth: &AuthMode,
    els: &ElementSet,
    session_id: u32,
    anchors: &[TrustAnchor],
) -> Result<(), SessionError> {
    match auth {
        AuthMode::NoPassword => Ok(()),
        AuthMode::Password(expected) => {
            let got = els.require_str(TAG_PASSWORD, "PASSWORD")?;
            if &got == expected {
                Ok(())
            } else {
                Err(AuthError::BadPassword.into())
            }
        }
        AuthMode::Certificate => {
            let cert_der = els.require_cert(TAG_CERTIFICATE, "CERTIFICATE")?;
            let signed_data = els.require_bytes(TAG_SIGNED_DATA, "SIGNED_DATA")?;
            let sha2_signed_data = els.require_bytes(TAG_SHA2_SIGNED_DATA, "SHA2_SIGNED_DATA")?;
            let sudi_data = els.get_bytes(TAG_SUDI_DATA);

            let phone_cert = x509_cert::Certificate::from_der(cert_der)
                .map_err(|e| AuthError::CertParse(e.to_string()))?;
            authverify::verify_certificate(&phone_cert, anchors)?;

            let phone_key = authverify::extract_phone_key(&phone_cert)?;

            let mut auth_data = device_name.as_bytes().to_vec();
            auth_data.push(0);
            auth_data.extend_from_slice(cert_der);

            authverify::verify_phone_signature(&auth_data, signed_data, PhoneHash::Sha1, &phone_key)?;

            let sha2_sig = authverify::parse_sha2_signed_data(sha2_signed_data)?;
            authverify::verify_phone_signature(&auth_data, &sha2_sig, PhoneHash::Sha512, &phone_key)?;

            if let Some(sudi) = sudi_data {
                authverify::verify_sudi(session_id, sudi, anchors)?;
            }
            Ok(())
        }
    }
}

fn do_install(
    stream: &mut (impl Read + Write),
    ctx: &CapfContext,
    session_id: u32,
    device_name: &str,
    spec: KeySpec,
) -> Result<(), SessionError> {
    let mut req = ElementWriter::new();
    match spec {
        KeySpec::Rsa { bits } => {
            req.write_u8(TAG_KEY_TYPE, KEY_TYPE_RSA);
            req.write_u16(TAG_KEY_SIZE, bits as u16);
        }
        KeySpec::Ec { curve } => {
            req.write_u8(TAG_KEY_TYPE, KEY_TYPE_EC);
            req.write_u8(TAG_CURVE, curve.wire_code());
        }
    }
    send_cmd(stream, CMD_KEY_GEN_REQUEST, session_id, req)?;

    let els = loop {
        let (cmd, els) = recv(stream, session_id)?;
        if cmd == CMD_REQUEST_IN_PROGRESS {
            continue;
        }
        if cmd == CMD_KEY_GEN_RESPONSE {
            break els;
        }
        return Err(ProtocolError::UnexpectedCommand(cmd).into());
    };

    let spki_der = els.require_bytes(TAG_PUBLIC_KEY, "PUBLIC_KEY")?;

    let leaf = issuer::issue_leaf(device_name, spki_der, &ctx.issuer, ctx.validity_days)
        .map_err(|e| AuthError::CertParse(e.to_string()))?;
    let pem = pem::encode(&pem::Pem::new("CERTIFICATE", leaf.der.clone()));

    ctx.store
        .update_device_issued(device_name, &leaf.serial_hex, &pem, leaf.not_before, leaf.not_after)?;
    write_pem_file(ctx, device_name, &pem)?;

    let mut store_req = ElementWriter::new();
    store_req.write_cert(TAG_CERTIFICATE, CERT_TYPE_LSC, &leaf.der);
    send_cmd(stream, CMD_STORE_CERT_REQUEST, session_id, store_req)?;

    let (cmd, _els) = recv(stream, session_id)?;
    if cmd != CMD_STORE_CERT_RESPONSE {
        return Err(ProtocolError::UnexpectedCommand(cmd).into());
    }

    end_session(stream, session_id, REASON_UPDATE_CERTIFICATE)
}

fn do_fetch(
    stream: &mut (impl Read + Write),
    ctx: &CapfContext,
    session_id: u32,
    device_name: &str,
) -> Result<(), SessionError> {
    send_cmd(stream, CMD_FETCH_CERT_REQUEST, session_id, ElementWriter::new())?;

    let (cmd, els) = recv(stream, session_id)?;
    if cmd != CMD_FETCH_CERT_RESPONSE {
        return Err(ProtocolError::UnexpectedCommand(cmd).into());
    }

    let reason = els.get_u8(TAG_REASON).unwrap_or(REASON_NO_ACTION);
    if reason == REASON_UPDATE_CERTIFICATE {
        if let Some(der) = els.get_cert(TAG_CERTIFICATE) {
            let cert = x509_cert::Certificate::from_der(der)
                .map_err(|e| AuthError::CertParse(e.to_string()))?;
            let serial_hex = hex::encode(cert.tbs_certificate.serial_number.as_bytes());
            let pem = pem::encode(&pem::Pem::new("CERTIFICATE", der.to_vec()));
            let (nbf, naf) = x509_validity(&cert)?;
            ctx.store
                .update_device_issued(device_name, &serial_hex, &pem, nbf, naf)?;
            write_pem_file(ctx, device_name, &pem)?;
        }
    }

    end_session(stream, session_id, REASON_NO_ACTION)
}

fn x509_validity(
    cert: &x509_cert::Certificate,
) -> Result<(time::OffsetDateTime, time::OffsetDateTime), SessionError> {
    let validity = &cert.tbs_certificate.validity;
    let nbf = to_offset_date_time(&validity.not_before)
        .map_err(|e| SessionError::Auth(AuthError::CertParse(e)))?;
    let naf = to_offset_date_time(&validity.not_after)
        .map_err(|e| SessionError::Auth(AuthError::CertParse(e)))?;
    Ok((nbf, naf))
}

fn to_offset_date_time(t: &x509_cert::time::Time) -> Result<time::OffsetDateTime, String> {
    let secs = t.to_unix_duration().as_secs();
    time::OffsetDateTime::from_unix_timestamp(secs as i64).map_err(|e| e.to_string())
}

fn do_delete(
    stream: &mut (impl Read + Write),
    ctx: &CapfContext,
    session_id: u32,
    device_name: &str,
) -> Result<(), SessionError> {
    send_cmd(stream, CMD_DELETE_CERT_REQUEST, session_id, ElementWriter::new())?;

    let (cmd, els) = recv(stream, session_id)?;
    if cmd != CMD_DELETE_CERT_RESPONSE {
        return Err(ProtocolError::UnexpectedCommand(cmd).into());
    }

    if els.get_u8(TAG_REASON).unwrap_or(REASON_NO_ACTION) == REASON_UPDATE_CERTIFICATE {
        ctx.store.clear_device_certificate(device_name)?;
        let path = ctx.certificates_dir.join(format!("{device_name}.pem"));
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }

    end_session(stream, session_id, REASON_UPDATE_CERTIFICATE)
}

fn write_pem_file(ctx: &CapfContext, device_name: &str, pem: &str) -> Result<(), SessionError> {
    let path = ctx.certificates_dir.join(format!("{device_name}.pem"));
    std::fs::write(&path, pem)
        .map_err(crate::error::IoError::Io)
        .map_err(SessionError::from)
}
