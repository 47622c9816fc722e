//! Single-shot TVS session: one `VERIFY_REQUEST` answered with one
//! `VERIFY_RESPONSE`, no further state.

use std::io::{Read, Write};
use std::sync::Arc;

use x509_cert::der::Decode;

use crate::codec::element::{ElementSet, ElementWriter};
use crate::codec::tvs::Frame;
use crate::error::{IoError, ProtocolError, SessionError};
use crate::issuer;
use crate::model::roles_to_csv;
use crate::store::TvsStore;
use crate::tvs::wire::*;

pub struct TvsContext {
    pub store: Arc<dyn TvsStore>,
}

const DEVICE_NAME_PATTERN: &str = r"^CP-[0-9]{4}-SEP[0-9A-F]{12}$";

/// TVS does not assign its own `session_id`: the client picks one in its
/// opening `VERIFY_REQUEST` and the server simply echoes it back.
pub fn run(stream: &mut (impl Read + Write), ctx: &TvsContext, peer: &str) {
    if let Err(e) = run_inner(stream, ctx, peer) {
        log::warn!("{peer}: session failed: {e}");
    }
}

fn send_cmd(stream: &mut impl Write, command: u8, session_id: u32, elements: ElementWriter) -> Result<(), IoError> {
    Frame::write(stream, command, session_id, &elements.into_bytes())
}

fn run_inner(stream: &mut (impl Read + Write), ctx: &TvsContext, peer: &str) -> Result<(), SessionError> {
    let frame = Frame::read(stream)?;
    if frame.command != CMD_VERIFY_REQUEST {
        return Err(ProtocolError::UnexpectedCommand(frame.command).into());
    }
    let session_id = frame.session_id;
    let els = ElementSet::decode(&frame.body, KNOWN_TAGS)?;

    let device_name = decode_device_name(&els)?;
    let regex = regex::Regex::new(DEVICE_NAME_PATTERN).expect("static pattern is valid");
    if !regex.is_match(&device_name) {
        return Err(ProtocolError::InvalidDeviceName(device_name).into());
    }

    let cert_der = els.require_bytes(TAG_CERTIFICATE, "CERTIFICATE")?;
    let cert = x509_cert::Certificate::from_der(cert_der)
        .map_err(|e| crate::error::AuthError::CertParse(e.to_string()))?;
    let _ = cert; // parsed only to validate the DER; fingerprint is over the raw bytes
    let fingerprint = issuer::fingerprint_hex(cert_der);

    let record = ctx.store.get_trust_record(&fingerprint)?;

    let mut resp = ElementWriter::new();
    match record {
        None => {
            resp.write_u8(TAG_STATUS, STATUS_INVALID);
            log::info!("{peer}: session {session_id} VERIFY_RESPONSE device={device_name} status=invalid");
        }
        Some(record) => {
            resp.write_u8(TAG_STATUS, STATUS_VALID);
            let packed: Vec<u8> = record.roles.iter().copied().map(role_code).collect();
            resp.write_bytes(TAG_ROLES, &packed);
            resp.write_u32(TAG_TTL, record.ttl_secs);
            log::info!(
                "{peer}: session {session_id} VERIFY_RESPONSE device={device_name} status=valid roles={} ttl={}",
                roles_to_csv(&record.roles),
                record.ttl_secs,
            );
        }
    }
    send_cmd(stream, CMD_VERIFY_RESPONSE, session_id, resp)?;
    Ok(())
}

/// TVS `DEVICE_NAME` carries a 1-byte device-type prefix before the UTF-8
/// name, unlike the plain NUL-terminated strings used elsewhere.
fn decode_device_name(els: &ElementSet) -> Result<String, SessionError> {
    let bytes = els.require_bytes(TAG_DEVICE_NAME, "DEVICE_NAME")?;
    let rest = bytes
        .get(1..)
        .ok_or(ProtocolError::MissingElement("DEVICE_NAME"))?;
    let rest = rest.strip_suffix(&[0]).unwrap_or(rest);
    std::str::from_utf8(rest)
        .map(str::to_owned)
        .map_err(|e| ProtocolError::InvalidString(e).into())
}
