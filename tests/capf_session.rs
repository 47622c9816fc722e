//! End-to-end tests of the CAPF session engine's non-cryptographic paths
//! (`NoPassword` auth, `None`/`Fetch` operations) against scripted client
//! frames and in-memory stores. Certificate-auth and key-generation paths
//! are covered at the unit level inside `authverify`/`issuer` themselves.

use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use capf_tvs::capf::wire::*;
use capf_tvs::capf::{self, CapfContext};
use capf_tvs::codec::element::{ElementSet, ElementWriter};
use capf_tvs::codec::capf::Frame;
use capf_tvs::error::StoreError;
use capf_tvs::issuer_material::IssuerMaterial;
use capf_tvs::model::{AuthMode, Device, Operation};
use capf_tvs::store::CapfStore;
use time::OffsetDateTime;

struct ScriptedStream {
    inbound: Cursor<Vec<u8>>,
    outbound: Vec<u8>,
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inbound.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.outbound.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct FakeCapfStore {
    device: Mutex<Option<Device>>,
}

impl CapfStore for FakeCapfStore {
    fn get_device(&self, name: &str) -> Result<Option<Device>, StoreError> {
        let guard = self.device.lock().unwrap();
        Ok(guard.as_ref().filter(|d| d.device_name == name).cloned())
    }

    fn update_device_issued(
        &self,
        _name: &str,
        _serial_hex: &str,
        _pem: &str,
        _not_before: OffsetDateTime,
        _not_after: OffsetDateTime,
    ) -> Result<(), StoreError> {
        panic!("not exercised by these tests")
    }

    fn clear_device_certificate(&self, _name: &str) -> Result<(), StoreError> {
        panic!("not exercised by these tests")
    }
}

/// A throwaway self-signed EC issuer, generated fresh per test run; these
/// tests never exercise the signing path but `CapfContext` requires one.
fn dummy_issuer_material() -> IssuerMaterial {
    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(vec!["capf-tvs-test-ca.invalid".to_string()]).unwrap();

    let unique = format!(
        "{}-{:?}",
        std::process::id(),
        std::time::SystemTime::now()
    );
    let dir = std::env::temp_dir().join(format!("capf-tvs-test-{unique}"));
    std::fs::create_dir_all(&dir).unwrap();
    let cert_path = dir.join("ca-cert.pem");
    let key_path = dir.join("ca-key.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, signing_key.serialize_pem()).unwrap();

    IssuerMaterial::load(cert_path.to_str().unwrap(), key_path.to_str().unwrap()).unwrap()
}

fn build_ctx(device: Option<Device>) -> CapfContext {
    CapfContext {
        store: Arc::new(FakeCapfStore { device: Mutex::new(device) }),
        issuer: Arc::new(dummy_issuer_material()),
        trust_anchors: Arc::new(Vec::new()),
        certificates_dir: std::env::temp_dir(),
        validity_days: 365,
    }
}

fn auth_response_frame(session_id: u32, device_name: &str) -> Vec<u8> {
    let mut body = ElementWriter::new();
    body.write_u8(TAG_VERSION, PROTOCOL_VERSION);
    body.write_str(TAG_DEVICE_NAME, device_name);
    Frame::encode(CMD_AUTH_RESPONSE, session_id, &body.into_bytes())
}

fn read_all_frames(bytes: Vec<u8>) -> Vec<(u8, u32, ElementSet)> {
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::new();
    while (cursor.position() as usize) < cursor.get_ref().len() {
        let frame = Frame::read(&mut cursor).unwrap();
        let els = ElementSet::decode(&frame.body, KNOWN_TAGS).unwrap();
        out.push((frame.command, frame.session_id, els));
    }
    out
}

#[test]
fn no_password_device_with_no_action_ends_session_immediately() {
    let device = Device {
        device_name: "SEP001122334455".to_string(),
        operation: Operation::None,
        auth: AuthMode::NoPassword,
        cert: None,
    };
    let ctx = build_ctx(Some(device));

    let session_id = 99;
    let inbound = auth_response_frame(session_id, "SEP001122334455");
    let mut stream = ScriptedStream { inbound: Cursor::new(inbound), outbound: Vec::new() };

    capf::run(&mut stream, &ctx, session_id, "127.0.0.1:1");

    let frames = read_all_frames(stream.outbound);
    // The engine's own opening AUTH_REQUEST plus the closing END_SESSION.
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].0, CMD_AUTH_REQUEST);
    assert_eq!(frames[1].0, CMD_END_SESSION);
    assert_eq!(frames[1].2.get_u8(TAG_REASON), Some(REASON_NO_ACTION));
}

#[test]
fn unknown_device_ends_session_with_unknown_device_reason() {
    let ctx = build_ctx(None);

    let session_id = 5;
    let inbound = auth_response_frame(session_id, "SEP999999999999");
    let mut stream = ScriptedStream { inbound: Cursor::new(inbound), outbound: Vec::new() };

    capf::run(&mut stream, &ctx, session_id, "127.0.0.1:1");

    let frames = read_all_frames(stream.outbound);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].0, CMD_END_SESSION);
    assert_eq!(frames[1].2.get_u8(TAG_REASON), Some(REASON_UNKNOWN_DEVICE));
}

#[test]
fn fetch_with_no_stored_certificate_replies_no_action() {
    let device = Device {
        device_name: "SEP00AABBCCDDEE".to_string(),
        operation: Operation::Fetch,
        auth: AuthMode::NoPassword,
        cert: None,
    };
    let ctx = build_ctx(Some(device));

    let session_id = 3;
    let mut inbound = auth_response_frame(session_id, "SEP00AABBCCDDEE");
    // Phone's FETCH_CERT_RESPONSE: no certificate on the phone either.
    let mut fetch_body = ElementWriter::new();
    fetch_body.write_u8(TAG_REASON, REASON_NO_ACTION);
    inbound.extend(Frame::encode(CMD_FETCH_CERT_RESPONSE, session_id, &fetch_body.into_bytes()));

    let mut stream = ScriptedStream { inbound: Cursor::new(inbound), outbound: Vec::new() };

    capf::run(&mut stream, &ctx, session_id, "127.0.0.1:1");

    let frames = read_all_frames(stream.outbound);
    // AUTH_REQUEST, FETCH_CERT_REQUEST, END_SESSION.
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[1].0, CMD_FETCH_CERT_REQUEST);
    assert_eq!(frames[2].0, CMD_END_SESSION);
    assert_eq!(frames[2].2.get_u8(TAG_REASON), Some(REASON_NO_ACTION));
}
