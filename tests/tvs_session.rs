//! End-to-end test of the single-shot TVS session engine against an
//! in-memory store and a pre-scripted client frame, mirroring the
//! `#[cfg(test)]` style used for the wire codecs.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use capf_tvs::codec::element::ElementWriter;
use capf_tvs::codec::tvs::Frame;
use capf_tvs::error::StoreError;
use capf_tvs::model::{Role, TrustRecord};
use capf_tvs::store::TvsStore;
use capf_tvs::tvs::wire::*;
use capf_tvs::tvs::{self, TvsContext};

/// A fixed script of inbound bytes paired with a growable outbound buffer,
/// standing in for a live `TcpStream` for a single scripted exchange.
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

struct FakeTvsStore {
    records: Mutex<HashMap<String, TrustRecord>>,
}

impl TvsStore for FakeTvsStore {
    fn get_trust_record(&self, fingerprint_hex: &str) -> Result<Option<TrustRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(fingerprint_hex).cloned())
    }
}

fn device_name_element(type_byte: u8, name: &str) -> Vec<u8> {
    let mut bytes = vec![type_byte];
    bytes.extend_from_slice(name.as_bytes());
    bytes
}

fn build_request(session_id: u32, device_name: &str, cert_der: &[u8]) -> Vec<u8> {
    let mut body = ElementWriter::new();
    body.write_bytes(TAG_DEVICE_NAME, &device_name_element(1, device_name));
    body.write_bytes(TAG_CERTIFICATE, cert_der);
    Frame::encode(CMD_VERIFY_REQUEST, session_id, &body.into_bytes())
}

/// A syntactically valid but otherwise meaningless DER `SEQUENCE`; TVS only
/// needs to parse the certificate envelope, not validate its contents.
fn dummy_cert_der() -> Vec<u8> {
    vec![0x30, 0x03, 0x02, 0x01, 0x01]
}

#[test]
fn verify_request_with_known_fingerprint_returns_valid_with_roles_and_ttl() {
    let cert_der = dummy_cert_der();
    let fingerprint = capf_tvs::issuer::fingerprint_hex(&cert_der);

    let mut records = HashMap::new();
    records.insert(
        fingerprint,
        TrustRecord {
            roles: vec![Role::Capf, Role::Tvs],
            ttl_secs: 3600,
        },
    );
    let ctx = TvsContext {
        store: Arc::new(FakeTvsStore { records: Mutex::new(records) }),
    };

    let request = build_request(42, "CP-7825-SEP001122334455", &cert_der);
    let mut stream = ScriptedStream { inbound: Cursor::new(request), outbound: Vec::new() };

    tvs::run(&mut stream, &ctx, "127.0.0.1:1");

    let mut cursor = Cursor::new(stream.outbound);
    let frame = Frame::read(&mut cursor).unwrap();
    assert_eq!(frame.command, CMD_VERIFY_RESPONSE);
    assert_eq!(frame.session_id, 42);

    let els = capf_tvs::codec::element::ElementSet::decode(&frame.body, KNOWN_TAGS).unwrap();
    assert_eq!(els.get_u8(TAG_STATUS), Some(STATUS_VALID));
    assert_eq!(els.get_u32(TAG_TTL), Some(3600));
    let roles_bytes = els.get_bytes(TAG_ROLES).unwrap();
    assert_eq!(roles_bytes, &[role_code(Role::Capf), role_code(Role::Tvs)]);
}

#[test]
fn verify_request_with_unknown_fingerprint_returns_invalid() {
    let ctx = TvsContext {
        store: Arc::new(FakeTvsStore { records: Mutex::new(HashMap::new()) }),
    };

    let request = build_request(7, "CP-7825-SEP001122334455", &dummy_cert_der());
    let mut stream = ScriptedStream { inbound: Cursor::new(request), outbound: Vec::new() };

    tvs::run(&mut stream, &ctx, "127.0.0.1:1");

    let mut cursor = Cursor::new(stream.outbound);
    let frame = Frame::read(&mut cursor).unwrap();
    assert_eq!(frame.session_id, 7);
    let els = capf_tvs::codec::element::ElementSet::decode(&frame.body, KNOWN_TAGS).unwrap();
    assert_eq!(els.get_u8(TAG_STATUS), Some(STATUS_INVALID));
    assert!(els.get_bytes(TAG_ROLES).is_none());
}

#[test]
fn malformed_device_name_never_reaches_the_store() {
    let ctx = TvsContext {
        store: Arc::new(FakeTvsStore { records: Mutex::new(HashMap::new()) }),
    };

    // Missing the "CP-XXXX-SEP<mac>" shape entirely.
    let request = build_request(1, "not-a-device-name", &dummy_cert_der());
    let mut stream = ScriptedStream { inbound: Cursor::new(request), outbound: Vec::new() };

    tvs::run(&mut stream, &ctx, "127.0.0.1:1");

    // No response is sent for a protocol-level rejection; the connection is
    // simply dropped (mirrors spec.md's silent-close-on-malformed-input rule).
    assert!(stream.outbound.is_empty());
}
