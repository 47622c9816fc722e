//! Smoke test for the shared TLS accept loop: a client connects over a
//! verification-disabled `rustls` connection, the configured handler runs,
//! and a clean shutdown-flag flip stops the accept loop.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use capf_tvs::listener::{self, ListenerConfig};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A `rustls` client config that accepts any server certificate; fine for a
/// loopback test against a cert this same test just generated.
#[derive(Debug)]
struct NoServerAuth;

impl rustls::client::danger::ServerCertVerifier for NoServerAuth {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[test]
fn client_handshakes_and_handler_sees_echoed_bytes() {
    listener::install_crypto_provider();

    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    let dir = std::env::temp_dir().join(format!("capf-tvs-test-listener-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let cert_path = dir.join("server-cert.pem");
    let key_path = dir.join("server-key.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, signing_key.serialize_pem()).unwrap();

    let tls = listener::build_tls_config(&cert_path, &key_path).unwrap();
    let port = free_port();
    let shutdown = Arc::new(AtomicBool::new(false));
    let received = Arc::new(Mutex::new(Vec::new()));

    let received_clone = received.clone();
    let shutdown_for_server = shutdown.clone();
    let server = std::thread::spawn(move || {
        let cfg = ListenerConfig {
            port,
            tls: Arc::new(tls),
            read_timeout: Duration::from_secs(5),
            connection_cap: 0,
        };
        listener::serve(cfg, shutdown_for_server, move |stream, _peer| {
            let mut buf = [0u8; 5];
            if stream.read_exact(&mut buf).is_ok() {
                received_clone.lock().unwrap().extend_from_slice(&buf);
                let _ = stream.write_all(b"world");
            }
        })
        .unwrap();
    });

    // Give the accept loop a moment to bind before connecting.
    std::thread::sleep(Duration::from_millis(200));

    let client_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoServerAuth))
        .with_no_client_auth();
    let server_name = rustls::pki_types::ServerName::try_from("127.0.0.1").unwrap();
    let mut conn = rustls::ClientConnection::new(Arc::new(client_config), server_name).unwrap();
    let mut sock = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut tls_stream = rustls::Stream::new(&mut conn, &mut sock);

    tls_stream.write_all(b"hello").unwrap();
    let mut response = [0u8; 5];
    tls_stream.read_exact(&mut response).unwrap();
    assert_eq!(&response, b"world");

    assert_eq!(*received.lock().unwrap(), b"hello");

    // The accept loop polls a nonblocking listener every 50ms, so it notices
    // the flag on its own without needing a wake-up connection.
    shutdown.store(true, Ordering::Relaxed);
    server.join().unwrap();
}
