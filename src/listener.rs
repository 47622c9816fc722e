//! TLS accept loop and per-connection worker scheduler shared by both
//! daemons.
//!
//! Grounded on `tls_server.rs`'s `SecureConfig`/`build_tls_config`/
//! `accept_loop`/`handle_client` shape: a nonblocking listener polled in a
//! loop so a shutdown flag can be observed between `accept()` calls, one
//! spawned OS thread per connection, no pooling. Adapted from that file's
//! rustls 0.20-era API to rustls 0.23 (`CertificateDer`/`PrivateKeyDer`,
//! explicit crypto-provider install) and from optional mTLS to the
//! protocol's fixed `with_no_client_auth()`. The listen socket itself is
//! built with `socket2` (already a teacher dependency, used there for its
//! mDNS sockets) so the backlog can be set explicitly instead of trusting
//! `std`'s platform default.

use std::fs::File;
use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use socket2::{Domain, Socket, Type};

use crate::error::TlsError;

/// Matches `spec.md` §4.6's listen backlog.
const LISTEN_BACKLOG: i32 = 5;

static CRYPTO_PROVIDER_INIT: Once = Once::new();

/// Installs the process-wide default `rustls` crypto provider. Idempotent;
/// safe to call from both daemons' `main`.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub fn build_tls_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(e.to_string()))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::CertLoad(format!("{}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertLoad(format!("{}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::KeyLoad(format!("{}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::KeyLoad(format!("{}: {e}", path.display())))?
        .ok_or_else(|| TlsError::KeyLoad(format!("{}: no private key found", path.display())))
}

pub struct ListenerConfig {
    pub port: u16,
    pub tls: Arc<ServerConfig>,
    pub read_timeout: Duration,
    /// 0 = unlimited.
    pub connection_cap: usize,
}

/// Binds a listening socket with `spec.md`'s backlog, which `TcpListener::bind`
/// has no way to express (std always picks a large platform default).
fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Runs the accept loop until `shutdown` is set (by a `signal_hook` flag
/// registration, typically). `handler` is invoked once per accepted,
/// TLS-handshaked connection on its own thread; it receives the live stream
/// and the peer's address as a string for logging.
pub fn serve<H>(cfg: ListenerConfig, shutdown: Arc<AtomicBool>, handler: H) -> io::Result<()>
where
    H: Fn(&mut dyn ReadWrite, &str) + Send + Sync + 'static,
{
    let listener = bind_listener(cfg.port)?;
    listener.set_nonblocking(true)?;
    let handler = Arc::new(handler);
    let active = Arc::new(AtomicUsize::new(0));

    log::info!("listening on 0.0.0.0:{}", cfg.port);

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if cfg.connection_cap != 0 && active.load(Ordering::Relaxed) >= cfg.connection_cap {
                    log::warn!("connection cap {} reached, rejecting {addr}", cfg.connection_cap);
                    drop(stream);
                    continue;
                }
                active.fetch_add(1, Ordering::Relaxed);
                let tls = cfg.tls.clone();
                let handler = handler.clone();
                let active = active.clone();
                let read_timeout = cfg.read_timeout;
                thread::spawn(move || {
                    handle_connection(stream, addr.to_string(), tls, read_timeout, handler.as_ref());
                    active.fetch_sub(1, Ordering::Relaxed);
                });
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                log::error!("accept error: {e}");
                thread::sleep(Duration::from_millis(200));
            }
        }
    }
    log::info!("accept loop stopped");
    Ok(())
}

fn handle_connection(
    stream: TcpStream,
    peer: String,
    tls: Arc<ServerConfig>,
    read_timeout: Duration,
    handler: &(dyn Fn(&mut dyn ReadWrite, &str) + Send + Sync),
) {
    if let Err(e) = stream.set_read_timeout(Some(read_timeout)) {
        log::warn!("{peer}: failed to set read timeout: {e}");
    }
    let conn = match ServerConnection::new(tls) {
        Ok(conn) => conn,
        Err(e) => {
            log::warn!("{peer}: tls context init failed: {e}");
            return;
        }
    };
    let mut tls_stream = StreamOwned::new(conn, stream);
    if let Err(e) = tls_stream.conn.complete_io(&mut tls_stream.sock) {
        log::warn!("{peer}: tls handshake failed: {e}");
        return;
    }
    handler(&mut tls_stream, &peer);
}

/// Object-safe alias for the bidirectional stream the session engines drive.
pub trait ReadWrite: io::Read + io::Write {}
impl<T: io::Read + io::Write> ReadWrite for T {}
