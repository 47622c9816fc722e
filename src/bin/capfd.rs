//! CAPF daemon entry point: loads configuration, issuer material, and the
//! device store, then runs the TLS accept loop.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use capf_tvs::authverify::load_trust_anchors;
use capf_tvs::capf::{self, CapfContext};
use capf_tvs::config::CapfConfig;
use capf_tvs::issuer_material::IssuerMaterial;
use capf_tvs::listener::{self, ListenerConfig};
use capf_tvs::store::SqliteCapfStore;

#[derive(Parser, Debug)]
#[command(version, about = "CAPF certificate enrollment daemon")]
struct Cli {
    /// Path to the daemon's TOML configuration file.
    #[arg(long, default_value = "/etc/capfd/capfd.toml")]
    config: std::path::PathBuf,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all but warning/error log output.
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(&cli) {
        log::error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let cfg = CapfConfig::load(&cli.config)?;

    listener::install_crypto_provider();
    let tls = listener::build_tls_config(&cfg.server_cert, &cfg.server_key)?;

    let issuer = IssuerMaterial::load(
        cfg.issuer_cert.to_str().expect("non-utf8 path"),
        cfg.issuer_key.to_str().expect("non-utf8 path"),
    )?;

    let mut anchor_paths = vec![cfg.issuer_cert.to_string_lossy().into_owned()];
    anchor_paths.extend(cfg.verify_anchors.iter().map(|p| p.to_string_lossy().into_owned()));
    let anchors = load_trust_anchors(&anchor_paths)?;

    let store = SqliteCapfStore::new(cfg.store_path.to_string_lossy().into_owned());
    let certificates_dir = cfg.certificates_dir();
    std::fs::create_dir_all(&certificates_dir)?;

    let ctx = Arc::new(CapfContext {
        store: Arc::new(store),
        issuer: Arc::new(issuer),
        trust_anchors: Arc::new(anchors),
        certificates_dir,
        validity_days: cfg.validity_days,
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in signal_hook::consts::TERM_SIGNALS {
        signal_hook::flag::register(*sig, shutdown.clone())?;
    }

    let session_counter = Arc::new(std::sync::atomic::AtomicU32::new(0));

    let listener_cfg = ListenerConfig {
        port: cfg.port,
        tls: Arc::new(tls),
        read_timeout: Duration::from_secs(cfg.read_timeout_secs),
        connection_cap: cfg.connection_cap,
    };

    listener::serve(listener_cfg, shutdown, move |stream, peer| {
        let session_id = session_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        capf::run(stream, &ctx, session_id, peer);
    })?;

    Ok(())
}
