//! TVS daemon entry point: loads configuration and the trust-record store,
//! then runs the TLS accept loop.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use capf_tvs::config::TvsConfig;
use capf_tvs::listener::{self, ListenerConfig};
use capf_tvs::store::SqliteTvsStore;
use capf_tvs::tvs::{self, TvsContext};

#[derive(Parser, Debug)]
#[command(version, about = "TVS certificate trust-verification daemon")]
struct Cli {
    /// Path to the daemon's TOML configuration file.
    #[arg(long, default_value = "/etc/tvsd/tvsd.toml")]
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
    let cfg = TvsConfig::load(&cli.config)?;

    listener::install_crypto_provider();
    let tls = listener::build_tls_config(&cfg.server_cert, &cfg.server_key)?;

    let store = SqliteTvsStore::new(cfg.store_path.to_string_lossy().into_owned());
    let ctx = Arc::new(TvsContext {
        store: Arc::new(store),
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in signal_hook::consts::TERM_SIGNALS {
        signal_hook::flag::register(*sig, shutdown.clone())?;
    }

    let listener_cfg = ListenerConfig {
        port: cfg.port,
        tls: Arc::new(tls),
        read_timeout: Duration::from_secs(cfg.read_timeout_secs),
        connection_cap: cfg.connection_cap,
    };

    listener::serve(listener_cfg, shutdown, move |stream, peer| {
        tvs::run(stream, &ctx, peer);
    })?;

    Ok(())
}
