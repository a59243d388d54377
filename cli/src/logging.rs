//! Tracing setup: `--log-level` seeds the filter, `RUST_LOG` refines it,
//! and `TAMMA_LOG_FILE` redirects output from stderr to a file.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tamma={level},cli={level}")));

    let registry = tracing_subscriber::registry().with(filter);
    match std::env::var("TAMMA_LOG_FILE").ok().filter(|p| !p.is_empty()) {
        Some(path) => {
            match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    let _ = registry
                        .with(
                            tracing_subscriber::fmt::layer()
                                .with_ansi(false)
                                .with_writer(std::sync::Mutex::new(file)),
                        )
                        .try_init();
                }
                Err(e) => {
                    eprintln!("cannot open log file {path}: {e}; logging to stderr");
                    let _ = registry
                        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                        .try_init();
                }
            }
        }
        None => {
            let _ = registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init();
        }
    }
}
