//! Unified logging setup for the bridge binary and its tests.
//! Logs go to stdout, either as compact human readable lines or as JSON lines
//! for log shippers.
//!

use tracing::subscriber::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Compact,
    Json,
}

/// Uses RUST_LOG, see https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html
/// on how to configure that. If not present or invalid, defaults to plain "info".
/// Panics if called twice, a global subscriber can only be set once.
pub fn setup_console_logging_or_panic(output: LogOutput) {
    let filter = env_filter_or_default();
    match output {
        LogOutput::Compact => {
            let fmt = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .compact()
                .with_filter(filter);
            let subscriber = tracing_subscriber::Registry::default().with(fmt);
            subscriber::set_global_default(subscriber)
                .expect("logging to be initialized only once");
        }
        LogOutput::Json => {
            let fmt = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_filter(filter);
            let subscriber = tracing_subscriber::Registry::default().with(fmt);
            subscriber::set_global_default(subscriber)
                .expect("logging to be initialized only once");
        }
    }
}

/// Safe to call from every test, only the first call installs the subscriber.
pub fn setup_tracing_console_logging_for_test() {
    let fmt = tracing_subscriber::fmt::layer()
        // for tests ansi if nice
        .with_ansi(true)
        .with_test_writer()
        .compact()
        .with_filter(env_filter_or_default());
    let subscriber = tracing_subscriber::Registry::default().with(fmt);
    let _ = subscriber::set_global_default(subscriber);
}

fn env_filter_or_default() -> EnvFilter {
    let env_filter = EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|e| {
        println!(
            "Missing or invalid RUST_LOG, defaulting to {DEFAULT_FILTER}. {:#?}",
            e
        );
        EnvFilter::builder()
            .parse(DEFAULT_FILTER)
            .unwrap_or_else(|_| panic!("{DEFAULT_FILTER} should work as filter"))
    });
    println!("Using env filter: {}", env_filter);
    env_filter
}
