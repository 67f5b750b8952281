//! Subscriber setup for binaries and long-running hosts embedding the
//! pipeline. The library itself only emits `tracing` events; installing a
//! subscriber stays the host's decision.

use tracing_error::ErrorLayer;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the default subscriber stack: env-filtered fmt output plus span
/// traces on errors. Filter defaults to `info` for this crate, `RUST_LOG`
/// overrides.
///
/// Panics if a global subscriber is already set; use [`try_init`] when that
/// is not certain.
pub fn init() {
    try_init().expect("global tracing subscriber already set");
}

/// Fallible variant of [`init`] for hosts that may have installed their own
/// subscriber first.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,chunkforge=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()
}

/// Install miette's panic hook so panics render as pretty reports.
pub fn init_panic_reporting() {
    miette::set_panic_hook();
}
