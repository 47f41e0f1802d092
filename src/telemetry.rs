use std::fmt::Display;

use tracing::{Span, error};
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. `LOG_FORMAT=json` switches to structured output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = fmt().with_env_filter(filter).with_target(false);

    // A subscriber may already be installed (tests, embedding); keep the first one.
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

/// Marks `span` as failed and attaches the error as an exception event.
///
/// The span must declare an `error` field for the flag to be recorded.
pub fn record_exception(span: &Span, error: &dyn Display) {
    span.record("error", true);
    span.in_scope(|| {
        error!(exception.message = %error, "exception recorded");
    });
}
