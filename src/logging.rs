//! Logging (tracing) related code.

use tracing_subscriber::EnvFilter;

/// Boilerplate logging initialization.
///
/// Logs go to stderr so they never interleave with the action listing on stdout.
pub fn tracing_subscribe_boilerplate(env_min: impl Into<String>) {
        let filter = EnvFilter::try_new(
                    std::env::var("RUST_LOG").unwrap_or_else(|_| env_min.into()),
                )
                .unwrap_or_else(|_| EnvFilter::new("warn"));

        tracing_subscriber::fmt().with_env_filter(filter)
                                 .with_writer(std::io::stderr)
                                 .with_file(true)
                                 .with_line_number(true)
                                 .with_target(true)
                                 .init();
}
