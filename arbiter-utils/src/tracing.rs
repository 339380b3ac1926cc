use tracing_subscriber::EnvFilter;

/// Installs the process-wide subscriber. `RUST_LOG` selects the filter;
/// binaries call this once right after loading dotenv. Logs go to stderr so
/// binaries that speak JSON on stdout (the Go helper) stay parseable.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}
