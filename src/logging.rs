use tracing_subscriber::EnvFilter;

/// Default directives when `RUST_LOG` is unset.
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "warn,jobrelay=debug"
    } else {
        "warn,jobrelay=info"
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays clean
/// for JSON and artifacts.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives(verbose).into());
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
