use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const QUIET: &str = "subscription_mirror=info";
const VERBOSE: &str = "subscription_mirror=debug,info";

/// `RUST_LOG` wins when set; otherwise `default` applies.
fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Compact human-readable output. `verbose` turns on debug logs for this
/// crate, which include per-document store and renewal decisions.
pub fn init_logger(verbose: bool) {
    let filter = env_filter(if verbose { VERBOSE } else { QUIET });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// JSON lines, for log shippers.
pub fn init_json_logger() {
    tracing_subscriber::registry()
        .with(env_filter(QUIET))
        .with(tracing_subscriber::fmt::layer().with_target(false).json())
        .init();
}
