use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global fmt subscriber. `RUST_LOG` wins over `filter`.
pub fn init(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(false)
        .try_init();
}
