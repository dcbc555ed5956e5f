use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

/// Log to stderr, filtered by `RUST_LOG`.
///
/// Library crates log through the `log` facade, which this also captures.
pub fn init() {
    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_filter(EnvFilter::from_default_env()),
        )
        .init();
}
