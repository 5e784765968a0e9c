use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a JSON `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence. Without it, `verbose` selects `shared=debug`
/// over the default `shared=info`. Returns false when a global subscriber was
/// already installed (hosts may call this more than once).
pub fn init_logging(verbose: bool) -> bool {
    let directive = if verbose { "shared=debug" } else { "shared=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .with(filter)
        .try_init()
        .is_ok()
}
