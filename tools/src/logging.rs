use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

pub const DEFAULT_FILTER: &str = "medi=info,tta_inspect=info,warn";

/// Install the global subscriber. `RUST_LOG` overrides [`DEFAULT_FILTER`].
pub fn init_logging(json_output: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_writer(std::io::stderr);
        Registry::default().with(env_filter).with(fmt_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr);
        Registry::default().with(env_filter).with(fmt_layer).init();
    }
}
