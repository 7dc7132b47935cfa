use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding an `EnvFilter` directive, e.g. `MURMUR_LOG=murmur=debug`.
pub const ENV_VAR: &str = "MURMUR_LOG";

/// JSON logs on stderr at `error` level unless [`ENV_VAR`] says otherwise.
pub fn init() {
    init_with_level(LevelFilter::ERROR);
}

/// JSON logs on stderr at `level` unless [`ENV_VAR`] says otherwise.
///
/// Only the first call in a process installs a subscriber.
pub fn init_with_level(level: LevelFilter) {
    let _ = tracing_subscriber::registry()
        .with(filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(false),
        )
        .try_init();
}

/// Map a `-v` count to a level, starting from `error`.
pub fn verbosity(count: u8) -> LevelFilter {
    match count {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        3 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(ENV_VAR)
        .with_default_directive(level.into())
        .from_env_lossy()
}
