//! Tracing subscriber setup for binaries and tests embedding the scheduler.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install a fmt subscriber at `level`.
///
/// A subscriber installed earlier, by the host application or another
/// test, is left in place.
pub fn init_logging(level: Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_names(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Global tracing subscriber already set, keeping existing one");
    }
}

/// Parse a level name such as `"debug"`, falling back to `INFO`.
pub fn parse_level(name: &str) -> Level {
    name.parse().unwrap_or(Level::INFO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("nonsense"), Level::INFO);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(Level::DEBUG);
        init_logging(Level::INFO);
    }
}
