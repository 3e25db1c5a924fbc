// src/utils/telemetry.rs
use tracing::Level;

/// Install the fmt subscriber. Safe to call more than once; later calls are
/// ignored.
pub fn init_tracing(level: Level) {
    let result = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init();

    if result.is_ok() {
        tracing::debug!("Tracing initialised at level {}", level);
    }
}

/// Parse a level name such as "info" or "DEBUG", falling back to INFO.
pub fn level_from_str(value: &str) -> Level {
    value.trim().parse::<Level>().unwrap_or_else(|_| {
        tracing::warn!("Unknown log level '{}', using info", value);
        Level::INFO
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing(Level::DEBUG);
        init_tracing(Level::INFO);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(level_from_str("debug"), Level::DEBUG);
        assert_eq!(level_from_str(" WARN "), Level::WARN);
        assert_eq!(level_from_str("chatty"), Level::INFO);
    }
}
