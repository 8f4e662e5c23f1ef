//! Tracing subscriber installation for tests.

use tracing_subscriber::EnvFilter;

/// Route tracing output through the test harness.
/// Safe to call from every test; only the first call installs a subscriber.
/// `RUST_LOG` overrides the default `info` filter.
pub fn setup_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_setup_is_harmless() {
        setup_test_logging();
        setup_test_logging();
        tracing::info!("logging installed");
    }
}
