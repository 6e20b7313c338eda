//! Structured logging setup using tracing-subscriber.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies that are chatty at info level.
const QUIET_TARGETS: &[&str] = &["sqlx::query=warn", "hyper=warn", "reqwest=warn"];

/// `RUST_LOG` wins; otherwise the configured level with noisy crates muted.
fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_from_level(&config.log_level))
}

fn filter_from_level(level: &str) -> EnvFilter {
    QUIET_TARGETS.iter().fold(EnvFilter::new(level), |filter, directive| {
        match directive.parse() {
            Ok(d) => filter.add_directive(d),
            Err(_) => filter,
        }
    })
}

/// Initialize the global tracing subscriber. A second call is a no-op.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter = build_filter(config);

    let result = if config.json_output {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .compact(),
            )
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_mutes_sqlx_queries() {
        let filter = filter_from_level("debug").to_string();
        assert!(filter.contains("debug"));
        assert!(filter.contains("sqlx::query=warn"));
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        let cfg = LoggingConfig {
            log_level: "info".into(),
            json_output: false,
        };
        init_logging(&cfg);
        init_logging(&cfg);
    }
}
