use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter when `RUST_LOG` is unset: the configured level for the
/// custody crate, dependencies (sqlx logs every statement at info) capped
/// at warn, then any per-module overrides from `log_directives` (e.g.
/// `chain_custody::settlement=debug`).
pub fn filter_directives(config: &AppConfig) -> String {
    let level = config.log_level.as_str();
    let dependencies = match level {
        "error" | "off" => level,
        _ => "warn",
    };
    let mut directives = vec![
        dependencies.to_string(),
        format!("{}={}", env!("CARGO_CRATE_NAME"), level),
    ];
    directives.extend(config.log_directives.iter().cloned());
    directives.join(",")
}

/// Install the global subscriber. Keep the guard alive for the process
/// lifetime or buffered file output is lost.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> AppConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_filter_directives() {
        let base = r#"
log_level: "info"
log_dir: "./logs"
log_file: "custody.log"
use_json: true
rotation: "never"
"#;
        assert_eq!(
            filter_directives(&config(base)),
            "warn,chain_custody=info"
        );
        assert_eq!(
            filter_directives(&config(&base.replace("\"info\"", "\"error\""))),
            "error,chain_custody=error"
        );

        let tuned = format!(
            "{}log_directives:\n  - \"chain_custody::settlement=debug\"\n",
            base
        );
        let directives = filter_directives(&config(&tuned));
        assert!(directives.ends_with(",chain_custody::settlement=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}
