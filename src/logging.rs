use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Target of the per-address scan events, silenced unless `enable_tracing`
pub const SCAN_TRACE_TARGET: &str = "scan_trace";

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

fn filter_directives(config: &AppConfig) -> String {
    if config.enable_tracing {
        format!("{},{}=trace", config.log_level, SCAN_TRACE_TARGET)
    } else {
        format!("{},{}=off", config.log_level, SCAN_TRACE_TARGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_trace_toggle() {
        let yaml = r#"
log_level: info
log_dir: ./logs
log_file: funding.log
use_json: false
rotation: never
gateway: { host: 127.0.0.1, port: 8080 }
security: { admin_secret: a, cron_secret: c, jwt_secret: j }
"#;
        let mut config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(filter_directives(&config), "info,scan_trace=off");
        config.enable_tracing = true;
        assert_eq!(filter_directives(&config), "info,scan_trace=trace");
    }
}
