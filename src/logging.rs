/*!
 * Logging and tracing initialization
 *
 * The library only emits `tracing` events. Applications that want the
 * default output format can call [`init_logging`] once at startup.
 */

use std::fs::File;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ClientConfig;
use crate::error::{S3Error, S3Result};

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to
/// stdout in compact form, or as JSON lines when `log_file` is set.
pub fn init_logging(config: &ClientConfig) -> S3Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(config)))
        .map_err(|e| S3Error::InvalidConfig(format!("Failed to create log filter: {}", e)))?;

    let output = match config.log_file {
        Some(ref log_path) => {
            let file = File::create(log_path).map_err(|e| {
                S3Error::InvalidConfig(format!("Failed to create log file: {}", e))
            })?;
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .json()
                .boxed()
        }
        None => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(output)
        .try_init()
        .map_err(|e| S3Error::InvalidConfig(format!("Logging already initialized: {}", e)))
}

fn default_directive(config: &ClientConfig) -> String {
    format!("s3stream={}", config.log_level.to_tracing_level())
}

/// Install a test-writer subscriber once per process
#[doc(hidden)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("s3stream=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}
