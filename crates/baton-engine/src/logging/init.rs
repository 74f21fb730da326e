use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` uses `env_logger` filter syntax, e.g. `"info,baton=debug,wgpu=warn"`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
    /// Raises the `baton` target to debug when no explicit filter is given.
    pub debug_logging: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
            debug_logging: false,
        }
    }
}

impl LoggingConfig {
    /// Filter applied when neither `env_filter` nor `RUST_LOG` is set.
    pub fn default_filter(&self) -> &'static str {
        if self.debug_logging {
            "info,wgpu_core=warn,wgpu_hal=warn,baton=debug"
        } else {
            "info,wgpu_core=warn,wgpu_hal=warn"
        }
    }
}

static INIT: Once = Once::new();

/// Initializes the global logger once. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        match config.env_filter.clone().or_else(|| std::env::var("RUST_LOG").ok()) {
            Some(filter) => builder.parse_filters(&filter),
            None => builder.parse_filters(config.default_filter()),
        };

        builder.write_style(config.write_style);
        builder.format_timestamp_millis();

        if builder.try_init().is_err() {
            eprintln!("baton: a global logger was already installed");
            return;
        }

        log::debug!("logging initialized");
    });
}
