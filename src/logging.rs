use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format of the process log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// `json` selects JSON lines; anything else is the compact terminal format.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}

/// Sets up the logging subscriber for the process.
///
/// `RUST_LOG` wins when set; otherwise `component` is logged at INFO.
/// `BRIDGE_LOG_FORMAT=json` switches to JSON lines for log shippers.
pub fn init_logger(component: &str) {
    let format = std::env::var("BRIDGE_LOG_FORMAT")
        .map(|raw| LogFormat::parse(&raw))
        .unwrap_or_default();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={}", component, Level::INFO)));

    let fmt_layer = match format {
        LogFormat::Compact => fmt::layer()
            .with_target(false)
            .with_thread_names(true)
            .with_line_number(true)
            .compact()
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    // A second init keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
