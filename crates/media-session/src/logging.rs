//! Tracing subscriber setup for applications built on the session library
//!
//! Filter directives are derived from the application name and this crate's
//! target. The frame pumps in [`crate::media`] log per tick at `trace`, so
//! they get a level of their own. A non-empty `RUST_LOG` replaces the derived
//! directives entirely.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

const LIBRARY_TARGET: &str = "roomlink_media_session";
const MEDIA_TARGET: &str = "roomlink_media_session::media";
/// Chatty dependencies of the token client
const HTTP_TARGETS: [&str; 3] = ["hyper", "hyper_util", "reqwest"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for the application and the session library
    pub level: Level,
    /// Level for the frame pumps; defaults to `level` capped at `debug`
    pub media_level: Option<Level>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    pub file_info: bool,
    pub log_spans: bool,
    /// Keep the HTTP stack at `warn` regardless of `level`
    pub quiet_http: bool,
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            media_level: None,
            json: false,
            file_info: false,
            log_spans: false,
            quiet_http: true,
            app_name: "roomlink".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    pub fn with_media_level(mut self, level: Level) -> Self {
        self.media_level = Some(level);
        self
    }

    /// Directives used when `RUST_LOG` is not set
    pub fn directives(&self) -> String {
        let level = level_name(self.level);
        // Per-frame logging only when asked for explicitly
        let media = self
            .media_level
            .unwrap_or_else(|| self.level.min(Level::DEBUG));
        let mut directives = vec![
            "warn".to_string(),
            format!("{}={}", self.app_name.replace('-', "_"), level),
            format!("{}={}", LIBRARY_TARGET, level),
            format!("{}={}", MEDIA_TARGET, level_name(media)),
        ];
        if self.quiet_http {
            directives.extend(HTTP_TARGETS.iter().map(|target| format!("{}=warn", target)));
        }
        directives.join(",")
    }

    fn env_filter(&self) -> SessionResult<EnvFilter> {
        match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(spec) if !spec.trim().is_empty() => EnvFilter::try_new(&spec)
                .map_err(|e| SessionError::invalid_config("RUST_LOG", e.to_string())),
            _ => EnvFilter::try_new(self.directives())
                .map_err(|e| SessionError::invalid_config("log_level", e.to_string())),
        }
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn setup_logging(config: LoggingConfig) -> SessionResult<()> {
    let filter = config.env_filter()?;

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let result = if config.json {
        builder.with_writer(std::io::stdout).json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| SessionError::internal(format!("Failed to install subscriber: {}", e)))
}

pub fn parse_log_level(level: &str) -> SessionResult<Level> {
    Level::from_str(level)
        .map_err(|_| SessionError::invalid_config("log_level", format!("Invalid log level: {}", level)))
}

/// One line describing where the session is about to go
pub fn log_startup(app_name: &str, version: &str, config: &SessionConfig) {
    tracing::info!(
        server = %config.server_url,
        room = %config.room_name,
        frame_rate = config.frame_rate,
        sandbox = config.sandbox_id.is_some(),
        "Starting {} v{}",
        app_name,
        version
    );
}
