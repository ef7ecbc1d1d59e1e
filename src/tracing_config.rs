//! Tracing configuration for structured logging
//!
//! The engine only emits events. Applications that want this crate to install
//! a subscriber enable the `tracing-init` feature and call
//! [`TracingConfig::init`] or [`init_library_tracing`].

#[cfg(feature = "tracing-init")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors
    Console,
    /// Compact console output for CI environments
    Compact,
    /// JSON structured logging for production environments
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    /// Output format
    pub format: TracingFormat,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID for correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set custom environment filter, e.g. `bgremove_engine=debug`
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Set session ID for request correlation
    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Install the global subscriber described by this configuration
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    #[cfg(feature = "tracing-init")]
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(env_filter) => EnvFilter::try_new(env_filter)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "Background removal session started");
        }

        Ok(())
    }
}

/// Initialize tracing for library usage (minimal configuration)
///
/// Leaves an already installed global subscriber in place.
#[cfg(feature = "tracing-init")]
pub fn init_library_tracing() {
    if tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish(),
    )
    .is_ok()
    {
        tracing::debug!("Library tracing initialized");
    }
}

/// Span creation helpers for engine stages
pub mod spans {
    use crate::types::RequestId;
    use tracing::{Level, Span};

    /// Span covering one request from submission to delivery
    pub fn request(request_id: &RequestId, backend: &str, dimensions: (u32, u32)) -> Span {
        tracing::span!(
            Level::INFO,
            "removal_request",
            request_id = %request_id,
            backend = %backend,
            width = %dimensions.0,
            height = %dimensions.1
        )
    }

    /// Span for the segmentation step
    pub fn segmentation(backend: &str) -> Span {
        tracing::span!(Level::DEBUG, "segmentation", backend = %backend)
    }

    /// Span for the compositing step
    pub fn compositing(threshold: Option<f32>) -> Span {
        tracing::span!(Level::DEBUG, "compositing", threshold = ?threshold)
    }

    /// Span for a batch submitted through the batch helper
    pub fn batch(request_count: usize) -> Span {
        tracing::span!(Level::INFO, "batch_processing", request_count = %request_count)
    }
}

/// Event helpers for request outcomes
pub mod events {
    use crate::{error::BgRemovalError, error::ErrorKind, types::RequestId};
    use tracing::{debug, error, info, warn};

    /// Log a failed request at a level matching its kind
    ///
    /// Invariant violations are engine bugs and are routed to
    /// [`invariant_violation`] instead.
    pub fn request_failed(request_id: &RequestId, error: &BgRemovalError) {
        match error.kind() {
            ErrorKind::InvariantViolation => invariant_violation(request_id, error),
            ErrorKind::UnsupportedOperation => info!(
                request_id = %request_id,
                kind = %error.kind(),
                error = %error,
                "Background removal unavailable"
            ),
            kind => warn!(
                request_id = %request_id,
                kind = %kind,
                error = %error,
                "Background removal failed"
            ),
        }
    }

    /// Log an internal contract breach
    pub fn invariant_violation(request_id: &RequestId, error: &BgRemovalError) {
        error!(
            target: "bgremove_engine::invariant",
            request_id = %request_id,
            error = %error,
            "Engine invariant violated"
        );
    }

    /// Log a completed request
    pub fn request_succeeded(request_id: &RequestId, timings: &crate::types::ProcessingTimings) {
        info!(
            request_id = %request_id,
            total_ms = timings.total_ms,
            "Background removal complete"
        );
        debug!(request_id = %request_id, "{}", timings.summary());
    }

    /// Log a cancelled request
    pub fn request_cancelled(request_id: &RequestId, stage: &str) {
        debug!(request_id = %request_id, stage = %stage, "Request cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BgRemovalError;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(TracingConfig::new().with_verbosity(0).verbosity_to_filter(), "info");
        assert_eq!(TracingConfig::new().with_verbosity(1).verbosity_to_filter(), "debug");
        assert_eq!(TracingConfig::new().with_verbosity(2).verbosity_to_filter(), "trace");
        assert_eq!(TracingConfig::new().with_verbosity(10).verbosity_to_filter(), "trace");
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new()
            .with_verbosity(2)
            .with_format(TracingFormat::Compact)
            .with_env_filter("bgremove_engine=debug")
            .with_session_id("test-session");

        assert_eq!(config.verbosity, 2);
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.env_filter.as_deref(), Some("bgremove_engine=debug"));
        assert_eq!(config.session_id.as_deref(), Some("test-session"));
    }

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.format, TracingFormat::Console);
        assert!(config.env_filter.is_none());
        assert!(config.session_id.is_none());
    }

    #[test]
    fn test_event_helpers_without_subscriber() {
        let id = crate::types::RequestId::from("req-1");
        events::request_failed(&id, &BgRemovalError::invalid_input("empty buffer"));
        events::request_failed(&id, &BgRemovalError::invariant("mask 2x2 vs image 3x3"));
        events::request_cancelled(&id, "segmentation");
        let _span = spans::request(&id, "mock", (4, 4)).entered();
    }
}
