//! Structured logging configuration.
//!
//! Resolution warnings, lock transitions and store operations are emitted as `tracing` events.
//! This module installs the subscriber that renders them, as JSON in production or as pretty
//! text during development.
//!
//! # Usage
//!
//! ```ignore
//! use authstate_server::logging::{init_logging, LoggingConfig};
//!
//! init_logging(LoggingConfig::json());
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Whether to use JSON format (true) or text format (false)
    pub json_format: bool,
    /// The default log level if RUST_LOG is not set
    pub default_level: Level,
    /// Whether to include span events (enter/exit)
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
            include_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn json() -> Self {
        Self {
            json_format: true,
            ..Default::default()
        }
    }

    pub fn text() -> Self {
        Self {
            json_format: false,
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Include span enter/exit events, e.g. to follow one resolution through its store reads.
    pub fn with_spans(mut self) -> Self {
        self.include_spans = true;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_level.to_string()))
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        }
    }
}

/// Initialize the global subscriber.
///
/// Call once at startup. Later calls leave the first subscriber in place.
pub fn init_logging(config: LoggingConfig) {
    let filter = config.filter();
    let span_events = config.span_events();

    if config.json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_current_span(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        );
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_target(true),
        );
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// JSON subscriber writing to `writer`, for capturing log output in tests.
pub fn create_json_layer<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new("trace"))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use authstate_domain::model::UserName;
    use authstate_storage::{DocumentStore, MemoryDocumentStore, Namespace, WriteConcern};
    use serde_json::json;

    use crate::external_state::{AuthzExternalState, ExternalState};
    use crate::observer::NoopOpObserver;

    /// A writer that captures output to a shared buffer.
    #[derive(Clone)]
    struct CaptureWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl CaptureWriter {
        fn new() -> Self {
            Self {
                buffer: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn lines(&self) -> Vec<serde_json::Value> {
            let buffer = self.buffer.lock().unwrap();
            String::from_utf8_lossy(&buffer)
                .lines()
                .filter(|l| !l.is_empty())
                .map(|l| serde_json::from_str(l).expect("log line should be valid JSON"))
                .collect()
        }
    }

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_logging_config_builders() {
        let config = LoggingConfig::default();
        assert!(!config.json_format);
        assert_eq!(config.default_level, Level::INFO);
        assert!(!config.include_spans);

        assert!(LoggingConfig::json().json_format);
        assert!(!LoggingConfig::text().json_format);
        assert_eq!(
            LoggingConfig::text().with_level(Level::DEBUG).default_level,
            Level::DEBUG
        );
        assert!(LoggingConfig::json().with_spans().include_spans);
    }

    /// Test: resolution warnings are emitted as structured JSON events naming the role
    #[test]
    fn test_resolution_warnings_are_logged_as_json() {
        let writer = CaptureWriter::new();
        let subscriber = create_json_layer(writer.clone());

        tracing::subscriber::with_default(subscriber, || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let store = MemoryDocumentStore::new_shared();
                store
                    .insert(
                        &Namespace::new("admin", "system.version"),
                        json!({"_id": "authSchema", "currentVersion": 2})
                            .as_object()
                            .cloned()
                            .unwrap(),
                        &WriteConcern::default(),
                    )
                    .await
                    .unwrap();
                store
                    .insert(
                        &Namespace::new("admin", "system.users"),
                        json!({
                            "user": "alice",
                            "db": "test",
                            "roles": [{"role": "ghost", "db": "test"}]
                        })
                            .as_object()
                            .cloned()
                            .unwrap(),
                        &WriteConcern::default(),
                    )
                    .await
                    .unwrap();
                let state = AuthzExternalState::for_storage_tier(store, Arc::new(NoopOpObserver));
                state
                    .describe_user(&UserName::new("alice", "test"))
                    .await
                    .unwrap();
            });
        });

        let lines = writer.lines();
        let warning = lines
            .iter()
            .find(|l| l["level"] == json!("WARN"))
            .expect("a warning should be logged");
        assert_eq!(warning["fields"]["role"], json!("ghost@test"));
        assert!(warning["fields"]["message"]
            .as_str()
            .unwrap()
            .contains("Could not find role: ghost@test"));
        assert!(warning.get("target").is_some());
    }
}
