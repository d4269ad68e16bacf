//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the current configuration, readable by many handlers, replaceable at runtime
//! - **metrics**: per-endpoint request counters written by the metrics middleware
//! - **pipeline**: the running delivery pipeline (intake, registry, gate, workers)
//! - **chat**: the live-chat handler that chat messages are routed through
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> for data that changes
//! Many requests read the config and the metrics at once; only a config update or the
//! middleware writes. `RwLock` lets the readers proceed in parallel while a writer gets
//! exclusive access.
//!
//! ### Arc<T> for data that coordinates itself
//! The pipeline and the chat handler manage their own synchronization internally, so they
//! are shared behind a plain `Arc` and every clone of `AppState` points at the same instance.
//!
//! ### Poisoned locks
//! A lock is "poisoned" when a thread panicked while holding it. The counters and config
//! are still usable in that case, so the guard is recovered with `into_inner()` instead of
//! taking the whole server down.

use crate::config::AppConfig;
use crate::livechat::{IntakeChatHandler, LiveChatHandler};
use crate::pipeline::PipelineContext;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// Cloning is cheap: every field is either `Arc`-wrapped or `Copy`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime through PUT /api/v1/config)
    pub config: Arc<RwLock<AppConfig>>,

    /// HTTP request metrics, updated by the metrics middleware on every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// The delivery pipeline every command and viewer goes through
    pub pipeline: Arc<PipelineContext>,

    /// Entry point for live-chat messages
    pub chat: Arc<dyn LiveChatHandler>,
}

/// HTTP request metrics collected across all requests.
///
/// ## Why these metrics matter:
/// - **request_count**: Total requests processed (for load monitoring)
/// - **error_count**: Total 4xx/5xx responses (for reliability monitoring)
/// - **endpoint_metrics**: Per-endpoint statistics, keyed by "METHOD /path"
///
/// Pipeline counters (turns, sentences, drops) are kept by the pipeline itself.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Request statistics for one endpoint.
///
/// ## Derived values:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
///
/// `POST /read/` durations include the time the sentence spent playing on a viewer, so its
/// average is expected to be seconds rather than milliseconds.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppState {
    /// Create the state around an already running pipeline.
    ///
    /// Chat messages are routed into the pipeline's intake through an [`IntakeChatHandler`].
    pub fn new(config: AppConfig, pipeline: Arc<PipelineContext>) -> Self {
        let chat: Arc<dyn LiveChatHandler> = Arc::new(IntakeChatHandler::new(pipeline.intake().clone()));
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            pipeline,
            chat,
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately, so a slow handler never blocks an update.
    pub fn get_config(&self) -> AppConfig {
        read_lock(&self.config).clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// Pipeline settings are read once when the pipeline starts; a changed value is stored
    /// here and takes effect on the next restart.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *write_lock(&self.config) = new_config;
        Ok(())
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        write_lock(&self.metrics).request_count += 1;
    }

    pub fn increment_error_count(&self) {
        write_lock(&self.metrics).error_count += 1;
    }

    /// Record one finished request against its endpoint.
    ///
    /// The first request to an endpoint creates its entry through `.entry().or_default()`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = write_lock(&self.metrics);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        read_lock(&self.metrics).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, from 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
