//! Shared runtime state for pos-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum; this module owns
//! nothing async itself. Everything is built once at startup and injected —
//! no global registry.

use std::sync::Arc;

use sqlx::PgPool;

use pos_calendar::HolidayCalendar;
use pos_config::LoaderConfig;
use pos_eod::{EodEngine, EodEngineConfig};
use pos_events::{EventPublisher, MessageBus};
use pos_orchestrator::{EodOrchestrator, OrchestratorConfig};
use pos_upstream::{
    CircuitBreakerConfig, MspmClient, MspmClientConfig, RetryPolicy, SnapshotSource,
};
use pos_validate::ValidationConfig;

use crate::adapters::{LogOnlyBus, PgPositionStore};

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        BuildInfo {
            service: "pos-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub pool: PgPool,
    pub bus: Arc<dyn MessageBus>,
    pub publisher: Arc<EventPublisher>,
    pub calendar: Arc<HolidayCalendar>,
    pub engine: Arc<EodEngine>,
    pub orchestrator: Arc<EodOrchestrator>,
    pub config: LoaderConfig,
    pub config_hash: String,
    pub build: BuildInfo,
}

impl AppState {
    /// Wire the full object graph from a pool + config. The bus defaults to
    /// the logging stand-in; production swaps in the real driver here.
    pub fn build(pool: PgPool, config: LoaderConfig, config_hash: String) -> anyhow::Result<Arc<Self>> {
        let bus: Arc<dyn MessageBus> = Arc::new(LogOnlyBus);
        Self::build_with_bus(pool, config, config_hash, bus)
    }

    pub fn build_with_bus(
        pool: PgPool,
        config: LoaderConfig,
        config_hash: String,
        bus: Arc<dyn MessageBus>,
    ) -> anyhow::Result<Arc<Self>> {
        let publisher = Arc::new(EventPublisher::new(Arc::clone(&bus)));
        let calendar = Arc::new(HolidayCalendar::weekdays_only());

        let upstream_cfg = MspmClientConfig {
            base_url: config.upstream.base_url.clone(),
            request_timeout: std::time::Duration::from_secs(config.upstream.request_timeout_secs),
            breaker: CircuitBreakerConfig {
                window_size: 100,
                min_calls: config.upstream.circuit_breaker.min_calls,
                failure_rate_pct: config.upstream.circuit_breaker.failure_rate_pct,
                open_duration: std::time::Duration::from_secs(
                    config.upstream.circuit_breaker.open_duration_secs,
                ),
            },
            retry: RetryPolicy {
                max_attempts: config.upstream.retry.max_attempts,
                base_backoff: std::time::Duration::from_millis(
                    config.upstream.retry.base_backoff_ms,
                ),
            },
            bulkhead_max_concurrent: config.upstream.bulkhead.max_concurrent,
            rate_per_sec: config.upstream.rate_limit.rate_per_sec,
            burst: config.upstream.rate_limit.burst,
        };
        let upstream: Arc<dyn SnapshotSource> = Arc::new(MspmClient::new(
            upstream_cfg,
            Arc::clone(&publisher) as Arc<dyn pos_events::AlertSink>,
        )?);

        let engine_cfg = EodEngineConfig {
            validation: ValidationConfig {
                strict: config.validation.strict,
                zero_price_threshold_pct: config.validation.zero_price_threshold_pct,
                max_quantity_jump_pct: config.validation.max_quantity_jump_pct,
                ..ValidationConfig::default()
            },
            late_eod_max_days: config.late_eod_max_days,
        };
        let engine = Arc::new(EodEngine::new(
            Arc::new(PgPositionStore::new(pool.clone())),
            upstream,
            Arc::clone(&publisher),
            Arc::clone(&calendar),
            engine_cfg,
        ));

        let orchestrator = Arc::new(EodOrchestrator::new(
            Arc::clone(&engine),
            OrchestratorConfig {
                max_concurrency: config.orchestrator.max_concurrency,
                per_account_timeout: std::time::Duration::from_secs(
                    config.orchestrator.per_account_timeout_secs,
                ),
                global_timeout: std::time::Duration::from_secs(
                    config.orchestrator.orchestrator_timeout_secs,
                ),
                retry_failed: config.orchestrator.retry_failed,
                retry_backoff: std::time::Duration::from_secs(2),
            },
        ));

        Ok(Arc::new(AppState {
            pool,
            bus,
            publisher,
            calendar,
            engine,
            orchestrator,
            config,
            config_hash,
            build: BuildInfo::current(),
        }))
    }
}
