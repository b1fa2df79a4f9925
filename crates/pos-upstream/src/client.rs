//! The Portfolio Manager HTTP client, composed from the edge guards.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use pos_events::AlertSink;
use pos_schemas::{Alert, AlertLevel, Snapshot, SnapshotStatus};

use crate::breaker::{BreakerTransition, CircuitBreaker, CircuitBreakerConfig};
use crate::limiter::{Bulkhead, TokenBucket};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{SnapshotSource, UpstreamError};

#[derive(Debug, Clone)]
pub struct MspmClientConfig {
    /// Base URL of the Portfolio Manager, no trailing slash.
    pub base_url: String,
    /// Per-call deadline; must be shorter than the orchestrator's
    /// per-account deadline.
    pub request_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub bulkhead_max_concurrent: usize,
    pub rate_per_sec: u32,
    pub burst: u32,
}

impl Default for MspmClientConfig {
    fn default() -> Self {
        MspmClientConfig {
            base_url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(10),
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            bulkhead_max_concurrent: 25,
            rate_per_sec: 100,
            burst: 200,
        }
    }
}

pub struct MspmClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    bucket: TokenBucket,
    bulkhead: Bulkhead,
    cache: RwLock<HashMap<String, Snapshot>>,
    alerts: Arc<dyn AlertSink>,
}

impl MspmClient {
    pub fn new(cfg: MspmClientConfig, alerts: Arc<dyn AlertSink>) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;

        Ok(MspmClient {
            http,
            base_url: cfg.base_url,
            retry: cfg.retry,
            breaker: CircuitBreaker::new(cfg.breaker),
            bucket: TokenBucket::new(cfg.rate_per_sec, cfg.burst),
            bulkhead: Bulkhead::new(cfg.bulkhead_max_concurrent),
            cache: RwLock::new(HashMap::new()),
            alerts,
        })
    }

    async fn alert_transition(&self, t: BreakerTransition) {
        let level = match t.to {
            crate::BreakerState::Open => AlertLevel::Critical,
            _ => AlertLevel::Warning,
        };
        self.alerts
            .alert(Alert {
                level,
                source: "upstream".to_string(),
                alert_type: "CIRCUIT_BREAKER".to_string(),
                message: format!("circuit breaker {} -> {}", t.from.as_str(), t.to.as_str()),
                entity_id: None,
                ts_utc: Utc::now(),
            })
            .await;
    }

    async fn do_fetch(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<Snapshot, UpstreamError> {
        let url = format!("{}/accounts/{}/eod-snapshot", self.base_url, account_id);
        let resp = self
            .http
            .get(&url)
            .query(&[("businessDate", business_date.format("%Y-%m-%d").to_string())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Unavailable(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                message,
            });
        }

        resp.json::<Snapshot>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    /// Degraded-path resolution: stale cache when present, otherwise an
    /// `UNAVAILABLE` snapshot. Always a value; callers must inspect `status`.
    fn fallback(&self, account_id: &str, business_date: NaiveDate, cause: &UpstreamError) -> Snapshot {
        let cached = self
            .cache
            .read()
            .expect("snapshot cache lock poisoned")
            .get(account_id)
            .cloned();

        match cached {
            Some(mut snap) => {
                warn!(account_id, error = %cause, "serving stale cached snapshot");
                snap.status = SnapshotStatus::StaleCache;
                snap
            }
            None => {
                warn!(account_id, error = %cause, "no cached snapshot; returning UNAVAILABLE");
                Snapshot::unavailable(account_id, business_date)
            }
        }
    }
}

#[async_trait::async_trait]
impl SnapshotSource for MspmClient {
    async fn fetch_snapshot(
        &self,
        account_id: &str,
        business_date: NaiveDate,
    ) -> Result<Snapshot, UpstreamError> {
        // Outermost guard: local token bucket.
        if !self.bucket.try_acquire() {
            return Ok(self.fallback(account_id, business_date, &UpstreamError::Throttled));
        }

        // Bulkhead: bound concurrent in-flight calls; held for the whole
        // breaker + retry + HTTP section.
        let Some(_permit) = self.bulkhead.try_enter() else {
            return Ok(self.fallback(account_id, business_date, &UpstreamError::Saturated));
        };

        // Circuit breaker gate.
        let (allowed, transition) = self.breaker.try_call();
        if let Some(t) = transition {
            self.alert_transition(t).await;
        }
        if allowed.is_err() {
            return Ok(self.fallback(account_id, business_date, &UpstreamError::CircuitOpen));
        }

        // Retry sits inside the breaker: the breaker accounts the final
        // outcome of the retried call, not each attempt.
        let result = retry_with_backoff("fetch_snapshot", &self.retry, || {
            self.do_fetch(account_id, business_date)
        })
        .await;

        match result {
            Ok(snapshot) => {
                if let Some(t) = self.breaker.record_success() {
                    self.alert_transition(t).await;
                }
                if snapshot.status == SnapshotStatus::Available {
                    self.cache
                        .write()
                        .expect("snapshot cache lock poisoned")
                        .insert(account_id.to_string(), snapshot.clone());
                    debug!(account_id, positions = snapshot.positions.len(), "snapshot cached");
                } else {
                    info!(account_id, status = snapshot.status.as_str(), "upstream returned degraded snapshot");
                }
                Ok(snapshot)
            }
            Err(e) => {
                if let Some(t) = self.breaker.record_failure() {
                    self.alert_transition(t).await;
                }
                if e.falls_back() {
                    Ok(self.fallback(account_id, business_date, &e))
                } else {
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoAlerts;

    #[async_trait::async_trait]
    impl AlertSink for NoAlerts {
        async fn alert(&self, _alert: Alert) {}
    }

    fn unreachable_client() -> MspmClient {
        // Port 1 on loopback: nothing listens, so every call fails at the
        // transport layer without needing a server in the test.
        MspmClient::new(
            MspmClientConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                request_timeout: Duration::from_secs(2),
                retry: RetryPolicy {
                    max_attempts: 2,
                    base_backoff: Duration::from_millis(1),
                },
                ..MspmClientConfig::default()
            },
            Arc::new(NoAlerts),
        )
        .expect("client builds without connecting")
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_an_unavailable_value() {
        let client = unreachable_client();
        let date = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap();

        // Cache is empty, so the fallback is UNAVAILABLE with no positions —
        // a value, not an Err.
        let snap = client
            .fetch_snapshot("1001", date)
            .await
            .expect("degraded paths return a snapshot value");
        assert_eq!(snap.status, SnapshotStatus::Unavailable);
        assert!(snap.positions.is_empty());
        assert_eq!(snap.account_id, "1001");
    }
}
