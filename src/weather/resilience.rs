//! ONLINE / DEGRADED / OFFLINE state machine wrapping the live weather source.
//!
//! Guarantees the evaluator always receives a best-effort snapshot: live data
//! while fetches succeed, cached data while the cache is fresh enough, and an
//! explicit no-data snapshot otherwise. Fetch failures are never fatal.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::{GeoLocation, SourceState, WeatherSnapshot};
use crate::events::{AutomationEvent, EventBus};

use super::cache::WeatherCache;
use super::provider::WeatherProvider;

/// Hard bound on one fetch attempt, on top of the HTTP client's own timeout.
const FETCH_ATTEMPT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(45);

#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceTuning {
    pub cache_valid_hours: i64,
    pub refresh_interval_minutes: i64,
    pub retry_interval_minutes: i64,
    pub max_retry_interval_minutes: i64,
    pub outage_alert_after_minutes: i64,
    pub forecast_horizon_hours: u32,
}

impl Default for ResilienceTuning {
    fn default() -> Self {
        Self {
            cache_valid_hours: 6,
            refresh_interval_minutes: 15,
            retry_interval_minutes: 2,
            max_retry_interval_minutes: 60,
            outage_alert_after_minutes: 120,
            forecast_horizon_hours: 12,
        }
    }
}

pub struct WeatherResilienceService {
    provider: Box<dyn WeatherProvider>,
    location: GeoLocation,
    tuning: ResilienceTuning,
    events: EventBus,
    state: SourceState,
    cache: Option<WeatherCache>,
    consecutive_failures: u32,
    next_attempt_at: Option<DateTime<Utc>>,
    offline_since: Option<DateTime<Utc>>,
    outage_alerted: bool,
}

impl WeatherResilienceService {
    pub fn new(
        provider: Box<dyn WeatherProvider>,
        location: GeoLocation,
        tuning: ResilienceTuning,
        cache: Option<WeatherCache>,
        events: EventBus,
    ) -> Self {
        // A persisted cache from a previous run starts us degraded rather
        // than offline until the first fetch settles the real state.
        let state = match &cache {
            Some(c) if c.matches_location(&location) => SourceState::DegradedUsingCache,
            _ => SourceState::Offline,
        };
        Self {
            provider,
            location,
            tuning,
            events,
            state,
            cache,
            consecutive_failures: 0,
            next_attempt_at: None,
            offline_since: None,
            outage_alerted: false,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn cache(&self) -> Option<&WeatherCache> {
        self.cache.as_ref()
    }

    /// Attempt a fetch if one is due, then settle the state machine.
    /// Returns true when the cache changed and should be re-persisted.
    pub async fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if let Some(next) = self.next_attempt_at {
            if now < next {
                // The cache can expire while we wait out the backoff; the
                // reported state must match what snapshot() serves.
                self.reconcile_cache_state(now);
                self.check_prolonged_outage(now);
                return false;
            }
        }

        let fetch = tokio::time::timeout(
            FETCH_ATTEMPT_TIMEOUT,
            self.provider
                .fetch_forecast(&self.location, self.tuning.forecast_horizon_hours),
        )
        .await;

        match fetch {
            Ok(Ok(forecast)) => {
                self.cache = Some(WeatherCache::new(now, &self.location, forecast));
                self.consecutive_failures = 0;
                self.next_attempt_at =
                    Some(now + Duration::minutes(self.tuning.refresh_interval_minutes));
                self.offline_since = None;
                self.outage_alerted = false;
                self.transition(SourceState::Online);
                true
            }
            Ok(Err(e)) => {
                self.record_failure(now, &e.to_string());
                false
            }
            Err(_) => {
                self.record_failure(now, "fetch attempt timed out");
                false
            }
        }
    }

    fn record_failure(&mut self, now: DateTime<Utc>, error: &str) {
        self.consecutive_failures += 1;
        let backoff = self.backoff_minutes();
        self.next_attempt_at = Some(now + Duration::minutes(backoff));
        warn!(
            error,
            consecutive_failures = self.consecutive_failures,
            retry_in_minutes = backoff,
            "weather fetch failed"
        );

        let cache_usable = self
            .cache
            .as_ref()
            .is_some_and(|c| c.usable(&self.location, now, self.tuning.cache_valid_hours));
        if cache_usable {
            self.transition(SourceState::DegradedUsingCache);
        } else {
            // The outage clock starts at the first fetch failure with no
            // usable data, including when we already began offline.
            if self.offline_since.is_none() {
                self.offline_since = Some(now);
                self.outage_alerted = false;
            }
            self.transition(SourceState::Offline);
        }
        self.check_prolonged_outage(now);
    }

    /// Downgrade to offline when the cache we have been serving is no longer
    /// usable, starting the outage clock at the moment data ran out.
    fn reconcile_cache_state(&mut self, now: DateTime<Utc>) {
        if self.state == SourceState::Offline {
            return;
        }
        let cache_usable = self
            .cache
            .as_ref()
            .is_some_and(|c| c.usable(&self.location, now, self.tuning.cache_valid_hours));
        if !cache_usable {
            if self.offline_since.is_none() {
                self.offline_since = Some(now);
                self.outage_alerted = false;
            }
            self.transition(SourceState::Offline);
        }
    }

    /// Exponential backoff: retry interval doubling per consecutive failure,
    /// capped at the configured maximum.
    fn backoff_minutes(&self) -> i64 {
        let exp = self.consecutive_failures.saturating_sub(1).min(16);
        (self.tuning.retry_interval_minutes << exp).min(self.tuning.max_retry_interval_minutes)
    }

    fn check_prolonged_outage(&mut self, now: DateTime<Utc>) {
        if self.state != SourceState::Offline || self.outage_alerted {
            return;
        }
        if let Some(since) = self.offline_since {
            if now - since >= Duration::minutes(self.tuning.outage_alert_after_minutes) {
                self.outage_alerted = true;
                warn!(offline_since = %since, "prolonged weather outage");
                self.events
                    .publish(AutomationEvent::ProlongedOutage { offline_since: since });
            }
        }
    }

    fn transition(&mut self, new: SourceState) {
        if self.state == new {
            return;
        }
        let old = self.state;
        self.state = new;
        info!(%old, %new, "weather source state changed");
        self.events
            .publish(AutomationEvent::WeatherStateChanged { old, new });
    }

    /// Best-effort snapshot for the current cycle. A stale or mislocated
    /// cache downgrades to an offline snapshot rather than serving bad data.
    pub fn snapshot(&self, now: DateTime<Utc>) -> WeatherSnapshot {
        match self.state {
            SourceState::Offline => WeatherSnapshot::offline(now),
            state => match &self.cache {
                Some(c) if c.usable(&self.location, now, self.tuning.cache_valid_hours) => {
                    WeatherSnapshot::from_forecast(c.fetched_at, state, now, c.forecast.clone())
                }
                _ => WeatherSnapshot::offline(now),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ForecastPoint;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn boston() -> GeoLocation {
        GeoLocation {
            latitude: 42.36,
            longitude: -71.06,
            timezone: chrono_tz::America::New_York,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).unwrap()
    }

    fn forecast_at(ts: DateTime<Utc>) -> Vec<ForecastPoint> {
        vec![ForecastPoint {
            timestamp: ts,
            temperature_f: 30.0,
            precipitation_probability: 10.0,
        }]
    }

    struct ScriptedProvider {
        fail: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WeatherProvider for ScriptedProvider {
        async fn fetch_forecast(
            &self,
            _location: &GeoLocation,
            _horizon_hours: u32,
        ) -> anyhow::Result<Vec<ForecastPoint>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(anyhow!("provider down"))
            } else {
                Ok(forecast_at(t0()))
            }
        }
    }

    fn service(
        fail: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
        cache: Option<WeatherCache>,
        events: EventBus,
    ) -> WeatherResilienceService {
        WeatherResilienceService::new(
            Box::new(ScriptedProvider { fail, calls }),
            boston(),
            ResilienceTuning {
                cache_valid_hours: 6,
                refresh_interval_minutes: 15,
                retry_interval_minutes: 2,
                max_retry_interval_minutes: 30,
                outage_alert_after_minutes: 60,
                forecast_horizon_hours: 12,
            },
            cache,
            events,
        )
    }

    #[tokio::test]
    async fn test_successful_fetch_goes_online() {
        let mut svc = service(
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicUsize::new(0)),
            None,
            EventBus::default(),
        );
        assert!(svc.refresh(t0()).await, "new cache should be persisted");
        assert_eq!(svc.state(), SourceState::Online);
        let snap = svc.snapshot(t0());
        assert_eq!(snap.source_state, SourceState::Online);
        assert_eq!(snap.current_temperature_f, Some(30.0));
    }

    #[tokio::test]
    async fn test_failure_with_fresh_cache_degrades_not_offline() {
        let fail = Arc::new(AtomicBool::new(false));
        let mut svc = service(
            fail.clone(),
            Arc::new(AtomicUsize::new(0)),
            None,
            EventBus::default(),
        );
        svc.refresh(t0()).await;
        assert_eq!(svc.state(), SourceState::Online);

        fail.store(true, Ordering::SeqCst);
        let next = t0() + Duration::minutes(15);
        svc.refresh(next).await;
        assert_eq!(svc.state(), SourceState::DegradedUsingCache);
        let snap = svc.snapshot(next);
        assert_eq!(snap.source_state, SourceState::DegradedUsingCache);
        assert_eq!(snap.current_temperature_f, Some(30.0));
    }

    #[tokio::test]
    async fn test_failure_without_cache_goes_offline() {
        let mut svc = service(
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicUsize::new(0)),
            None,
            EventBus::default(),
        );
        svc.refresh(t0()).await;
        assert_eq!(svc.state(), SourceState::Offline);
        let snap = svc.snapshot(t0());
        assert!(snap.current_temperature_f.is_none());
        assert!(snap.hourly_forecast.is_empty());
    }

    #[tokio::test]
    async fn test_stale_cache_downgrades_to_offline() {
        let fail = Arc::new(AtomicBool::new(false));
        let mut svc = service(
            fail.clone(),
            Arc::new(AtomicUsize::new(0)),
            None,
            EventBus::default(),
        );
        svc.refresh(t0()).await;

        fail.store(true, Ordering::SeqCst);
        // Past cache_valid_hours: cache no longer usable.
        let later = t0() + Duration::hours(7);
        svc.refresh(later).await;
        assert_eq!(svc.state(), SourceState::Offline);
    }

    #[tokio::test]
    async fn test_cache_expiry_during_backoff_goes_offline() {
        let fail = Arc::new(AtomicBool::new(false));
        let events = EventBus::default();
        let mut rx = events.subscribe();
        // Long retry interval and a short-lived cache: the cache expires
        // while the next attempt is still far away.
        let mut svc = WeatherResilienceService::new(
            Box::new(ScriptedProvider {
                fail: fail.clone(),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            boston(),
            ResilienceTuning {
                cache_valid_hours: 1,
                refresh_interval_minutes: 15,
                retry_interval_minutes: 120,
                max_retry_interval_minutes: 240,
                outage_alert_after_minutes: 60,
                forecast_horizon_hours: 12,
            },
            None,
            events.clone(),
        );

        svc.refresh(t0()).await;
        fail.store(true, Ordering::SeqCst);
        svc.refresh(t0() + Duration::minutes(15)).await;
        assert_eq!(svc.state(), SourceState::DegradedUsingCache);
        while rx.try_recv().is_ok() {}

        // Cache (fetched at t0) expired, next attempt not due until +135min:
        // the skipped refresh must still downgrade to match the snapshot.
        let expired = t0() + Duration::minutes(61);
        svc.refresh(expired).await;
        assert_eq!(svc.state(), SourceState::Offline);
        assert!(svc.snapshot(expired).current_temperature_f.is_none());
        assert_eq!(
            rx.try_recv().unwrap(),
            AutomationEvent::WeatherStateChanged {
                old: SourceState::DegradedUsingCache,
                new: SourceState::Offline,
            }
        );

        // The outage clock started when the data ran out.
        svc.refresh(expired + Duration::minutes(60)).await;
        assert!(rx
            .try_recv()
            .is_ok_and(|e| matches!(e, AutomationEvent::ProlongedOutage { .. })));
    }

    #[tokio::test]
    async fn test_backoff_doubles_and_caps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut svc = service(
            Arc::new(AtomicBool::new(true)),
            calls.clone(),
            None,
            EventBus::default(),
        );

        svc.refresh(t0()).await;
        assert_eq!(svc.backoff_minutes(), 2);
        // A refresh before the retry window does not hit the provider.
        svc.refresh(t0() + Duration::minutes(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        svc.refresh(t0() + Duration::minutes(2)).await;
        assert_eq!(svc.backoff_minutes(), 4);
        svc.refresh(t0() + Duration::minutes(10)).await;
        assert_eq!(svc.backoff_minutes(), 8);
        for round in 0..6 {
            svc.refresh(t0() + Duration::hours(1 + round)).await;
        }
        assert_eq!(svc.backoff_minutes(), 30, "capped at max_retry_interval");
    }

    #[tokio::test]
    async fn test_recovery_resets_backoff_and_emits_transitions() {
        let fail = Arc::new(AtomicBool::new(true));
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let mut svc = service(
            fail.clone(),
            Arc::new(AtomicUsize::new(0)),
            None,
            events.clone(),
        );

        svc.refresh(t0()).await;
        assert_eq!(svc.state(), SourceState::Offline);

        fail.store(false, Ordering::SeqCst);
        svc.refresh(t0() + Duration::minutes(5)).await;
        assert_eq!(svc.state(), SourceState::Online);
        assert_eq!(svc.consecutive_failures, 0);

        assert_eq!(
            rx.recv().await.unwrap(),
            AutomationEvent::WeatherStateChanged {
                old: SourceState::Offline,
                new: SourceState::Online,
            }
        );
    }

    #[tokio::test]
    async fn test_prolonged_outage_emitted_once() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let mut svc = service(
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicUsize::new(0)),
            None,
            events.clone(),
        );

        svc.refresh(t0()).await;
        svc.refresh(t0() + Duration::minutes(30)).await;
        // Crossing the alert threshold emits exactly one outage event.
        svc.refresh(t0() + Duration::minutes(61)).await;
        svc.refresh(t0() + Duration::minutes(90)).await;

        let mut outages = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, AutomationEvent::ProlongedOutage { .. }) {
                outages += 1;
            }
        }
        assert_eq!(outages, 1);
    }

    #[tokio::test]
    async fn test_persisted_cache_starts_degraded() {
        let cache = WeatherCache::new(t0(), &boston(), forecast_at(t0()));
        let svc = service(
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicUsize::new(0)),
            Some(cache),
            EventBus::default(),
        );
        assert_eq!(svc.state(), SourceState::DegradedUsingCache);
        let snap = svc.snapshot(t0() + Duration::hours(1));
        assert_eq!(snap.current_temperature_f, Some(30.0));
    }
}
