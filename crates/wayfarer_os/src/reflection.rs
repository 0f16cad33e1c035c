#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use wayfarer_engines::advisor::{
    build_advisor_request, extract_structured_object, AdvisorError, HttpAdvisor,
    ADVISOR_DEFAULT_TIMEOUT_MS, ADVISOR_PROVIDER,
};
use wayfarer_engines::perf::{perf_snapshot, recent_summary, PERF_WINDOW_MS};
use wayfarer_kernel_contracts::advisor::AdvisorRequest;
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::policy::PolicyPatch;
use wayfarer_kernel_contracts::reflection::{ReflectFailure, ReflectOutcome};

use crate::agent_locks::AgentLocks;
use crate::metrics::MetricsRecorder;
use crate::policy_store::{PolicyError, PolicyStore};

/// Source of policy suggestions. Replies are untrusted free-form text.
pub trait PolicyAdvisor: Send + Sync + 'static {
    fn is_configured(&self) -> bool;

    fn advise(
        &self,
        request: AdvisorRequest,
    ) -> impl Future<Output = Result<String, AdvisorError>> + Send;
}

impl PolicyAdvisor for HttpAdvisor {
    fn is_configured(&self) -> bool {
        self.config().is_configured()
    }

    fn advise(
        &self,
        request: AdvisorRequest,
    ) -> impl Future<Output = Result<String, AdvisorError>> + Send {
        let client = self.clone();
        async move {
            tokio::task::spawn_blocking(move || client.complete(&request))
                .await
                .unwrap_or_else(|_| {
                    Err(AdvisorError::new(
                        ADVISOR_PROVIDER,
                        "worker_join_failed",
                        None,
                    ))
                })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectionConfig {
    pub perf_window_ms: u64,
    pub advisor_timeout: Duration,
}

impl ReflectionConfig {
    pub fn mvp_v1() -> Self {
        Self {
            perf_window_ms: PERF_WINDOW_MS,
            advisor_timeout: Duration::from_millis(u64::from(ADVISOR_DEFAULT_TIMEOUT_MS)),
        }
    }
}

pub struct ReflectionScheduler<A: PolicyAdvisor> {
    policies: PolicyStore,
    metrics: MetricsRecorder,
    advisor: A,
    locks: Arc<AgentLocks>,
    config: ReflectionConfig,
}

impl<A: PolicyAdvisor> ReflectionScheduler<A> {
    pub fn new(
        policies: PolicyStore,
        metrics: MetricsRecorder,
        advisor: A,
        locks: Arc<AgentLocks>,
        config: ReflectionConfig,
    ) -> Self {
        Self {
            policies,
            metrics,
            advisor,
            locks,
            config,
        }
    }

    pub fn config(&self) -> ReflectionConfig {
        self.config
    }

    pub fn advisor(&self) -> &A {
        &self.advisor
    }

    /// Asks the advisor for a patch and applies whatever survives the allow-list and clamp.
    ///
    /// Every `Rejected` outcome leaves the stored policy exactly as it was. `Err` is reserved
    /// for storage failures.
    pub async fn reflect_and_patch(&self, agent_id: &AgentId) -> Result<ReflectOutcome, PolicyError> {
        if !self.advisor.is_configured() {
            tracing::debug!(agent = %agent_id, "advisor disabled; reflection skipped");
            return Ok(ReflectOutcome::Rejected(ReflectFailure::AdvisorDisabled));
        }
        let _guard = self.locks.acquire(agent_id).await;

        let current = self.policies.get_current_policy(agent_id)?;
        let recent = self.metrics.recent(agent_id, self.config.perf_window_ms)?;
        let snapshot = perf_snapshot(&recent);
        let summary = recent_summary(
            agent_id,
            &snapshot,
            &current.document,
            self.config.perf_window_ms,
        );
        let request = build_advisor_request(agent_id, summary, &current.document, snapshot);

        let reply = match tokio::time::timeout(
            self.config.advisor_timeout,
            self.advisor.advise(request),
        )
        .await
        {
            Err(_) => return Ok(self.reject(agent_id, ReflectFailure::AdvisorTimeout, None)),
            Ok(Err(err)) if err.is_timeout() => {
                return Ok(self.reject(agent_id, ReflectFailure::AdvisorTimeout, Some(&err)))
            }
            Ok(Err(err)) => {
                return Ok(self.reject(agent_id, ReflectFailure::AdvisorError, Some(&err)))
            }
            Ok(Ok(text)) => text,
        };

        let Some(raw) = extract_structured_object(&reply) else {
            return Ok(self.reject(agent_id, ReflectFailure::InvalidResponse, None));
        };
        let sanitized = PolicyPatch::from_untrusted(raw);
        if !sanitized.dropped_keys.is_empty() {
            tracing::warn!(
                agent = %agent_id,
                dropped = ?sanitized.dropped_keys,
                "advisor patch keys outside the allow-list dropped"
            );
        }

        match self.policies.patch_policy(agent_id, &sanitized.patch) {
            Ok(updated) => Ok(ReflectOutcome::Patched {
                updated,
                patch: sanitized.patch,
                dropped_keys: sanitized.dropped_keys,
            }),
            Err(PolicyError::InvalidPatch(err)) => {
                tracing::warn!(agent = %agent_id, error = %err, "advisor patch rejected");
                Ok(ReflectOutcome::Rejected(ReflectFailure::InvalidPatch))
            }
            Err(err) => Err(err),
        }
    }

    fn reject(
        &self,
        agent_id: &AgentId,
        failure: ReflectFailure,
        cause: Option<&AdvisorError>,
    ) -> ReflectOutcome {
        match cause {
            Some(err) => tracing::warn!(
                agent = %agent_id,
                failure = failure.as_str(),
                error = %err,
                "reflection rejected"
            ),
            None => tracing::warn!(
                agent = %agent_id,
                failure = failure.as_str(),
                "reflection rejected"
            ),
        }
        ReflectOutcome::Rejected(failure)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::json;
    use wayfarer_kernel_contracts::metric::METRIC_KIND_MOVEMENT_REWARD;
    use wayfarer_kernel_contracts::UnixTimeMs;
    use wayfarer_storage::store::WayfarerStore;

    use crate::bus::MessageBus;
    use crate::clock::{Clock, ManualClock};
    use crate::shared_store::{shared_store, SharedStore};

    #[derive(Default)]
    pub(crate) struct AdvisorProbe {
        pub(crate) calls: AtomicUsize,
        pub(crate) in_flight: AtomicUsize,
        pub(crate) max_in_flight: AtomicUsize,
        pub(crate) requests: Mutex<Vec<AdvisorRequest>>,
        pub(crate) started_at: Mutex<Vec<tokio::time::Instant>>,
    }

    /// Scripted advisor: every call sleeps `delay`, then returns `reply`.
    #[derive(Clone)]
    pub(crate) struct FakeAdvisor {
        pub(crate) configured: bool,
        pub(crate) reply: Result<String, AdvisorError>,
        pub(crate) delay: Duration,
        pub(crate) probe: Arc<AdvisorProbe>,
    }

    impl FakeAdvisor {
        pub(crate) fn replying(text: &str) -> Self {
            Self {
                configured: true,
                reply: Ok(text.to_string()),
                delay: Duration::ZERO,
                probe: Arc::new(AdvisorProbe::default()),
            }
        }

        pub(crate) fn failing(err: AdvisorError) -> Self {
            Self {
                reply: Err(err),
                ..Self::replying("")
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl PolicyAdvisor for FakeAdvisor {
        fn is_configured(&self) -> bool {
            self.configured
        }

        fn advise(
            &self,
            request: AdvisorRequest,
        ) -> impl Future<Output = Result<String, AdvisorError>> + Send {
            let probe = self.probe.clone();
            let reply = self.reply.clone();
            let delay = self.delay;
            async move {
                probe.calls.fetch_add(1, Ordering::SeqCst);
                probe.started_at.lock().unwrap().push(tokio::time::Instant::now());
                probe.requests.lock().unwrap().push(request);
                let now = probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                probe.in_flight.fetch_sub(1, Ordering::SeqCst);
                reply
            }
        }
    }

    pub(crate) struct Harness<A: PolicyAdvisor> {
        pub(crate) reflection: ReflectionScheduler<A>,
        pub(crate) policies: PolicyStore,
        pub(crate) metrics: MetricsRecorder,
        pub(crate) store: SharedStore,
        pub(crate) clock: Arc<ManualClock>,
    }

    pub(crate) fn harness<A: PolicyAdvisor>(advisor: A, config: ReflectionConfig) -> Harness<A> {
        let store = shared_store(WayfarerStore::new_in_memory());
        let bus = MessageBus::new();
        let clock = Arc::new(ManualClock::new(UnixTimeMs(10_000_000)));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let policies = PolicyStore::new(store.clone(), bus.clone(), dyn_clock.clone());
        let metrics = MetricsRecorder::new(store.clone(), bus, dyn_clock);
        let reflection = ReflectionScheduler::new(
            policies.clone(),
            metrics.clone(),
            advisor,
            Arc::new(AgentLocks::new()),
            config,
        );
        Harness {
            reflection,
            policies,
            metrics,
            store,
            clock,
        }
    }

    fn bot(id: &str) -> AgentId {
        AgentId::new(id).unwrap()
    }

    #[tokio::test]
    async fn at_reflect_01_disabled_advisor_short_circuits() {
        let mut advisor = FakeAdvisor::replying("{\"chat\": {\"style\": \"chatty\"}}");
        advisor.configured = false;
        let probe = advisor.probe.clone();
        let h = harness(advisor, ReflectionConfig::mvp_v1());

        let out = h.reflection.reflect_and_patch(&bot("bot_a")).await.unwrap();
        assert_eq!(out, ReflectOutcome::Rejected(ReflectFailure::AdvisorDisabled));
        assert_eq!(out.to_wire_value(), json!({"ok": false, "error": "advisor_disabled"}));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert!(h.store.lock().unwrap().policy_rows().is_empty());
    }

    #[tokio::test]
    async fn at_reflect_02_allow_listed_patch_is_clamped_and_stored() {
        let advisor = FakeAdvisor::replying(
            "Here you go:\n```json\n{\"skillWeights\": {\"gather\": 5}, \"version\": 99, \
             \"shell\": \"rm -rf /\", \"chat\": {\"smalltalkRate\": -1}}\n```",
        );
        let h = harness(advisor, ReflectionConfig::mvp_v1());
        let agent = bot("bot_a");

        let out = h.reflection.reflect_and_patch(&agent).await.unwrap();
        let ReflectOutcome::Patched {
            updated,
            patch,
            dropped_keys,
        } = &out
        else {
            panic!("expected a patch, got {out:?}");
        };
        assert_eq!(updated.version, 2);
        assert_eq!(updated.document.skill_weights["gather"], 2.0);
        assert_eq!(updated.document.chat.smalltalk_rate, 0.0);
        assert!(patch.as_map().get("version").is_none());
        assert!(patch.as_map().get("shell").is_none());
        assert_eq!(dropped_keys.len(), 2);

        let wire = out.to_wire_value();
        assert_eq!(wire["ok"], json!(true));
        assert_eq!(wire["updated"]["version"], json!(2));
        assert!(wire["patch"].get("shell").is_none());
        assert_eq!(h.policies.get_current_policy(&agent).unwrap().version, 2);
    }

    #[tokio::test]
    async fn at_reflect_03_unparseable_reply_changes_nothing() {
        let h = harness(
            FakeAdvisor::replying("I think the agent is doing fine."),
            ReflectionConfig::mvp_v1(),
        );
        let agent = bot("bot_a");
        let before = h.policies.get_current_policy(&agent).unwrap();

        let out = h.reflection.reflect_and_patch(&agent).await.unwrap();
        assert_eq!(out.failure(), Some(ReflectFailure::InvalidResponse));
        assert_eq!(h.policies.get_current_policy(&agent).unwrap(), before);
    }

    #[tokio::test]
    async fn at_reflect_04_schema_breaking_patch_is_rejected() {
        let h = harness(
            FakeAdvisor::replying("{\"chat\": {\"style\": 7}}"),
            ReflectionConfig::mvp_v1(),
        );
        let agent = bot("bot_a");
        let out = h.reflection.reflect_and_patch(&agent).await.unwrap();
        assert_eq!(out.failure(), Some(ReflectFailure::InvalidPatch));
        assert_eq!(h.policies.history(&agent).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn at_reflect_05_slow_advisor_times_out_without_mutation() {
        let advisor = FakeAdvisor::replying("{\"chat\": {\"style\": \"chatty\"}}")
            .with_delay(Duration::from_secs(30));
        let config = ReflectionConfig {
            advisor_timeout: Duration::from_secs(5),
            ..ReflectionConfig::mvp_v1()
        };
        let h = harness(advisor, config);
        let agent = bot("bot_a");

        let out = h.reflection.reflect_and_patch(&agent).await.unwrap();
        assert_eq!(out.failure(), Some(ReflectFailure::AdvisorTimeout));
        let current = h.policies.get_current_policy(&agent).unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.document.chat.style, "brief");
    }

    #[tokio::test]
    async fn at_reflect_06_transport_failures_map_to_stable_codes() {
        let h = harness(
            FakeAdvisor::failing(AdvisorError::new(ADVISOR_PROVIDER, "http_non_200", Some(503))),
            ReflectionConfig::mvp_v1(),
        );
        let out = h.reflection.reflect_and_patch(&bot("bot_a")).await.unwrap();
        assert_eq!(out.failure(), Some(ReflectFailure::AdvisorError));

        let h = harness(
            FakeAdvisor::failing(AdvisorError::new(ADVISOR_PROVIDER, "timeout", None)),
            ReflectionConfig::mvp_v1(),
        );
        let out = h.reflection.reflect_and_patch(&bot("bot_a")).await.unwrap();
        assert_eq!(out.failure(), Some(ReflectFailure::AdvisorTimeout));
    }

    #[tokio::test]
    async fn at_reflect_07_request_carries_windowed_perf_snapshot() {
        let advisor = FakeAdvisor::replying("{}");
        let probe = advisor.probe.clone();
        let h = harness(advisor, ReflectionConfig::mvp_v1());
        let agent = bot("bot_a");

        h.metrics
            .record(&agent, METRIC_KIND_MOVEMENT_REWARD, -1.0, json!({}))
            .unwrap();
        h.clock.advance_ms(PERF_WINDOW_MS + 1);
        h.metrics
            .record(&agent, METRIC_KIND_MOVEMENT_REWARD, 0.5, json!({}))
            .unwrap();
        h.metrics
            .record(&agent, METRIC_KIND_MOVEMENT_REWARD, 0.3, json!({}))
            .unwrap();

        let out = h.reflection.reflect_and_patch(&agent).await.unwrap();
        assert!(out.is_ok());
        let requests = probe.requests.lock().unwrap();
        let stat = requests[0].perf_snapshot.get(METRIC_KIND_MOVEMENT_REWARD).unwrap();
        assert_eq!(stat.count, 2);
        assert!((stat.mean - 0.4).abs() < 1e-9);
        assert_eq!(requests[0].current_policy.version, 1);
        assert!(requests[0].recent_summary.contains("bot_a"));
    }

    #[tokio::test(start_paused = true)]
    async fn at_reflect_08_same_agent_reflections_never_overlap() {
        let advisor =
            FakeAdvisor::replying("{\"risk\": {\"avoidLava\": true}}").with_delay(Duration::from_secs(10));
        let probe = advisor.probe.clone();
        let h = harness(advisor, ReflectionConfig::mvp_v1());
        let agent = bot("bot_a");

        let (a, b) = tokio::join!(
            h.reflection.reflect_and_patch(&agent),
            h.reflection.reflect_and_patch(&agent)
        );
        assert!(a.unwrap().is_ok());
        assert!(b.unwrap().is_ok());
        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(h.policies.get_current_policy(&agent).unwrap().version, 3);

        let other = bot("bot_b");
        let (a, b) = tokio::join!(
            h.reflection.reflect_and_patch(&agent),
            h.reflection.reflect_and_patch(&other)
        );
        assert!(a.unwrap().is_ok() && b.unwrap().is_ok());
        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 2);
    }
}
