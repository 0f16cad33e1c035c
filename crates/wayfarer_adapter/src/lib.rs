#![forbid(unsafe_code)]

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wayfarer_engines::advisor::{
    AdvisorConfig, HttpAdvisor, ADVISOR_MAX_TIMEOUT_MS, ADVISOR_MIN_TIMEOUT_MS,
};
use wayfarer_engines::bandit::{Ucb1Config, UCB1_EXPLORATION_C_ENV};
use wayfarer_engines::perf::PERF_WINDOW_MS;
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::arm::ArmCatalog;
use wayfarer_os::agent_locks::AgentLocks;
use wayfarer_os::arm_registry::ArmRegistry;
use wayfarer_os::bandit::BanditSelector;
use wayfarer_os::bus::MessageBus;
use wayfarer_os::clock::Clock;
use wayfarer_os::metrics::MetricsRecorder;
use wayfarer_os::policy_store::PolicyStore;
use wayfarer_os::reflection::{ReflectionConfig, ReflectionScheduler};
use wayfarer_os::scheduler::{
    AgentScheduler, AgentSchedulerConfig, SCHEDULER_DEFAULT_INTERVAL, SCHEDULER_MAX_INTERVAL,
    SCHEDULER_MAX_PARALLEL, SCHEDULER_MIN_INTERVAL,
};
use wayfarer_os::shared_store::{shared_store, SharedStore};
use wayfarer_storage::journal::default_store_journal_path;
use wayfarer_storage::store::WayfarerStore;

pub const ENV_STORE_PATH: &str = "WAYFARER_STORE_PATH";
pub const ENV_ARM_CATALOG_PATH: &str = "WAYFARER_ARM_CATALOG_PATH";
pub const ENV_ROSTER: &str = "WAYFARER_ROSTER";
pub const ENV_REFLECT_INTERVAL_SECS: &str = "WAYFARER_REFLECT_INTERVAL_SECS";
pub const ENV_REFLECT_MAX_PARALLEL: &str = "WAYFARER_REFLECT_MAX_PARALLEL";
pub const ENV_UCB_C: &str = UCB1_EXPLORATION_C_ENV;
pub const ENV_ADVISOR_ENABLED: &str = "WAYFARER_ADVISOR_ENABLED";
pub const ENV_ADVISOR_ENDPOINT: &str = "WAYFARER_ADVISOR_ENDPOINT";
pub const ENV_ADVISOR_API_KEY: &str = "WAYFARER_ADVISOR_API_KEY";
pub const ENV_ADVISOR_MODEL: &str = "WAYFARER_ADVISOR_MODEL";
pub const ENV_ADVISOR_TIMEOUT_MS: &str = "WAYFARER_ADVISOR_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq)]
pub struct WayfarerRuntimeConfig {
    pub store_path: PathBuf,
    pub arm_catalog_path: Option<PathBuf>,
    pub roster: Vec<AgentId>,
    pub reflect_interval: Duration,
    pub max_parallel_reflections: usize,
    pub ucb1: Ucb1Config,
    pub advisor: AdvisorConfig,
}

impl WayfarerRuntimeConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    /// Absent keys take defaults; present but invalid keys are errors naming the key.
    pub fn from_env_var_map<F>(mut env_getter: F) -> Result<Self, String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut get = |key: &str| {
            env_getter(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let store_path = get(ENV_STORE_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(default_store_journal_path);
        let arm_catalog_path = get(ENV_ARM_CATALOG_PATH).map(PathBuf::from);
        let roster = match get(ENV_ROSTER) {
            Some(raw) => parse_roster(&raw)?,
            None => Vec::new(),
        };

        let reflect_interval = match get(ENV_REFLECT_INTERVAL_SECS) {
            Some(raw) => Duration::from_secs(parse_u64_in_range(
                ENV_REFLECT_INTERVAL_SECS,
                &raw,
                SCHEDULER_MIN_INTERVAL.as_secs(),
                SCHEDULER_MAX_INTERVAL.as_secs(),
            )?),
            None => SCHEDULER_DEFAULT_INTERVAL,
        };
        let max_parallel_reflections = match get(ENV_REFLECT_MAX_PARALLEL) {
            Some(raw) => parse_u64_in_range(
                ENV_REFLECT_MAX_PARALLEL,
                &raw,
                1,
                SCHEDULER_MAX_PARALLEL as u64,
            )? as usize,
            None => 1,
        };

        let ucb1 = match get(ENV_UCB_C) {
            Some(raw) => Ucb1Config::with_exploration_c_str(&raw)?,
            None => Ucb1Config::mvp_v1(),
        };

        let mut advisor = AdvisorConfig::mvp_v1();
        if let Some(raw) = get(ENV_ADVISOR_ENABLED) {
            advisor.enabled = parse_bool(ENV_ADVISOR_ENABLED, &raw)?;
        }
        if let Some(endpoint) = get(ENV_ADVISOR_ENDPOINT) {
            advisor.endpoint = endpoint;
        }
        advisor.api_key = get(ENV_ADVISOR_API_KEY);
        if let Some(model) = get(ENV_ADVISOR_MODEL) {
            advisor.model = model;
        }
        if let Some(raw) = get(ENV_ADVISOR_TIMEOUT_MS) {
            advisor.timeout_ms = parse_u64_in_range(
                ENV_ADVISOR_TIMEOUT_MS,
                &raw,
                u64::from(ADVISOR_MIN_TIMEOUT_MS),
                u64::from(ADVISOR_MAX_TIMEOUT_MS),
            )? as u32;
        }
        advisor.validate()?;

        Ok(Self {
            store_path,
            arm_catalog_path,
            roster,
            reflect_interval,
            max_parallel_reflections,
            ucb1,
            advisor,
        })
    }

    pub fn reflection_config(&self) -> ReflectionConfig {
        ReflectionConfig {
            perf_window_ms: PERF_WINDOW_MS,
            advisor_timeout: Duration::from_millis(u64::from(self.advisor.timeout_ms)),
        }
    }

    pub fn scheduler_config(&self) -> AgentSchedulerConfig {
        AgentSchedulerConfig {
            roster: self.roster.clone(),
            interval: self.reflect_interval,
            max_parallel_reflections: self.max_parallel_reflections,
        }
    }
}

fn parse_roster(raw: &str) -> Result<Vec<AgentId>, String> {
    let mut roster = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        let agent = AgentId::new(id)
            .map_err(|err| format!("{ENV_ROSTER} has invalid agent id '{id}': {err}"))?;
        if roster.contains(&agent) {
            return Err(format!("{ENV_ROSTER} repeats agent id '{id}'"));
        }
        roster.push(agent);
    }
    Ok(roster)
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(format!("{key} must be true|false")),
    }
}

fn parse_u64_in_range(key: &'static str, value: &str, min: u64, max: u64) -> Result<u64, String> {
    let parsed = value
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("{key} must be an unsigned integer"))?;
    if !(min..=max).contains(&parsed) {
        return Err(format!("{key} must be within {min}..={max}, got {parsed}"));
    }
    Ok(parsed)
}

pub fn load_arm_catalog(path: Option<&PathBuf>) -> Result<ArmCatalog, String> {
    let Some(path) = path else {
        return Ok(ArmCatalog::default_v1());
    };
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed to read arm catalog '{}': {err}", path.display()))?;
    ArmCatalog::from_json_str(&raw)
        .map_err(|err| format!("arm catalog '{}' is invalid: {err}", path.display()))
}

/// `RUST_LOG` wins; otherwise `info`. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Every long-lived component, wired over one journaled store.
pub struct WayfarerRuntime {
    store: SharedStore,
    bus: MessageBus,
    registry: ArmRegistry,
    bandit: BanditSelector,
    metrics: MetricsRecorder,
    policies: PolicyStore,
    scheduler: Arc<AgentScheduler<HttpAdvisor>>,
}

impl WayfarerRuntime {
    pub fn bootstrap(config: &WayfarerRuntimeConfig, clock: Arc<dyn Clock>) -> Result<Self, String> {
        let store = WayfarerStore::open_with_journal(config.store_path.clone())
            .map_err(|err| format!("failed to open store: {err}"))?;
        let store = shared_store(store);
        let catalog = load_arm_catalog(config.arm_catalog_path.as_ref())?;
        let registry = ArmRegistry::seed(store.clone(), &catalog)
            .map_err(|err| format!("failed to seed arm catalog: {err}"))?;

        let bus = MessageBus::new();
        let bandit = BanditSelector::new(store.clone(), config.ucb1, clock.clone());
        let metrics = MetricsRecorder::new(store.clone(), bus.clone(), clock.clone());
        let policies = PolicyStore::new(store.clone(), bus.clone(), clock);

        let advisor = HttpAdvisor::new(config.advisor.clone())?;
        if config.advisor.enabled && !config.advisor.is_configured() {
            tracing::warn!("advisor enabled without an API key; reflections will be skipped");
        }
        let reflection = ReflectionScheduler::new(
            policies.clone(),
            metrics.clone(),
            advisor,
            Arc::new(AgentLocks::new()),
            config.reflection_config(),
        );
        let scheduler = AgentScheduler::new(Arc::new(reflection), config.scheduler_config())
            .map_err(|err| format!("invalid scheduler config: {err}"))?;

        tracing::info!(
            store = %config.store_path.display(),
            roster = config.roster.len(),
            interval_secs = config.reflect_interval.as_secs(),
            advisor = config.advisor.is_configured(),
            "wayfarer runtime ready"
        );
        Ok(Self {
            store,
            bus,
            registry,
            bandit,
            metrics,
            policies,
            scheduler: Arc::new(scheduler),
        })
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn registry(&self) -> &ArmRegistry {
        &self.registry
    }

    pub fn bandit(&self) -> &BanditSelector {
        &self.bandit
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    pub fn scheduler(&self) -> &Arc<AgentScheduler<HttpAdvisor>> {
        &self.scheduler
    }
}
