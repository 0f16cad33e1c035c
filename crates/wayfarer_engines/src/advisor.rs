#![forbid(unsafe_code)]

use std::time::Duration;

use serde_json::{json, Map, Value};
use url::Url;
use wayfarer_kernel_contracts::advisor::{AdvisorRequest, PerfSnapshot};
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::policy::PolicyDocument;

pub const ADVISOR_PROVIDER: &str = "advisor_http";
pub const ADVISOR_DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const ADVISOR_DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const ADVISOR_DEFAULT_TIMEOUT_MS: u32 = 20_000;
pub const ADVISOR_MIN_TIMEOUT_MS: u32 = 100;
pub const ADVISOR_MAX_TIMEOUT_MS: u32 = 120_000;

pub const ADVISOR_SYSTEM_INSTRUCTION: &str = "You tune the behavior policy of an autonomous \
Minecraft agent. Reply with exactly one JSON object containing only the keys you want to change. \
Allowed top-level keys: movement, skillWeights, chat, risk. movement.preferredArm must name one of \
the agent's movement strategies. skillWeights values are multipliers in [0, 2]. \
chat.smalltalkRate is in [0, 0.2]. risk values are booleans. Any other key is ignored.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisorConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u32,
    pub user_agent: String,
}

impl AdvisorConfig {
    /// Disabled until an operator opts in and supplies a key.
    pub fn mvp_v1() -> Self {
        Self {
            enabled: false,
            endpoint: ADVISOR_DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: ADVISOR_DEFAULT_MODEL.to_string(),
            timeout_ms: ADVISOR_DEFAULT_TIMEOUT_MS,
            user_agent: "wayfarer-advisor/0.1".to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.enabled
            && self
                .api_key
                .as_deref()
                .map(|key| !key.trim().is_empty())
                .unwrap_or(false)
    }

    pub fn validate(&self) -> Result<(), String> {
        let url = Url::parse(&self.endpoint)
            .map_err(|err| format!("advisor endpoint '{}' is not a URL: {err}", self.endpoint))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "advisor endpoint scheme must be http or https, got '{}'",
                url.scheme()
            ));
        }
        if self.model.trim().is_empty() {
            return Err("advisor model must not be empty".to_string());
        }
        if !(ADVISOR_MIN_TIMEOUT_MS..=ADVISOR_MAX_TIMEOUT_MS).contains(&self.timeout_ms) {
            return Err(format!(
                "advisor timeout_ms must be within {ADVISOR_MIN_TIMEOUT_MS}..={ADVISOR_MAX_TIMEOUT_MS}"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("provider={provider} error={error_kind}{}", .http_status.map(|s| format!(" status={s}")).unwrap_or_default())]
pub struct AdvisorError {
    pub provider: &'static str,
    pub error_kind: &'static str,
    pub http_status: Option<u16>,
}

impl AdvisorError {
    pub fn new(provider: &'static str, error_kind: &'static str, http_status: Option<u16>) -> Self {
        Self {
            provider,
            error_kind,
            http_status,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind == "timeout"
    }
}

pub fn build_advisor_request(
    agent_id: &AgentId,
    recent_summary: String,
    current_policy: &PolicyDocument,
    perf_snapshot: PerfSnapshot,
) -> AdvisorRequest {
    AdvisorRequest {
        system_instruction: ADVISOR_SYSTEM_INSTRUCTION.to_string(),
        agent_id: agent_id.clone(),
        recent_summary,
        current_policy: current_policy.clone(),
        perf_snapshot,
    }
}

/// Blocking client for an OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct HttpAdvisor {
    config: AdvisorConfig,
    agent: ureq::Agent,
}

impl HttpAdvisor {
    pub fn new(config: AdvisorConfig) -> Result<Self, String> {
        config.validate()?;
        let timeout = Duration::from_millis(u64::from(config.timeout_ms));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&config.user_agent)
            .build();
        Ok(Self { config, agent })
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Returns the advisor's raw reply text. The caller treats it as untrusted.
    pub fn complete(&self, request: &AdvisorRequest) -> Result<String, AdvisorError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AdvisorError::new(ADVISOR_PROVIDER, "config_invalid", None))?;
        let payload = completion_payload(&self.config.model, request)?;
        let response = self
            .agent
            .post(&self.config.endpoint)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {api_key}"))
            .set("Accept", "application/json")
            .send_json(payload)
            .map_err(advisor_error_from_ureq)?;
        let body: Value = serde_json::from_reader(response.into_reader())
            .map_err(|_| AdvisorError::new(ADVISOR_PROVIDER, "json_parse", None))?;
        extract_completion_text(&body)
            .ok_or_else(|| AdvisorError::new(ADVISOR_PROVIDER, "empty_results", None))
    }
}

fn completion_payload(model: &str, request: &AdvisorRequest) -> Result<Value, AdvisorError> {
    let user_body = json!({
        "agentId": request.agent_id,
        "recentSummary": request.recent_summary,
        "currentPolicy": request.current_policy,
        "perfSnapshot": request.perf_snapshot,
    });
    let user_content = serde_json::to_string(&user_body)
        .map_err(|_| AdvisorError::new(ADVISOR_PROVIDER, "json_encode", None))?;
    Ok(json!({
        "model": model,
        "temperature": 0.2,
        "messages": [
            {"role": "system", "content": request.system_instruction},
            {"role": "user", "content": user_content},
        ],
    }))
}

pub fn extract_completion_text(body: &Value) -> Option<String> {
    body.get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
        .filter(|text| !text.trim().is_empty())
}

/// Finds the first JSON object embedded in free-form text (prose, code fences, trailing notes).
pub fn extract_structured_object(text: &str) -> Option<Map<String, Value>> {
    for (idx, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next() {
            return Some(map);
        }
    }
    None
}

fn advisor_error_from_ureq(err: ureq::Error) -> AdvisorError {
    match err {
        ureq::Error::Status(status, _) => {
            AdvisorError::new(ADVISOR_PROVIDER, "http_non_200", Some(status))
        }
        ureq::Error::Transport(transport) => {
            let combined = format!("{:?} {}", transport.kind(), transport);
            AdvisorError::new(ADVISOR_PROVIDER, classify_transport_error_kind(&combined), None)
        }
    }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}
