//! Process-wide orchestrator configuration
//!
//! Read once at startup from the environment (the binaries load `.env`
//! through `dotenv` first). Every field has a working default.

use crate::error::OrchestrationError;
use crate::models::ResponderId;
use crate::Result;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RESPONDER_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_MAX_CITATIONS: usize = 5;
pub const DEFAULT_CONFIDENCE: f32 = 0.8;
pub const DEFAULT_MIN_INTENT_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_MAX_HISTORY_TURNS: usize = 20;
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;
pub const FALLBACK_CONFIDENCE_CEILING: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub default_responder_timeout: Duration,
    pub responder_timeouts: HashMap<ResponderId, Duration>,
    /// Optional bound on a whole request, on top of per-responder timeouts
    pub request_deadline: Option<Duration>,
    pub max_citations: usize,
    pub default_confidence: f32,
    pub min_intent_confidence: f32,
    pub max_history_turns: usize,
    /// Audit records kept in memory before the oldest are evicted
    pub audit_capacity: usize,
    pub gemini_api_key: Option<String>,
    pub financial_api_base_url: Option<String>,
    pub api_port: u16,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_responder_timeout: DEFAULT_RESPONDER_TIMEOUT,
            responder_timeouts: HashMap::new(),
            request_deadline: None,
            max_citations: DEFAULT_MAX_CITATIONS,
            default_confidence: DEFAULT_CONFIDENCE,
            min_intent_confidence: DEFAULT_MIN_INTENT_CONFIDENCE,
            max_history_turns: DEFAULT_MAX_HISTORY_TURNS,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            gemini_api_key: None,
            financial_api_base_url: None,
            api_port: 8080,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64>("RESPONDER_TIMEOUT_SECS")? {
            config.default_responder_timeout = Duration::from_secs(secs);
        }

        for id in ResponderId::ALL {
            let key = format!("RESPONDER_TIMEOUT_{}_SECS", id.as_str().to_uppercase());
            if let Some(secs) = parse_var::<u64>(&key)? {
                config.responder_timeouts.insert(id, Duration::from_secs(secs));
            }
        }

        config.request_deadline = parse_var::<u64>("REQUEST_DEADLINE_SECS")?.map(Duration::from_secs);

        if let Some(max) = parse_var::<usize>("MAX_CITATIONS")? {
            config.max_citations = max;
        }
        if let Some(confidence) = parse_var::<f32>("DEFAULT_CONFIDENCE")? {
            config.default_confidence = confidence.clamp(0.0, 1.0);
        }
        if let Some(confidence) = parse_var::<f32>("MIN_INTENT_CONFIDENCE")? {
            config.min_intent_confidence = confidence.clamp(0.0, 1.0);
        }
        if let Some(turns) = parse_var::<usize>("MAX_HISTORY_TURNS")? {
            config.max_history_turns = turns;
        }
        if let Some(capacity) = parse_var::<usize>("AUDIT_CAPACITY")? {
            if capacity == 0 {
                return Err(OrchestrationError::ConfigError(
                    "AUDIT_CAPACITY must be at least 1".to_string(),
                ));
            }
            config.audit_capacity = capacity;
        }

        config.gemini_api_key = non_empty_var("GEMINI_API_KEY");
        config.financial_api_base_url = non_empty_var("FINANCIAL_API_BASE_URL")
            .or_else(|| non_empty_var("TOOLS_API_BASE_URL"))
            .map(|url| url.trim_end_matches('/').to_string());

        if let Some(port) = parse_var::<u16>("PORT")?.or(parse_var::<u16>("API_PORT")?) {
            config.api_port = port;
        }

        Ok(config)
    }

    /// Declared timeout for one responder
    pub fn timeout_for(&self, id: ResponderId) -> Duration {
        self.responder_timeouts
            .get(&id)
            .copied()
            .unwrap_or(self.default_responder_timeout)
    }

    pub fn with_responder_timeout(mut self, id: ResponderId, timeout: Duration) -> Self {
        self.responder_timeouts.insert(id, timeout);
        self
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>> {
    match non_empty_var(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            OrchestrationError::ConfigError(format!("{} has an invalid value: {}", key, raw))
        }),
    }
}
