//! Concrete responders
//!
//! The orchestration core treats responders as opaque. These are the
//! implementations the binaries wire in: LLM-backed education responders,
//! HTTP-backed calls to the financial API service, and an offline canned
//! responder for demos and tests.

use crate::config::OrchestratorConfig;
use crate::error::OrchestrationError;
use crate::gemini::GeminiClient;
use crate::models::{Citation, ResponderAnswer, ResponderId};
use crate::registry::{remaining, Responder, ResponderRegistry, ResponderRequest};
use crate::Result;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[cfg(test)]
pub(crate) mod stubs;

#[derive(Clone)]
pub struct FinancialApiClient {
    client: Client,
    base_url: String,
}

impl FinancialApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json(&self, path: &str, body: &Value, timeout: Duration) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                OrchestrationError::ResponderError(format!(
                    "Financial API request failed for {}: {}",
                    path, e
                ))
            })?;

        let status = response.status();
        let body = response.json::<Value>().await.map_err(|e| {
            OrchestrationError::ResponderError(format!("Invalid JSON response: {}", e))
        })?;

        if !status.is_success() {
            return Err(OrchestrationError::ResponderError(format!(
                "Financial API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

/// Shape the financial API answers with
#[derive(Debug, Deserialize)]
struct ApiAnswer {
    answer: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    citations: Vec<Citation>,
    confidence: Option<f32>,
    data: Option<Value>,
}

/// Portfolio, market and goal responders backed by the financial API
pub struct FinancialApiResponder {
    api: Option<FinancialApiClient>,
    path: &'static str,
    description: &'static str,
}

impl FinancialApiResponder {
    pub fn new(id: ResponderId, api: Option<FinancialApiClient>) -> Self {
        let (path, description) = match id {
            ResponderId::PortfolioAnalysis => (
                "/api/v1/portfolio/analyze",
                "Analyze holdings, allocation and concentration",
            ),
            ResponderId::MarketAnalysis => (
                "/api/v1/market/quotes",
                "Quote lookup and historical market data",
            ),
            ResponderId::GoalPlanning => (
                "/api/v1/goals/project",
                "Savings goal projection",
            ),
            _ => ("/api/v1/answer", "Generic financial API responder"),
        };
        Self {
            api,
            path,
            description,
        }
    }
}

#[async_trait::async_trait]
impl Responder for FinancialApiResponder {
    fn description(&self) -> &'static str {
        self.description
    }

    async fn execute(&self, request: &ResponderRequest, deadline: Instant) -> Result<ResponderAnswer> {
        let api = self.api.as_ref().ok_or_else(|| {
            OrchestrationError::ResponderError(
                "FINANCIAL_API_BASE_URL (or TOOLS_API_BASE_URL) is not configured".to_string(),
            )
        })?;

        let body = serde_json::to_value(request)?;
        let response = api.post_json(self.path, &body, remaining(deadline)).await?;
        let parsed: ApiAnswer = serde_json::from_value(response)?;

        let text = parsed.answer.or(parsed.summary).ok_or_else(|| {
            OrchestrationError::ResponderError(format!(
                "{} returned neither 'answer' nor 'summary'",
                self.path
            ))
        })?;

        let mut answer = ResponderAnswer::text(text).with_citations(parsed.citations);
        answer.confidence = parsed.confidence;
        answer.structured_data = parsed.data;
        Ok(answer)
    }
}

/// Education, tax and news responders backed by Gemini
pub struct GeminiResponder {
    client: GeminiClient,
    description: &'static str,
    system_prefix: &'static str,
    category: &'static str,
}

impl GeminiResponder {
    pub fn new(id: ResponderId, client: GeminiClient) -> Self {
        let (description, system_prefix, category) = match id {
            ResponderId::TaxEducation => (
                "Tax education",
                "Explain the relevant tax concepts in general, educational terms.",
                "tax",
            ),
            ResponderId::NewsSynthesizer => (
                "Financial news synthesis",
                "Summarize major market news and sentiment relevant to the question.",
                "news",
            ),
            _ => (
                "Financial education Q&A",
                "Answer the financial education question clearly, with examples.",
                "education",
            ),
        };
        Self {
            client,
            description,
            system_prefix,
            category,
        }
    }

    fn build_prompt(&self, request: &ResponderRequest) -> String {
        let mut prompt = String::new();
        for turn in &request.history {
            prompt.push_str(&format!("{:?}: {}\n", turn.role, turn.content));
        }
        prompt.push_str(&format!("User question: {}", request.message));

        let entities = &request.entities;
        if !entities.tickers.is_empty() {
            prompt.push_str(&format!("\n[Context: Tickers: {}]", entities.tickers.join(", ")));
        }
        if !entities.amounts.is_empty() {
            prompt.push_str(&format!("\n[Context: Amounts: {:?}]", entities.amounts));
        }
        if let Some(timeframe) = &entities.timeframe {
            prompt.push_str(&format!("\n[Context: Timeframe: {}]", timeframe));
        }
        if let Some(level) = request.profile.as_ref().and_then(|p| p.experience_level) {
            prompt.push_str(&format!("\n[Context: Experience level: {}]", level));
        }
        prompt
    }
}

#[async_trait::async_trait]
impl Responder for GeminiResponder {
    fn description(&self) -> &'static str {
        self.description
    }

    async fn execute(&self, request: &ResponderRequest, deadline: Instant) -> Result<ResponderAnswer> {
        if request.message.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "empty question".to_string(),
            ));
        }

        let prompt = self.build_prompt(request);
        let (answer, confidence) = self
            .client
            .generate(&prompt, Some(self.system_prefix), Some(remaining(deadline)))
            .await?;

        Ok(ResponderAnswer::text(answer)
            .with_confidence(confidence)
            .with_data(serde_json::json!({ "category": self.category })))
    }
}

/// Offline responder returning a fixed answer
pub struct CannedResponder {
    answer: String,
    citations: Vec<Citation>,
    confidence: Option<f32>,
}

impl CannedResponder {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            citations: Vec::new(),
            confidence: None,
        }
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

#[async_trait::async_trait]
impl Responder for CannedResponder {
    fn description(&self) -> &'static str {
        "Offline canned answer"
    }

    async fn execute(&self, _request: &ResponderRequest, _deadline: Instant) -> Result<ResponderAnswer> {
        let mut answer = ResponderAnswer::text(self.answer.clone()).with_citations(self.citations.clone());
        answer.confidence = self.confidence;
        Ok(answer)
    }
}

/// Registry with the networked responders. Unconfigured services fail per
/// call, which the dispatcher records as responder errors.
pub fn create_default_registry(config: &OrchestratorConfig) -> Result<ResponderRegistry> {
    let mut registry = ResponderRegistry::new(config);

    let financial_api = config
        .financial_api_base_url
        .as_deref()
        .map(FinancialApiClient::new)
        .transpose()?;
    let gemini = GeminiClient::new(config.gemini_api_key.clone().unwrap_or_default());

    for id in [
        ResponderId::PortfolioAnalysis,
        ResponderId::MarketAnalysis,
        ResponderId::GoalPlanning,
    ] {
        registry.register(id, Arc::new(FinancialApiResponder::new(id, financial_api.clone())));
    }

    for id in [
        ResponderId::FinanceQa,
        ResponderId::TaxEducation,
        ResponderId::NewsSynthesizer,
    ] {
        registry.register(id, Arc::new(GeminiResponder::new(id, gemini.clone())));
    }

    Ok(registry)
}

/// Registry of canned responders for running without external services
pub fn create_offline_registry(config: &OrchestratorConfig) -> ResponderRegistry {
    let mut registry = ResponderRegistry::new(config);

    let canned = [
        (
            ResponderId::PortfolioAnalysis,
            "Your holdings look concentrated; spreading across asset classes lowers single-position risk.",
            Citation::new("Diversification basics", "https://www.investor.gov/diversification", "portfolio"),
        ),
        (
            ResponderId::GoalPlanning,
            "At a 6% average annual return, regular monthly contributions compound toward your target.",
            Citation::new("Compound interest calculator", "https://www.investor.gov/compound-interest", "planning"),
        ),
        (
            ResponderId::MarketAnalysis,
            "Market data is unavailable offline; quotes would appear here.",
            Citation::new("Understanding stock quotes", "https://www.investor.gov/quotes", "market"),
        ),
        (
            ResponderId::NewsSynthesizer,
            "No live news feed is connected in offline mode.",
            Citation::new("Reading financial news", "https://www.investor.gov/news", "news"),
        ),
        (
            ResponderId::TaxEducation,
            "Long-term capital gains are generally taxed at lower rates than short-term gains.",
            Citation::new("Capital gains tax", "https://www.irs.gov/taxtopics/tc409", "tax"),
        ),
        (
            ResponderId::FinanceQa,
            "A diversified, low-cost index fund is a common starting point for new investors.",
            Citation::new("Index funds", "https://www.investor.gov/index-funds", "education"),
        ),
    ];

    for (id, answer, citation) in canned {
        registry.register(
            id,
            Arc::new(CannedResponder::new(answer).with_citations(vec![citation])),
        );
    }

    registry
}
