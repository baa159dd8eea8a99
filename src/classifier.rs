//! Intent Classifier
//!
//! Maps a user message to one or more intents plus best-effort entities
//! (tickers, amounts, timeframe). Keyword scoring is the default mechanism;
//! an [`IntentModel`] can replace it. Classification never fails: anything
//! that goes wrong degrades to [`Intent::FALLBACK`] with confidence 0.

use crate::config::{OrchestratorConfig, DEFAULT_MIN_INTENT_CONFIDENCE};
use crate::dispatch::RequestContext;
use crate::error::OrchestrationError;
use crate::fault::panic_message;
use crate::gemini::GeminiClient;
use crate::models::{ChatTurn, Classification, ExtractedEntities, Intent, UserProfile};
use crate::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until};
use tracing::{debug, info, warn};

const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Static keyword tables, matched at a word start against the lower-cased message
const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (
        Intent::EducationQuestion,
        &[
            "what is", "how does", "explain", "define", "understand",
            "tell me about", "describe", "difference between", "concept",
            "meaning of", "why is",
        ],
    ),
    (
        Intent::TaxQuestion,
        &[
            "tax", "capital gains", "ira", "401k", "roth", "deductible",
            "harvesting", "dividend tax", "tax strategy", "tax loss", "tax efficient",
        ],
    ),
    (
        Intent::PortfolioAnalysis,
        &[
            "analyze portfolio", "portfolio allocation", "diversification",
            "my holdings", "my portfolio", "concentration", "rebalance", "position",
            "allocation percentage", "analyze", "my stocks", "my shares",
        ],
    ),
    (
        Intent::MarketAnalysis,
        &[
            "price of", "quote", "stock price", "market data", "historical", "trend",
            "fundamentals", "compare", "current price", "trading at",
            "what is the price", "market analysis", "stock analysis", "ticker", "symbol",
        ],
    ),
    (
        Intent::NewsAnalysis,
        &[
            "news", "sentiment", "headlines", "market condition", "what's happening",
            "latest", "recent", "market movement", "events affecting", "market outlook",
        ],
    ),
    (
        Intent::GoalPlanning,
        &[
            "goal", "reach", "save", "monthly contribution", "timeline", "projection",
            "when will i", "how much do i need", "years to goal", "financial plan",
            "achieve", "target", "path to", "years until", "retire",
        ],
    ),
    (
        Intent::InvestmentPlan,
        &[
            "comprehensive", "full analysis", "complete picture", "what should i do",
            "recommendation", "overall strategy", "investment approach", "investment plan",
        ],
    ),
];

/// All-caps words that look like tickers but are not
const TICKER_STOP_WORDS: &[&str] = &[
    "THE", "AND", "FOR", "WITH", "FROM", "THAT", "THIS", "WHAT", "WHEN", "WHERE",
    "HOW", "WHY", "IS", "IT", "MY", "YOUR", "PORTFOLIO", "STOCK", "PRICE", "SHARE",
    "DIVIDEND", "ANNUAL", "ALSO", "SOME", "EACH", "MANY", "MORE", "HAVE", "WILL",
    "CAN", "ABOUT", "BEEN", "THAN", "JUST", "INTO", "OVER", "ONLY", "WHICH",
    "WOULD", "COULD", "SHOULD", "IN", "ON", "AT", "BY", "TO", "OF", "OR", "UP",
    "IRA", "ROTH", "ROI", "USD", "GDP", "CEO", "IPO", "FAQ", "APR", "APY", "EPS",
    "RSI", "OK", "US", "ME", "DO", "AM", "PM",
];

lazy_static! {
    static ref TICKER_BARE: Regex = Regex::new(r"\b[A-Z]{2,5}\b").unwrap();
    static ref TICKER_DOLLAR: Regex = Regex::new(r"\$([A-Za-z]{1,5})\b").unwrap();
    static ref AMOUNT_DOLLAR: Regex =
        Regex::new(r"\$\s?(\d[\d,]*(?:\.\d+)?)(?:\s?([kKmMbB])\b)?").unwrap();
    static ref AMOUNT_CONTEXT: Regex = Regex::new(
        r"(?i)\b(?:goal|save|saving|contribute|amount|total|have|worth|portfolio|target)(?:\s+(?:of|is|at|about|around))?[\s:]*\$?(\d[\d,]*(?:\.\d+)?)(?:\s?([kmb])\b)?"
    )
    .unwrap();
    static ref TIMEFRAME: Regex =
        Regex::new(r"(?i)\b\d+\s*-?\s*(?:years?|yrs?|months?|days?)\b").unwrap();
}

/// Pluggable classification mechanism, e.g. an external reasoning service
#[async_trait]
pub trait IntentModel: Send + Sync {
    async fn classify(
        &self,
        message: &str,
        history: &[ChatTurn],
        profile: Option<&UserProfile>,
    ) -> Result<ModelVerdict>;
}

#[derive(Debug, Clone)]
pub struct ModelVerdict {
    pub intents: Vec<Intent>,
    pub confidence: f32,
}

/// Intent classifier
pub struct IntentClassifier {
    model: Option<Arc<dyn IntentModel>>,
    model_timeout: Duration,
    min_confidence: f32,
}

impl IntentClassifier {
    /// Keyword-only classifier
    pub fn new() -> Self {
        Self {
            model: None,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            min_confidence: DEFAULT_MIN_INTENT_CONFIDENCE,
        }
    }

    /// Gemini-backed when an API key is configured, keyword scoring otherwise
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let classifier = Self::new().with_min_confidence(config.min_intent_confidence);
        match &config.gemini_api_key {
            Some(key) => classifier.with_model(Arc::new(GeminiIntentModel::new(GeminiClient::new(
                key.clone(),
            )))),
            None => classifier,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn IntentModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Classify a message. Always returns a non-empty intent set.
    pub async fn classify(
        &self,
        message: &str,
        history: &[ChatTurn],
        profile: Option<&UserProfile>,
    ) -> Classification {
        self.classify_within(message, history, profile, &RequestContext::default())
            .await
    }

    /// Like [`classify`](Self::classify), but the model call is abandoned as
    /// soon as `ctx` is cancelled or its deadline passes.
    pub async fn classify_within(
        &self,
        message: &str,
        history: &[ChatTurn],
        profile: Option<&UserProfile>,
        ctx: &RequestContext,
    ) -> Classification {
        let entities = extract_entities(message);

        let verdict = match &self.model {
            Some(model) => self.ask_model(model.as_ref(), message, history, profile, ctx).await,
            None => Some(score_keywords(message, &entities)),
        };

        let classification = match verdict {
            Some(v) if !v.intents.is_empty() && v.confidence >= self.min_confidence => {
                Classification {
                    intents: v.intents.into_iter().collect(),
                    entities,
                    confidence: v.confidence.clamp(0.0, 1.0),
                    fallback: false,
                }
            }
            _ => Classification::fallback(entities),
        };

        info!(
            intents = ?classification.intents,
            confidence = classification.confidence,
            fallback = classification.fallback,
            "Message classified"
        );

        classification
    }

    async fn ask_model(
        &self,
        model: &dyn IntentModel,
        message: &str,
        history: &[ChatTurn],
        profile: Option<&UserProfile>,
        ctx: &RequestContext,
    ) -> Option<ModelVerdict> {
        let call = AssertUnwindSafe(async { model.classify(message, history, profile).await })
            .catch_unwind();
        let request_deadline = async {
            match ctx.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            _ = ctx.cancel.cancelled() => {
                warn!("Classification degraded: request cancelled");
                None
            }
            _ = request_deadline => {
                warn!("Classification degraded: request deadline elapsed");
                None
            }
            _ = sleep(self.model_timeout) => {
                warn!(
                    timeout_ms = self.model_timeout.as_millis() as u64,
                    "Classification degraded: intent model timed out"
                );
                None
            }
            outcome = call => match outcome {
                Ok(Ok(verdict)) => Some(verdict),
                Ok(Err(e)) => {
                    warn!(error = %e, "Classification degraded: intent model failed");
                    None
                }
                Err(panic) => {
                    warn!(
                        panic = %panic_message(panic.as_ref()),
                        "Classification degraded: intent model panicked"
                    );
                    None
                }
            },
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyword scoring. Every intent with at least one hit is detected.
fn score_keywords(message: &str, entities: &ExtractedEntities) -> ModelVerdict {
    let lowered = message.to_lowercase();

    let mut intents = Vec::new();
    let mut total_matches = 0usize;

    for (intent, keywords) in INTENT_KEYWORDS {
        let hits = keywords
            .iter()
            .filter(|kw| contains_at_word_start(&lowered, kw))
            .count();
        if hits > 0 {
            intents.push(*intent);
            total_matches += hits;
        }
    }

    if intents.is_empty() {
        return ModelVerdict {
            intents,
            confidence: 0.0,
        };
    }

    let mut confidence = 0.5 + (total_matches as f32 * 0.1).min(0.3);
    if !entities.tickers.is_empty() {
        confidence += 0.1;
    }
    if !entities.amounts.is_empty() {
        confidence += 0.1;
    }
    if entities.timeframe.is_some() {
        confidence += 0.1;
    }

    debug!(?intents, total_matches, "Keyword scoring complete");

    ModelVerdict {
        intents,
        confidence: confidence.min(1.0),
    }
}

/// Substring match anchored at a word start ("tax" hits "taxed", "ira" misses "spiral")
fn contains_at_word_start(text: &str, keyword: &str) -> bool {
    text.match_indices(keyword).any(|(idx, _)| {
        text[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

/// Best-effort entity extraction. Never fails; absent entities stay empty.
pub fn extract_entities(message: &str) -> ExtractedEntities {
    ExtractedEntities {
        tickers: extract_tickers(message),
        amounts: extract_amounts(message),
        timeframe: extract_timeframe(message),
    }
}

fn extract_tickers(message: &str) -> Vec<String> {
    let mut tickers: Vec<String> = Vec::new();

    let dollar = TICKER_DOLLAR
        .captures_iter(message)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_uppercase()));
    let bare = TICKER_BARE.find_iter(message).map(|m| m.as_str().to_string());

    for candidate in dollar.chain(bare) {
        if TICKER_STOP_WORDS.contains(&candidate.as_str()) || tickers.contains(&candidate) {
            continue;
        }
        tickers.push(candidate);
    }

    tickers
}

fn extract_amounts(message: &str) -> Vec<f64> {
    let mut amounts: Vec<f64> = Vec::new();

    for re in [&*AMOUNT_DOLLAR, &*AMOUNT_CONTEXT] {
        for caps in re.captures_iter(message) {
            let Some(whole) = caps.get(0) else { continue };
            if followed_by_duration(&message[whole.end()..]) {
                continue;
            }
            let Some(number) = caps.get(1) else { continue };
            let Some(value) = parse_amount(number.as_str(), caps.get(2).map(|m| m.as_str()))
            else {
                continue;
            };
            if !amounts.iter().any(|a| (a - value).abs() < f64::EPSILON) {
                amounts.push(value);
            }
        }
    }

    amounts
}

fn parse_amount(number: &str, suffix: Option<&str>) -> Option<f64> {
    let clean: String = number.chars().filter(|c| *c != ',').collect();
    let base: f64 = clean.parse().ok()?;
    let multiplier = match suffix.map(|s| s.to_ascii_lowercase()) {
        Some(s) if s == "k" => 1_000.0,
        Some(s) if s == "m" => 1_000_000.0,
        Some(s) if s == "b" => 1_000_000_000.0,
        _ => 1.0,
    };
    Some(base * multiplier)
}

/// "have 10 years" is a duration, not an amount
fn followed_by_duration(rest: &str) -> bool {
    let rest = rest.trim_start().to_lowercase();
    ["year", "yr", "month", "day", "%", "percent"]
        .iter()
        .any(|unit| rest.starts_with(unit))
}

fn extract_timeframe(message: &str) -> Option<String> {
    TIMEFRAME.find(message).map(|m| m.as_str().to_string())
}

//
// ================= Gemini-backed model =================
//

/// Asks Gemini to name the applicable intents
pub struct GeminiIntentModel {
    client: GeminiClient,
}

impl GeminiIntentModel {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    fn build_prompt(message: &str, history: &[ChatTurn], profile: Option<&UserProfile>) -> String {
        let labels: Vec<&str> = INTENT_KEYWORDS.iter().map(|(i, _)| i.as_str()).collect();
        let mut prompt = format!(
            "Classify the user's financial question into one or more of these intents: {}.\n\
             Respond with ONLY a comma-separated list of intent names.\n",
            labels.join(", ")
        );
        if let Some(profile) = profile {
            if let Some(risk) = profile.risk_tolerance {
                prompt.push_str(&format!("Risk tolerance: {}\n", risk));
            }
            if let Some(level) = profile.experience_level {
                prompt.push_str(&format!("Experience level: {}\n", level));
            }
        }
        for turn in history {
            prompt.push_str(&format!("{:?}: {}\n", turn.role, turn.content));
        }
        prompt.push_str(&format!("\nUser question: {}", message));
        prompt
    }
}

#[async_trait]
impl IntentModel for GeminiIntentModel {
    async fn classify(
        &self,
        message: &str,
        history: &[ChatTurn],
        profile: Option<&UserProfile>,
    ) -> Result<ModelVerdict> {
        let prompt = Self::build_prompt(message, history, profile);
        let (answer, confidence) = self.client.generate(&prompt, None, None).await?;

        let intents: BTreeSet<Intent> = answer
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter_map(Intent::parse)
            .collect();

        if intents.is_empty() {
            return Err(OrchestrationError::ClassificationError(format!(
                "model returned no known intent: {}",
                answer.trim()
            )));
        }

        Ok(ModelVerdict {
            intents: intents.into_iter().collect(),
            confidence,
        })
    }
}
