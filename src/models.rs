//! Core data models for the orchestrator

use crate::error::OrchestrationError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeHorizon {
    ShortTerm,
    MediumTerm,
    LongTerm,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
}

/// Classified category of user need
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    EducationQuestion,
    TaxQuestion,
    PortfolioAnalysis,
    MarketAnalysis,
    NewsAnalysis,
    GoalPlanning,
    InvestmentPlan,
    GeneralQuestion,
}

impl Intent {
    /// Substituted whenever classification cannot produce anything better
    pub const FALLBACK: Intent = Intent::GeneralQuestion;

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::EducationQuestion => "education_question",
            Intent::TaxQuestion => "tax_question",
            Intent::PortfolioAnalysis => "portfolio_analysis",
            Intent::MarketAnalysis => "market_analysis",
            Intent::NewsAnalysis => "news_analysis",
            Intent::GoalPlanning => "goal_planning",
            Intent::InvestmentPlan => "investment_plan",
            Intent::GeneralQuestion => "general_question",
        }
    }

    pub fn parse(value: &str) -> Option<Intent> {
        let intent = match value.trim().to_lowercase().as_str() {
            "education_question" => Intent::EducationQuestion,
            "tax_question" => Intent::TaxQuestion,
            "portfolio_analysis" => Intent::PortfolioAnalysis,
            "market_analysis" => Intent::MarketAnalysis,
            "news_analysis" => Intent::NewsAnalysis,
            "goal_planning" => Intent::GoalPlanning,
            "investment_plan" => Intent::InvestmentPlan,
            "general_question" => Intent::GeneralQuestion,
            _ => return None,
        };
        Some(intent)
    }
}

/// Identity of a specialized responder.
///
/// Declaration order is the static priority order: when several responders
/// are selected, the earlier variant leads the merged narrative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponderId {
    PortfolioAnalysis,
    GoalPlanning,
    MarketAnalysis,
    NewsSynthesizer,
    TaxEducation,
    FinanceQa,
}

impl ResponderId {
    pub const ALL: [ResponderId; 6] = [
        ResponderId::PortfolioAnalysis,
        ResponderId::GoalPlanning,
        ResponderId::MarketAnalysis,
        ResponderId::NewsSynthesizer,
        ResponderId::TaxEducation,
        ResponderId::FinanceQa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponderId::PortfolioAnalysis => "portfolio_analysis",
            ResponderId::GoalPlanning => "goal_planning",
            ResponderId::MarketAnalysis => "market_analysis",
            ResponderId::NewsSynthesizer => "news_synthesizer",
            ResponderId::TaxEducation => "tax_education",
            ResponderId::FinanceQa => "finance_qa",
        }
    }

    /// Heading used when this responder contributes a supporting section
    pub fn section_title(&self) -> &'static str {
        match self {
            ResponderId::PortfolioAnalysis => "Portfolio Analysis",
            ResponderId::GoalPlanning => "Financial Projections",
            ResponderId::MarketAnalysis => "Market Data",
            ResponderId::NewsSynthesizer => "Market News & Sentiment",
            ResponderId::TaxEducation => "Tax Information",
            ResponderId::FinanceQa => "Educational Content",
        }
    }
}

//
// ================= Request Input =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserProfile {
    pub risk_tolerance: Option<RiskTolerance>,
    pub experience_level: Option<ExperienceLevel>,
    pub time_horizon: Option<TimeHorizon>,
}

/// Inbound request as handed to the workflow driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInput {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
    #[serde(default)]
    pub user_profile: Option<UserProfile>,
}

impl RequestInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            conversation_history: Vec::new(),
            user_profile: None,
        }
    }
}

//
// ================= Classification =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntities {
    pub tickers: Vec<String>,
    pub amounts: Vec<f64>,
    pub timeframe: Option<String>,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty() && self.amounts.is_empty() && self.timeframe.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub intents: BTreeSet<Intent>,
    pub entities: ExtractedEntities,
    pub confidence: f32,
    /// True when the fallback intent was substituted
    pub fallback: bool,
}

impl Classification {
    pub fn fallback(entities: ExtractedEntities) -> Self {
        Self {
            intents: BTreeSet::from([Intent::FALLBACK]),
            entities,
            confidence: 0.0,
            fallback: true,
        }
    }
}

//
// ================= Responder Outcomes =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub title: String,
    pub source_url: String,
    #[serde(default)]
    pub category: String,
}

impl Citation {
    pub fn new(
        title: impl Into<String>,
        source_url: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            source_url: source_url.into(),
            category: category.into(),
        }
    }

    /// Key used to deduplicate citations across responders
    pub fn identity(&self) -> &str {
        if self.source_url.trim().is_empty() {
            self.title.trim()
        } else {
            self.source_url.trim()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ResponderError,
    Cancelled,
}

/// What a responder hands back on success
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponderAnswer {
    pub answer_text: String,
    pub structured_data: Option<serde_json::Value>,
    pub citations: Vec<Citation>,
    pub confidence: Option<f32>,
}

impl ResponderAnswer {
    pub fn text(answer_text: impl Into<String>) -> Self {
        Self {
            answer_text: answer_text.into(),
            ..Self::default()
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

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.structured_data = Some(data);
        self
    }
}

/// Terminal outcome of one responder unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResponderOutcome {
    Success {
        answer_text: String,
        structured_data: Option<serde_json::Value>,
        citations: Vec<Citation>,
        confidence: Option<f32>,
        duration_ms: u64,
    },
    Failure {
        error_kind: FailureKind,
        message: String,
        duration_ms: u64,
    },
}

impl ResponderOutcome {
    pub fn success(answer: ResponderAnswer, duration_ms: u64) -> Self {
        ResponderOutcome::Success {
            answer_text: answer.answer_text,
            structured_data: answer.structured_data,
            citations: answer.citations,
            confidence: answer.confidence,
            duration_ms,
        }
    }

    pub fn failure(error_kind: FailureKind, message: impl Into<String>, duration_ms: u64) -> Self {
        ResponderOutcome::Failure {
            error_kind,
            message: message.into(),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponderOutcome::Success { .. })
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            ResponderOutcome::Success { duration_ms, .. }
            | ResponderOutcome::Failure { duration_ms, .. } => *duration_ms,
        }
    }

    pub fn status(&self) -> ResponderStatus {
        match self {
            ResponderOutcome::Success { .. } => ResponderStatus::Success,
            ResponderOutcome::Failure { error_kind, .. } => match error_kind {
                FailureKind::Timeout => ResponderStatus::Timeout,
                FailureKind::ResponderError => ResponderStatus::Error,
                FailureKind::Cancelled => ResponderStatus::Cancelled,
            },
        }
    }
}

/// One terminal entry per selected responder
pub type ResponderResults = BTreeMap<ResponderId, ResponderOutcome>;

//
// ================= Execution Metadata =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponderStatus {
    Success,
    Timeout,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderTiming {
    pub responder: ResponderId,
    pub status: ResponderStatus,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseSection {
    pub responder: ResponderId,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
    pub final_response: String,
    pub final_citations: Vec<Citation>,
    pub confidence: f32,
    pub sections: Vec<ResponseSection>,
}

impl Synthesis {
    pub fn cap_confidence(mut self, ceiling: f32) -> Self {
        self.confidence = self.confidence.min(ceiling);
        self
    }
}

//
// ================= Workflow =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Start,
    Classified,
    Dispatched,
    Synthesized,
    Done,
    Faulted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowError {
    pub stage: WorkflowStage,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl WorkflowError {
    pub fn new(stage: WorkflowStage, error: &OrchestrationError) -> Self {
        Self {
            stage,
            message: error.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

/// Per-request record threaded through the pipeline.
///
/// Every stage output is write-once; a second write is reported as
/// [`OrchestrationError::StateCorruption`].
#[derive(Debug)]
pub struct RequestState {
    request_id: Uuid,
    user_message: String,
    session_id: String,
    conversation_history: Vec<ChatTurn>,
    user_profile: Option<UserProfile>,

    classification: Option<Classification>,
    selected_responders: Option<Vec<ResponderId>>,
    responder_results: Option<ResponderResults>,

    synthesis: Option<Synthesis>,
    workflow_error: Option<WorkflowError>,

    stage: WorkflowStage,
    stage_trace: Vec<String>,
}

impl RequestState {
    pub fn new(input: RequestInput) -> Self {
        let session_id = input
            .session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            request_id: Uuid::new_v4(),
            user_message: input.message,
            session_id,
            conversation_history: input.conversation_history,
            user_profile: input.user_profile,
            classification: None,
            selected_responders: None,
            responder_results: None,
            synthesis: None,
            workflow_error: None,
            stage: WorkflowStage::Start,
            stage_trace: vec!["START: request received".to_string()],
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The most recent `limit` turns, oldest first
    pub fn recent_history(&self, limit: usize) -> &[ChatTurn] {
        let start = self.conversation_history.len().saturating_sub(limit);
        &self.conversation_history[start..]
    }

    pub fn user_profile(&self) -> Option<&UserProfile> {
        self.user_profile.as_ref()
    }

    pub fn detected_intents(&self) -> Vec<Intent> {
        self.classification
            .as_ref()
            .map(|c| c.intents.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn extracted_entities(&self) -> ExtractedEntities {
        self.classification
            .as_ref()
            .map(|c| c.entities.clone())
            .unwrap_or_default()
    }

    pub fn selected_responders(&self) -> &[ResponderId] {
        self.selected_responders.as_deref().unwrap_or(&[])
    }

    pub fn responder_results(&self) -> Option<&ResponderResults> {
        self.responder_results.as_ref()
    }

    pub fn stage(&self) -> WorkflowStage {
        self.stage
    }

    pub fn advance(&mut self, stage: WorkflowStage, note: impl fmt::Display) {
        self.stage = stage;
        self.stage_trace.push(format!("{}: {}", stage, note));
    }

    pub fn record_classification(&mut self, classification: Classification) -> Result<()> {
        if self.classification.is_some() {
            return Err(OrchestrationError::StateCorruption(
                "detected_intents already populated".to_string(),
            ));
        }
        if classification.intents.is_empty() {
            return Err(OrchestrationError::StateCorruption(
                "classification produced an empty intent set".to_string(),
            ));
        }
        self.classification = Some(classification);
        Ok(())
    }

    pub fn select_responders(&mut self, responders: Vec<ResponderId>) -> Result<()> {
        if self.selected_responders.is_some() {
            return Err(OrchestrationError::StateCorruption(
                "selected_responders already fixed".to_string(),
            ));
        }
        let unique: BTreeSet<_> = responders.iter().collect();
        if unique.len() != responders.len() {
            return Err(OrchestrationError::StateCorruption(format!(
                "selected_responders contains duplicates: {:?}",
                responders
            )));
        }
        self.selected_responders = Some(responders);
        Ok(())
    }

    /// Stores the dispatch outcome; the key set must match the selection exactly
    pub fn record_results(&mut self, results: ResponderResults) -> Result<()> {
        if self.responder_results.is_some() {
            return Err(OrchestrationError::StateCorruption(
                "responder_results already recorded".to_string(),
            ));
        }

        let selected = self.selected_responders();
        let complete = results.len() == selected.len()
            && selected.iter().all(|id| results.contains_key(id));
        if !complete {
            return Err(OrchestrationError::StateCorruption(format!(
                "responder_results keys {:?} do not match selection {:?}",
                results.keys().collect::<Vec<_>>(),
                selected
            )));
        }

        self.responder_results = Some(results);
        Ok(())
    }

    pub fn record_synthesis(&mut self, synthesis: Synthesis) -> Result<()> {
        if self.synthesis.is_some() {
            return Err(OrchestrationError::StateCorruption(
                "final_response already set".to_string(),
            ));
        }
        if self.workflow_error.is_some() {
            return Err(OrchestrationError::StateCorruption(
                "synthesis attempted after a workflow fault".to_string(),
            ));
        }
        self.synthesis = Some(synthesis);
        Ok(())
    }

    /// Terminal write used by the fault handler and the input guard.
    /// Never fails; it replaces whatever partial output exists.
    pub fn record_terminal_response(
        &mut self,
        final_response: String,
        workflow_error: Option<WorkflowError>,
    ) {
        self.workflow_error = workflow_error;
        self.synthesis = Some(Synthesis {
            final_response,
            final_citations: Vec::new(),
            confidence: 0.0,
            sections: Vec::new(),
        });
    }

    /// Per-responder execution metadata in selection order
    pub fn timings(&self) -> Vec<ResponderTiming> {
        let Some(results) = self.responder_results.as_ref() else {
            return Vec::new();
        };

        self.selected_responders()
            .iter()
            .filter_map(|id| {
                results.get(id).map(|outcome| ResponderTiming {
                    responder: *id,
                    status: outcome.status(),
                    elapsed_ms: outcome.duration_ms(),
                    error: match outcome {
                        ResponderOutcome::Failure { message, .. } => Some(message.clone()),
                        ResponderOutcome::Success { .. } => None,
                    },
                })
            })
            .collect()
    }

    pub fn into_response(self, total_time_ms: u64) -> OrchestrationResponse {
        let per_responder_timings = self.timings();

        let mut errors: Vec<String> = per_responder_timings
            .iter()
            .filter_map(|t| {
                t.error
                    .as_ref()
                    .map(|e| format!("{}: {}", t.responder.as_str(), e))
            })
            .collect();
        if let Some(fault) = &self.workflow_error {
            errors.push(format!("pipeline fault during {}", fault.stage));
        }

        let detected_intents = self.detected_intents();
        let extracted_entities = self.extracted_entities();
        let selected_responders = self.selected_responders().to_vec();
        let synthesis = self.synthesis.unwrap_or(Synthesis {
            final_response: String::new(),
            final_citations: Vec::new(),
            confidence: 0.0,
            sections: Vec::new(),
        });

        OrchestrationResponse {
            request_id: self.request_id,
            session_id: self.session_id,
            final_response: synthesis.final_response,
            final_citations: synthesis.final_citations,
            confidence: synthesis.confidence,
            sections: synthesis.sections,
            detected_intents,
            extracted_entities,
            selected_responders,
            per_responder_timings,
            errors,
            stage: self.stage,
            stage_trace: self.stage_trace,
            total_time_ms,
        }
    }
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResponse {
    pub request_id: Uuid,
    pub session_id: String,
    pub final_response: String,
    pub final_citations: Vec<Citation>,
    pub confidence: f32,
    pub sections: Vec<ResponseSection>,
    pub detected_intents: Vec<Intent>,
    pub extracted_entities: ExtractedEntities,
    pub selected_responders: Vec<ResponderId>,
    pub per_responder_timings: Vec<ResponderTiming>,
    pub errors: Vec<String>,
    pub stage: WorkflowStage,
    pub stage_trace: Vec<String>,
    pub total_time_ms: u64,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for ResponderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStage::Start => "START",
            WorkflowStage::Classified => "CLASSIFIED",
            WorkflowStage::Dispatched => "DISPATCHED",
            WorkflowStage::Synthesized => "SYNTHESIZED",
            WorkflowStage::Done => "DONE",
            WorkflowStage::Faulted => "FAULTED",
            WorkflowStage::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskTolerance::Low => "Low",
            RiskTolerance::Medium => "Medium",
            RiskTolerance::High => "High",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for TimeHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeHorizon::ShortTerm => "Short-Term",
            TimeHorizon::MediumTerm => "Medium-Term",
            TimeHorizon::LongTerm => "Long-Term",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExperienceLevel::Beginner => "Beginner",
            ExperienceLevel::Intermediate => "Intermediate",
            ExperienceLevel::Advanced => "Advanced",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified_state(responders: Vec<ResponderId>) -> RequestState {
        let mut state = RequestState::new(RequestInput::new("test"));
        state
            .record_classification(Classification::fallback(ExtractedEntities::default()))
            .unwrap();
        state.select_responders(responders).unwrap();
        state
    }

    #[test]
    fn test_session_id_generated_when_missing() {
        let state = RequestState::new(RequestInput::new("hello"));
        assert!(!state.session_id().is_empty());
        assert_eq!(state.stage(), WorkflowStage::Start);
    }

    #[test]
    fn test_classification_is_write_once() {
        let mut state = RequestState::new(RequestInput::new("hello"));
        let c = Classification::fallback(ExtractedEntities::default());
        assert!(state.record_classification(c.clone()).is_ok());
        assert!(matches!(
            state.record_classification(c),
            Err(OrchestrationError::StateCorruption(_))
        ));
    }

    #[test]
    fn test_duplicate_selection_rejected() {
        let mut state = RequestState::new(RequestInput::new("hello"));
        let result = state.select_responders(vec![ResponderId::FinanceQa, ResponderId::FinanceQa]);
        assert!(result.is_err());
    }

    #[test]
    fn test_incomplete_results_rejected() {
        let mut state = classified_state(vec![ResponderId::FinanceQa, ResponderId::TaxEducation]);
        let mut results = ResponderResults::new();
        results.insert(
            ResponderId::FinanceQa,
            ResponderOutcome::success(ResponderAnswer::text("ok"), 5),
        );
        assert!(matches!(
            state.record_results(results),
            Err(OrchestrationError::StateCorruption(_))
        ));
    }

    #[test]
    fn test_timings_follow_selection_order() {
        let mut state = classified_state(vec![ResponderId::GoalPlanning, ResponderId::FinanceQa]);
        let mut results = ResponderResults::new();
        results.insert(
            ResponderId::FinanceQa,
            ResponderOutcome::failure(FailureKind::Timeout, "timed out", 8000),
        );
        results.insert(
            ResponderId::GoalPlanning,
            ResponderOutcome::success(ResponderAnswer::text("projection"), 12),
        );
        state.record_results(results).unwrap();

        let timings = state.timings();
        assert_eq!(timings[0].responder, ResponderId::GoalPlanning);
        assert_eq!(timings[0].status, ResponderStatus::Success);
        assert_eq!(timings[1].status, ResponderStatus::Timeout);
        assert_eq!(timings[1].elapsed_ms, 8000);
    }

    #[test]
    fn test_citation_identity_prefers_url() {
        let with_url = Citation::new("A", "https://example.com/a", "x");
        let without_url = Citation::new("B", "", "x");
        assert_eq!(with_url.identity(), "https://example.com/a");
        assert_eq!(without_url.identity(), "B");
    }

    #[test]
    fn test_recent_history_keeps_tail() {
        let mut input = RequestInput::new("now");
        input.conversation_history = (0..5).map(|i| ChatTurn::user(format!("q{}", i))).collect();
        let state = RequestState::new(input);
        let recent = state.recent_history(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "q3");
    }
}
