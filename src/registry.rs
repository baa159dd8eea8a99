//! Responder contract and registry
//!
//! The registry is read-only once built and shared across requests. It owns
//! the static intent → responder mapping and the priority order used to make
//! selection reproducible.

use crate::config::OrchestratorConfig;
use crate::models::{ChatTurn, ExtractedEntities, Intent, ResponderAnswer, ResponderId, UserProfile};
use crate::Result;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Read-only context shared by every unit of one request
#[derive(Debug, Clone, Serialize)]
pub struct ResponderRequest {
    pub message: String,
    pub profile: Option<UserProfile>,
    pub history: Vec<ChatTurn>,
    pub entities: ExtractedEntities,
}

/// Uniform contract every specialized responder satisfies.
///
/// `deadline` is the instant by which the unit is abandoned; implementations
/// should bound their outbound calls by it.
#[async_trait::async_trait]
pub trait Responder: Send + Sync {
    fn description(&self) -> &'static str;
    async fn execute(&self, request: &ResponderRequest, deadline: Instant) -> Result<ResponderAnswer>;
}

/// Time left until `deadline`, never negative
pub fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Static intent → responder mapping
pub fn responders_for(intent: Intent) -> &'static [ResponderId] {
    match intent {
        Intent::EducationQuestion => &[ResponderId::FinanceQa],
        Intent::TaxQuestion => &[ResponderId::TaxEducation],
        Intent::PortfolioAnalysis => &[ResponderId::PortfolioAnalysis],
        Intent::MarketAnalysis => &[ResponderId::MarketAnalysis],
        Intent::NewsAnalysis => &[ResponderId::NewsSynthesizer],
        Intent::GoalPlanning => &[ResponderId::GoalPlanning],
        Intent::InvestmentPlan => &[
            ResponderId::PortfolioAnalysis,
            ResponderId::GoalPlanning,
            ResponderId::TaxEducation,
        ],
        Intent::GeneralQuestion => &[ResponderId::FinanceQa],
    }
}

#[derive(Clone)]
pub struct RegisteredResponder {
    pub handle: Arc<dyn Responder>,
    pub timeout: Duration,
}

/// Responder registry for looking up handles and their declared timeouts
pub struct ResponderRegistry {
    responders: HashMap<ResponderId, RegisteredResponder>,
    default_timeout: Duration,
    timeout_overrides: HashMap<ResponderId, Duration>,
}

impl ResponderRegistry {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            responders: HashMap::new(),
            default_timeout: config.default_responder_timeout,
            timeout_overrides: config.responder_timeouts.clone(),
        }
    }

    /// Bind a handle using the configured timeout for `id`
    pub fn register(&mut self, id: ResponderId, handle: Arc<dyn Responder>) {
        let timeout = self
            .timeout_overrides
            .get(&id)
            .copied()
            .unwrap_or(self.default_timeout);
        self.responders.insert(id, RegisteredResponder { handle, timeout });
    }

    pub fn register_with_timeout(
        &mut self,
        id: ResponderId,
        handle: Arc<dyn Responder>,
        timeout: Duration,
    ) {
        self.responders.insert(id, RegisteredResponder { handle, timeout });
    }

    pub fn get(&self, id: ResponderId) -> Option<&RegisteredResponder> {
        self.responders.get(&id)
    }

    /// Registered ids in priority order
    pub fn list(&self) -> Vec<ResponderId> {
        let mut ids: Vec<_> = self.responders.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Project intents through the mapping: deduplicated, priority ordered,
    /// restricted to registered responders.
    pub fn resolve(&self, intents: &BTreeSet<Intent>) -> Vec<ResponderId> {
        let wanted: BTreeSet<ResponderId> = intents
            .iter()
            .flat_map(|intent| responders_for(*intent).iter().copied())
            .collect();

        wanted
            .into_iter()
            .filter(|id| {
                let registered = self.responders.contains_key(id);
                if !registered {
                    warn!(responder = %id, "Responder mapped but not registered; skipping");
                }
                registered
            })
            .collect()
    }
}
