//! Workflow driver
//!
//! START → CLASSIFIED → DISPATCHED → SYNTHESIZED → DONE
//!
//! Any structural failure along the way ends in FAULTED; a message that fails
//! the input guard ends in REJECTED. Every path returns a well-formed response.

use crate::audit::{AuditLog, RequestRecord};
use crate::classifier::IntentClassifier;
use crate::config::{OrchestratorConfig, FALLBACK_CONFIDENCE_CEILING};
use crate::dispatch::{DispatchCoordinator, RequestContext};
use crate::error::OrchestrationError;
use crate::fault::{panic_message, FaultHandler};
use crate::guardrails::InputGuard;
use crate::models::{
    OrchestrationResponse, RequestInput, RequestState, ResponderResults, WorkflowError,
    WorkflowStage,
};
use crate::registry::{ResponderRegistry, ResponderRequest};
use crate::synthesizer::{ResponseSynthesizer, SynthesizerConfig, GENERAL_DISCLAIMER};
use crate::Result;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Main orchestrator that drives one request through the pipeline
pub struct Orchestrator {
    guard: InputGuard,
    classifier: IntentClassifier,
    coordinator: DispatchCoordinator,
    synthesizer: ResponseSynthesizer,
    fault_handler: FaultHandler,
    audit_log: AuditLog,
    request_deadline: Option<Duration>,
    max_history_turns: usize,
}

impl Orchestrator {
    pub fn new(
        classifier: IntentClassifier,
        registry: Arc<ResponderRegistry>,
        config: &OrchestratorConfig,
        audit_log: AuditLog,
    ) -> Self {
        Self {
            guard: InputGuard::default(),
            classifier,
            coordinator: DispatchCoordinator::new(registry),
            synthesizer: ResponseSynthesizer::new(SynthesizerConfig::from(config)),
            fault_handler: FaultHandler::new(),
            audit_log,
            request_deadline: config.request_deadline,
            max_history_turns: config.max_history_turns,
        }
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    pub async fn handle_request(&self, input: RequestInput) -> OrchestrationResponse {
        self.handle_request_with_cancel(input, CancellationToken::new())
            .await
    }

    /// Run one request. Cancelling `cancel` finalizes in-flight responders as
    /// cancelled; dropping the returned future does the same. The configured
    /// request deadline counts from arrival and covers classification too.
    pub async fn handle_request_with_cancel(
        &self,
        input: RequestInput,
        cancel: CancellationToken,
    ) -> OrchestrationResponse {
        let start_time = Instant::now();
        let ctx = RequestContext::new(
            cancel,
            self.request_deadline.map(|deadline| start_time + deadline),
        );
        let message = input.message.clone();
        let mut state = RequestState::new(input);

        info!(
            request_id = %state.request_id(),
            session_id = %state.session_id(),
            "Orchestrator: request received"
        );

        match self.guard.check(state.user_message()) {
            Err(violation) => self.reject(&mut state, violation),
            Ok(()) => {
                let outcome = AssertUnwindSafe(self.run(&mut state, &ctx))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => self.fault(&mut state, e),
                    Err(panic) => self.fault(
                        &mut state,
                        OrchestrationError::Panicked(panic_message(panic.as_ref())),
                    ),
                }
            }
        }

        let response = state.into_response(start_time.elapsed().as_millis() as u64);

        if let Err(e) = self
            .audit_log
            .record(RequestRecord::from_response(&message, &response))
            .await
        {
            warn!(request_id = %response.request_id, error = %e, "Failed to record audit entry");
        }

        info!(
            request_id = %response.request_id,
            stage = %response.stage,
            confidence = response.confidence,
            total_time_ms = response.total_time_ms,
            "Orchestrator: request finished"
        );

        response
    }

    async fn run(&self, state: &mut RequestState, ctx: &RequestContext) -> Result<()> {
        // === CLASSIFY ===
        let classification = self
            .classifier
            .classify_within(
                state.user_message(),
                state.recent_history(self.max_history_turns),
                state.user_profile(),
                ctx,
            )
            .await;
        let fallback = classification.fallback;
        let note = format!(
            "{} intent(s), confidence {:.2}{}",
            classification.intents.len(),
            classification.confidence,
            if fallback { ", fallback" } else { "" }
        );
        let intents = classification.intents.clone();
        state.record_classification(classification)?;
        state.advance(WorkflowStage::Classified, note);

        let registry = self.coordinator.registry();
        let selected = registry.resolve(&intents);
        state.select_responders(selected.clone())?;
        for id in &selected {
            if let Some(registered) = registry.get(*id) {
                let description = registered.handle.description();
                debug!(responder = %id, description, timeout = ?registered.timeout, "Responder selected");
            }
        }

        // === DISPATCH ===
        if selected.is_empty() {
            state.record_results(ResponderResults::new())?;
        } else {
            let request = Arc::new(ResponderRequest {
                message: state.user_message().to_string(),
                profile: state.user_profile().cloned(),
                history: state.recent_history(self.max_history_turns).to_vec(),
                entities: state.extracted_entities(),
            });
            let results = self.coordinator.dispatch(&selected, request, ctx).await?;
            let succeeded = results.values().filter(|o| o.is_success()).count();
            state.record_results(results)?;
            state.advance(
                WorkflowStage::Dispatched,
                format!("{} / {} responders succeeded", succeeded, selected.len()),
            );
        }

        // === SYNTHESIZE ===
        let results = state.responder_results().ok_or_else(|| {
            OrchestrationError::StateCorruption("responder_results missing before synthesis".to_string())
        })?;
        let mut synthesis = self
            .synthesizer
            .synthesize(results, state.selected_responders())?;
        if fallback {
            synthesis = synthesis.cap_confidence(FALLBACK_CONFIDENCE_CEILING);
        }
        let note = format!(
            "{} section(s), {} citation(s), confidence {:.2}",
            synthesis.sections.len(),
            synthesis.final_citations.len(),
            synthesis.confidence
        );
        state.record_synthesis(synthesis)?;
        state.advance(WorkflowStage::Synthesized, note);

        state.advance(WorkflowStage::Done, "response ready");
        Ok(())
    }

    fn reject(&self, state: &mut RequestState, violation: OrchestrationError) {
        let reason = match violation {
            OrchestrationError::InvalidInput(reason) => reason,
            other => other.to_string(),
        };
        warn!(request_id = %state.request_id(), %reason, "Input rejected");
        state.record_terminal_response(format!("{}\n\n{}", reason, GENERAL_DISCLAIMER), None);
        state.advance(WorkflowStage::Rejected, "input failed validation");
    }

    fn fault(&self, state: &mut RequestState, error: OrchestrationError) {
        let fault = WorkflowError::new(state.stage(), &error);
        let message = self
            .fault_handler
            .handle(&state.request_id().to_string(), &fault);
        state.record_terminal_response(message, Some(fault));
        state.advance(WorkflowStage::Faulted, "pipeline fault");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{IntentModel, ModelVerdict};
    use crate::fault::FAULT_MESSAGE;
    use crate::models::{ChatTurn, Intent, ResponderId, ResponderStatus, UserProfile};
    use crate::responders::stubs::{
        DelayedResponder, FailingResponder, MisdescribedResponder, StalledResponder,
    };
    use crate::responders::{create_offline_registry, CannedResponder};
    use crate::synthesizer::NO_ANSWER_MESSAGE;
    use crate::Responder;
    use async_trait::async_trait;

    /// Answers after `delay`, or panics when `delay` is `None`
    struct ScriptedModel {
        delay: Option<Duration>,
    }

    #[async_trait]
    impl IntentModel for ScriptedModel {
        async fn classify(
            &self,
            _message: &str,
            _history: &[ChatTurn],
            _profile: Option<&UserProfile>,
        ) -> Result<ModelVerdict> {
            let Some(delay) = self.delay else {
                panic!("intent model defect");
            };
            tokio::time::sleep(delay).await;
            Ok(ModelVerdict {
                intents: vec![Intent::EducationQuestion],
                confidence: 0.9,
            })
        }
    }

    fn orchestrator(registry: ResponderRegistry) -> Orchestrator {
        orchestrator_with(IntentClassifier::new(), registry, &OrchestratorConfig::default())
    }

    fn orchestrator_with(
        classifier: IntentClassifier,
        registry: ResponderRegistry,
        config: &OrchestratorConfig,
    ) -> Orchestrator {
        Orchestrator::new(classifier, Arc::new(registry), config, AuditLog::new())
    }

    fn handle<R: Responder + 'static>(responder: R) -> Arc<dyn Responder> {
        Arc::new(responder)
    }

    fn registry_with(responders: Vec<(ResponderId, Arc<dyn Responder>)>) -> ResponderRegistry {
        let mut registry = ResponderRegistry::new(&OrchestratorConfig::default());
        for (id, handle) in responders {
            registry.register(id, handle);
        }
        registry
    }

    const MULTI_INTENT: &str =
        "My portfolio is worth $50,000 and I want to reach a goal of $200,000 in 10 years";

    #[tokio::test]
    async fn test_gibberish_falls_back() {
        let orchestrator = orchestrator(create_offline_registry(&OrchestratorConfig::default()));
        let response = orchestrator
            .handle_request(RequestInput::new("asdkjqwe random gibberish"))
            .await;

        assert_eq!(response.detected_intents, vec![Intent::GeneralQuestion]);
        assert!(response.selected_responders.len() <= 1);
        assert!(response.confidence <= 0.5);
        assert!(!response.final_response.is_empty());
        assert!(response.final_response.contains(GENERAL_DISCLAIMER));
        assert_eq!(response.stage, WorkflowStage::Done);
    }

    #[tokio::test]
    async fn test_multi_intent_uses_several_responders() {
        let orchestrator = orchestrator(registry_with(vec![
            (
                ResponderId::PortfolioAnalysis,
                handle(CannedResponder::new("Your holdings total $50,000.")),
            ),
            (
                ResponderId::GoalPlanning,
                handle(CannedResponder::new("Reaching $200,000 needs $900 a month.")),
            ),
        ]));
        let response = orchestrator.handle_request(RequestInput::new(MULTI_INTENT)).await;

        assert!(response.detected_intents.len() >= 2);
        assert!(response.selected_responders.len() >= 2);
        assert!(response.final_response.contains("Your holdings total $50,000."));
        assert!(response.final_response.contains("Reaching $200,000 needs $900 a month."));
        assert_eq!(response.extracted_entities.amounts, vec![50_000.0, 200_000.0]);
        assert_eq!(response.per_responder_timings.len(), response.selected_responders.len());
    }

    #[tokio::test]
    async fn test_all_failed_is_soft() {
        let orchestrator = orchestrator(registry_with(vec![
            (ResponderId::PortfolioAnalysis, handle(FailingResponder)),
            (ResponderId::GoalPlanning, handle(FailingResponder)),
        ]));
        let response = orchestrator.handle_request(RequestInput::new(MULTI_INTENT)).await;

        assert_eq!(response.stage, WorkflowStage::Done);
        assert!(response.final_response.starts_with(NO_ANSWER_MESSAGE));
        assert!(response.final_response.contains(GENERAL_DISCLAIMER));
        assert_eq!(response.confidence, 0.0);
        assert!(response.final_citations.is_empty());
        assert_eq!(response.errors.len(), 2);
        assert!(response
            .per_responder_timings
            .iter()
            .all(|t| t.status == ResponderStatus::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lead_order_independent_of_completion() {
        let delays = [(10, 500), (500, 10)];
        let mut leads = Vec::new();

        for (portfolio_delay, goal_delay) in delays {
            let orchestrator = orchestrator(registry_with(vec![
                (
                    ResponderId::PortfolioAnalysis,
                    handle(DelayedResponder::new(
                        Duration::from_millis(portfolio_delay),
                        "Portfolio lead.",
                    )),
                ),
                (
                    ResponderId::GoalPlanning,
                    handle(DelayedResponder::new(
                        Duration::from_millis(goal_delay),
                        "Goal section.",
                    )),
                ),
            ]));
            let response = orchestrator.handle_request(RequestInput::new(MULTI_INTENT)).await;
            leads.push((response.selected_responders.clone(), response.final_response));
        }

        assert_eq!(leads[0], leads[1]);
        assert!(leads[0].1.starts_with("Portfolio lead."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_still_answers() {
        let orchestrator = orchestrator(registry_with(vec![
            (
                ResponderId::PortfolioAnalysis,
                handle(CannedResponder::new("Portfolio summary.")),
            ),
            (ResponderId::GoalPlanning, handle(StalledResponder::new())),
        ]));

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let response = orchestrator
            .handle_request_with_cancel(RequestInput::new(MULTI_INTENT), token)
            .await;

        assert_eq!(response.stage, WorkflowStage::Done);
        assert!(response.final_response.starts_with("Portfolio summary."));
        let goal = response
            .per_responder_timings
            .iter()
            .find(|t| t.responder == ResponderId::GoalPlanning)
            .map(|t| t.status);
        assert_eq!(goal, Some(ResponderStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_rejected_input_keeps_disclaimer() {
        let orchestrator = orchestrator(create_offline_registry(&OrchestratorConfig::default()));
        let response = orchestrator
            .handle_request(RequestInput::new("My SSN is 123-45-6789, what should I buy?"))
            .await;

        assert_eq!(response.stage, WorkflowStage::Rejected);
        assert!(response.selected_responders.is_empty());
        assert_eq!(response.confidence, 0.0);
        assert!(response.final_response.contains(GENERAL_DISCLAIMER));
    }

    #[tokio::test]
    async fn test_disclaimer_on_every_completed_path() {
        let orchestrator = orchestrator(create_offline_registry(&OrchestratorConfig::default()));
        let messages = [
            "What is an index fund?",
            "How are capital gains taxed?",
            MULTI_INTENT,
            "asdkjqwe random gibberish",
            "hi",
        ];
        for message in messages {
            let response = orchestrator.handle_request(RequestInput::new(message)).await;
            assert_ne!(response.stage, WorkflowStage::Faulted);
            assert!(
                response.final_response.contains(GENERAL_DISCLAIMER),
                "missing disclaimer for {:?}",
                message
            );
        }
    }

    #[tokio::test]
    async fn test_fault_produces_generic_message() {
        let orchestrator = orchestrator(create_offline_registry(&OrchestratorConfig::default()));
        let mut state = RequestState::new(RequestInput::new("What is an ETF?"));
        state.advance(WorkflowStage::Classified, "test");

        orchestrator.fault(
            &mut state,
            OrchestrationError::StateCorruption("results keys mismatch".to_string()),
        );
        let response = state.into_response(1);

        assert_eq!(response.stage, WorkflowStage::Faulted);
        assert_eq!(response.final_response, FAULT_MESSAGE);
        assert_eq!(response.confidence, 0.0);
        assert_eq!(response.errors, vec!["pipeline fault during CLASSIFIED".to_string()]);
    }

    #[tokio::test]
    async fn test_pipeline_panic_faults_request() {
        let orchestrator = orchestrator(registry_with(vec![(
            ResponderId::FinanceQa,
            handle(MisdescribedResponder),
        )]));
        let response = orchestrator
            .handle_request(RequestInput::new("What is an index fund?"))
            .await;

        assert_eq!(response.stage, WorkflowStage::Faulted);
        assert_eq!(response.final_response, FAULT_MESSAGE);
        assert_eq!(response.confidence, 0.0);
        assert!(!response.final_response.contains(GENERAL_DISCLAIMER));
        assert!(response.final_citations.is_empty());
        assert_eq!(response.errors, vec!["pipeline fault during CLASSIFIED".to_string()]);

        let record = orchestrator
            .audit_log()
            .get(response.request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.stage, WorkflowStage::Faulted);
        assert_eq!(record.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_panicking_intent_model_degrades() {
        let classifier = IntentClassifier::new().with_model(Arc::new(ScriptedModel { delay: None }));
        let orchestrator = orchestrator_with(
            classifier,
            create_offline_registry(&OrchestratorConfig::default()),
            &OrchestratorConfig::default(),
        );
        let response = orchestrator
            .handle_request(RequestInput::new("What is an index fund?"))
            .await;

        assert_eq!(response.stage, WorkflowStage::Done);
        assert_eq!(response.detected_intents, vec![Intent::FALLBACK]);
        assert!(response.confidence <= FALLBACK_CONFIDENCE_CEILING);
        assert!(response.final_response.contains(GENERAL_DISCLAIMER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_deadline_counts_from_arrival() {
        let mut config = OrchestratorConfig::default();
        config.request_deadline = Some(Duration::from_secs(2));
        let classifier = IntentClassifier::new().with_model(Arc::new(ScriptedModel {
            delay: Some(Duration::from_secs(4)),
        }));
        let orchestrator = orchestrator_with(
            classifier,
            registry_with(vec![(
                ResponderId::FinanceQa,
                handle(DelayedResponder::new(
                    Duration::from_millis(1500),
                    "Index funds track a market index.",
                )),
            )]),
            &config,
        );

        let started = Instant::now();
        let response = orchestrator
            .handle_request(RequestInput::new("What is an index fund?"))
            .await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2500), "took {:?}", elapsed);
        assert_eq!(response.stage, WorkflowStage::Done);
        assert_eq!(response.detected_intents, vec![Intent::FALLBACK]);
        assert_eq!(response.per_responder_timings.len(), 1);
        assert_eq!(
            response.per_responder_timings[0].status,
            ResponderStatus::Cancelled
        );
        assert!(response.final_response.starts_with(NO_ANSWER_MESSAGE));
        assert_eq!(response.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_requests_are_audited() {
        let orchestrator = orchestrator(create_offline_registry(&OrchestratorConfig::default()));
        let mut input = RequestInput::new("What is an index fund?");
        input.session_id = Some("session-42".to_string());
        let response = orchestrator.handle_request(input).await;

        let record = orchestrator
            .audit_log()
            .get(response.request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.session_id, "session-42");
        assert_eq!(record.stage, WorkflowStage::Done);
        let session = orchestrator.audit_log().list_for_session("session-42").await;
        let ids = tokio_test::assert_ok!(session);
        assert_eq!(ids, vec![response.request_id]);
    }
}
