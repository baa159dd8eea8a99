//! Dispatch coordinator
//!
//! Runs the selected responders as independent tasks and folds their outcomes
//! into a complete result map. No LLM or synthesis logic lives here.

use crate::error::OrchestrationError;
use crate::models::{FailureKind, ResponderId, ResponderOutcome, ResponderResults};
use crate::registry::{RegisteredResponder, ResponderRegistry, ResponderRequest};
use crate::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Request-wide cancellation scope handed down by the workflow driver
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub cancel: CancellationToken,
    /// Global request deadline, if one is configured
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }
}

pub struct DispatchCoordinator {
    registry: Arc<ResponderRegistry>,
}

impl DispatchCoordinator {
    pub fn new(registry: Arc<ResponderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ResponderRegistry {
        &self.registry
    }

    /// Execute every selected responder concurrently.
    ///
    /// Individual failures, timeouts and panics become `Failure` entries.
    /// Only setup problems (duplicate ids, unbound handles) return `Err`.
    pub async fn dispatch(
        &self,
        selected: &[ResponderId],
        request: Arc<ResponderRequest>,
        ctx: &RequestContext,
    ) -> Result<ResponderResults> {
        let unique: BTreeSet<_> = selected.iter().collect();
        if unique.len() != selected.len() {
            return Err(OrchestrationError::DispatchSetup(format!(
                "duplicate responders in selection: {:?}",
                selected
            )));
        }

        let mut units = Vec::with_capacity(selected.len());
        for id in selected {
            let registered = self.registry.get(*id).cloned().ok_or_else(|| {
                OrchestrationError::DispatchSetup(format!("no handle bound for responder {}", id))
            })?;
            units.push((*id, registered));
        }

        // Cancels every unit if this future is dropped before completion
        let scope = ctx.cancel.child_token();
        let _scope_guard = scope.clone().drop_guard();

        debug!(responders = ?selected, "Starting dispatch");

        let handles: Vec<_> = units
            .into_iter()
            .map(|(id, registered)| {
                let unit = run_unit(id, registered, request.clone(), scope.clone(), ctx.deadline);
                (id, Instant::now(), tokio::spawn(unit))
            })
            .collect();

        let mut results = ResponderResults::new();
        for (id, started, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    let message = if join_error.is_panic() {
                        "responder panicked".to_string()
                    } else {
                        format!("responder task aborted: {}", join_error)
                    };
                    ResponderOutcome::failure(
                        FailureKind::ResponderError,
                        message,
                        elapsed_ms(started),
                    )
                }
            };

            if let ResponderOutcome::Failure {
                error_kind, message, ..
            } = &outcome
            {
                warn!(responder = %id, ?error_kind, %message, "Responder did not succeed");
            }
            results.insert(id, outcome);
        }

        if results.len() != selected.len() {
            return Err(OrchestrationError::StateCorruption(format!(
                "dispatch produced {} results for {} responders",
                results.len(),
                selected.len()
            )));
        }

        info!(
            responders = selected.len(),
            succeeded = results.values().filter(|o| o.is_success()).count(),
            "Dispatch completed"
        );

        Ok(results)
    }
}

async fn run_unit(
    id: ResponderId,
    registered: RegisteredResponder,
    request: Arc<ResponderRequest>,
    cancel: CancellationToken,
    request_deadline: Option<Instant>,
) -> ResponderOutcome {
    let started = Instant::now();
    let unit_deadline = started + registered.timeout;
    let effective_deadline = request_deadline.map_or(unit_deadline, |d| d.min(unit_deadline));

    let global_deadline = async {
        match request_deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;

        _ = cancel.cancelled() => ResponderOutcome::failure(
            FailureKind::Cancelled,
            "request cancelled",
            elapsed_ms(started),
        ),
        _ = global_deadline => ResponderOutcome::failure(
            FailureKind::Cancelled,
            "request deadline elapsed",
            elapsed_ms(started),
        ),
        _ = sleep(registered.timeout) => {
            debug!(responder = %id, timeout = ?registered.timeout, "Responder timed out");
            ResponderOutcome::failure(
                FailureKind::Timeout,
                format!("no answer within {:?}", registered.timeout),
                registered.timeout.as_millis() as u64,
            )
        }
        result = registered.handle.execute(request.as_ref(), effective_deadline) => match result {
            Ok(answer) => ResponderOutcome::success(answer, elapsed_ms(started)),
            Err(e) => ResponderOutcome::failure(
                FailureKind::ResponderError,
                e.to_string(),
                elapsed_ms(started),
            ),
        },
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
