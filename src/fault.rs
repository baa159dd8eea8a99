//! Terminal safety net for structural pipeline failures

use crate::models::WorkflowError;
use std::any::Any;
use tracing::error;

pub const FAULT_MESSAGE: &str = "I encountered an error processing your request. \
Please try again or rephrase your question.";

#[derive(Debug, Clone, Default)]
pub struct FaultHandler;

impl FaultHandler {
    pub fn new() -> Self {
        Self
    }

    /// Log the full detail and return the generic user-facing message.
    /// Confidence for a faulted request is always 0.
    pub fn handle(&self, request_id: &str, fault: &WorkflowError) -> String {
        error!(
            request_id,
            stage = %fault.stage,
            occurred_at = %fault.occurred_at,
            error = %fault.message,
            "Workflow faulted"
        );
        FAULT_MESSAGE.to_string()
    }
}

/// Readable text from a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
