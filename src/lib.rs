//! Financial Q&A Orchestrator
//!
//! Orchestration core of a financial education assistant:
//! - Classifies each message into one or more intents (with entities)
//! - Selects specialized responders through a static, priority-ordered registry
//! - Runs them concurrently under per-responder timeouts and request cancellation
//! - Merges their answers into one narrative with citations and a disclaimer
//! - Routes structural failures to a fault handler so every request gets a response
//!
//! PIPELINE:
//! START → CLASSIFIED → DISPATCHED → SYNTHESIZED → DONE (or FAULTED / REJECTED)

pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fault;
pub mod gemini;
pub mod guardrails;
pub mod models;
pub mod registry;
pub mod responders;
pub mod synthesizer;
pub mod workflow;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use classifier::{IntentClassifier, IntentModel};
pub use config::OrchestratorConfig;
pub use models::*;
pub use registry::{Responder, ResponderRegistry, ResponderRequest};
pub use workflow::Orchestrator;
