//! Scripted responders for exercising the pipeline under test

use crate::error::OrchestrationError;
use crate::models::ResponderAnswer;
use crate::registry::{Responder, ResponderRequest};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Answers with `answer` after `delay`
pub struct DelayedResponder {
    pub delay: Duration,
    pub answer: ResponderAnswer,
}

impl DelayedResponder {
    pub fn new(delay: Duration, answer: &str) -> Self {
        Self {
            delay,
            answer: ResponderAnswer::text(answer),
        }
    }
}

#[async_trait::async_trait]
impl Responder for DelayedResponder {
    fn description(&self) -> &'static str {
        "delayed"
    }

    async fn execute(&self, _request: &ResponderRequest, _deadline: Instant) -> Result<ResponderAnswer> {
        tokio::time::sleep(self.delay).await;
        Ok(self.answer.clone())
    }
}

pub struct FailingResponder;

#[async_trait::async_trait]
impl Responder for FailingResponder {
    fn description(&self) -> &'static str {
        "always fails"
    }

    async fn execute(&self, _request: &ResponderRequest, _deadline: Instant) -> Result<ResponderAnswer> {
        Err(OrchestrationError::ResponderError("upstream unavailable".to_string()))
    }
}

pub struct PanickingResponder;

#[async_trait::async_trait]
impl Responder for PanickingResponder {
    fn description(&self) -> &'static str {
        "always panics"
    }

    async fn execute(&self, _request: &ResponderRequest, _deadline: Instant) -> Result<ResponderAnswer> {
        panic!("responder defect");
    }
}

/// Never finishes; flips `dropped` once its future is torn down
pub struct StalledResponder {
    pub dropped: Arc<AtomicBool>,
}

impl StalledResponder {
    pub fn new() -> Self {
        Self {
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Responder for StalledResponder {
    fn description(&self) -> &'static str {
        "stalls"
    }

    async fn execute(&self, _request: &ResponderRequest, _deadline: Instant) -> Result<ResponderAnswer> {
        let _flag = DropFlag(self.dropped.clone());
        std::future::pending::<()>().await;
        Ok(ResponderAnswer::default())
    }
}

/// Healthy `execute`, but reading its metadata panics
pub struct MisdescribedResponder;

#[async_trait::async_trait]
impl Responder for MisdescribedResponder {
    fn description(&self) -> &'static str {
        panic!("description table corrupted");
    }

    async fn execute(&self, _request: &ResponderRequest, _deadline: Instant) -> Result<ResponderAnswer> {
        Ok(ResponderAnswer::text("Index funds track a market index."))
    }
}
