//! Request audit trail
//!
//! Every terminal request leaves one record. Records are observability only;
//! nothing here is read back into later requests. The log holds a bounded
//! number of records and evicts the oldest first.

use crate::config::DEFAULT_AUDIT_CAPACITY;
use crate::models::{Intent, OrchestrationResponse, ResponderId, ResponderTiming, WorkflowStage};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: Uuid,
    pub session_id: String,
    /// SHA-256 of the user message; the message itself is not retained
    pub message_hash: String,
    pub detected_intents: Vec<Intent>,
    pub selected_responders: Vec<ResponderId>,
    pub per_responder_timings: Vec<ResponderTiming>,
    pub confidence: f32,
    pub stage: WorkflowStage,
    pub stage_trace: Vec<String>,
    pub total_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl RequestRecord {
    pub fn from_response(message: &str, response: &OrchestrationResponse) -> Self {
        Self {
            request_id: response.request_id,
            session_id: response.session_id.clone(),
            message_hash: compute_message_hash(message),
            detected_intents: response.detected_intents.clone(),
            selected_responders: response.selected_responders.clone(),
            per_responder_timings: response.per_responder_timings.clone(),
            confidence: response.confidence,
            stage: response.stage,
            stage_trace: response.stage_trace.clone(),
            total_time_ms: response.total_time_ms,
            created_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct AuditStore {
    records: HashMap<Uuid, RequestRecord>,
    /// Insertion order, oldest at the front
    order: VecDeque<Uuid>,
}

/// Audit trail storage
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<RwLock<AuditStore>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }

    /// Keep at most `capacity` records (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(AuditStore::default())),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, record: RequestRecord) -> Result<Uuid> {
        let request_id = record.request_id;
        let mut store = self.store.write().await;

        if store.records.insert(request_id, record).is_none() {
            store.order.push_back(request_id);
        }
        while store.order.len() > self.capacity {
            if let Some(evicted) = store.order.pop_front() {
                store.records.remove(&evicted);
                debug!(request_id = %evicted, "Audit record evicted");
            }
        }

        Ok(request_id)
    }

    pub async fn get(&self, request_id: Uuid) -> Result<Option<RequestRecord>> {
        let store = self.store.read().await;
        Ok(store.records.get(&request_id).cloned())
    }

    /// Request ids for a session, oldest first
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Uuid>> {
        let store = self.store.read().await;

        Ok(store
            .order
            .iter()
            .filter(|id| {
                store
                    .records
                    .get(*id)
                    .is_some_and(|record| record.session_id == session_id)
            })
            .copied()
            .collect())
    }

    /// Whether `message` is the one recorded for `request_id`
    pub async fn verify_message(&self, request_id: Uuid, message: &str) -> Result<bool> {
        let store = self.store.read().await;
        Ok(store
            .records
            .get(&request_id)
            .map(|record| record.message_hash == compute_message_hash(message))
            .unwrap_or(false))
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

pub fn compute_message_hash(message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractedEntities, WorkflowStage};

    fn response(session_id: &str) -> OrchestrationResponse {
        OrchestrationResponse {
            request_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            final_response: "answer".to_string(),
            final_citations: vec![],
            confidence: 0.8,
            sections: vec![],
            detected_intents: vec![Intent::EducationQuestion],
            extracted_entities: ExtractedEntities::default(),
            selected_responders: vec![ResponderId::FinanceQa],
            per_responder_timings: vec![],
            errors: vec![],
            stage: WorkflowStage::Done,
            stage_trace: vec!["DONE: response ready".to_string()],
            total_time_ms: 12,
        }
    }

    #[tokio::test]
    async fn test_record_and_lookup() {
        let log = AuditLog::new();
        let response = response("session-a");
        let id = log
            .record(RequestRecord::from_response("What is an ETF?", &response))
            .await
            .unwrap();

        let stored = log.get(id).await.unwrap().unwrap();
        assert_eq!(stored.session_id, "session-a");
        assert_eq!(stored.message_hash.len(), 64);
        assert!(log.verify_message(id, "What is an ETF?").await.unwrap());
        assert!(!log.verify_message(id, "What is a bond?").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_for_session() {
        let log = AuditLog::new();
        for session in ["a", "b", "a"] {
            let response = response(session);
            log.record(RequestRecord::from_response("question", &response))
                .await
                .unwrap();
        }
        assert_eq!(log.list_for_session("a").await.unwrap().len(), 2);
        assert!(log.list_for_session("c").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oldest_record_is_evicted() {
        let log = AuditLog::with_capacity(2);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let response = response("session-a");
            ids.push(
                log.record(RequestRecord::from_response("question", &response))
                    .await
                    .unwrap(),
            );
        }

        assert!(log.get(ids[0]).await.unwrap().is_none());
        assert!(log.get(ids[1]).await.unwrap().is_some());
        assert!(log.get(ids[2]).await.unwrap().is_some());
        assert_eq!(log.list_for_session("session-a").await.unwrap(), ids[1..].to_vec());
    }

    #[tokio::test]
    async fn test_rerecording_does_not_evict() {
        let log = AuditLog::with_capacity(2);
        let first = response("session-a");
        let second = response("session-a");
        log.record(RequestRecord::from_response("q1", &first)).await.unwrap();
        log.record(RequestRecord::from_response("q2", &second)).await.unwrap();
        log.record(RequestRecord::from_response("q1", &first)).await.unwrap();

        assert!(log.get(first.request_id).await.unwrap().is_some());
        assert!(log.get(second.request_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_zero_capacity_keeps_latest() {
        let log = AuditLog::with_capacity(0);
        let first = log
            .record(RequestRecord::from_response("q1", &response("s")))
            .await
            .unwrap();
        let second = log
            .record(RequestRecord::from_response("q2", &response("s")))
            .await
            .unwrap();

        assert!(log.get(first).await.unwrap().is_none());
        assert!(log.get(second).await.unwrap().is_some());
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(compute_message_hash("abc"), compute_message_hash("abc"));
        assert_ne!(compute_message_hash("abc"), compute_message_hash("abd"));
    }
}
