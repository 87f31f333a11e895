//! Scripted in-process provider
//!
//! Stands in for a real backend in development mode and tests: replies come
//! from a FIFO script, falling back to a canned description when the script
//! runs dry. Capability set is configurable so capability-skip paths can be
//! exercised.

use super::{ProviderAdapter, ProviderId, RawAnalysis};
use crate::error::{Error, Result};
use crate::models::{Evidence, EvidenceKind};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

enum ScriptedReply {
    Success(RawAnalysis),
    Failure(String),
}

pub struct StubAdapter {
    supported: HashSet<EvidenceKind>,
    script: Mutex<VecDeque<ScriptedReply>>,
    invocations: AtomicU64,
    cost_per_1k_tokens_usd: f64,
}

impl StubAdapter {
    pub fn new() -> Self {
        Self {
            supported: [
                EvidenceKind::SingleFrame,
                EvidenceKind::MultiFrame,
                EvidenceKind::Clip,
            ]
            .into_iter()
            .collect(),
            script: Mutex::new(VecDeque::new()),
            invocations: AtomicU64::new(0),
            cost_per_1k_tokens_usd: 0.0,
        }
    }

    /// Restrict the capability set (default: everything)
    pub fn supporting(mut self, kinds: impl IntoIterator<Item = EvidenceKind>) -> Self {
        self.supported = kinds.into_iter().collect();
        self
    }

    pub fn with_cost_per_1k_tokens(mut self, rate: f64) -> Self {
        self.cost_per_1k_tokens_usd = rate;
        self
    }

    /// Queue a successful reply
    pub fn enqueue_success(
        &self,
        description: impl Into<String>,
        object_types: impl IntoIterator<Item = &'static str>,
        confidence: f32,
        tokens_used: u64,
    ) {
        let reply = RawAnalysis {
            description: description.into(),
            confidence,
            tokens_used,
            detected_object_types: object_types.into_iter().map(str::to_string).collect(),
        };
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Success(reply));
    }

    /// Queue a failed attempt
    pub fn enqueue_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Failure(message.into()));
    }

    /// How many times invoke() has been called
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}

impl Default for StubAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Stub
    }

    fn supports(&self, kind: EvidenceKind) -> bool {
        self.supported.contains(&kind)
    }

    fn cost_per_1k_tokens(&self) -> f64 {
        self.cost_per_1k_tokens_usd
    }

    async fn invoke(&self, evidence: &Evidence, _prompt: &str) -> Result<RawAnalysis> {
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(ScriptedReply::Success(reply)) => Ok(reply),
            Some(ScriptedReply::Failure(message)) => Err(Error::Provider {
                provider: self.id().to_string(),
                message,
            }),
            None => {
                let confidence = rand::thread_rng().gen_range(0.6..0.9);
                Ok(RawAnalysis {
                    description: format!(
                        "Nothing notable in {} evidence.",
                        evidence.kind.as_str()
                    ),
                    confidence,
                    tokens_used: 0,
                    detected_object_types: HashSet::new(),
                })
            }
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_is_fifo_then_canned() {
        let stub = StubAdapter::new();
        stub.enqueue_success("A person at the door.", ["person"], 0.9, 120);
        stub.enqueue_failure("rate limited");

        let evidence = Evidence::single_frame(vec![1]);

        let first = stub.invoke(&evidence, "p").await.unwrap();
        assert_eq!(first.description, "A person at the door.");
        assert!(first.detected_object_types.contains("person"));

        assert!(stub.invoke(&evidence, "p").await.is_err());

        // Script exhausted: canned reply
        let third = stub.invoke(&evidence, "p").await.unwrap();
        assert!(third.description.contains("single_frame"));
        assert_eq!(stub.invocation_count(), 3);
    }

    #[tokio::test]
    async fn test_capability_restriction() {
        let stub = StubAdapter::new().supporting([EvidenceKind::SingleFrame]);
        assert!(stub.supports(EvidenceKind::SingleFrame));
        assert!(!stub.supports(EvidenceKind::Clip));
    }
}
