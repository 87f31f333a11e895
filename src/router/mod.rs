//! AnalysisRouter - Provider Fallback Chain
//!
//! ## Responsibilities
//!
//! - Walk the configured provider precedence list against the evidence
//! - Skip incapable providers without penalty
//! - Degrade the evidence tier when a cost cap is hit (pre-emptively) or when
//!   every provider at the current tier has failed
//! - Record usage on success, never on skip or failure
//!
//! Provider order is a strict precedence list, not a race: one provider is in
//! flight per event at any moment.

use crate::config::{CapAction, PipelineConfig};
use crate::cost_tracker::CostTracker;
use crate::error::{Error, Result};
use crate::evidence::{Acquired, EvidenceAcquirer};
use crate::models::{
    AnalysisResult, DetectionEvent, Evidence, EvidenceKind, EvidencePayload, PromptContext,
};
use crate::providers::{
    build_prompt, AnthropicAdapter, GeminiAdapter, OpenAiAdapter, Provider, ProviderAdapter,
    ProviderId, StubAdapter,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// AnalysisRouter instance
pub struct AnalysisRouter {
    providers: Vec<Provider>,
    acquirer: Arc<EvidenceAcquirer>,
    cost: Arc<CostTracker>,
}

impl AnalysisRouter {
    /// Create router over an explicit provider set (precedence still comes
    /// from configuration at analyze time)
    pub fn new(
        providers: Vec<Provider>,
        acquirer: Arc<EvidenceAcquirer>,
        cost: Arc<CostTracker>,
    ) -> Self {
        Self {
            providers,
            acquirer,
            cost,
        }
    }

    /// Build adapters for every endpoint configured in the snapshot
    pub fn from_config(
        config: &PipelineConfig,
        acquirer: Arc<EvidenceAcquirer>,
        cost: Arc<CostTracker>,
    ) -> Self {
        let timeout = Duration::from_secs(config.timeouts.provider_call_secs);
        let mut providers = Vec::new();

        if let Some(ref endpoint) = config.providers.openai {
            providers.push(Provider::OpenAi(OpenAiAdapter::from_endpoint(
                endpoint, timeout,
            )));
        }
        if let Some(ref endpoint) = config.providers.anthropic {
            providers.push(Provider::Anthropic(AnthropicAdapter::from_endpoint(
                endpoint, timeout,
            )));
        }
        if let Some(ref endpoint) = config.providers.gemini {
            providers.push(Provider::Gemini(GeminiAdapter::from_endpoint(
                endpoint, timeout,
            )));
        }
        if config.providers.stub_enabled {
            providers.push(Provider::Stub(StubAdapter::new()));
        }

        Self::new(providers, acquirer, cost)
    }

    fn provider(&self, id: ProviderId) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// Probe every configured backend concurrently
    pub async fn health_check(&self) -> HashMap<ProviderId, bool> {
        let probes = self
            .providers
            .iter()
            .map(|p| async { (p.id(), p.health_check().await) });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    /// Run acquired evidence through the fallback chain
    ///
    /// Fails only when every configured provider is exhausted at every
    /// reachable tier, or when a mid-chain re-acquisition fails outright.
    pub async fn analyze(
        &self,
        event: &DetectionEvent,
        prompt_context: &PromptContext,
        acquired: Acquired,
        frame_count: usize,
        config: &PipelineConfig,
    ) -> Result<AnalysisResult> {
        let Acquired {
            mut evidence,
            fallback_reasons: mut reasons,
        } = acquired;

        let order = config.provider_order_for(&event.camera_id);
        let provider_timeout = Duration::from_secs(config.timeouts.provider_call_secs);
        let prompt = build_prompt(prompt_context);

        loop {
            // Pre-emptive cap enforcement: degrade before any network call
            while evidence.kind != EvidenceKind::SingleFrame
                && config.cost.action_on_cap == CapAction::ForceCheapestMode
                && !self.cost.within_all_caps().await
            {
                let from = evidence.kind;
                let (next, extra) = self.degrade_one(event, evidence, frame_count).await?;
                tracing::info!(
                    camera_id = %event.camera_id,
                    from = from.as_str(),
                    to = next.kind.as_str(),
                    "Cost cap exceeded, force-degrading evidence tier"
                );
                reasons.push(format!(
                    "cost cap exceeded, degraded {} to {}",
                    from.as_str(),
                    next.kind.as_str()
                ));
                if let Some(r) = extra {
                    reasons.push(r);
                }
                evidence = next;
            }

            let kind = evidence.kind;

            for &provider_id in order {
                let Some(provider) = self.provider(provider_id) else {
                    tracing::debug!(provider = %provider_id, "Provider in order but not configured");
                    continue;
                };

                if !provider.supports(kind) {
                    // Not a failure and never cost-tracked
                    reasons.push(format!(
                        "provider {} lacks {} support, skipped",
                        provider_id,
                        kind.as_str()
                    ));
                    continue;
                }

                match tokio::time::timeout(provider_timeout, provider.invoke(&evidence, &prompt))
                    .await
                {
                    Ok(Ok(raw)) => {
                        let cost_estimate_usd = self
                            .cost
                            .record(&event.camera_id, provider_id, kind.mode(), raw.tokens_used)
                            .await;

                        tracing::info!(
                            camera_id = %event.camera_id,
                            event_id = %event.event_id,
                            provider = %provider_id,
                            mode = kind.as_str(),
                            tokens = raw.tokens_used,
                            "Analysis completed"
                        );

                        return Ok(AnalysisResult {
                            event_id: event.event_id,
                            camera_id: event.camera_id.clone(),
                            description: raw.description,
                            confidence: raw.confidence.clamp(0.0, 1.0),
                            tokens_used: raw.tokens_used,
                            cost_estimate_usd,
                            provider_used: provider_id.to_string(),
                            mode_used: kind.mode(),
                            fallback_reasons: reasons,
                            detected_object_types: raw.detected_object_types,
                            completed_at: Utc::now(),
                        });
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(
                            camera_id = %event.camera_id,
                            provider = %provider_id,
                            error = %e,
                            "Provider attempt failed, trying next in order"
                        );
                        reasons.push(format!("provider {} failed: {}", provider_id, e));
                    }
                    Err(_) => {
                        tracing::warn!(
                            camera_id = %event.camera_id,
                            provider = %provider_id,
                            timeout_secs = provider_timeout.as_secs(),
                            "Provider attempt timed out, trying next in order"
                        );
                        reasons.push(format!(
                            "provider {} timed out after {}s",
                            provider_id,
                            provider_timeout.as_secs()
                        ));
                    }
                }
            }

            // Every provider skipped or failed at this tier
            if kind == EvidenceKind::SingleFrame {
                return Err(Error::ProviderExhausted {
                    camera_id: event.camera_id.clone(),
                    message: reasons.join("; "),
                });
            }

            let (next, extra) = self.degrade_one(event, evidence, frame_count).await?;
            reasons.push(format!(
                "no provider succeeded at {}, degraded to {}",
                kind.as_str(),
                next.kind.as_str()
            ));
            if let Some(r) = extra {
                reasons.push(r);
            }
            evidence = next;
        }
    }

    /// Drop evidence one tier, re-extracting frames when needed
    ///
    /// A held clip is sampled without re-downloading; a frame set collapses to
    /// its first (already sharpness-checked) frame.
    async fn degrade_one(
        &self,
        event: &DetectionEvent,
        evidence: Evidence,
        frame_count: usize,
    ) -> Result<(Evidence, Option<String>)> {
        match evidence.payload {
            EvidencePayload::Clip(clip) => {
                match self
                    .acquirer
                    .sample_clip_frames(&event.camera_id, &clip, frame_count)
                    .await
                {
                    Ok(frames) => Ok((Evidence::multi_frame(frames), None)),
                    Err(e) => {
                        // Clip unusable for sampling: fall straight to a fresh still
                        let single = self
                            .acquirer
                            .acquire(event, crate::models::AnalysisMode::SingleFrame, 1)
                            .await?;
                        Ok((
                            single.evidence,
                            Some(format!(
                                "frame sampling failed ({}), degraded to single_frame",
                                e
                            )),
                        ))
                    }
                }
            }
            EvidencePayload::Frames(mut frames) => {
                let first = frames.drain(..1).next().ok_or_else(|| Error::Internal(
                    "multi_frame evidence with no frames".to_string(),
                ))?;
                Ok((Evidence::single_frame(first), None))
            }
            EvidencePayload::Frame(_) => Err(Error::Internal(
                "cannot degrade below single_frame".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, CostCaps, ProviderEndpoint};
    use crate::evidence::MediaSource;
    use crate::models::TriggerKind;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    struct NoMedia;

    #[async_trait]
    impl MediaSource for NoMedia {
        async fn latest_frame(&self, _camera_id: &str) -> Result<Vec<u8>> {
            Ok(vec![0xFF; 16])
        }

        async fn download_clip(&self, camera_id: &str, _at: DateTime<Utc>) -> Result<Vec<u8>> {
            Err(Error::Acquisition {
                camera_id: camera_id.to_string(),
                message: "no recorder in tests".to_string(),
            })
        }
    }

    struct Fixture {
        router: AnalysisRouter,
        config: Arc<PipelineConfig>,
        cost: Arc<CostTracker>,
    }

    async fn fixture(stub: StubAdapter, caps: CostCaps) -> Fixture {
        let mut config = PipelineConfig::default();
        config.provider_order = vec![ProviderId::Stub];
        config.providers.stub_enabled = true;
        config.providers.openai = Some(ProviderEndpoint {
            api_key: "k".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com".to_string(),
            cost_per_1k_tokens_usd: 0.01,
        });
        config.cost = caps;

        let store = Arc::new(ConfigStore::new(config));
        let snapshot = store.current().await;
        let cost = Arc::new(CostTracker::new(store.clone()));
        let acquirer = Arc::new(EvidenceAcquirer::new(
            Arc::new(NoMedia),
            std::env::temp_dir().join("argus-router-test"),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let router = AnalysisRouter::new(
            vec![Provider::Stub(stub)],
            acquirer,
            cost.clone(),
        );

        Fixture {
            router,
            config: snapshot,
            cost,
        }
    }

    fn stub_invocations(router: &AnalysisRouter) -> u64 {
        match router.provider(ProviderId::Stub) {
            Some(Provider::Stub(s)) => s.invocation_count(),
            _ => panic!("stub provider missing"),
        }
    }

    #[tokio::test]
    async fn test_success_records_usage_and_mode() {
        let stub = StubAdapter::new();
        stub.enqueue_success("A person walks by.", ["person"], 0.9, 250);
        let f = fixture(stub, CostCaps::default()).await;

        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let acquired = Acquired {
            evidence: Evidence::single_frame(vec![1, 2, 3]),
            fallback_reasons: Vec::new(),
        };

        let result = f
            .router
            .analyze(&event, &PromptContext::default(), acquired, 3, &f.config)
            .await
            .unwrap();

        assert_eq!(result.provider_used, "stub");
        assert_eq!(result.mode_used, crate::models::AnalysisMode::SingleFrame);
        assert_eq!(result.tokens_used, 250);
        assert!(result.fallback_reasons.is_empty());

        let records = f.cost.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request_count, 1);
    }

    #[tokio::test]
    async fn test_incapable_provider_skipped_without_usage_then_tier_drops() {
        // Stub only understands stills; multi-frame evidence must degrade
        let stub = StubAdapter::new().supporting([EvidenceKind::SingleFrame]);
        stub.enqueue_success("Quiet street.", [], 0.8, 100);
        let f = fixture(stub, CostCaps::default()).await;

        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let acquired = Acquired {
            evidence: Evidence::multi_frame(vec![vec![1], vec![2], vec![3]]),
            fallback_reasons: Vec::new(),
        };

        let result = f
            .router
            .analyze(&event, &PromptContext::default(), acquired, 3, &f.config)
            .await
            .unwrap();

        assert_eq!(result.mode_used, crate::models::AnalysisMode::SingleFrame);
        assert!(result
            .fallback_reasons
            .iter()
            .any(|r| r.contains("lacks multi_frame support")));
        assert!(result
            .fallback_reasons
            .iter()
            .any(|r| r.contains("degraded to single_frame")));

        // The skip was never cost-tracked; only the single-frame success was
        let records = f.cost.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].mode,
            crate::models::AnalysisMode::SingleFrame
        );
        assert_eq!(stub_invocations(&f.router), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_one_tier() {
        let stub = StubAdapter::new();
        stub.enqueue_failure("model overloaded");
        stub.enqueue_success("Empty yard.", [], 0.85, 80);
        let f = fixture(stub, CostCaps::default()).await;

        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let acquired = Acquired {
            evidence: Evidence::multi_frame(vec![vec![1], vec![2]]),
            fallback_reasons: Vec::new(),
        };

        let result = f
            .router
            .analyze(&event, &PromptContext::default(), acquired, 2, &f.config)
            .await
            .unwrap();

        assert_eq!(result.mode_used, crate::models::AnalysisMode::SingleFrame);
        assert!(result
            .fallback_reasons
            .iter()
            .any(|r| r.contains("model overloaded")));
        assert!(result
            .fallback_reasons
            .iter()
            .any(|r| r.contains("no provider succeeded at multi_frame")));
    }

    #[tokio::test]
    async fn test_exhaustion_at_single_frame_is_terminal() {
        let stub = StubAdapter::new();
        stub.enqueue_failure("bad gateway");
        let f = fixture(stub, CostCaps::default()).await;

        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let acquired = Acquired {
            evidence: Evidence::single_frame(vec![1]),
            fallback_reasons: Vec::new(),
        };

        let err = f
            .router
            .analyze(&event, &PromptContext::default(), acquired, 1, &f.config)
            .await
            .unwrap_err();
        assert_matches!(err, Error::ProviderExhausted { .. });
    }

    #[tokio::test]
    async fn test_cap_force_degrades_before_any_provider_call() {
        let stub = StubAdapter::new();
        stub.enqueue_success("Cat on the fence.", ["cat"], 0.8, 60);
        let caps = CostCaps {
            daily_usd: Some(0.005),
            monthly_usd: None,
            ..CostCaps::default()
        };
        let f = fixture(stub, caps).await;

        // Blow the daily cap: 1000 tokens of openai at 0.01/1k = 0.01 > 0.005
        f.cost
            .record(
                "cam-1",
                ProviderId::OpenAi,
                crate::models::AnalysisMode::SingleFrame,
                1000,
            )
            .await;
        assert!(!f.cost.within_all_caps().await);

        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let acquired = Acquired {
            evidence: Evidence::multi_frame(vec![vec![1], vec![2], vec![3]]),
            fallback_reasons: Vec::new(),
        };

        let result = f
            .router
            .analyze(&event, &PromptContext::default(), acquired, 3, &f.config)
            .await
            .unwrap();

        assert_eq!(result.mode_used, crate::models::AnalysisMode::SingleFrame);
        assert!(result
            .fallback_reasons
            .iter()
            .any(|r| r.contains("cost cap exceeded")));

        // Zero tokens recorded against the capped multi_frame tier
        let records = f.cost.snapshot().await;
        assert!(records
            .iter()
            .all(|r| r.mode != crate::models::AnalysisMode::MultiFrame));
        assert_eq!(stub_invocations(&f.router), 1);
    }
}
