//! Gemini generateContent adapter
//!
//! The only backend in the set with native video support: a clip is sent as a
//! single inline `video/mp4` part. Frames travel as inline JPEG parts.

use super::{encode_payload, parse_reply, ProviderAdapter, ProviderId, RawAnalysis};
use crate::config::ProviderEndpoint;
use crate::error::{Error, Result};
use crate::models::{Evidence, EvidenceKind, EvidencePayload};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub struct GeminiAdapter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    cost_per_1k_tokens_usd: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u64,
}

impl GeminiAdapter {
    pub fn from_endpoint(endpoint: &ProviderEndpoint, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key: endpoint.api_key.clone(),
            model: endpoint.model.clone(),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            cost_per_1k_tokens_usd: endpoint.cost_per_1k_tokens_usd,
        }
    }

    fn inline_part(mime_type: &str, data: &[u8]) -> serde_json::Value {
        json!({
            "inline_data": {
                "mime_type": mime_type,
                "data": encode_payload(data)
            }
        })
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn supports(&self, _kind: EvidenceKind) -> bool {
        true
    }

    fn cost_per_1k_tokens(&self) -> f64 {
        self.cost_per_1k_tokens_usd
    }

    async fn invoke(&self, evidence: &Evidence, prompt: &str) -> Result<RawAnalysis> {
        let mut parts = Vec::new();
        match &evidence.payload {
            EvidencePayload::Frame(frame) => {
                parts.push(Self::inline_part("image/jpeg", frame));
            }
            EvidencePayload::Frames(frames) => {
                parts.extend(frames.iter().map(|f| Self::inline_part("image/jpeg", f)));
            }
            EvidencePayload::Clip(clip) => {
                parts.push(Self::inline_part("video/mp4", clip));
            }
        }
        parts.push(json!({"text": prompt}));

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = json!({"contents": [{"parts": parts}]});

        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.id().to_string(),
                message: format!("{} - {}", status, body),
            });
        }

        let parsed: GenerateResponse = resp.json().await?;
        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.iter().find_map(|p| p.text.as_deref()))
            .ok_or_else(|| Error::Provider {
                provider: self.id().to_string(),
                message: "no text part in response".to_string(),
            })?;

        let (description, detected_object_types, confidence) = parse_reply(text);
        Ok(RawAnalysis {
            description,
            confidence,
            tokens_used: parsed
                .usage_metadata
                .map(|u| u.total_token_count)
                .unwrap_or(0),
            detected_object_types,
        })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/v1beta/models?key={}", self.base_url, self.api_key);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_all_evidence_kinds() {
        let a = GeminiAdapter::from_endpoint(
            &ProviderEndpoint {
                api_key: "test-key".to_string(),
                model: "gemini-1.5-flash".to_string(),
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                cost_per_1k_tokens_usd: 0.0075,
            },
            Duration::from_secs(5),
        );
        assert!(a.supports(EvidenceKind::SingleFrame));
        assert!(a.supports(EvidenceKind::MultiFrame));
        assert!(a.supports(EvidenceKind::Clip));
    }
}
