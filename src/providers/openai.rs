//! OpenAI chat-completions adapter
//!
//! Accepts one or more JPEG frames as data-URL image parts. No native video
//! support: clips must be downgraded to frames before reaching this adapter.

use super::{encode_payload, parse_reply, ProviderAdapter, ProviderId, RawAnalysis};
use crate::config::ProviderEndpoint;
use crate::error::{Error, Result};
use crate::models::{Evidence, EvidenceKind, EvidencePayload};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    cost_per_1k_tokens_usd: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

impl OpenAiAdapter {
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

    fn frame_part(frame: &[u8]) -> serde_json::Value {
        json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:image/jpeg;base64,{}", encode_payload(frame)),
                "detail": "low"
            }
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn supports(&self, kind: EvidenceKind) -> bool {
        matches!(kind, EvidenceKind::SingleFrame | EvidenceKind::MultiFrame)
    }

    fn cost_per_1k_tokens(&self) -> f64 {
        self.cost_per_1k_tokens_usd
    }

    async fn invoke(&self, evidence: &Evidence, prompt: &str) -> Result<RawAnalysis> {
        let mut content = vec![json!({"type": "text", "text": prompt})];
        match &evidence.payload {
            EvidencePayload::Frame(frame) => content.push(Self::frame_part(frame)),
            EvidencePayload::Frames(frames) => {
                content.extend(frames.iter().map(|f| Self::frame_part(f)));
            }
            EvidencePayload::Clip(_) => {
                return Err(Error::Provider {
                    provider: self.id().to_string(),
                    message: "native video not supported".to_string(),
                });
            }
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": content}],
            "max_tokens": 300,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.id().to_string(),
                message: format!("{} - {}", status, body),
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        let text = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| Error::Provider {
                provider: self.id().to_string(),
                message: "empty choices in response".to_string(),
            })?;

        let (description, detected_object_types, confidence) = parse_reply(text);
        Ok(RawAnalysis {
            description,
            confidence,
            tokens_used: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
            detected_object_types,
        })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> OpenAiAdapter {
        OpenAiAdapter::from_endpoint(
            &ProviderEndpoint {
                api_key: "test-key".to_string(),
                model: "gpt-4o-mini".to_string(),
                base_url: "https://api.openai.com/".to_string(),
                cost_per_1k_tokens_usd: 0.01,
            },
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_capabilities() {
        let a = adapter();
        assert!(a.supports(EvidenceKind::SingleFrame));
        assert!(a.supports(EvidenceKind::MultiFrame));
        assert!(!a.supports(EvidenceKind::Clip));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(adapter().base_url, "https://api.openai.com");
    }

    #[tokio::test]
    async fn test_clip_payload_rejected() {
        let a = adapter();
        let evidence = Evidence::clip(vec![0u8; 16], 0);
        let err = a.invoke(&evidence, "prompt").await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }
}
