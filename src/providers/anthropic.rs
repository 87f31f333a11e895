//! Anthropic messages adapter
//!
//! Frames travel as base64 image content blocks. No native video support.

use super::{encode_payload, parse_reply, ProviderAdapter, ProviderId, RawAnalysis};
use crate::config::ProviderEndpoint;
use crate::error::{Error, Result};
use crate::models::{Evidence, EvidenceKind, EvidencePayload};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    cost_per_1k_tokens_usd: f64,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl AnthropicAdapter {
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

    fn image_block(frame: &[u8]) -> serde_json::Value {
        json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": "image/jpeg",
                "data": encode_payload(frame)
            }
        })
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn supports(&self, kind: EvidenceKind) -> bool {
        matches!(kind, EvidenceKind::SingleFrame | EvidenceKind::MultiFrame)
    }

    fn cost_per_1k_tokens(&self) -> f64 {
        self.cost_per_1k_tokens_usd
    }

    async fn invoke(&self, evidence: &Evidence, prompt: &str) -> Result<RawAnalysis> {
        let mut content = Vec::new();
        match &evidence.payload {
            EvidencePayload::Frame(frame) => content.push(Self::image_block(frame)),
            EvidencePayload::Frames(frames) => {
                content.extend(frames.iter().map(|f| Self::image_block(f)));
            }
            EvidencePayload::Clip(_) => {
                return Err(Error::Provider {
                    provider: self.id().to_string(),
                    message: "native video not supported".to_string(),
                });
            }
        }
        content.push(json!({"type": "text", "text": prompt}));

        let url = format!("{}/v1/messages", self.base_url);
        let body = json!({
            "model": self.model,
            "max_tokens": 300,
            "messages": [{"role": "user", "content": content}],
        });

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

        let parsed: MessagesResponse = resp.json().await?;
        let text = parsed
            .content
            .iter()
            .find_map(|b| b.text.as_deref())
            .ok_or_else(|| Error::Provider {
                provider: self.id().to_string(),
                message: "no text block in response".to_string(),
            })?;

        let (description, detected_object_types, confidence) = parse_reply(text);
        let tokens_used = parsed
            .usage
            .map(|u| u.input_tokens + u.output_tokens)
            .unwrap_or(0);

        Ok(RawAnalysis {
            description,
            confidence,
            tokens_used,
            detected_object_types,
        })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        match self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let a = AnthropicAdapter::from_endpoint(
            &ProviderEndpoint {
                api_key: "test-key".to_string(),
                model: "claude-3-5-haiku-latest".to_string(),
                base_url: "https://api.anthropic.com".to_string(),
                cost_per_1k_tokens_usd: 0.012,
            },
            Duration::from_secs(5),
        );
        assert!(a.supports(EvidenceKind::SingleFrame));
        assert!(a.supports(EvidenceKind::MultiFrame));
        assert!(!a.supports(EvidenceKind::Clip));
    }
}
