//! AI vision provider adapters
//!
//! ## Responsibilities
//!
//! - Uniform contract over heterogeneous vision backends
//! - Capability reporting (single image / multi image / native video)
//! - Prompt construction and reply normalization
//!
//! ## Design
//!
//! Providers are a closed set of tagged variants behind the `ProviderAdapter`
//! trait. Adding a backend means adding one variant; the router never changes.

mod anthropic;
mod gemini;
mod openai;
mod stub;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
pub use stub::StubAdapter;

use crate::error::Result;
use crate::models::{Evidence, EvidenceKind, PromptContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identifier for a configured provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Gemini,
    Stub,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Gemini => "gemini",
            ProviderId::Stub => "stub",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized provider reply
#[derive(Debug, Clone)]
pub struct RawAnalysis {
    pub description: String,
    /// Clamped to [0, 1]
    pub confidence: f32,
    pub tokens_used: u64,
    pub detected_object_types: HashSet<String>,
}

/// Uniform interface over one AI vision backend
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Whether this backend accepts the evidence kind
    fn supports(&self, kind: EvidenceKind) -> bool;

    /// USD per 1k tokens for cost estimation
    fn cost_per_1k_tokens(&self) -> f64;

    /// Submit evidence with a prompt; one network round-trip
    async fn invoke(&self, evidence: &Evidence, prompt: &str) -> Result<RawAnalysis>;

    /// Cheap reachability probe; false on any failure
    async fn health_check(&self) -> bool;
}

/// Closed set of provider backends
pub enum Provider {
    OpenAi(OpenAiAdapter),
    Anthropic(AnthropicAdapter),
    Gemini(GeminiAdapter),
    Stub(StubAdapter),
}

#[async_trait]
impl ProviderAdapter for Provider {
    fn id(&self) -> ProviderId {
        match self {
            Provider::OpenAi(a) => a.id(),
            Provider::Anthropic(a) => a.id(),
            Provider::Gemini(a) => a.id(),
            Provider::Stub(a) => a.id(),
        }
    }

    fn supports(&self, kind: EvidenceKind) -> bool {
        match self {
            Provider::OpenAi(a) => a.supports(kind),
            Provider::Anthropic(a) => a.supports(kind),
            Provider::Gemini(a) => a.supports(kind),
            Provider::Stub(a) => a.supports(kind),
        }
    }

    fn cost_per_1k_tokens(&self) -> f64 {
        match self {
            Provider::OpenAi(a) => a.cost_per_1k_tokens(),
            Provider::Anthropic(a) => a.cost_per_1k_tokens(),
            Provider::Gemini(a) => a.cost_per_1k_tokens(),
            Provider::Stub(a) => a.cost_per_1k_tokens(),
        }
    }

    async fn invoke(&self, evidence: &Evidence, prompt: &str) -> Result<RawAnalysis> {
        match self {
            Provider::OpenAi(a) => a.invoke(evidence, prompt).await,
            Provider::Anthropic(a) => a.invoke(evidence, prompt).await,
            Provider::Gemini(a) => a.invoke(evidence, prompt).await,
            Provider::Stub(a) => a.invoke(evidence, prompt).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            Provider::OpenAi(a) => a.health_check().await,
            Provider::Anthropic(a) => a.health_check().await,
            Provider::Gemini(a) => a.health_check().await,
            Provider::Stub(a) => a.health_check().await,
        }
    }
}

/// Build the analysis prompt from camera context hints
pub fn build_prompt(ctx: &PromptContext) -> String {
    let mut prompt = String::from(
        "You are a security camera analyst. Describe what is happening in the \
         provided footage in one or two factual sentences.",
    );

    if let Some(ref location) = ctx.location_hint {
        prompt.push_str(&format!(" The camera watches: {}.", location));
    }
    if !ctx.expected_objects.is_empty() {
        prompt.push_str(&format!(
            " Commonly seen here: {}.",
            ctx.expected_objects.join(", ")
        ));
    }
    if let Some(ref hint) = ctx.raw_hint {
        prompt.push_str(&format!(" The motion detector pre-classified this as: {}.", hint));
    }

    prompt.push_str(
        " Reply with strict JSON only: {\"description\": \"...\", \
         \"object_types\": [\"person\", \"vehicle\", ...], \"confidence\": 0.0-1.0}. \
         Use lowercase singular object type names.",
    );
    prompt
}

#[derive(Debug, Deserialize)]
struct StructuredReply {
    description: String,
    #[serde(default)]
    object_types: Vec<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Confidence assumed when a provider answers in prose instead of JSON
const FALLBACK_CONFIDENCE: f32 = 0.7;

/// Normalize a provider's text reply into description/objects/confidence
///
/// Models are instructed to answer strict JSON but do not always comply; a
/// non-JSON reply is kept verbatim as the description.
pub fn parse_reply(text: &str) -> (String, HashSet<String>, f32) {
    let trimmed = strip_code_fence(text.trim());

    if let Ok(reply) = serde_json::from_str::<StructuredReply>(trimmed) {
        let objects = reply
            .object_types
            .into_iter()
            .map(|o| o.trim().to_lowercase())
            .filter(|o| !o.is_empty())
            .collect();
        let confidence = reply
            .confidence
            .unwrap_or(FALLBACK_CONFIDENCE)
            .clamp(0.0, 1.0);
        return (reply.description, objects, confidence);
    }

    (trimmed.to_string(), HashSet::new(), FALLBACK_CONFIDENCE)
}

/// Strip a ```json ... ``` fence if the model wrapped its reply in one
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim().strip_suffix("```").unwrap_or(rest).trim()
}

/// Base64 for image/video payloads in provider requests
pub(crate) fn encode_payload(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}
