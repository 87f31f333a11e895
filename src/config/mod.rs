//! Pipeline configuration
//!
//! ## Responsibilities
//!
//! - Camera analysis settings (mode, frame count, provider order override)
//! - Provider endpoints, keys, and token rates
//! - Cost caps and cap behavior
//! - Correlation window and concurrency bounds
//!
//! ## Design
//!
//! Configuration is an immutable snapshot injected at construction time.
//! `ConfigStore` holds the current snapshot behind an `Arc`; `replace` swaps it
//! atomically. In-flight evaluations keep the snapshot they started with, so a
//! reload never changes behavior mid-event.

use crate::models::{AnalysisMode, DetectionEvent, PromptContext};
use crate::providers::ProviderId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-camera analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera_id: String,
    pub name: String,
    pub enabled: bool,
    pub analysis_mode: AnalysisMode,
    /// Frames sampled from a clip in multi-frame mode
    pub frame_count: usize,
    /// Overrides the global provider precedence for this camera
    pub provider_order_override: Option<Vec<ProviderId>>,
    /// e.g. "front door", "parking lot", folded into the provider prompt
    pub location_hint: Option<String>,
    /// Object types this camera commonly sees
    pub expected_objects: Vec<String>,
}

impl CameraConfig {
    pub fn new(camera_id: impl Into<String>) -> Self {
        let camera_id = camera_id.into();
        Self {
            name: camera_id.clone(),
            camera_id,
            enabled: true,
            analysis_mode: AnalysisMode::SingleFrame,
            frame_count: 3,
            provider_order_override: None,
            location_hint: None,
            expected_objects: Vec::new(),
        }
    }

    /// Prompt context for one event from this camera
    pub fn prompt_context(&self, event: &DetectionEvent) -> PromptContext {
        PromptContext {
            location_hint: self.location_hint.clone(),
            expected_objects: self.expected_objects.clone(),
            raw_hint: event.raw_hint.clone(),
        }
    }
}

/// One AI provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// USD per 1k tokens, used for cost estimates
    pub cost_per_1k_tokens_usd: f64,
}

/// Configured provider backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub openai: Option<ProviderEndpoint>,
    pub anthropic: Option<ProviderEndpoint>,
    pub gemini: Option<ProviderEndpoint>,
    /// In-process scripted provider for development and tests
    pub stub_enabled: bool,
}

/// What the router does once a cost cap is exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapAction {
    /// Force-degrade to the cheapest evidence tier before any network call
    ForceCheapestMode,
    /// Log only; analysis proceeds at the configured tier
    LogOnly,
}

/// Spend ceilings; `None` means uncapped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostCaps {
    pub daily_usd: Option<f64>,
    pub monthly_usd: Option<f64>,
    pub action_on_cap: CapAction,
}

impl Default for CostCaps {
    fn default() -> Self {
        Self {
            daily_usd: None,
            monthly_usd: None,
            action_on_cap: CapAction::ForceCheapestMode,
        }
    }
}

/// How two events qualify as the same incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMatcher {
    /// Non-empty intersection of detected object types (baseline)
    ExactObjectType,
}

/// Correlation window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub window_seconds: u64,
    pub matcher: CorrelationMatcher,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_seconds: 10,
            matcher: CorrelationMatcher::ExactObjectType,
        }
    }
}

/// Deadlines for the pipeline's suspension points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    pub frame_fetch_secs: u64,
    pub clip_download_secs: u64,
    pub provider_call_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            frame_fetch_secs: 10,
            clip_download_secs: 15,
            provider_call_secs: 10,
        }
    }
}

/// Immutable configuration snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Global provider precedence; cameras may override
    pub provider_order: Vec<ProviderId>,
    pub providers: ProviderSettings,
    pub cameras: HashMap<String, CameraConfig>,
    pub cost: CostCaps,
    pub correlation: CorrelationConfig,
    pub timeouts: Timeouts,
    /// Concurrent in-flight analyses per camera
    pub per_camera_inflight: usize,
    /// Scratch directory for clip frame extraction
    pub temp_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider_order: vec![ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Gemini],
            providers: ProviderSettings {
                openai: std::env::var("OPENAI_API_KEY").ok().map(|key| ProviderEndpoint {
                    api_key: key,
                    model: "gpt-4o-mini".to_string(),
                    base_url: "https://api.openai.com".to_string(),
                    cost_per_1k_tokens_usd: 0.01,
                }),
                anthropic: std::env::var("ANTHROPIC_API_KEY").ok().map(|key| {
                    ProviderEndpoint {
                        api_key: key,
                        model: "claude-3-5-haiku-latest".to_string(),
                        base_url: "https://api.anthropic.com".to_string(),
                        cost_per_1k_tokens_usd: 0.012,
                    }
                }),
                gemini: std::env::var("GEMINI_API_KEY").ok().map(|key| ProviderEndpoint {
                    api_key: key,
                    model: "gemini-1.5-flash".to_string(),
                    base_url: "https://generativelanguage.googleapis.com".to_string(),
                    cost_per_1k_tokens_usd: 0.0075,
                }),
                stub_enabled: false,
            },
            cameras: HashMap::new(),
            cost: CostCaps::default(),
            correlation: CorrelationConfig::default(),
            timeouts: Timeouts::default(),
            per_camera_inflight: 1,
            temp_dir: std::env::var("ARGUS_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("argus")),
        }
    }
}

impl PipelineConfig {
    pub fn camera(&self, camera_id: &str) -> Option<&CameraConfig> {
        self.cameras.get(camera_id)
    }

    /// Effective provider precedence for a camera
    pub fn provider_order_for(&self, camera_id: &str) -> &[ProviderId] {
        self.cameras
            .get(camera_id)
            .and_then(|c| c.provider_order_override.as_deref())
            .unwrap_or(&self.provider_order)
    }

    /// Whether a camera exists and is enabled in this snapshot
    pub fn camera_enabled(&self, camera_id: &str) -> bool {
        self.cameras.get(camera_id).map(|c| c.enabled).unwrap_or(false)
    }
}

/// Holds the current configuration snapshot
pub struct ConfigStore {
    snapshot: RwLock<Arc<PipelineConfig>>,
}

impl ConfigStore {
    /// Create store with an initial snapshot
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(config)),
        }
    }

    /// Get the current snapshot (cheap Arc clone)
    pub async fn current(&self) -> Arc<PipelineConfig> {
        self.snapshot.read().await.clone()
    }

    /// Swap in a rebuilt snapshot; in-flight events keep the old one
    pub async fn replace(&self, config: PipelineConfig) {
        let mut snapshot = self.snapshot.write().await;
        *snapshot = Arc::new(config);
        tracing::info!(
            cameras = snapshot.cameras.len(),
            "Configuration snapshot replaced"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_order_override() {
        let mut config = PipelineConfig::default();
        let mut cam = CameraConfig::new("cam-1");
        cam.provider_order_override = Some(vec![ProviderId::Gemini]);
        config.cameras.insert("cam-1".to_string(), cam);
        config.cameras.insert("cam-2".to_string(), CameraConfig::new("cam-2"));

        assert_eq!(config.provider_order_for("cam-1"), &[ProviderId::Gemini]);
        assert_eq!(config.provider_order_for("cam-2"), config.provider_order.as_slice());
        // Unknown cameras fall back to the global order too
        assert_eq!(config.provider_order_for("cam-x"), config.provider_order.as_slice());
    }

    #[tokio::test]
    async fn test_snapshot_isolation_across_replace() {
        let store = ConfigStore::new(PipelineConfig::default());
        let before = store.current().await;

        let mut next = PipelineConfig::default();
        next.cameras.insert("cam-1".to_string(), CameraConfig::new("cam-1"));
        store.replace(next).await;

        // The old snapshot is unchanged; the new one sees the camera
        assert!(before.cameras.is_empty());
        assert!(store.current().await.camera("cam-1").is_some());
    }
}
