//! Shared data models
//!
//! Types that cross component boundaries. Component-local types (usage buckets,
//! alert rules, correlation groups) live with their owning module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// What fired the camera event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Motion,
    SmartDetection,
    Manual,
    Doorbell,
}

/// Discrete "something happened on camera X" signal
///
/// Produced by the capture/motion-detection layer; immutable; consumed exactly
/// once by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub event_id: Uuid,
    pub camera_id: String,
    pub occurred_at: DateTime<Utc>,
    pub trigger: TriggerKind,
    /// Pre-classification hint from the detector (e.g. "person")
    pub raw_hint: Option<String>,
}

impl DetectionEvent {
    /// Convenience constructor for events arriving now
    pub fn new(camera_id: impl Into<String>, trigger: TriggerKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            camera_id: camera_id.into(),
            occurred_at: Utc::now(),
            trigger,
            raw_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.raw_hint = Some(hint.into());
        self
    }
}

/// How a camera's events are analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    SingleFrame,
    MultiFrame,
    VideoNative,
}

impl AnalysisMode {
    /// The next cheaper mode, if any
    pub fn degraded(self) -> Option<AnalysisMode> {
        match self {
            AnalysisMode::VideoNative => Some(AnalysisMode::MultiFrame),
            AnalysisMode::MultiFrame => Some(AnalysisMode::SingleFrame),
            AnalysisMode::SingleFrame => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::SingleFrame => "single_frame",
            AnalysisMode::MultiFrame => "multi_frame",
            AnalysisMode::VideoNative => "video_native",
        }
    }

    /// The evidence kind this mode produces
    pub fn evidence_kind(&self) -> EvidenceKind {
        match self {
            AnalysisMode::SingleFrame => EvidenceKind::SingleFrame,
            AnalysisMode::MultiFrame => EvidenceKind::MultiFrame,
            AnalysisMode::VideoNative => EvidenceKind::Clip,
        }
    }
}

/// Shape of the visual payload submitted to a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    SingleFrame,
    MultiFrame,
    Clip,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::SingleFrame => "single_frame",
            EvidenceKind::MultiFrame => "multi_frame",
            EvidenceKind::Clip => "clip",
        }
    }

    /// The analysis mode that produces this kind
    pub fn mode(&self) -> AnalysisMode {
        match self {
            EvidenceKind::SingleFrame => AnalysisMode::SingleFrame,
            EvidenceKind::MultiFrame => AnalysisMode::MultiFrame,
            EvidenceKind::Clip => AnalysisMode::VideoNative,
        }
    }
}

/// Visual payload for one analysis attempt
///
/// Transient: lives for the duration of the attempt, dropped on every exit path.
/// Never written to durable storage.
#[derive(Debug, Clone)]
pub enum EvidencePayload {
    /// One JPEG still
    Frame(Vec<u8>),
    /// Sampled JPEG frames in clip order
    Frames(Vec<Vec<u8>>),
    /// Short MP4 clip, unmodified
    Clip(Vec<u8>),
}

/// Evidence handed to the analysis router
#[derive(Debug, Clone)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub payload: EvidencePayload,
    pub frame_count: usize,
}

impl Evidence {
    pub fn single_frame(data: Vec<u8>) -> Self {
        Self {
            kind: EvidenceKind::SingleFrame,
            payload: EvidencePayload::Frame(data),
            frame_count: 1,
        }
    }

    pub fn multi_frame(frames: Vec<Vec<u8>>) -> Self {
        let frame_count = frames.len();
        Self {
            kind: EvidenceKind::MultiFrame,
            payload: EvidencePayload::Frames(frames),
            frame_count,
        }
    }

    pub fn clip(data: Vec<u8>, frame_count: usize) -> Self {
        Self {
            kind: EvidenceKind::Clip,
            payload: EvidencePayload::Clip(data),
            frame_count,
        }
    }
}

/// Finished analysis for one event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub event_id: Uuid,
    pub camera_id: String,
    /// Natural-language description of what the camera saw
    pub description: String,
    /// Provider confidence, clamped to [0, 1]
    pub confidence: f32,
    pub tokens_used: u64,
    pub cost_estimate_usd: f64,
    pub provider_used: String,
    pub mode_used: AnalysisMode,
    /// Ordered degradation/skip trail; empty when the first choice succeeded
    pub fallback_reasons: Vec<String>,
    pub detected_object_types: HashSet<String>,
    pub completed_at: DateTime<Utc>,
}

/// Camera context hints folded into the provider prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptContext {
    /// e.g. "front door", "parking lot"
    pub location_hint: Option<String>,
    /// Object types this camera commonly sees
    pub expected_objects: Vec<String>,
    /// Detector pre-classification passed through from the event
    pub raw_hint: Option<String>,
}

/// Terminal pipeline failure, reported to the observability sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub event_id: Uuid,
    pub camera_id: String,
    /// Error code (`ACQUISITION_FAILED`, `PROVIDER_EXHAUSTED`, ...)
    pub kind: String,
    pub message: String,
    /// Degradation trail accumulated before the failure
    pub fallback_reasons: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_degradation_chain() {
        assert_eq!(
            AnalysisMode::VideoNative.degraded(),
            Some(AnalysisMode::MultiFrame)
        );
        assert_eq!(
            AnalysisMode::MultiFrame.degraded(),
            Some(AnalysisMode::SingleFrame)
        );
        assert_eq!(AnalysisMode::SingleFrame.degraded(), None);
    }

    #[test]
    fn test_evidence_kind_mode_round_trip() {
        for kind in [
            EvidenceKind::SingleFrame,
            EvidenceKind::MultiFrame,
            EvidenceKind::Clip,
        ] {
            assert_eq!(kind.mode().evidence_kind(), kind);
        }
    }
}
