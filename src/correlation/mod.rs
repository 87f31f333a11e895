//! CorrelationService - Incident Grouping
//!
//! ## Responsibilities
//!
//! - Keep a rolling window of recently completed results
//! - Tag a new result that likely describes the same real-world incident as an
//!   earlier one from a different camera
//!
//! ## Design
//!
//! A single mutex guards the buffer so concurrent events from different cameras
//! see a consistent view. Entries older than the window are evicted lazily on
//! each call; the buffer is bounded by window length x camera chattiness, not
//! by history size. This service must never fail the pipeline: internal errors
//! are swallowed and logged, answering "no group".

use crate::config::{ConfigStore, CorrelationMatcher};
use crate::error::{Error, Result};
use crate::models::{AnalysisResult, DetectionEvent};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Events from distinct cameras believed to describe one incident
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationGroup {
    pub group_id: Uuid,
    /// Member event ids in arrival order
    pub member_event_ids: Vec<Uuid>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug)]
struct BufferEntry {
    event_id: Uuid,
    camera_id: String,
    occurred_at: DateTime<Utc>,
    arrived_at: DateTime<Utc>,
    object_types: HashSet<String>,
    group_id: Option<Uuid>,
}

#[derive(Default)]
struct CorrelationBuffer {
    entries: VecDeque<BufferEntry>,
    groups: HashMap<Uuid, CorrelationGroup>,
}

/// CorrelationService instance
pub struct CorrelationService {
    buffer: Mutex<CorrelationBuffer>,
    config: Arc<ConfigStore>,
}

impl CorrelationService {
    /// Create new CorrelationService
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            buffer: Mutex::new(CorrelationBuffer::default()),
            config,
        }
    }

    /// Tag a finished result against the rolling window
    ///
    /// Returns the shared group id when the result joins an incident; `None`
    /// otherwise. Never fails the pipeline.
    pub async fn correlate(
        &self,
        result: &AnalysisResult,
        event: &DetectionEvent,
    ) -> Option<Uuid> {
        match self.try_correlate(result, event).await {
            Ok(group_id) => group_id,
            Err(e) => {
                tracing::warn!(
                    camera_id = %event.camera_id,
                    event_id = %event.event_id,
                    error = %e,
                    "Correlation error swallowed, returning no group"
                );
                None
            }
        }
    }

    async fn try_correlate(
        &self,
        result: &AnalysisResult,
        event: &DetectionEvent,
    ) -> Result<Option<Uuid>> {
        let snapshot = self.config.current().await;
        let window = Duration::seconds(snapshot.correlation.window_seconds as i64);
        let matcher = snapshot.correlation.matcher;
        let now = Utc::now();

        let mut guard = self.buffer.lock().await;
        let buffer = &mut *guard;
        evict_expired(buffer, now, window);

        let matched = buffer.entries.iter_mut().find(|entry| {
            entry.camera_id != event.camera_id
                && (event.occurred_at - entry.occurred_at).abs() <= window
                && objects_match(matcher, &entry.object_types, &result.detected_object_types)
        });

        let group_id = match matched {
            Some(entry) => {
                let group_id = match entry.group_id {
                    Some(id) => {
                        let group = buffer
                            .groups
                            .get_mut(&id)
                            .ok_or_else(|| Error::Correlation(format!("missing group {}", id)))?;
                        group.member_event_ids.push(event.event_id);
                        group.window_start = group.window_start.min(event.occurred_at);
                        group.window_end = group.window_end.max(event.occurred_at);
                        id
                    }
                    None => {
                        // First match promotes the buffered entry into a new group
                        let id = Uuid::new_v4();
                        entry.group_id = Some(id);
                        let group = CorrelationGroup {
                            group_id: id,
                            member_event_ids: vec![entry.event_id, event.event_id],
                            window_start: entry.occurred_at.min(event.occurred_at),
                            window_end: entry.occurred_at.max(event.occurred_at),
                        };
                        buffer.groups.insert(id, group);
                        id
                    }
                };

                tracing::info!(
                    camera_id = %event.camera_id,
                    event_id = %event.event_id,
                    group_id = %group_id,
                    "Event correlated into incident group"
                );
                Some(group_id)
            }
            None => None,
        };

        buffer.entries.push_back(BufferEntry {
            event_id: event.event_id,
            camera_id: event.camera_id.clone(),
            occurred_at: event.occurred_at,
            arrived_at: now,
            object_types: result.detected_object_types.clone(),
            group_id,
        });

        Ok(group_id)
    }

    /// Look up a group by id while any member is still buffered
    pub async fn group(&self, group_id: Uuid) -> Option<CorrelationGroup> {
        let buffer = self.buffer.lock().await;
        buffer.groups.get(&group_id).cloned()
    }

    /// Buffered entry count (diagnostics)
    pub async fn buffered_len(&self) -> usize {
        self.buffer.lock().await.entries.len()
    }
}

fn evict_expired(buffer: &mut CorrelationBuffer, now: DateTime<Utc>, window: Duration) {
    let cutoff = now - window;
    while buffer
        .entries
        .front()
        .map(|e| e.arrived_at < cutoff)
        .unwrap_or(false)
    {
        buffer.entries.pop_front();
    }

    // Drop groups no buffered entry references anymore
    if !buffer.groups.is_empty() {
        let live: HashSet<Uuid> = buffer.entries.iter().filter_map(|e| e.group_id).collect();
        buffer.groups.retain(|id, _| live.contains(id));
    }
}

fn objects_match(
    matcher: CorrelationMatcher,
    buffered: &HashSet<String>,
    incoming: &HashSet<String>,
) -> bool {
    match matcher {
        CorrelationMatcher::ExactObjectType => !buffered.is_disjoint(incoming),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::{AnalysisMode, TriggerKind};

    fn service() -> CorrelationService {
        CorrelationService::new(Arc::new(ConfigStore::new(PipelineConfig::default())))
    }

    fn result_for(event: &DetectionEvent, objects: &[&str]) -> AnalysisResult {
        AnalysisResult {
            event_id: event.event_id,
            camera_id: event.camera_id.clone(),
            description: "test".to_string(),
            confidence: 0.9,
            tokens_used: 0,
            cost_estimate_usd: 0.0,
            provider_used: "stub".to_string(),
            mode_used: AnalysisMode::SingleFrame,
            fallback_reasons: Vec::new(),
            detected_object_types: objects.iter().map(|s| s.to_string()).collect(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_two_cameras_same_object_share_group() {
        let svc = service();
        let a = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let b = DetectionEvent::new("cam-2", TriggerKind::Motion);

        assert_eq!(svc.correlate(&result_for(&a, &["person"]), &a).await, None);
        let group = svc.correlate(&result_for(&b, &["person"]), &b).await;
        assert!(group.is_some());

        let group = svc.group(group.unwrap()).await.unwrap();
        assert_eq!(group.member_event_ids, vec![a.event_id, b.event_id]);
    }

    #[tokio::test]
    async fn test_same_camera_never_groups() {
        let svc = service();
        let a = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let b = DetectionEvent::new("cam-1", TriggerKind::Motion);

        svc.correlate(&result_for(&a, &["person"]), &a).await;
        assert_eq!(svc.correlate(&result_for(&b, &["person"]), &b).await, None);
    }

    #[tokio::test]
    async fn test_disjoint_objects_never_group() {
        let svc = service();
        let a = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let b = DetectionEvent::new("cam-2", TriggerKind::Motion);

        svc.correlate(&result_for(&a, &["vehicle"]), &a).await;
        assert_eq!(svc.correlate(&result_for(&b, &["person"]), &b).await, None);
    }

    #[tokio::test]
    async fn test_third_camera_joins_existing_group() {
        let svc = service();
        let a = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let b = DetectionEvent::new("cam-2", TriggerKind::Motion);
        let c = DetectionEvent::new("cam-3", TriggerKind::SmartDetection);

        svc.correlate(&result_for(&a, &["person"]), &a).await;
        let first = svc.correlate(&result_for(&b, &["person"]), &b).await.unwrap();
        let second = svc.correlate(&result_for(&c, &["person"]), &c).await.unwrap();
        assert_eq!(first, second);

        let group = svc.group(first).await.unwrap();
        assert_eq!(group.member_event_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_events_outside_window_do_not_group() {
        let svc = service();
        let mut a = DetectionEvent::new("cam-1", TriggerKind::Motion);
        a.occurred_at = Utc::now() - Duration::seconds(60);
        let b = DetectionEvent::new("cam-2", TriggerKind::Motion);

        svc.correlate(&result_for(&a, &["person"]), &a).await;
        // Entry is still buffered (arrival-based eviction) but occurred too far apart
        assert_eq!(svc.correlate(&result_for(&b, &["person"]), &b).await, None);
    }
}
