//! AlertRuleEngine - Rule Evaluation and Action Dispatch
//!
//! ## Responsibilities
//!
//! - Evaluate every enabled rule against a finished, correlated event
//! - Enforce per-rule cooldown
//! - Execute matched actions via the NotificationDispatcher
//!
//! ## Design
//!
//! A rule is `Idle` or it fires; there is no mid-fire state. The cooldown check
//! and the `last_triggered_at`/`trigger_count` update happen under one write
//! lock, so two concurrent correlated events cannot both pass the check.
//! Action failures are recorded per action and never roll the trigger back.

pub mod conditions;

pub use conditions::{Condition, ConditionSet};

use crate::correlation::CorrelationGroup;
use crate::dispatcher::{AlertNotification, NotificationDispatcher};
use crate::models::{AnalysisResult, DetectionEvent};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// What a matched rule does
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertAction {
    /// In-app broadcast over the hub
    Broadcast,
    /// POST the event payload to a URL, optionally with custom headers
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Mobile push to specific users
    Push { user_ids: Vec<String> },
}

/// User-authored alert rule
///
/// Persisted externally; this core reads it and writes back
/// `last_triggered_at`/`trigger_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub conditions: ConditionSet,
    pub actions: Vec<AlertAction>,
    pub cooldown_seconds: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub trigger_count: u64,
}

impl AlertRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            conditions: ConditionSet::default(),
            actions: vec![AlertAction::Broadcast],
            cooldown_seconds: 300,
            last_triggered_at: None,
            trigger_count: 0,
        }
    }

    /// A never-triggered rule counts as cooldown-expired
    fn cooldown_expired(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered_at {
            Some(last) => now - last >= Duration::seconds(self.cooldown_seconds as i64),
            None => true,
        }
    }
}

/// Delivery outcome for one executed action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed { message: String },
}

/// One action executed for a fired rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub action: AlertAction,
    pub delivery: DeliveryStatus,
}

/// In-memory rule set with atomic per-rule trigger bookkeeping
pub struct RuleStore {
    rules: RwLock<HashMap<Uuid, AlertRule>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Load or replace a rule
    pub async fn upsert(&self, rule: AlertRule) {
        self.rules.write().await.insert(rule.id, rule);
    }

    pub async fn remove(&self, rule_id: &Uuid) -> Option<AlertRule> {
        self.rules.write().await.remove(rule_id)
    }

    pub async fn get(&self, rule_id: &Uuid) -> Option<AlertRule> {
        self.rules.read().await.get(rule_id).cloned()
    }

    pub async fn list(&self) -> Vec<AlertRule> {
        let mut rules: Vec<_> = self.rules.read().await.values().cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    pub async fn set_enabled(&self, rule_id: &Uuid, enabled: bool) {
        if let Some(rule) = self.rules.write().await.get_mut(rule_id) {
            rule.enabled = enabled;
        }
    }

    async fn rule_ids(&self) -> Vec<Uuid> {
        self.rules.read().await.keys().copied().collect()
    }

    /// Check conditions and cooldown for one rule; on pass, consume the
    /// trigger and return the actions to execute
    ///
    /// The check and the `last_triggered_at`/`trigger_count` update are one
    /// atomic step under the write lock.
    async fn try_fire(
        &self,
        rule_id: &Uuid,
        result: &AnalysisResult,
        event: &DetectionEvent,
    ) -> Option<(String, Vec<AlertAction>)> {
        let now = Utc::now();
        let mut rules = self.rules.write().await;
        let rule = rules.get_mut(rule_id)?;

        if !rule.enabled {
            return None;
        }
        if !rule.conditions.matches(result, event) {
            return None;
        }
        if !rule.cooldown_expired(now) {
            // Normal, frequent outcome
            tracing::debug!(
                rule_id = %rule.id,
                rule_name = %rule.name,
                "Rule matched but still cooling down"
            );
            return None;
        }

        rule.last_triggered_at = Some(now);
        rule.trigger_count += 1;

        tracing::info!(
            rule_id = %rule.id,
            rule_name = %rule.name,
            camera_id = %event.camera_id,
            trigger_count = rule.trigger_count,
            "Alert rule fired"
        );

        Some((rule.name.clone(), rule.actions.clone()))
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// AlertRuleEngine instance
pub struct AlertRuleEngine {
    store: Arc<RuleStore>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl AlertRuleEngine {
    /// Create new AlertRuleEngine
    pub fn new(store: Arc<RuleStore>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> Arc<RuleStore> {
        self.store.clone()
    }

    /// Evaluate all enabled rules against a finished, correlated event
    ///
    /// Rules are independent; evaluation order carries no guarantee. Returns
    /// every executed action with its delivery outcome.
    pub async fn evaluate(
        &self,
        result: &AnalysisResult,
        event: &DetectionEvent,
        correlation: Option<&CorrelationGroup>,
    ) -> Vec<ExecutedAction> {
        let mut executed = Vec::new();

        for rule_id in self.store.rule_ids().await {
            let Some((rule_name, actions)) = self.store.try_fire(&rule_id, result, event).await
            else {
                continue;
            };

            let notification = build_notification(&rule_id, &rule_name, result, correlation);

            for action in actions {
                let delivery = match self.dispatcher.dispatch(&action, &notification).await {
                    Ok(()) => DeliveryStatus::Delivered,
                    Err(e) => {
                        tracing::warn!(
                            rule_id = %rule_id,
                            rule_name = %rule_name,
                            error = %e,
                            "Action delivery failed"
                        );
                        DeliveryStatus::Failed {
                            message: e.to_string(),
                        }
                    }
                };
                executed.push(ExecutedAction {
                    rule_id,
                    rule_name: rule_name.clone(),
                    action,
                    delivery,
                });
            }
        }

        executed
    }
}

fn build_notification(
    rule_id: &Uuid,
    rule_name: &str,
    result: &AnalysisResult,
    correlation: Option<&CorrelationGroup>,
) -> AlertNotification {
    let mut object_types: Vec<String> = result.detected_object_types.iter().cloned().collect();
    object_types.sort();

    AlertNotification {
        rule_id: *rule_id,
        rule_name: rule_name.to_string(),
        event_id: result.event_id,
        camera_id: result.camera_id.clone(),
        description: result.description.clone(),
        confidence: result.confidence,
        detected_object_types: object_types,
        group_id: correlation.map(|g| g.group_id),
        timestamp: result.completed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::BroadcastHub;
    use crate::models::{AnalysisMode, TriggerKind};

    fn engine() -> AlertRuleEngine {
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(BroadcastHub::new()),
            None,
        ));
        AlertRuleEngine::new(Arc::new(RuleStore::new()), dispatcher)
    }

    fn person_result(event: &DetectionEvent) -> AnalysisResult {
        AnalysisResult {
            event_id: event.event_id,
            camera_id: event.camera_id.clone(),
            description: "A person crosses the yard.".to_string(),
            confidence: 0.9,
            tokens_used: 0,
            cost_estimate_usd: 0.0,
            provider_used: "stub".to_string(),
            mode_used: AnalysisMode::SingleFrame,
            fallback_reasons: Vec::new(),
            detected_object_types: ["person".to_string()].into_iter().collect(),
            completed_at: Utc::now(),
        }
    }

    fn person_rule(cooldown_seconds: u64) -> AlertRule {
        let mut rule = AlertRule::new("person-alert");
        rule.conditions = ConditionSet {
            all: vec![Condition::ObjectTypes {
                any_of: ["person".to_string()].into_iter().collect(),
            }],
        };
        rule.cooldown_seconds = cooldown_seconds;
        rule
    }

    #[tokio::test]
    async fn test_rule_fires_and_cooldown_blocks_second_event() {
        let engine = engine();
        let rule = person_rule(1800);
        let rule_id = rule.id;
        engine.store().upsert(rule).await;

        let event1 = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let executed = engine.evaluate(&person_result(&event1), &event1, None).await;
        assert_eq!(executed.len(), 1);
        assert!(matches!(executed[0].delivery, DeliveryStatus::Delivered));

        // Second qualifying event inside the cooldown: no action
        let event2 = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let executed = engine.evaluate(&person_result(&event2), &event2, None).await;
        assert!(executed.is_empty());

        let rule = engine.store().get(&rule_id).await.unwrap();
        assert_eq!(rule.trigger_count, 1);
        assert!(rule.last_triggered_at.is_some());
    }

    #[tokio::test]
    async fn test_expired_cooldown_allows_refire() {
        let engine = engine();
        let mut rule = person_rule(1800);
        // Simulate a trigger 31 minutes ago
        rule.last_triggered_at = Some(Utc::now() - Duration::seconds(31 * 60));
        rule.trigger_count = 1;
        let rule_id = rule.id;
        engine.store().upsert(rule).await;

        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let executed = engine.evaluate(&person_result(&event), &event, None).await;
        assert_eq!(executed.len(), 1);
        assert_eq!(engine.store().get(&rule_id).await.unwrap().trigger_count, 2);
    }

    #[tokio::test]
    async fn test_disabled_rule_never_fires() {
        let engine = engine();
        let rule = person_rule(0);
        let rule_id = rule.id;
        engine.store().upsert(rule).await;
        engine.store().set_enabled(&rule_id, false).await;

        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);
        assert!(engine
            .evaluate(&person_result(&event), &event, None)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_non_matching_conditions_skip_without_trigger() {
        let engine = engine();
        let mut rule = person_rule(0);
        rule.conditions = ConditionSet {
            all: vec![Condition::ObjectTypes {
                any_of: ["vehicle".to_string()].into_iter().collect(),
            }],
        };
        let rule_id = rule.id;
        engine.store().upsert(rule).await;

        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);
        assert!(engine
            .evaluate(&person_result(&event), &event, None)
            .await
            .is_empty());
        assert_eq!(engine.store().get(&rule_id).await.unwrap().trigger_count, 0);
    }

    #[tokio::test]
    async fn test_failed_action_still_counts_as_fired() {
        let engine = engine();
        let mut rule = person_rule(1800);
        // Push with no relay configured: delivery fails, trigger stands
        rule.actions = vec![
            AlertAction::Push {
                user_ids: vec!["user-1".to_string()],
            },
            AlertAction::Broadcast,
        ];
        let rule_id = rule.id;
        engine.store().upsert(rule).await;

        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let executed = engine.evaluate(&person_result(&event), &event, None).await;

        assert_eq!(executed.len(), 2);
        assert!(matches!(
            executed[0].delivery,
            DeliveryStatus::Failed { .. }
        ));
        // The failed push does not stop the broadcast
        assert!(matches!(executed[1].delivery, DeliveryStatus::Delivered));
        assert_eq!(engine.store().get(&rule_id).await.unwrap().trigger_count, 1);
    }

    #[tokio::test]
    async fn test_multiple_independent_rules_all_fire() {
        let engine = engine();
        engine.store().upsert(person_rule(60)).await;
        engine.store().upsert(person_rule(60)).await;

        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);
        let executed = engine.evaluate(&person_result(&event), &event, None).await;
        assert_eq!(executed.len(), 2);
    }
}
