//! CostTracker - Per-Provider Spend Accounting
//!
//! ## Responsibilities
//!
//! - Record tokens/cost per analysis request
//! - Aggregate by (date, camera, provider, mode), increment-only
//! - Answer the "within cap" question consulted by the router
//!
//! ## Design
//!
//! The tracker never blocks a call; it only answers truthfully. Enforcement
//! (force-degrading the evidence tier) lives in the AnalysisRouter. Buckets are
//! mutated under a single write lock, so `within_cap` immediately reflects a
//! `record` made moments before.

use crate::config::ConfigStore;
use crate::models::AnalysisMode;
use crate::providers::ProviderId;
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Aggregation key: one bucket per (date, camera, provider, mode)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UsageKey {
    date: NaiveDate,
    camera_id: String,
    provider: ProviderId,
    mode: AnalysisMode,
}

/// One aggregation bucket, exposed read-only to the reporting layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub date: NaiveDate,
    pub camera_id: String,
    pub provider: ProviderId,
    pub mode: AnalysisMode,
    pub request_count: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
}

/// Which cap window to check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapPeriod {
    Daily,
    Monthly,
}

/// CostTracker instance
pub struct CostTracker {
    buckets: RwLock<HashMap<UsageKey, UsageRecord>>,
    config: Arc<ConfigStore>,
}

impl CostTracker {
    /// Create new CostTracker
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Estimated cost in USD for a token count against one provider
    pub async fn estimate(&self, provider: ProviderId, tokens: u64) -> f64 {
        let snapshot = self.config.current().await;
        let rate = match provider {
            ProviderId::OpenAi => snapshot
                .providers
                .openai
                .as_ref()
                .map(|p| p.cost_per_1k_tokens_usd),
            ProviderId::Anthropic => snapshot
                .providers
                .anthropic
                .as_ref()
                .map(|p| p.cost_per_1k_tokens_usd),
            ProviderId::Gemini => snapshot
                .providers
                .gemini
                .as_ref()
                .map(|p| p.cost_per_1k_tokens_usd),
            ProviderId::Stub => None,
        }
        .unwrap_or(0.0);

        tokens as f64 / 1000.0 * rate
    }

    /// Record one completed request into today's bucket
    ///
    /// Returns the estimated cost of this request.
    pub async fn record(
        &self,
        camera_id: &str,
        provider: ProviderId,
        mode: AnalysisMode,
        tokens: u64,
    ) -> f64 {
        let cost = self.estimate(provider, tokens).await;
        let date = Utc::now().date_naive();

        let key = UsageKey {
            date,
            camera_id: camera_id.to_string(),
            provider,
            mode,
        };

        let mut buckets = self.buckets.write().await;
        let record = buckets.entry(key).or_insert_with(|| UsageRecord {
            date,
            camera_id: camera_id.to_string(),
            provider,
            mode,
            request_count: 0,
            total_tokens: 0,
            estimated_cost_usd: 0.0,
        });
        record.request_count += 1;
        record.total_tokens += tokens;
        record.estimated_cost_usd += cost;

        tracing::debug!(
            camera_id = %camera_id,
            provider = %provider,
            mode = %mode.as_str(),
            tokens = tokens,
            cost_usd = cost,
            "Usage recorded"
        );

        cost
    }

    /// Total estimated spend for today (UTC)
    pub async fn today_spend(&self) -> f64 {
        let today = Utc::now().date_naive();
        let buckets = self.buckets.read().await;
        buckets
            .values()
            .filter(|r| r.date == today)
            .map(|r| r.estimated_cost_usd)
            .sum()
    }

    /// Total estimated spend for the current calendar month (UTC)
    pub async fn month_spend(&self) -> f64 {
        let today = Utc::now().date_naive();
        let buckets = self.buckets.read().await;
        buckets
            .values()
            .filter(|r| r.date.year() == today.year() && r.date.month() == today.month())
            .map(|r| r.estimated_cost_usd)
            .sum()
    }

    /// Whether aggregate spend is still under the configured cap
    ///
    /// An unconfigured cap is never exceeded.
    pub async fn within_cap(&self, period: CapPeriod) -> bool {
        let snapshot = self.config.current().await;
        let (cap, spend) = match period {
            CapPeriod::Daily => (snapshot.cost.daily_usd, self.today_spend().await),
            CapPeriod::Monthly => (snapshot.cost.monthly_usd, self.month_spend().await),
        };
        match cap {
            Some(cap) => spend < cap,
            None => true,
        }
    }

    /// Whether both the daily and monthly caps still have headroom
    pub async fn within_all_caps(&self) -> bool {
        self.within_cap(CapPeriod::Daily).await && self.within_cap(CapPeriod::Monthly).await
    }

    /// All buckets, newest date first (reporting/dashboard hand-off)
    pub async fn snapshot(&self) -> Vec<UsageRecord> {
        let buckets = self.buckets.read().await;
        let mut records: Vec<_> = buckets.values().cloned().collect();
        records.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| a.camera_id.cmp(&b.camera_id))
        });
        records
    }
}
