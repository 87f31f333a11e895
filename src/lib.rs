//! Argus Core - Camera Event Analysis Pipeline
//!
//! Turns discrete "something happened on camera X" signals into
//! natural-language descriptions via interchangeable AI vision providers,
//! evaluates user-defined alert rules over the results, and fans matched
//! alerts out to notification channels.
//!
//! ## Architecture
//!
//! 1. EvidenceAcquirer - frame/clip capture with a documented degradation path
//! 2. AnalysisRouter - capability-aware provider fallback chain
//! 3. CostTracker - per-provider spend accounting with hard caps
//! 4. CorrelationService - cross-camera incident grouping
//! 5. AlertRuleEngine - condition evaluation with cooldown deduplication
//! 6. NotificationDispatcher - broadcast / webhook / push fan-out
//! 7. EventPipeline - per-camera FIFO orchestration over the above
//!
//! Capture, persistence, UI, and push transport are external collaborators
//! behind the `MediaSource`, result-sink, hub, and `PushRelay` seams.

pub mod alert_engine;
pub mod config;
pub mod correlation;
pub mod cost_tracker;
pub mod dispatcher;
pub mod error;
pub mod evidence;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod router;

pub use error::{Error, Result};
pub use pipeline::EventPipeline;

/// Initialize tracing with an env-filter subscriber
///
/// Optional convenience for binaries and tests; ignores the error when a
/// subscriber is already installed.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
