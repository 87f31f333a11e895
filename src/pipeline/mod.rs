//! EventPipeline - Per-Event Orchestration
//!
//! ## Responsibilities
//!
//! - One logical task per detection event: acquire, analyze, correlate,
//!   evaluate rules, dispatch
//! - Per-camera FIFO queues with bounded in-flight analyses
//! - Terminal failure reporting to the observability sink
//!
//! ## Design
//!
//! Stages run strictly in order within one event; across events the only
//! guarantee is per-camera FIFO. Each event runs under the config snapshot it
//! started with, but camera enabled-ness is re-read at stage boundaries so a
//! disabled camera drops its in-flight event at the next boundary instead of
//! interrupting a provider call.

use crate::alert_engine::AlertRuleEngine;
use crate::config::ConfigStore;
use crate::correlation::CorrelationService;
use crate::dispatcher::{BroadcastHub, HubMessage};
use crate::error::Error;
use crate::evidence::EvidenceAcquirer;
use crate::models::{AnalysisResult, DetectionEvent, PipelineFailure};
use crate::router::AnalysisRouter;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};

/// Everything a worker needs to run one event through the stages
struct StageContext {
    config: Arc<ConfigStore>,
    acquirer: Arc<EvidenceAcquirer>,
    router: Arc<AnalysisRouter>,
    correlation: Arc<CorrelationService>,
    engine: Arc<AlertRuleEngine>,
    hub: Arc<BroadcastHub>,
    /// Hand-off to the persistence layer
    result_tx: Option<mpsc::Sender<AnalysisResult>>,
}

/// EventPipeline instance
pub struct EventPipeline {
    ctx: Arc<StageContext>,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<DetectionEvent>>>,
}

impl EventPipeline {
    /// Create new EventPipeline from wired components
    pub fn new(
        config: Arc<ConfigStore>,
        acquirer: Arc<EvidenceAcquirer>,
        router: Arc<AnalysisRouter>,
        correlation: Arc<CorrelationService>,
        engine: Arc<AlertRuleEngine>,
        hub: Arc<BroadcastHub>,
        result_tx: Option<mpsc::Sender<AnalysisResult>>,
    ) -> Self {
        Self {
            ctx: Arc::new(StageContext {
                config,
                acquirer,
                router,
                correlation,
                engine,
                hub,
                result_tx,
            }),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue an event for its camera's worker
    ///
    /// Events for a busy camera queue FIFO; nothing is dropped here.
    pub async fn submit(&self, event: DetectionEvent) {
        let tx = self.worker_for(&event.camera_id).await;
        if tx.send(event).is_err() {
            tracing::error!("Camera worker channel closed, event dropped");
        }
    }

    /// Stop accepting new work; queued events drain, workers then exit
    pub async fn stop(&self) {
        self.workers.lock().await.clear();
        tracing::info!("Pipeline workers released");
    }

    async fn worker_for(&self, camera_id: &str) -> mpsc::UnboundedSender<DetectionEvent> {
        let mut workers = self.workers.lock().await;
        if let Some(tx) = workers.get(camera_id) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        workers.insert(camera_id.to_string(), tx.clone());

        let ctx = self.ctx.clone();
        let camera_id = camera_id.to_string();
        tokio::spawn(async move {
            run_camera_worker(ctx, camera_id, rx).await;
        });

        tx
    }
}

/// Per-camera worker: dequeues FIFO, bounds concurrent in-flight analyses
async fn run_camera_worker(
    ctx: Arc<StageContext>,
    camera_id: String,
    mut rx: mpsc::UnboundedReceiver<DetectionEvent>,
) {
    let limit = {
        let config = ctx.config.current().await;
        config.per_camera_inflight.max(1)
    };
    let inflight = Arc::new(Semaphore::new(limit));

    tracing::info!(camera_id = %camera_id, inflight_limit = limit, "Camera worker started");

    while let Some(event) = rx.recv().await {
        let Ok(permit) = inflight.clone().acquire_owned().await else {
            break;
        };
        let ctx = ctx.clone();
        tokio::spawn(async move {
            process_event(&ctx, event).await;
            drop(permit);
        });
    }

    tracing::info!(camera_id = %camera_id, "Camera worker stopped");
}

/// Run one event through every stage in order
async fn process_event(ctx: &StageContext, event: DetectionEvent) {
    // Stages run under the snapshot the event started with
    let config = ctx.config.current().await;

    let Some(camera) = config.camera(&event.camera_id).cloned() else {
        report_failure(
            ctx,
            &event,
            &Error::Config(format!("unknown camera {}", event.camera_id)),
            Vec::new(),
        )
        .await;
        return;
    };
    if !camera.enabled {
        tracing::debug!(camera_id = %event.camera_id, "Camera disabled, event dropped");
        return;
    }

    // Stage 1: acquire evidence
    let acquired = match ctx
        .acquirer
        .acquire(&event, camera.analysis_mode, camera.frame_count)
        .await
    {
        Ok(acquired) => acquired,
        Err(e) => {
            report_failure(ctx, &event, &e, Vec::new()).await;
            return;
        }
    };

    if !still_enabled(ctx, &event.camera_id).await {
        return;
    }

    // Stage 2: provider fallback chain
    let prompt_context = camera.prompt_context(&event);
    let result = match ctx
        .router
        .analyze(&event, &prompt_context, acquired, camera.frame_count, &config)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            let trail = match &e {
                Error::ProviderExhausted { message, .. } => {
                    message.split("; ").map(str::to_string).collect()
                }
                _ => Vec::new(),
            };
            report_failure(ctx, &event, &e, trail).await;
            return;
        }
    };

    if !still_enabled(ctx, &event.camera_id).await {
        return;
    }

    // Stage 3: incident correlation (never fails the pipeline)
    let group = match ctx.correlation.correlate(&result, &event).await {
        Some(group_id) => ctx.correlation.group(group_id).await,
        None => None,
    };

    if !still_enabled(ctx, &event.camera_id).await {
        return;
    }

    // Stage 4: rule evaluation and action dispatch
    let executed = ctx.engine.evaluate(&result, &event, group.as_ref()).await;
    if !executed.is_empty() {
        tracing::info!(
            camera_id = %event.camera_id,
            event_id = %event.event_id,
            actions = executed.len(),
            "Alert actions executed"
        );
    }

    // Stage 5: hand the result to the persistence layer
    if let Some(ref tx) = ctx.result_tx {
        if tx.send(result).await.is_err() {
            tracing::warn!("Result sink closed, analysis result dropped");
        }
    }
}

/// Re-read camera enabled-ness from the *current* snapshot at a stage boundary
async fn still_enabled(ctx: &StageContext, camera_id: &str) -> bool {
    let enabled = ctx.config.current().await.camera_enabled(camera_id);
    if !enabled {
        tracing::info!(
            camera_id = %camera_id,
            "Camera disabled mid-flight, dropping event at stage boundary"
        );
    }
    enabled
}

/// Report a terminal failure: the event is not retried, the next real-world
/// trigger produces a fresh one
async fn report_failure(
    ctx: &StageContext,
    event: &DetectionEvent,
    error: &Error,
    fallback_reasons: Vec<String>,
) {
    tracing::error!(
        camera_id = %event.camera_id,
        event_id = %event.event_id,
        error_code = error.code(),
        error = %error,
        "Pipeline terminated for event"
    );

    let failure = PipelineFailure {
        event_id: event.event_id,
        camera_id: event.camera_id.clone(),
        kind: error.code().to_string(),
        message: error.to_string(),
        fallback_reasons,
        occurred_at: Utc::now(),
    };
    ctx.hub.broadcast(HubMessage::PipelineFailure(failure)).await;
}
