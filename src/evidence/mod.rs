//! EvidenceAcquirer - Visual Evidence Capture
//!
//! ## Responsibilities
//!
//! - Fetch the evidence payload for a detection event (still, sampled frames, clip)
//! - Degrade to a cheaper tier when the richer one is unobtainable, recording why
//! - Sample clip frames via ffmpeg with a blur check on each sample
//!
//! Media IO goes through the `MediaSource` collaborator owned by the capture
//! layer. Clip and frame buffers are scoped to one call and released on every
//! exit path; nothing is written to durable storage.

pub mod sharpness;

use crate::error::{Error, Result};
use crate::models::{AnalysisMode, DetectionEvent, Evidence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use uuid::Uuid;

/// Access to a camera's media, provided by the capture layer
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Most recent still image for the camera around the given instant
    async fn latest_frame(&self, camera_id: &str) -> Result<Vec<u8>>;

    /// Short clip covering the given instant
    async fn download_clip(&self, camera_id: &str, at: DateTime<Utc>) -> Result<Vec<u8>>;
}

/// Evidence plus the degradation trail accumulated while acquiring it
#[derive(Debug)]
pub struct Acquired {
    pub evidence: Evidence,
    pub fallback_reasons: Vec<String>,
}

/// EvidenceAcquirer instance
pub struct EvidenceAcquirer {
    media: Arc<dyn MediaSource>,
    temp_dir: PathBuf,
    frame_timeout: Duration,
    clip_timeout: Duration,
    sharpness_threshold: f64,
}

impl EvidenceAcquirer {
    /// Create new EvidenceAcquirer
    ///
    /// # Arguments
    /// * `media` - capture-layer media source
    /// * `temp_dir` - scratch directory for clip frame extraction
    /// * `frame_timeout` - deadline for a still-image fetch
    /// * `clip_timeout` - deadline for a clip download
    pub fn new(
        media: Arc<dyn MediaSource>,
        temp_dir: PathBuf,
        frame_timeout: Duration,
        clip_timeout: Duration,
    ) -> Self {
        Self {
            media,
            temp_dir,
            frame_timeout,
            clip_timeout,
            sharpness_threshold: sharpness::DEFAULT_SHARPNESS_THRESHOLD,
        }
    }

    pub fn with_sharpness_threshold(mut self, threshold: f64) -> Self {
        self.sharpness_threshold = threshold;
        self
    }

    /// Acquire evidence for an event at the requested mode
    ///
    /// Degradation path: `video_native` → `multi_frame` → `single_frame`. Each
    /// step taken is recorded in the returned trail. Fails only when no tier
    /// yields usable evidence.
    pub async fn acquire(
        &self,
        event: &DetectionEvent,
        mode: AnalysisMode,
        frame_count: usize,
    ) -> Result<Acquired> {
        let mut reasons = Vec::new();

        match mode {
            AnalysisMode::SingleFrame => {
                let evidence = self.acquire_single(event).await?;
                Ok(Acquired {
                    evidence,
                    fallback_reasons: reasons,
                })
            }
            AnalysisMode::MultiFrame => {
                match self.download_clip(event).await {
                    Ok(clip) => match self.sample_clip_frames(&event.camera_id, &clip, frame_count).await {
                        Ok(frames) => Ok(Acquired {
                            evidence: Evidence::multi_frame(frames),
                            fallback_reasons: reasons,
                        }),
                        Err(e) => {
                            tracing::warn!(
                                camera_id = %event.camera_id,
                                error = %e,
                                "Clip frame sampling failed, degrading to single_frame"
                            );
                            reasons.push(format!(
                                "frame sampling failed ({}), degraded to single_frame",
                                e
                            ));
                            let evidence = self.acquire_single(event).await?;
                            Ok(Acquired {
                                evidence,
                                fallback_reasons: reasons,
                            })
                        }
                    },
                    Err(e) => {
                        tracing::warn!(
                            camera_id = %event.camera_id,
                            error = %e,
                            "Clip download failed, degrading to single_frame"
                        );
                        reasons.push(format!(
                            "clip download failed ({}), degraded to single_frame",
                            e
                        ));
                        let evidence = self.acquire_single(event).await?;
                        Ok(Acquired {
                            evidence,
                            fallback_reasons: reasons,
                        })
                    }
                }
            }
            AnalysisMode::VideoNative => {
                match self.download_clip(event).await {
                    Ok(clip) => Ok(Acquired {
                        evidence: Evidence::clip(clip, 0),
                        fallback_reasons: reasons,
                    }),
                    Err(e) => {
                        // The one clip download covers both richer tiers; with no
                        // clip, multi_frame has nothing to sample either.
                        tracing::warn!(
                            camera_id = %event.camera_id,
                            error = %e,
                            "Clip download failed, degrading through multi_frame to single_frame"
                        );
                        reasons.push(format!(
                            "clip download failed ({}), degraded to multi_frame",
                            e
                        ));
                        reasons.push(
                            "no clip available for frame sampling, degraded to single_frame"
                                .to_string(),
                        );
                        let evidence = self.acquire_single(event).await?;
                        Ok(Acquired {
                            evidence,
                            fallback_reasons: reasons,
                        })
                    }
                }
            }
        }
    }

    /// Fetch a single still for the event's camera
    async fn acquire_single(&self, event: &DetectionEvent) -> Result<Evidence> {
        let frame = tokio::time::timeout(
            self.frame_timeout,
            self.media.latest_frame(&event.camera_id),
        )
        .await
        .map_err(|_| Error::Acquisition {
            camera_id: event.camera_id.clone(),
            message: format!(
                "still image fetch timed out after {}s",
                self.frame_timeout.as_secs()
            ),
        })?
        .map_err(|e| Error::Acquisition {
            camera_id: event.camera_id.clone(),
            message: format!("still image fetch failed: {}", e),
        })?;

        Ok(Evidence::single_frame(frame))
    }

    async fn download_clip(&self, event: &DetectionEvent) -> Result<Vec<u8>> {
        tokio::time::timeout(
            self.clip_timeout,
            self.media.download_clip(&event.camera_id, event.occurred_at),
        )
        .await
        .map_err(|_| Error::Timeout {
            operation: format!("clip download for camera {}", event.camera_id),
            seconds: self.clip_timeout.as_secs(),
        })?
    }

    /// Sample `frame_count` frames at evenly spaced offsets across a clip
    ///
    /// Blurry samples are replaced by the nearest adjacent candidate; if every
    /// candidate at an offset is blurry, the sharpest one is kept. Also used by
    /// the router when it drops a `video_native` attempt down to `multi_frame`
    /// without re-downloading the clip.
    pub async fn sample_clip_frames(
        &self,
        camera_id: &str,
        clip: &[u8],
        frame_count: usize,
    ) -> Result<Vec<Vec<u8>>> {
        if clip.is_empty() {
            return Err(Error::Media("empty clip".to_string()));
        }
        let frame_count = frame_count.max(1);

        let scratch = self.temp_dir.join(format!("clip-{}", Uuid::new_v4()));
        fs::create_dir_all(&scratch).await?;

        let result = self
            .sample_in_scratch(camera_id, clip, frame_count, &scratch)
            .await;

        // Scratch is removed on success, sampling error, and ffmpeg failure alike
        if let Err(e) = fs::remove_dir_all(&scratch).await {
            tracing::warn!(path = %scratch.display(), error = %e, "Scratch cleanup failed");
        }

        result
    }

    async fn sample_in_scratch(
        &self,
        camera_id: &str,
        clip: &[u8],
        frame_count: usize,
        scratch: &Path,
    ) -> Result<Vec<Vec<u8>>> {
        let clip_path = scratch.join("clip.mp4");
        fs::write(&clip_path, clip).await?;

        let duration = probe_duration(&clip_path).await?;
        if duration <= 0.0 {
            return Err(Error::Media("clip has zero duration".to_string()));
        }

        // Interior offsets: (i+1)/(n+1) avoids the often-black first and
        // truncated last frames
        let spacing = duration / (frame_count as f64 + 1.0);
        let mut frames = Vec::with_capacity(frame_count);

        for i in 0..frame_count {
            let offset = spacing * (i as f64 + 1.0);
            match self.extract_sharp_frame(&clip_path, offset, spacing).await {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    tracing::debug!(
                        camera_id = %camera_id,
                        offset_sec = offset,
                        error = %e,
                        "Frame extraction failed at offset, skipping"
                    );
                }
            }
        }

        if frames.is_empty() {
            return Err(Error::Media(format!(
                "no usable frames extracted from {:.1}s clip",
                duration
            )));
        }

        Ok(frames)
    }

    /// Extract the frame at `offset`, falling back to adjacent candidates when
    /// the blur check fails
    async fn extract_sharp_frame(
        &self,
        clip_path: &Path,
        offset: f64,
        spacing: f64,
    ) -> Result<Vec<u8>> {
        let step = spacing / 4.0;
        let candidates = [offset, offset + step, (offset - step).max(0.0)];

        let mut best: Option<(f64, Vec<u8>)> = None;

        for t in candidates {
            let frame = match extract_frame(clip_path, t).await {
                Ok(f) => f,
                Err(_) => continue,
            };
            match sharpness::sharpness_score(&frame) {
                Ok(score) if score >= self.sharpness_threshold => return Ok(frame),
                Ok(score) => {
                    if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                        best = Some((score, frame));
                    }
                }
                Err(_) => continue,
            }
        }

        best.map(|(_, frame)| frame)
            .ok_or_else(|| Error::Media(format!("no decodable frame near offset {:.2}s", offset)))
    }
}

/// Clip duration in seconds via ffprobe
async fn probe_duration(clip_path: &Path) -> Result<f64> {
    let child = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-show_entries", "format=duration",
            "-of", "csv=p=0",
        ])
        .arg(clip_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Media(format!("ffprobe spawn failed: {}", e)))?;

    let output = tokio::time::timeout(Duration::from_secs(10), child.wait_with_output())
        .await
        .map_err(|_| Error::Timeout {
            operation: "ffprobe duration".to_string(),
            seconds: 10,
        })?
        .map_err(|e| Error::Media(format!("ffprobe failed: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Media(format!("ffprobe failed: {}", stderr.trim())));
    }

    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse::<f64>()
        .map_err(|e| Error::Media(format!("ffprobe duration parse failed: {}", e)))
}

/// Extract one JPEG frame at the given offset
///
/// kill_on_drop ensures ffmpeg is SIGKILLed if the timeout cancels the future.
async fn extract_frame(clip_path: &Path, offset: f64) -> Result<Vec<u8>> {
    let child = Command::new("ffmpeg")
        .args(["-ss", &format!("{:.3}", offset), "-i"])
        .arg(clip_path)
        .args([
            "-frames:v", "1",
            "-f", "image2pipe",
            "-vcodec", "mjpeg",
            "-loglevel", "error",
            "-y",
            "-",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Media(format!("ffmpeg spawn failed: {}", e)))?;

    let output = tokio::time::timeout(Duration::from_secs(10), child.wait_with_output())
        .await
        .map_err(|_| Error::Timeout {
            operation: format!("ffmpeg frame extraction at {:.2}s", offset),
            seconds: 10,
        })?
        .map_err(|e| Error::Media(format!("ffmpeg failed: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Media(format!("ffmpeg failed: {}", stderr.trim())));
    }
    if output.stdout.is_empty() {
        return Err(Error::Media("ffmpeg returned empty frame".to_string()));
    }

    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvidenceKind, TriggerKind};
    use std::sync::Mutex;

    /// Scripted media source: frames always available, clip availability toggled
    struct ScriptedMedia {
        frame: Vec<u8>,
        clip: Mutex<Option<Vec<u8>>>,
    }

    #[async_trait]
    impl MediaSource for ScriptedMedia {
        async fn latest_frame(&self, _camera_id: &str) -> Result<Vec<u8>> {
            Ok(self.frame.clone())
        }

        async fn download_clip(&self, camera_id: &str, _at: DateTime<Utc>) -> Result<Vec<u8>> {
            self.clip
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::Acquisition {
                    camera_id: camera_id.to_string(),
                    message: "recorder offline".to_string(),
                })
        }
    }

    fn acquirer(media: Arc<dyn MediaSource>) -> EvidenceAcquirer {
        EvidenceAcquirer::new(
            media,
            std::env::temp_dir().join("argus-test"),
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_single_frame_acquisition() {
        let media = Arc::new(ScriptedMedia {
            frame: vec![1, 2, 3],
            clip: Mutex::new(None),
        });
        let acq = acquirer(media);
        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);

        let got = acq
            .acquire(&event, AnalysisMode::SingleFrame, 1)
            .await
            .unwrap();
        assert_eq!(got.evidence.kind, EvidenceKind::SingleFrame);
        assert!(got.fallback_reasons.is_empty());
    }

    #[tokio::test]
    async fn test_video_native_degrades_twice_on_clip_failure() {
        let media = Arc::new(ScriptedMedia {
            frame: vec![1, 2, 3],
            clip: Mutex::new(None),
        });
        let acq = acquirer(media);
        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);

        let got = acq
            .acquire(&event, AnalysisMode::VideoNative, 3)
            .await
            .unwrap();
        assert_eq!(got.evidence.kind, EvidenceKind::SingleFrame);
        assert_eq!(got.fallback_reasons.len(), 2);
        assert!(got.fallback_reasons[0].contains("multi_frame"));
        assert!(got.fallback_reasons[1].contains("single_frame"));
    }

    #[tokio::test]
    async fn test_multi_frame_degrades_once_on_clip_failure() {
        let media = Arc::new(ScriptedMedia {
            frame: vec![1, 2, 3],
            clip: Mutex::new(None),
        });
        let acq = acquirer(media);
        let event = DetectionEvent::new("cam-1", TriggerKind::Motion);

        let got = acq
            .acquire(&event, AnalysisMode::MultiFrame, 3)
            .await
            .unwrap();
        assert_eq!(got.evidence.kind, EvidenceKind::SingleFrame);
        assert_eq!(got.fallback_reasons.len(), 1);
        assert!(got.fallback_reasons[0].contains("clip download failed"));
    }

    #[tokio::test]
    async fn test_video_native_passes_clip_through() {
        let media = Arc::new(ScriptedMedia {
            frame: vec![1, 2, 3],
            clip: Mutex::new(Some(vec![9; 128])),
        });
        let acq = acquirer(media);
        let event = DetectionEvent::new("cam-1", TriggerKind::Doorbell);

        let got = acq
            .acquire(&event, AnalysisMode::VideoNative, 3)
            .await
            .unwrap();
        assert_eq!(got.evidence.kind, EvidenceKind::Clip);
        match &got.evidence.payload {
            crate::models::EvidencePayload::Clip(data) => assert_eq!(data.len(), 128),
            other => panic!("expected clip payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_clip_rejected_by_sampler() {
        let media = Arc::new(ScriptedMedia {
            frame: vec![1],
            clip: Mutex::new(None),
        });
        let acq = acquirer(media);
        assert!(acq.sample_clip_frames("cam-1", &[], 3).await.is_err());
    }
}
