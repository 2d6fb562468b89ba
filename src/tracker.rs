use std::collections::VecDeque;
use std::time::Instant;

use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;

use crate::detector::{Detection, LandmarkDetector};
use crate::image::Image;
use crate::landmark::PointSet;
use crate::optical_flow::{FlowConfig, FlowEngine, LucasKanadeFlow};
use crate::pyramid::Pyramid;

/// Tuning for the hybrid detect/track scheduler.
#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    /// Frames between scheduled keyframe detections.
    pub keyframe_interval: usize,
    /// Mean flow residual above which the next frame is forced to
    /// re-detect.
    pub drift_threshold: f64,
    /// Detections below this confidence are treated as misses.
    pub min_confidence: f64,
    /// Adapt the keyframe interval to the observed movement.
    pub adaptive_interval: bool,
    pub min_interval: usize,
    pub max_interval: usize,
    /// Number of recent frames scored for movement.
    pub movement_window: usize,
    /// Center of the movement band. Scores above twice this shrink the
    /// keyframe interval, scores below half of it grow the interval.
    pub movement_threshold: f64,
    /// Cap in frames for the detector retry backoff.
    pub max_backoff: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            keyframe_interval: 5,
            drift_threshold: 0.05,
            min_confidence: 0.7,
            adaptive_interval: true,
            min_interval: 3,
            max_interval: 8,
            movement_window: 10,
            movement_threshold: 0.02,
            max_backoff: 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerState {
    Uninitialized,
    Tracking,
    Lost,
}

/// How a frame's landmarks were produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackMethod {
    Detector,
    OpticalFlow,
    None,
}

/// Outcome of one processed frame.
#[derive(Clone, Debug)]
pub struct FrameResult {
    pub points: Option<PointSet>,
    pub is_keyframe: bool,
    /// Mean flow residual for tracked frames, 0 on keyframes. A single
    /// failed point makes the mean infinite.
    pub error: f64,
    /// Milliseconds spent processing the frame.
    pub processing_time: f64,
    pub method: TrackMethod,
}

/// Cumulative scheduler counters, survive tracking resets.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct TrackerMetrics {
    pub frames: u64,
    pub keyframes: u64,
    pub flow_frames: u64,
    /// Keyframes forced by drift rather than cadence.
    pub forced_keyframes: u64,
    /// Detector calls that returned an error.
    pub detector_failures: u64,
    pub current_interval: usize,
    /// Running mean of finite flow residuals.
    pub mean_error: f64,
    pub mean_time_ms: f64,
    #[serde(skip)]
    error_samples: u64,
}

impl TrackerMetrics {
    /// Fraction of processed frames that ran the detector.
    pub fn keyframe_ratio(&self) -> f64 {
        if self.frames == 0 {
            return 0.;
        }
        self.keyframes as f64 / self.frames as f64
    }

    /// Fraction of processed frames bridged by optical flow.
    pub fn flow_ratio(&self) -> f64 {
        if self.frames == 0 {
            return 0.;
        }
        self.flow_frames as f64 / self.frames as f64
    }
}

/// Handle for an in-flight keyframe detection. Completing a superseded
/// ticket has no effect.
#[derive(Clone, Copy, Debug)]
pub struct DetectionTicket {
    generation: u64,
}

/// Hybrid scheduler: full detections on keyframes, optical flow in
/// between, with drift checks and an adaptive keyframe cadence.
pub struct HybridTracker {
    config: TrackerConfig,
    flow: Box<dyn FlowEngine>,
    flow_levels: usize,
    state: TrackerState,
    frame_count: u64,
    interval: usize,
    reference: Option<PointSet>,
    prev_pyramid: Pyramid,
    curr_pyramid: Pyramid,
    force_keyframe: bool,
    pending: Option<u64>,
    generation: u64,
    failures: u32,
    retry_at: u64,
    movement: VecDeque<PointSet>,
    metrics: TrackerMetrics,
}

impl HybridTracker {
    pub fn new(config: TrackerConfig, flow_config: FlowConfig) -> HybridTracker {
        Self::with_engine(
            config,
            flow_config.levels,
            Box::new(LucasKanadeFlow::new(flow_config)),
        )
    }

    /// Build around a caller-supplied flow engine.
    pub fn with_engine(
        config: TrackerConfig,
        flow_levels: usize,
        flow: Box<dyn FlowEngine>,
    ) -> HybridTracker {
        let metrics = TrackerMetrics {
            current_interval: config.keyframe_interval,
            ..TrackerMetrics::default()
        };
        HybridTracker {
            config,
            flow,
            flow_levels,
            state: TrackerState::Uninitialized,
            frame_count: 0,
            interval: config.keyframe_interval,
            reference: None,
            prev_pyramid: Pyramid::empty(),
            curr_pyramid: Pyramid::empty(),
            force_keyframe: false,
            pending: None,
            generation: 0,
            failures: 0,
            retry_at: 0,
            movement: VecDeque::new(),
            metrics,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn metrics(&self) -> &TrackerMetrics {
        &self.metrics
    }

    /// Process one frame with a synchronous detector. Detector errors are
    /// absorbed into the lost/backoff path, the call itself cannot fail.
    pub fn process_frame(
        &mut self,
        image: &Image,
        detector: &mut dyn LandmarkDetector,
    ) -> FrameResult {
        let start = Instant::now();

        std::mem::swap(&mut self.prev_pyramid, &mut self.curr_pyramid);
        self.curr_pyramid.compute(image, self.flow_levels);

        let mut result = if self.should_run_keyframe() {
            if self.force_keyframe {
                self.metrics.forced_keyframes += 1;
            }
            self.force_keyframe = false;
            let ticket = self.begin_keyframe();
            self.complete_keyframe(ticket, detector.detect(image));
            FrameResult {
                points: self.reference.clone(),
                is_keyframe: true,
                error: 0.,
                processing_time: 0.,
                method: TrackMethod::Detector,
            }
        } else if self.state == TrackerState::Tracking {
            self.track_frame()
        } else {
            FrameResult {
                points: None,
                is_keyframe: false,
                error: 0.,
                processing_time: 0.,
                method: TrackMethod::None,
            }
        };

        if let Some(points) = &result.points {
            self.update_cadence(points, image.width, image.height);
        }

        self.frame_count += 1;
        self.metrics.frames += 1;
        match result.method {
            TrackMethod::Detector => self.metrics.keyframes += 1,
            TrackMethod::OpticalFlow => self.metrics.flow_frames += 1,
            TrackMethod::None => {}
        }
        if result.method == TrackMethod::OpticalFlow && result.error.is_finite() {
            self.metrics.error_samples += 1;
            self.metrics.mean_error +=
                (result.error - self.metrics.mean_error) / self.metrics.error_samples as f64;
        }
        result.processing_time = start.elapsed().as_secs_f64() * 1000.;
        self.metrics.mean_time_ms +=
            (result.processing_time - self.metrics.mean_time_ms) / self.metrics.frames as f64;
        result
    }

    /// Claim the single detection slot. A later claim supersedes earlier
    /// tickets.
    pub fn begin_keyframe(&mut self) -> DetectionTicket {
        if self.pending.is_some() {
            debug!("superseding pending detection");
        }
        self.generation += 1;
        self.pending = Some(self.generation);
        DetectionTicket {
            generation: self.generation,
        }
    }

    /// Apply a finished detection. Returns false when the ticket was
    /// superseded and the result dropped.
    pub fn complete_keyframe(
        &mut self,
        ticket: DetectionTicket,
        outcome: Result<Option<Detection>>,
    ) -> bool {
        if self.pending != Some(ticket.generation) {
            debug!("discard stale detection (generation {})", ticket.generation);
            return false;
        }
        self.pending = None;
        match outcome {
            Ok(Some(detection)) if detection.confidence >= self.config.min_confidence => {
                self.accept(detection);
            }
            Ok(Some(detection)) => {
                debug!(
                    "detection confidence {:.2} below threshold",
                    detection.confidence
                );
                self.miss();
            }
            Ok(None) => self.miss(),
            Err(err) => {
                warn!("landmark detector failed: {err:#}");
                self.metrics.detector_failures += 1;
                self.miss();
            }
        }
        true
    }

    /// Drop all tracking state and start over from the next frame.
    /// Metrics are kept.
    pub fn reset(&mut self) {
        self.state = TrackerState::Uninitialized;
        self.frame_count = 0;
        self.interval = self.config.keyframe_interval;
        self.metrics.current_interval = self.interval;
        self.reference = None;
        self.force_keyframe = false;
        self.pending = None;
        self.failures = 0;
        self.retry_at = 0;
        self.movement.clear();
    }

    fn should_run_keyframe(&self) -> bool {
        if self.pending.is_some() {
            return false;
        }
        match self.state {
            TrackerState::Uninitialized => self.frame_count >= self.retry_at,
            TrackerState::Tracking => {
                self.force_keyframe || self.frame_count % self.interval as u64 == 0
            }
            TrackerState::Lost => self.frame_count >= self.retry_at,
        }
    }

    fn accept(&mut self, detection: Detection) {
        if self.state != TrackerState::Tracking {
            info!(
                "tracking acquired, {} landmarks at confidence {:.2}",
                detection.points.len(),
                detection.confidence
            );
        }
        self.state = TrackerState::Tracking;
        self.reference = Some(detection.points);
        self.failures = 0;
        self.retry_at = 0;
        self.force_keyframe = false;
    }

    fn miss(&mut self) {
        self.failures += 1;
        let backoff = 1u64
            .checked_shl(self.failures - 1)
            .unwrap_or(u64::MAX)
            .min(self.config.max_backoff);
        self.retry_at = self.frame_count + backoff;
        self.force_keyframe = false;
        match self.state {
            TrackerState::Tracking => {
                warn!("tracking lost, detector found no landmarks");
                self.state = TrackerState::Lost;
                self.reference = None;
                self.movement.clear();
            }
            TrackerState::Lost => {
                debug!("detector retry missed, next attempt in {backoff} frames")
            }
            TrackerState::Uninitialized => {
                debug!("detector found nothing, next attempt in {backoff} frames")
            }
        }
    }

    fn track_frame(&mut self) -> FrameResult {
        let points: Vec<_> = match &self.reference {
            Some(set) => set.points.clone(),
            None => {
                debug!("tracking state without reference points");
                self.state = TrackerState::Lost;
                self.retry_at = self.frame_count + 1;
                return FrameResult {
                    points: None,
                    is_keyframe: false,
                    error: 0.,
                    processing_time: 0.,
                    method: TrackMethod::None,
                };
            }
        };

        let results = self
            .flow
            .track(&self.prev_pyramid, &self.curr_pyramid, &points);
        let survivors = results.iter().filter(|r| r.error.is_finite()).count();
        if survivors == 0 {
            warn!("tracking lost, all {} points failed", results.len());
            self.state = TrackerState::Lost;
            self.reference = None;
            self.movement.clear();
            self.failures = 0;
            self.retry_at = self.frame_count + 1;
            return FrameResult {
                points: None,
                is_keyframe: false,
                error: f64::INFINITY,
                processing_time: 0.,
                method: TrackMethod::OpticalFlow,
            };
        }

        let error = results.iter().map(|r| r.error).sum::<f64>() / results.len() as f64;
        let tracked = PointSet::new(results.iter().map(|r| r.point).collect());
        if error > self.config.drift_threshold && !self.force_keyframe {
            debug!("flow residual {error:.4} above drift threshold, forcing keyframe");
            self.force_keyframe = true;
        }
        self.reference = Some(tracked.clone());
        FrameResult {
            points: Some(tracked),
            is_keyframe: false,
            error,
            processing_time: 0.,
            method: TrackMethod::OpticalFlow,
        }
    }

    /// Score recent movement and nudge the keyframe interval: fast
    /// movement re-detects more often, a still scene less often.
    fn update_cadence(&mut self, points: &PointSet, width: usize, height: usize) {
        if !self.config.adaptive_interval {
            return;
        }
        self.movement.push_back(points.normalized(width, height));
        while self.movement.len() > self.config.movement_window {
            self.movement.pop_front();
        }
        if self.movement.len() < self.config.movement_window {
            return;
        }

        let mut sum = 0.;
        for i in 1..self.movement.len() {
            sum += self.movement[i].mean_displacement(&self.movement[i - 1]);
        }
        let score = sum / (self.movement.len() - 1) as f64;

        self.interval = if score > 2. * self.config.movement_threshold {
            usize::max(self.interval.saturating_sub(1), self.config.min_interval)
        } else if score < self.config.movement_threshold / 2. {
            usize::min(self.interval + 1, self.config.max_interval)
        } else {
            self.config.keyframe_interval
        };
        self.metrics.current_interval = self.interval;
    }
}
