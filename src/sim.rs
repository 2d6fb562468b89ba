use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::detector::{Detection, LandmarkDetector};
use crate::image::Image;
use crate::landmark::PointSet;
use crate::my_types::*;

pub const LANDMARK_COUNT: usize = 21;
pub const FRAME_RATE: f64 = 30.;

const BLOB_GAIN: f64 = 90.;
const BLOB_SIGMA: f64 = 2.5;
const BLOB_RADIUS: i64 = 8;

/// Synthetic sequence: a hand-shaped landmark constellation orbiting
/// over a static textured background, one bright blob per landmark so
/// optical flow has something to latch onto.
pub struct Scene {
    pub width: usize,
    pub height: usize,
    frame: u64,
    layout: Vec<Vector2d>,
    background: Image,
    orbit_radius: f64,
    orbit_rate: f64,
}

impl Scene {
    pub fn new(width: usize, height: usize) -> Scene {
        let side = usize::min(width, height) as f64;
        let mut background = Image::zeros(width, height);
        for y in 0..height {
            for x in 0..width {
                background.data[y * width + x] = texture(x as f64, y as f64);
            }
        }
        Scene {
            width,
            height,
            frame: 0,
            layout: hand_layout(side / 4.),
            background,
            orbit_radius: side / 6.,
            orbit_rate: 0.01,
        }
    }

    pub fn advance(&mut self) {
        self.frame += 1;
    }

    pub fn time(&self) -> f64 {
        self.frame as f64 / FRAME_RATE
    }

    /// Ground-truth landmark positions for the current frame.
    pub fn truth(&self) -> PointSet {
        let center = self.center();
        PointSet::new(self.layout.iter().map(|p| p + center).collect())
    }

    pub fn render(&self) -> Image {
        let mut image = self.background.clone();
        let center = self.center();
        for offset in &self.layout {
            stamp_blob(&mut image, offset + center);
        }
        image
    }

    fn center(&self) -> Vector2d {
        let phase = self.orbit_rate * self.frame as f64;
        Vector2d::new(
            self.width as f64 / 2. + self.orbit_radius * phase.cos(),
            self.height as f64 / 2. + self.orbit_radius * phase.sin(),
        )
    }
}

fn texture(x: f64, y: f64) -> u8 {
    let v = 100. + 40. * (0.19 * x).sin() * (0.16 * y).cos() + 20. * (0.07 * x + 0.1 * y).sin();
    v as u8
}

/// Wrist at the origin, five fingers fanning upward, four joints each.
fn hand_layout(size: f64) -> Vec<Vector2d> {
    let mut points = vec![Vector2d::zeros()];
    for finger in 0..5 {
        let angle = (-50. + 25. * finger as f64).to_radians();
        let length = size
            * match finger {
                1 => 0.95,
                2 => 1.,
                3 => 0.9,
                _ => 0.7,
            };
        let dir = Vector2d::new(angle.sin(), -angle.cos());
        for joint in 1..=4 {
            points.push(dir * (length * joint as f64 / 4.));
        }
    }
    points
}

fn stamp_blob(image: &mut Image, center: Vector2d) {
    let cx = center[0].round() as i64;
    let cy = center[1].round() as i64;
    for y in (cy - BLOB_RADIUS)..=(cy + BLOB_RADIUS) {
        for x in (cx - BLOB_RADIUS)..=(cx + BLOB_RADIUS) {
            if x < 0 || y < 0 || x >= image.width as i64 || y >= image.height as i64 {
                continue;
            }
            let dx = x as f64 - center[0];
            let dy = y as f64 - center[1];
            let gain = BLOB_GAIN * (-(dx * dx + dy * dy) / (2. * BLOB_SIGMA * BLOB_SIGMA)).exp();
            let i = y as usize * image.width + x as usize;
            image.data[i] = (image.data[i] as f64 + gain).min(255.) as u8;
        }
    }
}

/// Stand-in for a real landmark model: returns the scene's ground truth
/// with seeded jitter, dropping out at a configurable rate.
pub struct SimulatedDetector {
    rng: Xoshiro256PlusPlus,
    jitter: f64,
    dropout: f64,
    confidence: f64,
    truth: Option<PointSet>,
}

impl SimulatedDetector {
    pub fn new(seed: u64, jitter: f64, dropout: f64, confidence: f64) -> SimulatedDetector {
        SimulatedDetector {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            jitter,
            dropout,
            confidence,
            truth: None,
        }
    }

    /// Feed the ground truth the next detect() call answers from.
    pub fn set_truth(&mut self, points: &PointSet) {
        self.truth = Some(points.clone());
    }

    pub fn clear_truth(&mut self) {
        self.truth = None;
    }
}

impl LandmarkDetector for SimulatedDetector {
    fn detect(&mut self, _image: &Image) -> Result<Option<Detection>> {
        if self.rng.gen::<f64>() < self.dropout {
            return Ok(None);
        }
        let truth = match self.truth.clone() {
            Some(points) => points,
            None => return Ok(None),
        };
        let points = truth
            .points
            .iter()
            .map(|p| {
                Vector2d::new(
                    p[0] + self.rng.gen_range(-self.jitter..=self.jitter),
                    p[1] + self.rng.gen_range(-self.jitter..=self.jitter),
                )
            })
            .collect();
        Ok(Some(Detection {
            points: PointSet::new(points),
            confidence: self.confidence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::one_euro::{EuroConfig, LandmarkSmoother};
    use crate::optical_flow::FlowConfig;
    use crate::tracker::{HybridTracker, TrackerConfig, TrackerState};

    #[test]
    fn test_layout_in_bounds() {
        for (width, height) in [(640, 480), (320, 240), (160, 120)] {
            let mut scene = Scene::new(width, height);
            for _ in 0..700 {
                let truth = scene.truth();
                assert_eq!(truth.len(), LANDMARK_COUNT);
                for p in &truth.points {
                    assert!(p[0] > 0. && p[0] < width as f64 - 1., "x out of range: {p}");
                    assert!(p[1] > 0. && p[1] < height as f64 - 1., "y out of range: {p}");
                }
                scene.advance();
            }
        }
    }

    #[test]
    fn test_orbit_speed() {
        let mut scene = Scene::new(640, 480);
        let before = scene.truth();
        scene.advance();
        let step = scene.truth().mean_displacement(&before);
        assert!(step > 0.5 && step < 1.2, "orbit step {step}");
    }

    #[test]
    fn test_blobs_mark_landmarks() {
        let mut scene = Scene::new(640, 480);
        let wrist = scene.truth().points[0];
        let before = scene.render();
        // half an orbit later the hand has left this region
        for _ in 0..300 {
            scene.advance();
        }
        let after = scene.render();
        let x = wrist[0].round() as usize;
        let y = wrist[1].round() as usize;
        assert!(before.value(x, y) as i32 - after.value(x, y) as i32 > 50);
    }

    #[test]
    fn test_detector_jitter_bounded() {
        let scene = Scene::new(320, 240);
        let mut detector = SimulatedDetector::new(3, 2., 0., 0.9);
        detector.set_truth(&scene.truth());
        let image = scene.render();
        let detection = detector.detect(&image).unwrap().unwrap();
        assert_eq!(detection.confidence, 0.9);
        let truth = scene.truth();
        for (p, t) in detection.points.points.iter().zip(&truth.points) {
            assert!((p[0] - t[0]).abs() <= 2.);
            assert!((p[1] - t[1]).abs() <= 2.);
        }
    }

    #[test]
    fn test_detector_is_deterministic() {
        let scene = Scene::new(320, 240);
        let image = scene.render();
        let mut a = SimulatedDetector::new(9, 1.5, 0.3, 0.9);
        let mut b = SimulatedDetector::new(9, 1.5, 0.3, 0.9);
        a.set_truth(&scene.truth());
        b.set_truth(&scene.truth());
        for _ in 0..20 {
            let da = a.detect(&image).unwrap();
            let db = b.detect(&image).unwrap();
            assert_eq!(da.map(|d| d.points), db.map(|d| d.points));
        }
    }

    #[test]
    fn test_detector_dropout() {
        let scene = Scene::new(320, 240);
        let image = scene.render();
        let mut detector = SimulatedDetector::new(11, 0., 1., 0.9);
        detector.set_truth(&scene.truth());
        for _ in 0..5 {
            assert!(detector.detect(&image).unwrap().is_none());
        }
        // no truth fed is a miss as well
        let mut detector = SimulatedDetector::new(11, 0., 0., 0.9);
        assert!(detector.detect(&image).unwrap().is_none());
    }

    #[test]
    fn test_synthetic_sequence_stays_locked() {
        let mut scene = Scene::new(160, 120);
        let mut detector = SimulatedDetector::new(7, 0.5, 0., 0.9);
        let mut tracker = HybridTracker::new(TrackerConfig::default(), FlowConfig::default());
        let mut smoother = LandmarkSmoother::new(EuroConfig::default());

        let mut worst = 0.;
        for i in 0..40 {
            let image = scene.render();
            detector.set_truth(&scene.truth());
            let result = tracker.process_frame(&image, &mut detector);
            let smoothed = smoother.apply(result.points.as_ref(), i as f64 / FRAME_RATE);
            if i > 0 {
                let smoothed = smoothed.expect("tracking dropped out");
                let err = smoothed.mean_displacement(&scene.truth());
                if err > worst {
                    worst = err;
                }
            }
            scene.advance();
        }
        assert_eq!(tracker.state(), TrackerState::Tracking);
        assert!(tracker.metrics().keyframes >= 2);
        assert!(worst < 3., "tracking error {worst}");
    }
}
