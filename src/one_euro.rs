use num_traits::{Float, FloatConst};

use crate::landmark::PointSet;
use crate::my_types::*;

/// Tuning for the One Euro filter.
#[derive(Clone, Copy, Debug)]
pub struct EuroConfig {
    /// Cutoff frequency at rest, Hz.
    pub min_cutoff: f64,
    /// How strongly the observed speed raises the cutoff.
    pub beta: f64,
    /// Cutoff for the derivative estimate, Hz.
    pub d_cutoff: f64,
    /// Nominal input rate, Hz, used until timestamps establish the real
    /// sample period.
    pub rate: f64,
}

impl Default for EuroConfig {
    fn default() -> Self {
        Self {
            min_cutoff: 1.0,
            beta: 0.007,
            d_cutoff: 1.0,
            rate: 30.0,
        }
    }
}

/// Single-pole low-pass stage. The first sample passes through unchanged.
#[derive(Clone, Debug)]
pub struct LowPassFilter<F> {
    prev: Option<F>,
}

impl<F: Float> LowPassFilter<F> {
    pub fn new() -> LowPassFilter<F> {
        LowPassFilter { prev: None }
    }

    pub fn filter(&mut self, value: F, alpha: F) -> F {
        let result = match self.prev {
            Some(prev) => prev + alpha * (value - prev),
            None => value,
        };
        self.prev = Some(result);
        result
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

impl<F: Float> Default for LowPassFilter<F> {
    fn default() -> Self {
        Self::new()
    }
}

fn smoothing_factor<F: Float + FloatConst>(sample_period: F, cutoff: F) -> F {
    let r = (F::one() + F::one()) * F::PI() * cutoff * sample_period;
    r / (r + F::one())
}

/// Adaptive low-pass filter for a single scalar channel: jitter is
/// smoothed hard at rest while fast motion raises the cutoff to keep lag
/// down.
///
/// ref https://gery.casiez.net/1euro/
#[derive(Clone, Debug)]
pub struct OneEuroFilter<F> {
    min_cutoff: F,
    beta: F,
    d_cutoff: F,
    period: F,
    x_filter: LowPassFilter<F>,
    dx_filter: LowPassFilter<F>,
    prev_value: Option<F>,
    prev_time: Option<F>,
}

impl<F: Float + FloatConst> OneEuroFilter<F> {
    pub fn new(min_cutoff: F, beta: F, d_cutoff: F, rate: F) -> OneEuroFilter<F> {
        OneEuroFilter {
            min_cutoff,
            beta,
            d_cutoff,
            period: rate.recip(),
            x_filter: LowPassFilter::new(),
            dx_filter: LowPassFilter::new(),
            prev_value: None,
            prev_time: None,
        }
    }

    /// Filter one sample. Non-increasing timestamps keep the previous
    /// sample period.
    pub fn filter(&mut self, value: F, timestamp: F) -> F {
        if let Some(prev) = self.prev_time {
            if timestamp > prev {
                self.period = timestamp - prev;
            }
        }
        self.prev_time = Some(timestamp);

        let dx = match self.prev_value {
            Some(prev) => (value - prev) / self.period,
            None => F::zero(),
        };
        self.prev_value = Some(value);

        let edx = self
            .dx_filter
            .filter(dx, smoothing_factor(self.period, self.d_cutoff));
        let cutoff = self.min_cutoff + self.beta * edx.abs();
        self.x_filter
            .filter(value, smoothing_factor(self.period, cutoff))
    }

    /// Forget the stream state. The next sample passes through unchanged.
    pub fn reset(&mut self) {
        self.x_filter.reset();
        self.dx_filter.reset();
        self.prev_value = None;
        self.prev_time = None;
    }
}

impl OneEuroFilter<f64> {
    pub fn from_config(config: &EuroConfig) -> OneEuroFilter<f64> {
        OneEuroFilter::new(config.min_cutoff, config.beta, config.d_cutoff, config.rate)
    }
}

/// Per-axis One Euro pair for a 2-d point stream.
#[derive(Clone, Debug)]
pub struct PointFilter {
    x: OneEuroFilter<f64>,
    y: OneEuroFilter<f64>,
}

impl PointFilter {
    pub fn new(config: &EuroConfig) -> PointFilter {
        PointFilter {
            x: OneEuroFilter::from_config(config),
            y: OneEuroFilter::from_config(config),
        }
    }

    pub fn filter(&mut self, point: Vector2d, timestamp: f64) -> Vector2d {
        Vector2d::new(
            self.x.filter(point[0], timestamp),
            self.y.filter(point[1], timestamp),
        )
    }

    pub fn reset(&mut self) {
        self.x.reset();
        self.y.reset();
    }
}

/// One Euro bank over a whole landmark set. A `None` frame (tracking
/// gap) resets the bank so a re-acquired stream starts clean.
pub struct LandmarkSmoother {
    config: EuroConfig,
    filters: Vec<PointFilter>,
}

impl LandmarkSmoother {
    pub fn new(config: EuroConfig) -> LandmarkSmoother {
        LandmarkSmoother {
            config,
            filters: vec![],
        }
    }

    pub fn apply(&mut self, points: Option<&PointSet>, timestamp: f64) -> Option<PointSet> {
        let points = match points {
            Some(points) => points,
            None => {
                self.reset();
                return None;
            }
        };
        if self.filters.len() != points.len() {
            self.filters = (0..points.len())
                .map(|_| PointFilter::new(&self.config))
                .collect();
        }
        Some(PointSet::new(
            points
                .points
                .iter()
                .zip(self.filters.iter_mut())
                .map(|(point, filter)| filter.filter(*point, timestamp))
                .collect(),
        ))
    }

    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f64 = 30.0;

    fn step_response(beta: f64, steps: usize) -> f64 {
        let mut filter = OneEuroFilter::new(1.0, beta, 1.0, RATE);
        let mut out = filter.filter(0.0, 0.0);
        for i in 1..=steps {
            out = filter.filter(1.0, i as f64 / RATE);
        }
        out
    }

    #[test]
    fn test_first_sample_passes_through() {
        let mut filter = OneEuroFilter::from_config(&EuroConfig::default());
        assert_eq!(filter.filter(0.42, 0.0), 0.42);
    }

    #[test]
    fn test_smoothing_factor() {
        let alpha = smoothing_factor(1.0, 0.5 / std::f64::consts::PI);
        assert!((alpha - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_low_pass() {
        let mut filter = LowPassFilter::new();
        assert_eq!(filter.filter(10.0, 0.5), 10.0);
        assert_eq!(filter.filter(0.0, 0.5), 5.0);
    }

    #[test]
    fn test_constant_input_converges() {
        let out = step_response(0.007, 120);
        assert!((out - 1.0).abs() < 1e-6, "converged to {out}");
    }

    #[test]
    fn test_higher_beta_tracks_faster() {
        for steps in 1..8 {
            let slow = step_response(0.0, steps);
            let fast = step_response(1.0, steps);
            assert!(
                fast > slow,
                "step {steps}: beta 1.0 gave {fast}, beta 0.0 gave {slow}"
            );
        }
    }

    #[test]
    fn test_non_increasing_timestamp_keeps_period() {
        let mut filter = OneEuroFilter::from_config(&EuroConfig::default());
        filter.filter(0.0, 1.0);
        // repeated timestamp must not produce a zero sample period
        let out = filter.filter(1.0, 1.0);
        assert!(out.is_finite());
        assert!(out > 0.0 && out < 1.0);
    }

    #[test]
    fn test_reset_forgets_state() {
        let mut filter = OneEuroFilter::from_config(&EuroConfig::default());
        filter.filter(100.0, 0.0);
        filter.filter(100.0, 1.0 / RATE);
        filter.reset();
        assert_eq!(filter.filter(7.0, 1.0), 7.0);
    }

    #[test]
    fn test_smoother_resets_on_gap() {
        let mut smoother = LandmarkSmoother::new(EuroConfig::default());
        let first = PointSet::new(vec![Vector2d::new(10.0, 10.0)]);
        let second = PointSet::new(vec![Vector2d::new(20.0, 20.0)]);
        let out = smoother.apply(Some(&first), 0.0);
        assert_eq!(out, Some(first));
        assert_eq!(smoother.apply(None, 1.0 / RATE), None);
        // after the gap the next set passes through unchanged
        let out = smoother.apply(Some(&second), 2.0 / RATE);
        assert_eq!(out, Some(second));
    }

    #[test]
    fn test_smoother_follows_cardinality() {
        let mut smoother = LandmarkSmoother::new(EuroConfig::default());
        let one = PointSet::new(vec![Vector2d::new(1.0, 1.0)]);
        let two = PointSet::new(vec![Vector2d::new(1.0, 1.0), Vector2d::new(2.0, 2.0)]);
        assert_eq!(smoother.apply(Some(&one), 0.0).map(|s| s.len()), Some(1));
        assert_eq!(smoother.apply(Some(&two), 0.1).map(|s| s.len()), Some(2));
    }
}
