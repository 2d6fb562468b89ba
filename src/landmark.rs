use crate::my_types::*;

/// A set of landmark points in pixel coordinates. The cardinality is
/// fixed per stream (21 for a hand), the engine only requires that it
/// stays consistent between frames.
#[derive(Clone, Debug, PartialEq)]
pub struct PointSet {
    pub points: Vec<Vector2d>,
}

impl PointSet {
    pub fn new(points: Vec<Vector2d>) -> PointSet {
        PointSet { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The same landmarks in [0, 1] normalized coordinates, clamped to
    /// the unit square.
    pub fn normalized(&self, width: usize, height: usize) -> PointSet {
        let w = width as f64;
        let h = height as f64;
        PointSet {
            points: self
                .points
                .iter()
                .map(|p| Vector2d::new((p[0] / w).clamp(0., 1.), (p[1] / h).clamp(0., 1.)))
                .collect(),
        }
    }

    /// Normalized coordinates scaled back to pixels.
    pub fn to_pixels(&self, width: usize, height: usize) -> PointSet {
        let w = width as f64;
        let h = height as f64;
        PointSet {
            points: self
                .points
                .iter()
                .map(|p| Vector2d::new(p[0] * w, p[1] * h))
                .collect(),
        }
    }

    /// Average per-point Euclidean displacement against another set of
    /// the same cardinality, 0 when the cardinalities differ.
    pub fn mean_displacement(&self, other: &PointSet) -> f64 {
        if self.points.is_empty() || self.points.len() != other.points.len() {
            return 0.;
        }
        let sum: f64 = self
            .points
            .iter()
            .zip(other.points.iter())
            .map(|(a, b)| (a - b).norm())
            .sum();
        sum / self.points.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_clamps() {
        let set = PointSet::new(vec![
            Vector2d::new(320., 240.),
            Vector2d::new(-10., 100.),
            Vector2d::new(700., 500.),
        ]);
        let normalized = set.normalized(640, 480);
        assert_eq!(normalized.points[0], Vector2d::new(0.5, 0.5));
        assert_eq!(normalized.points[1], Vector2d::new(0., 100. / 480.));
        assert_eq!(normalized.points[2], Vector2d::new(1., 1.));
    }

    #[test]
    fn test_pixel_roundtrip() {
        let set = PointSet::new(vec![Vector2d::new(0.25, 0.75)]);
        let pixels = set.to_pixels(640, 480);
        assert_eq!(pixels.points[0], Vector2d::new(160., 360.));
        assert_eq!(pixels.normalized(640, 480), set);
    }

    #[test]
    fn test_mean_displacement() {
        let a = PointSet::new(vec![Vector2d::new(0., 0.), Vector2d::new(1., 1.)]);
        let b = PointSet::new(vec![Vector2d::new(3., 4.), Vector2d::new(1., 1.)]);
        assert_eq!(a.mean_displacement(&b), 2.5);
        assert_eq!(a.mean_displacement(&PointSet::new(vec![])), 0.);
    }
}
