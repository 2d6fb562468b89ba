use anyhow::Result;

use crate::image::Image;
use crate::landmark::PointSet;

/// A fresh landmark detection for one frame.
#[derive(Clone, Debug)]
pub struct Detection {
    pub points: PointSet,
    pub confidence: f64,
}

/// Full landmark detector, run on keyframes only. Implementations wrap
/// whatever model or service produces landmarks from a raw frame.
/// `Ok(None)` means the detector ran but found nothing.
pub trait LandmarkDetector {
    fn detect(&mut self, image: &Image) -> Result<Option<Detection>>;
}
