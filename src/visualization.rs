use std::path::Path;

use anyhow::Result;
use ndarray as nd;
use rerun::{RecordingStream, RecordingStreamBuilder};

use crate::image::Image;
use crate::landmark::PointSet;

/// Logs frames, landmark overlays and tracking error to a rerun
/// recording for offline inspection.
pub struct Visualizer {
    rec: RecordingStream,
}

impl Visualizer {
    pub fn new(path: &Path) -> Result<Visualizer> {
        let rec = RecordingStreamBuilder::new("handtrack").save(path)?;
        Ok(Visualizer { rec })
    }

    pub fn advance(&self, frame: u64) {
        self.rec.set_time_sequence("frame", frame as i64);
    }

    pub fn show_frame(&self, image: &Image) -> Result<()> {
        self.rec
            .log("camera/image", &rerun::Image::try_from(rgb_array(image))?)?;
        Ok(())
    }

    /// Landmark overlay, green for fresh detections and yellow for
    /// points carried by optical flow.
    pub fn show_points(&self, points: Option<&PointSet>, keyframe: bool) -> Result<()> {
        let positions: Vec<(f32, f32)> = match points {
            Some(set) => set
                .points
                .iter()
                .map(|p| (p[0] as f32, p[1] as f32))
                .collect(),
            None => vec![],
        };
        let color = if keyframe {
            rerun::Color::from_rgb(0, 255, 0)
        } else {
            rerun::Color::from_rgb(255, 255, 0)
        };
        self.rec.log(
            "camera/landmarks",
            &rerun::Points2D::new(positions)
                .with_colors([color])
                .with_radii([2.]),
        )?;
        Ok(())
    }

    pub fn show_error(&self, error: f64) -> Result<()> {
        if error.is_finite() {
            self.rec
                .log("metrics/flow_error", &rerun::TimeSeriesScalar::new(error))?;
        }
        Ok(())
    }
}

fn rgb_array(image: &Image) -> nd::Array3<u8> {
    let mut array = nd::Array3::zeros((image.height, image.width, 3));
    for y in 0..image.height {
        for x in 0..image.width {
            let v = image.value(x, y);
            for c in 0..3 {
                array[(y, x, c)] = v;
            }
        }
    }
    array
}
