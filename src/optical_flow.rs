use nalgebra as na;

use crate::image::*;
use crate::my_types::*;
use crate::pyramid::Pyramid;

type Range = [[i16; 2]; 2];

/// Tuning for the pyramidal Lucas-Kanade tracker.
#[derive(Clone, Copy, Debug)]
pub struct FlowConfig {
    /// Side length of the square integration window, odd.
    pub win_size: usize,
    /// Number of pyramid downscale steps used below the source image.
    pub levels: usize,
    /// Iteration cap per pyramid level.
    pub max_iterations: usize,
    /// Convergence threshold per displacement component, in pixels.
    pub epsilon: f64,
    /// Structure matrices with a smaller determinant are degenerate.
    pub min_determinant: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            win_size: 15,
            levels: 3,
            max_iterations: 10,
            epsilon: 0.01,
            min_determinant: 1e-6,
        }
    }
}

/// Tracked position of a single point with its match residual. A failed
/// point carries the displacement accumulated before the failure and an
/// infinite error.
#[derive(Clone, Copy, Debug)]
pub struct FlowResult {
    pub point: Vector2d,
    pub error: f64,
}

/// Sparse point tracker between two frame pyramids.
pub trait FlowEngine {
    fn track(&mut self, prev: &Pyramid, next: &Pyramid, points: &[Vector2d]) -> Vec<FlowResult>;
}

pub struct LucasKanadeFlow {
    config: FlowConfig,
    grad_x: Vec<Matrixd>,
    grad_y: Vec<Matrixd>,
}

impl LucasKanadeFlow {
    pub fn new(config: FlowConfig) -> LucasKanadeFlow {
        LucasKanadeFlow {
            config,
            grad_x: vec![],
            grad_y: vec![],
        }
    }

    fn compute_gradients(&mut self, prev: &Pyramid) {
        while self.grad_x.len() < prev.levels.len() {
            self.grad_x.push(na::dmatrix!());
            self.grad_y.push(na::dmatrix!());
        }
        for (i, level) in prev.levels.iter().enumerate() {
            sobel(level, &mut self.grad_x[i], &mut self.grad_y[i]);
        }
    }

    /// ref http://robots.stanford.edu/cs223b04/algo_tracking.pdf
    fn track_point(&self, prev: &Pyramid, next: &Pyramid, point: Vector2d) -> FlowResult {
        let r = (self.config.win_size - 1) / 2;
        let top = usize::min(
            self.config.levels,
            usize::min(prev.levels.len(), next.levels.len()) - 1,
        );

        let mut g = Vector2d::zeros();
        let mut d = Vector2d::zeros();
        for level in (0..top + 1).rev() {
            let level0 = &prev.levels[level];
            let level1 = &next.levels[level];
            let scale = u32::pow(2, level as u32) as f64;
            let u = point / scale;

            let range = match integration_range(level0, u, r, 0) {
                Some(range) => range,
                None => {
                    return FlowResult {
                        point: point + g * scale,
                        error: f64::INFINITY,
                    }
                }
            };

            let mut nu = Vector2d::zeros();
            for _ in 0..self.config.max_iterations {
                let (gradient, b, valid) = accumulate_flow(
                    &self.grad_x[level],
                    &self.grad_y[level],
                    level0,
                    level1,
                    u,
                    u + g + nu,
                    range,
                );
                let failed = FlowResult {
                    point: point + (g + nu) * scale,
                    error: f64::INFINITY,
                };
                if valid == 0 || gradient.determinant().abs() < self.config.min_determinant {
                    return failed;
                }
                let eta = match gradient.try_inverse() {
                    Some(inv_gradient) => inv_gradient * b,
                    None => return failed,
                };
                nu += eta;
                if eta[0].abs() < self.config.epsilon && eta[1].abs() < self.config.epsilon {
                    break;
                }
            }

            d = nu;
            if level > 0 {
                g = 2. * (g + d)
            }
        }

        let point1 = point + g + d;
        let level0 = &prev.levels[0];
        let level1 = &next.levels[0];
        let error = match integration_range(level0, point, r, 0) {
            Some(range) if in_bounds(level1, point1) => {
                residual_rms(level0, level1, point, point1, range)
            }
            _ => f64::INFINITY,
        };
        FlowResult {
            point: point1,
            error,
        }
    }
}

impl FlowEngine for LucasKanadeFlow {
    fn track(&mut self, prev: &Pyramid, next: &Pyramid, points: &[Vector2d]) -> Vec<FlowResult> {
        if points.is_empty() {
            return vec![];
        }
        if prev.levels.is_empty() || next.levels.is_empty() {
            return points
                .iter()
                .map(|point| FlowResult {
                    point: *point,
                    error: f64::INFINITY,
                })
                .collect();
        }
        // derivative images once per call, shared by all points
        self.compute_gradients(prev);
        points
            .iter()
            .map(|point| self.track_point(prev, next, *point))
            .collect()
    }
}

/// Accumulate the structure matrix and mismatch vector over the window
/// pixels whose displaced sample stays inside the current frame. The
/// gradients are sampled from the precomputed derivative images of the
/// previous frame.
fn accumulate_flow(
    gx: &Matrixd,
    gy: &Matrixd,
    level0: &Image,
    level1: &Image,
    u: Vector2d,
    target: Vector2d,
    range: Range,
) -> (Matrix2d, Vector2d, usize) {
    let mut x2 = 0.;
    let mut y2 = 0.;
    let mut xy = 0.;
    let mut b = Vector2d::zeros();
    let mut valid = 0;

    for y in range[1][0]..=range[1][1] {
        for x in range[0][0]..=range[0][1] {
            let step = Vector2d::new(x as f64, y as f64);
            let p1 = target + step;
            if !in_bounds(level1, p1) {
                continue;
            }
            let p0 = u + step;
            let ix = sample_grid(gx, p0);
            let iy = sample_grid(gy, p0);
            let di = bilinear(level0, p0) - bilinear(level1, p1);
            x2 += ix * ix;
            y2 += iy * iy;
            xy += ix * iy;
            b[0] += di * ix;
            b[1] += di * iy;
            valid += 1;
        }
    }

    (Matrix2d::new(x2, xy, xy, y2), b, valid)
}

/// Root mean square intensity difference between the two windows,
/// normalized to the [0, 1] intensity scale.
fn residual_rms(level0: &Image, level1: &Image, u: Vector2d, target: Vector2d, range: Range) -> f64 {
    let mut sum = 0.;
    let mut count = 0;
    for y in range[1][0]..=range[1][1] {
        for x in range[0][0]..=range[0][1] {
            let step = Vector2d::new(x as f64, y as f64);
            let p1 = target + step;
            if !in_bounds(level1, p1) {
                continue;
            }
            let di = bilinear(level0, u + step) - bilinear(level1, p1);
            sum += di * di;
            count += 1;
        }
    }
    if count == 0 {
        return f64::INFINITY;
    }
    (sum / count as f64).sqrt() / 255.
}

fn in_bounds(image: &Image, point: Vector2d) -> bool {
    if image.width == 0 || image.height == 0 {
        return false;
    }
    point[0] >= 0.
        && point[1] >= 0.
        && point[0] <= (image.width - 1) as f64
        && point[1] <= (image.height - 1) as f64
}

/// Whole-image 3x3 Sobel derivatives normalized by 8. Neighbor reads
/// clamp at the image borders.
///
/// ref https://en.wikipedia.org/wiki/Sobel_operator
fn sobel(image: &Image, out_x: &mut Matrixd, out_y: &mut Matrixd) {
    let w = image.width as i32;
    let h = image.height as i32;
    *out_x = Matrixd::zeros(h as usize, w as usize);
    *out_y = Matrixd::zeros(h as usize, w as usize);

    let v = |x: i32, y: i32| -> f64 {
        let x = x.clamp(0, w - 1);
        let y = y.clamp(0, h - 1);
        image.value_i32(x, y) as f64
    };

    for y in 0..h {
        for x in 0..w {
            out_x[(y as usize, x as usize)] =
                (v(x + 1, y - 1) + 2. * v(x + 1, y) + v(x + 1, y + 1)
                    - v(x - 1, y - 1)
                    - 2. * v(x - 1, y)
                    - v(x - 1, y + 1))
                    / 8.;
            out_y[(y as usize, x as usize)] =
                (v(x - 1, y + 1) + 2. * v(x, y + 1) + v(x + 1, y + 1)
                    - v(x - 1, y - 1)
                    - 2. * v(x, y - 1)
                    - v(x + 1, y - 1))
                    / 8.;
        }
    }
}

/// Bilinear interpolation over a derivative image. The caller keeps the
/// point within the matrix.
fn sample_grid(m: &Matrixd, point: Vector2d) -> f64 {
    let x0 = point[0].floor();
    let y0 = point[1].floor();
    let tx = point[0] - x0;
    let ty = point[1] - y0;
    let x0 = x0 as usize;
    let y0 = y0 as usize;
    let x1 = usize::min(x0 + 1, m.ncols() - 1);
    let y1 = usize::min(y0 + 1, m.nrows() - 1);
    (1. - ty) * ((1. - tx) * m[(y0, x0)] + tx * m[(y0, x1)])
        + ty * ((1. - tx) * m[(y1, x0)] + tx * m[(y1, x1)])
}

/// Returns closed range of integer steps that can be taken without going outside
/// the image borders. Returns None if the center point is outside the level
/// boundaries.
fn integration_range(level: &Image, center: Vector2d, r: usize, padding: i16) -> Option<Range> {
    if level.width == 0 || level.height == 0 {
        return None;
    }
    let r = r as i16;
    let mut range = [[0, 0], [0, 0]];
    for i in 0..2 {
        let s = if i == 0 { level.width } else { level.height };
        if center[i] < 0. || center[i] > (s - 1) as f64 {
            return None;
        }
        let n = center[i] as i16;
        let fract = if center[i].fract() > 0. { 1 } else { 0 };
        range[i] = [
            i16::max(-r, -n + padding),
            i16::min(r, s as i16 - n - padding - 1 - fract),
        ]
    }
    Some(range)
}
