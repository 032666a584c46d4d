//! Optical-flow backend.
//!
//! The Lucas-Kanade primitive sits behind a narrow [`OpticalFlowBackend`]
//! interface so an alternate numerical backend could be substituted
//! without touching candidate-generation logic. [`LucasKanadeFlow`] is a
//! self-contained pyramidal LK implementation over `image::GrayImage`
//! buffers, using `nalgebra` for the per-window 2x2 normal-equations
//! solve (see `DESIGN.md` for why this isn't a binding to a system
//! optical-flow library).

use image::GrayImage;
use nalgebra::{Matrix2, Vector2};

/// Result of tracking a single point from one frame to the next.
#[derive(Debug, Clone, Copy)]
pub struct FlowResult {
    pub point: [f64; 2],
    pub found: bool,
    pub error: f64,
}

/// Narrow interface around a Lucas-Kanade-style point tracker, so the
/// numerical backend can be swapped without touching candidate-generation
/// logic.
pub trait OpticalFlowBackend {
    /// Tracks `points` (in `[x, y]` pixel coordinates of `prev`) from
    /// `prev` into `next`.
    fn lk_flow(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        points: &[[f64; 2]],
        window_size: u32,
        max_levels: u32,
    ) -> Vec<FlowResult>;
}

const TERMINATION_MAX_ITERS: u32 = 30;
const TERMINATION_EPS: f64 = 0.01;
const MIN_EIGENVALUE: f64 = 1e-6;

struct PyramidLevel {
    width: usize,
    height: usize,
    pixels: Vec<f32>,
}

impl PyramidLevel {
    fn from_gray(img: &GrayImage) -> Self {
        let (w, h) = img.dimensions();
        let pixels = img.pixels().map(|p| p.0[0] as f32).collect();
        Self {
            width: w as usize,
            height: h as usize,
            pixels,
        }
    }

    fn downsample(&self) -> Self {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let mut pixels = vec![0.0f32; width * height];
        for y in 0..height {
            for x in 0..width {
                let x0 = (x * 2).min(self.width - 1);
                let x1 = (x * 2 + 1).min(self.width - 1);
                let y0 = (y * 2).min(self.height - 1);
                let y1 = (y * 2 + 1).min(self.height - 1);
                let sum = self.at(x0, y0) + self.at(x1, y0) + self.at(x0, y1) + self.at(x1, y1);
                pixels[y * width + x] = sum / 4.0;
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    fn at(&self, x: usize, y: usize) -> f32 {
        self.pixels[y * self.width + x]
    }

    /// Bilinearly sampled intensity at a sub-pixel coordinate, `None` if
    /// out of bounds.
    fn sample(&self, x: f64, y: f64) -> Option<f32> {
        if x < 0.0 || y < 0.0 || x > (self.width - 1) as f64 || y > (self.height - 1) as f64 {
            return None;
        }
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let top = self.at(x0, y0) as f64 * (1.0 - fx) + self.at(x1, y0) as f64 * fx;
        let bottom = self.at(x0, y1) as f64 * (1.0 - fx) + self.at(x1, y1) as f64 * fx;
        Some((top * (1.0 - fy) + bottom * fy) as f32)
    }

    /// Central-difference gradient at a sub-pixel coordinate.
    fn gradient(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let ix = (self.sample(x + 1.0, y)? as f64 - self.sample(x - 1.0, y)? as f64) / 2.0;
        let iy = (self.sample(x, y + 1.0)? as f64 - self.sample(x, y - 1.0)? as f64) / 2.0;
        Some((ix, iy))
    }
}

/// Builds the pyramid, stopping early once a level would be too small to
/// hold a search window of the given size: a coarsest level smaller than
/// the window can never converge, it would only ever fail out of bounds.
fn build_pyramid(img: &GrayImage, max_levels: u32, window_size: u32) -> Vec<PyramidLevel> {
    let min_span = window_size.max(1) as usize;
    let mut levels = vec![PyramidLevel::from_gray(img)];
    for _ in 0..max_levels {
        let next = levels.last().unwrap().downsample();
        if next.width < min_span || next.height < min_span {
            break;
        }
        levels.push(next);
    }
    levels
}

/// Tracks one point at one pyramid level using iterative Lucas-Kanade,
/// starting from `initial_guess` (the displacement carried down from the
/// coarser level). Returns `None` if the window falls outside the image or
/// the local gradient structure is singular.
fn track_at_level(
    prev: &PyramidLevel,
    next: &PyramidLevel,
    point: [f64; 2],
    initial_guess: Vector2<f64>,
    half_window: i64,
) -> Option<(Vector2<f64>, f64)> {
    let (px, py) = (point[0], point[1]);

    // Structure matrix from the reference window (constant across iterations).
    let mut g = Matrix2::zeros();
    let mut window = Vec::new();
    for wy in -half_window..=half_window {
        for wx in -half_window..=half_window {
            let x = px + wx as f64;
            let y = py + wy as f64;
            let (ix, iy) = prev.gradient(x, y)?;
            let intensity = prev.sample(x, y)?;
            g += Matrix2::new(ix * ix, ix * iy, ix * iy, iy * iy);
            window.push((x, y, ix, iy, intensity as f64));
        }
    }

    let det = g.determinant();
    if det.abs() < MIN_EIGENVALUE {
        return None;
    }
    let g_inv = g.try_inverse()?;

    let mut d = initial_guess;
    let mut error = f64::INFINITY;
    for _ in 0..TERMINATION_MAX_ITERS {
        let mut b = Vector2::zeros();
        let mut sq_error = 0.0;
        let mut n = 0usize;
        for &(x, y, ix, iy, i_prev) in &window {
            let i_next = next.sample(x + d.x, y + d.y)?;
            let diff = i_prev - i_next as f64;
            b += Vector2::new(diff * ix, diff * iy);
            sq_error += diff * diff;
            n += 1;
        }
        error = (sq_error / n.max(1) as f64).sqrt();

        let eta = g_inv * b;
        d += eta;
        if eta.norm() < TERMINATION_EPS {
            break;
        }
    }

    Some((d, error))
}

/// A pure-Rust pyramidal Lucas-Kanade implementation.
pub struct LucasKanadeFlow;

impl OpticalFlowBackend for LucasKanadeFlow {
    fn lk_flow(
        &self,
        prev: &GrayImage,
        next: &GrayImage,
        points: &[[f64; 2]],
        window_size: u32,
        max_levels: u32,
    ) -> Vec<FlowResult> {
        let half_window = (window_size.max(1) / 2) as i64;
        let prev_pyramid = build_pyramid(prev, max_levels, window_size);
        let next_pyramid = build_pyramid(next, max_levels, window_size);

        points
            .iter()
            .map(|&point| {
                if !point[0].is_finite() || !point[1].is_finite() {
                    return FlowResult {
                        point,
                        found: false,
                        error: f64::INFINITY,
                    };
                }

                let scale_to_level = |p: [f64; 2], level: usize| {
                    let s = 0.5f64.powi(level as i32);
                    Vector2::new(p[0] * s, p[1] * s)
                };

                let mut guess = Vector2::zeros();
                let mut last = None;
                for level in (0..prev_pyramid.len()).rev() {
                    let scaled_point = scale_to_level(point, level);
                    let result = track_at_level(
                        &prev_pyramid[level],
                        &next_pyramid[level],
                        [scaled_point.x, scaled_point.y],
                        guess,
                        half_window,
                    );
                    match result {
                        Some((d, error)) => {
                            guess = if level > 0 { d * 2.0 } else { d };
                            last = Some(error);
                        }
                        None => {
                            last = None;
                            break;
                        }
                    }
                }

                match last {
                    Some(error) => FlowResult {
                        point: [point[0] + guess.x, point[1] + guess.y],
                        found: true,
                        error,
                    },
                    None => FlowResult {
                        point,
                        found: false,
                        error: f64::INFINITY,
                    },
                }
            })
            .collect()
    }
}
