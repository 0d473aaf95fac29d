//! Zero-mean normalized cross-correlation via FFT.
//!
//! The searched image is transformed once; each template (one per scale) is
//! zero-padded to the image size, so the circular correlation is exact for
//! every placement that keeps the template inside the image. Window sums for
//! the denominator come from integral images.

use std::sync::Arc;

use image::{GrayImage, Luma};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::imaging::FloatImage;

/// Per-pixel variance below which a window (or template) counts as flat.
const FLAT_VARIANCE: f64 = 1e-6;

/// A row-major single-channel plane of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl Plane {
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> Option<Self> {
        (width > 0 && height > 0 && data.len() == width * height).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn at(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }
}

impl From<&GrayImage> for Plane {
    fn from(image: &GrayImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data: image.pixels().map(|&Luma([v])| f64::from(v)).collect(),
        }
    }
}

impl From<&FloatImage> for Plane {
    fn from(image: &FloatImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data: image.pixels().map(|&Luma([v])| f64::from(v)).collect(),
        }
    }
}

/// Summed-area table with a zero guard row and column.
struct Integral {
    stride: usize,
    sums: Vec<f64>,
}

impl Integral {
    fn build(plane: &Plane, f: impl Fn(f64) -> f64) -> Self {
        let stride = plane.width + 1;
        let mut sums = vec![0.0; stride * (plane.height + 1)];
        for y in 0..plane.height {
            let mut row = 0.0;
            for x in 0..plane.width {
                row += f(plane.at(x, y));
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { stride, sums }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let s = self.stride;
        self.sums[(y + h) * s + x + w] + self.sums[y * s + x]
            - self.sums[y * s + x + w]
            - self.sums[(y + h) * s + x]
    }
}

struct Transforms {
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

/// An image prepared for repeated template searches.
pub struct NccSearcher {
    width: usize,
    height: usize,
    spectrum: Vec<Complex<f64>>,
    sum: Integral,
    sum_sq: Integral,
    transforms: Transforms,
}

impl NccSearcher {
    pub fn new(image: &Plane) -> Self {
        let (width, height) = (image.width, image.height);
        let mut planner = FftPlanner::new();
        let transforms = Transforms {
            row_forward: planner.plan_fft_forward(width),
            row_inverse: planner.plan_fft_inverse(width),
            col_forward: planner.plan_fft_forward(height),
            col_inverse: planner.plan_fft_inverse(height),
        };

        // Centering keeps the correlation magnitudes small; NCC is unaffected.
        let mean = image.data.iter().sum::<f64>() / image.data.len() as f64;
        let centered = Plane {
            width,
            height,
            data: image.data.iter().map(|v| v - mean).collect(),
        };
        let mut spectrum: Vec<Complex<f64>> = centered
            .data
            .iter()
            .map(|&v| Complex::new(v, 0.0))
            .collect();
        fft2d(&mut spectrum, width, height, &transforms, Direction::Forward);

        Self {
            width,
            height,
            spectrum,
            sum: Integral::build(&centered, |v| v),
            sum_sq: Integral::build(&centered, |v| v * v),
            transforms,
        }
    }

    /// Highest NCC over every placement of `template` inside the image, in
    /// [-1, 1]. `None` when the template does not fit, is flat, or every
    /// window is flat.
    pub fn best(&self, template: &Plane) -> Option<f64> {
        let (tw, th) = (template.width, template.height);
        if tw > self.width || th > self.height {
            return None;
        }
        let n = (tw * th) as f64;
        let t_mean = template.data.iter().sum::<f64>() / n;
        let t_var: f64 = template.data.iter().map(|v| (v - t_mean).powi(2)).sum();
        if t_var <= FLAT_VARIANCE * n {
            return None;
        }

        let mut padded = vec![Complex::new(0.0, 0.0); self.width * self.height];
        for y in 0..th {
            for x in 0..tw {
                padded[y * self.width + x] = Complex::new(template.at(x, y) - t_mean, 0.0);
            }
        }
        fft2d(&mut padded, self.width, self.height, &self.transforms, Direction::Forward);
        for (t, i) in padded.iter_mut().zip(&self.spectrum) {
            *t = i * t.conj();
        }
        fft2d(&mut padded, self.width, self.height, &self.transforms, Direction::Inverse);
        let norm = (self.width * self.height) as f64;

        let mut best: Option<f64> = None;
        for y in 0..=self.height - th {
            for x in 0..=self.width - tw {
                let sum = self.sum.window(x, y, tw, th);
                let var = self.sum_sq.window(x, y, tw, th) - sum * sum / n;
                if var <= FLAT_VARIANCE * n {
                    continue;
                }
                let numerator = padded[y * self.width + x].re / norm;
                let score = (numerator / (t_var * var).sqrt()).clamp(-1.0, 1.0);
                if best.is_none_or(|b| score > b) {
                    best = Some(score);
                }
            }
        }
        best
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Inverse,
}

/// Unnormalized 2D FFT: every row in one batched call, then the columns via
/// a transpose.
fn fft2d(
    data: &mut Vec<Complex<f64>>,
    width: usize,
    height: usize,
    transforms: &Transforms,
    direction: Direction,
) {
    let (rows, cols) = match direction {
        Direction::Forward => (&transforms.row_forward, &transforms.col_forward),
        Direction::Inverse => (&transforms.row_inverse, &transforms.col_inverse),
    };
    rows.process(data);
    let mut transposed = transpose(data, width, height);
    cols.process(&mut transposed);
    *data = transpose(&transposed, height, width);
}

fn transpose(data: &[Complex<f64>], width: usize, height: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    for y in 0..height {
        for x in 0..width {
            out[x * height + y] = data[y * width + x];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(width: usize, height: usize, seed: u64) -> Plane {
        let data = (0..width * height)
            .map(|i| {
                let v = (i as u64).wrapping_mul(6364136223846793005).wrapping_add(seed);
                ((v >> 33) % 251) as f64
            })
            .collect();
        Plane::new(width, height, data).expect("valid plane")
    }

    fn crop(plane: &Plane, x0: usize, y0: usize, w: usize, h: usize) -> Plane {
        let mut data = Vec::with_capacity(w * h);
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                data.push(plane.at(x, y));
            }
        }
        Plane::new(w, h, data).expect("valid crop")
    }

    /// Direct O(N·M) evaluation for comparison.
    fn brute_force(image: &Plane, template: &Plane) -> f64 {
        let n = (template.width * template.height) as f64;
        let t_mean = template.data.iter().sum::<f64>() / n;
        let mut best = f64::NEG_INFINITY;
        for y in 0..=image.height - template.height {
            for x in 0..=image.width - template.width {
                let window = crop(image, x, y, template.width, template.height);
                let w_mean = window.data.iter().sum::<f64>() / n;
                let (mut num, mut vt, mut vw) = (0.0, 0.0, 0.0);
                for (a, b) in window.data.iter().zip(&template.data) {
                    num += (a - w_mean) * (b - t_mean);
                    vw += (a - w_mean).powi(2);
                    vt += (b - t_mean).powi(2);
                }
                best = best.max(num / (vt * vw).sqrt());
            }
        }
        best
    }

    #[test]
    fn exact_crop_scores_one() {
        let image = pattern(40, 30, 7);
        let template = crop(&image, 11, 9, 12, 8);
        let score = NccSearcher::new(&image).best(&template).expect("score");
        assert!((score - 1.0).abs() < 1e-9, "score {score}");
    }

    #[test]
    fn matches_brute_force() {
        let image = pattern(23, 17, 3);
        let template = pattern(6, 5, 99);
        let fast = NccSearcher::new(&image).best(&template).expect("score");
        let slow = brute_force(&image, &template);
        assert!((fast - slow).abs() < 1e-9, "fft {fast} vs direct {slow}");
    }

    #[test]
    fn brightness_and_contrast_do_not_matter() {
        let image = pattern(32, 32, 5);
        let mut template = crop(&image, 4, 4, 10, 10);
        template.data.iter_mut().for_each(|v| *v = *v * 0.5 + 40.0);
        let score = NccSearcher::new(&image).best(&template).expect("score");
        assert!(score > 0.999999);
    }

    #[test]
    fn flat_or_oversized_templates_have_no_score() {
        let image = pattern(16, 16, 1);
        let searcher = NccSearcher::new(&image);
        let flat = Plane::new(4, 4, vec![9.0; 16]).expect("plane");
        assert_eq!(searcher.best(&flat), None);
        assert_eq!(searcher.best(&pattern(17, 4, 2)), None);
    }

    #[test]
    fn flat_image_has_no_score() {
        let image = Plane::new(8, 8, vec![3.0; 64]).expect("plane");
        assert_eq!(NccSearcher::new(&image).best(&pattern(4, 4, 1)), None);
    }
}
