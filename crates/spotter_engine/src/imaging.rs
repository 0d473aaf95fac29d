//! Image decoding and the cheap per-image signals used by the prober and the
//! edge stage of the matcher.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};

/// Single-channel float image, used for gradient magnitudes.
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Sobel magnitude at or above which a pixel counts as an edge.
pub const EDGE_THRESHOLD: f32 = 100.0;

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("degenerate image {width}x{height}")]
    Degenerate { width: u32, height: u32 },
}

/// Removes every `eXIf` chunk from a PNG stream. Duplicate eXIf chunks make
/// some decoders reject otherwise valid files. Anything that is not a PNG, or
/// whose chunk structure is truncated, is passed through from that point on.
pub fn strip_png_exif(bytes: &[u8]) -> Cow<'_, [u8]> {
    if !bytes.starts_with(PNG_SIGNATURE) {
        return Cow::Borrowed(bytes);
    }
    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(PNG_SIGNATURE);
    let mut pos = PNG_SIGNATURE.len();
    let mut stripped = false;
    while pos < bytes.len() {
        let Some(header) = bytes.get(pos..pos + 8) else {
            break;
        };
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let end = pos.saturating_add(12).saturating_add(len);
        if end > bytes.len() {
            break;
        }
        if &header[4..8] == b"eXIf" {
            stripped = true;
        } else {
            out.extend_from_slice(&bytes[pos..end]);
        }
        pos = end;
    }
    if !stripped {
        return Cow::Borrowed(bytes);
    }
    out.extend_from_slice(&bytes[pos..]);
    Cow::Owned(out)
}

/// Decodes any supported format to 8-bit grayscale.
pub fn decode_gray(bytes: &[u8]) -> Result<GrayImage, ImageError> {
    let decoded = image::load_from_memory(&strip_png_exif(bytes))?;
    let gray = decoded.to_luma8();
    if gray.width() == 0 || gray.height() == 0 {
        return Err(ImageError::Degenerate {
            width: gray.width(),
            height: gray.height(),
        });
    }
    Ok(gray)
}

/// Downscales by an integer factor; `None` when a side would fall below `min_side`.
pub fn reduced_rendition(full: &GrayImage, factor: u32, min_side: u32) -> Option<GrayImage> {
    let factor = factor.max(1);
    let (width, height) = (full.width() / factor, full.height() / factor);
    if width < min_side.max(1) || height < min_side.max(1) {
        return None;
    }
    Some(imageops::thumbnail(full, width, height))
}

fn filter_for(scale: f64) -> FilterType {
    if scale < 1.0 {
        FilterType::Triangle
    } else {
        FilterType::CatmullRom
    }
}

/// Resizes a grayscale image; same-size requests return a copy.
pub fn resize_gray(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    let scale = f64::from(width) / f64::from(image.width().max(1));
    imageops::resize(image, width, height, filter_for(scale))
}

/// Sobel gradient magnitude with replicated borders.
pub fn sobel_magnitude(image: &GrayImage) -> FloatImage {
    let (width, height) = image.dimensions();
    let at = |x: i64, y: i64| -> f32 {
        let x = x.clamp(0, i64::from(width) - 1) as u32;
        let y = y.clamp(0, i64::from(height) - 1) as u32;
        f32::from(image.get_pixel(x, y)[0])
    };
    FloatImage::from_fn(width, height, |x, y| {
        let (x, y) = (i64::from(x), i64::from(y));
        let gx = at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1)
            - at(x - 1, y - 1)
            - 2.0 * at(x - 1, y)
            - at(x - 1, y + 1);
        let gy = at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1)
            - at(x - 1, y - 1)
            - 2.0 * at(x, y - 1)
            - at(x + 1, y - 1);
        Luma([(gx * gx + gy * gy).sqrt()])
    })
}

pub fn edge_pixel_count(image: &GrayImage) -> usize {
    sobel_magnitude(image)
        .pixels()
        .filter(|p| p[0] >= EDGE_THRESHOLD)
        .count()
}

/// Variance of the 4-neighbour Laplacian over interior pixels.
pub fn laplacian_variance(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }
    let px = |x: u32, y: u32| f64::from(image.get_pixel(x, y)[0]);
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
            n += 1.0;
        }
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Normalized intensity histogram with `bins` equal-width bins.
pub fn histogram(image: &GrayImage, bins: usize) -> Vec<f64> {
    let bins = bins.clamp(1, 256);
    let mut counts = vec![0.0; bins];
    for pixel in image.pixels() {
        counts[usize::from(pixel[0]) * bins / 256] += 1.0;
    }
    let total = f64::from(image.width()) * f64::from(image.height());
    if total > 0.0 {
        counts.iter_mut().for_each(|c| *c /= total);
    }
    counts
}

/// Pearson correlation of two histograms. Two constant histograms correlate
/// perfectly.
pub fn histogram_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let (mut num, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        num += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom <= f64::EPSILON {
        1.0
    } else {
        num / denom
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template not found: {}", .path.display())]
    NotFound { path: PathBuf },
    #[error("template {} could not be read: {detail}", .path.display())]
    Unreadable { path: PathBuf, detail: String },
    #[error("template {} could not be decoded: {detail}", .path.display())]
    Decode { path: PathBuf, detail: String },
}

impl TemplateError {
    /// Stable identifier for the error record a failed run emits.
    pub fn code(&self) -> &'static str {
        match self {
            TemplateError::NotFound { .. } => "template_not_found",
            TemplateError::Unreadable { .. } | TemplateError::Decode { .. } => {
                "template_decode_failed"
            }
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            TemplateError::NotFound { .. } => None,
            TemplateError::Unreadable { detail, .. } | TemplateError::Decode { detail, .. } => {
                Some(detail)
            }
        }
    }
}

/// The reference image, loaded once and shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct Template {
    gray: GrayImage,
    edges: FloatImage,
    /// The file as read from disk, for uploading to a remote backend.
    encoded: Bytes,
}

impl Template {
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let encoded = std::fs::read(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                TemplateError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                TemplateError::Unreadable {
                    path: path.to_path_buf(),
                    detail: err.to_string(),
                }
            }
        })?;
        let gray = decode_gray(&encoded).map_err(|err| TemplateError::Decode {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        Ok(Self::from_parts(gray, Bytes::from(encoded)))
    }

    pub fn from_gray(gray: GrayImage) -> Self {
        Self::from_parts(gray, Bytes::new())
    }

    fn from_parts(gray: GrayImage, encoded: Bytes) -> Self {
        let edges = sobel_magnitude(&gray);
        Self {
            gray,
            edges,
            encoded,
        }
    }

    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    pub fn edges(&self) -> &FloatImage {
        &self.edges
    }

    /// Edge map of the template resized to `width`×`height`.
    ///
    /// Gradients are taken after resizing the intensities; `imageops::resize`
    /// clamps float samples to [0, 1], so the magnitude map cannot be resized.
    pub fn edges_at(&self, width: u32, height: u32) -> Cow<'_, FloatImage> {
        if self.dimensions() == (width, height) {
            Cow::Borrowed(&self.edges)
        } else {
            Cow::Owned(sobel_magnitude(&resize_gray(&self.gray, width, height)))
        }
    }

    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.gray.dimensions()
    }

    pub fn aspect(&self) -> f64 {
        f64::from(self.width()) / f64::from(self.height().max(1))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn png_bytes(image: &GrayImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    fn chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = (data.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        out.extend_from_slice(&[0, 0, 0, 0]);
        out
    }

    /// Inserts two eXIf chunks right after IHDR.
    fn with_exif(png: &[u8]) -> Vec<u8> {
        let ihdr_end = 8 + 12 + 13;
        let mut out = png[..ihdr_end].to_vec();
        out.extend(chunk(b"eXIf", b"MM\0*junk"));
        out.extend(chunk(b"eXIf", b"MM\0*more"));
        out.extend_from_slice(&png[ihdr_end..]);
        out
    }

    fn checker(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            Luma([if (x / 4 + y / 4) % 2 == 0 { 20 } else { 230 }])
        })
    }

    #[test]
    fn exif_chunks_are_stripped() {
        let png = png_bytes(&checker(16));
        let dirty = with_exif(&png);
        let cleaned = strip_png_exif(&dirty);
        assert_eq!(cleaned.as_ref(), png.as_slice());
        assert_eq!(decode_gray(&dirty).expect("decodes").dimensions(), (16, 16));
    }

    #[test]
    fn non_png_and_truncated_input_pass_through() {
        assert!(matches!(strip_png_exif(b"GIF89a..."), Cow::Borrowed(_)));
        let png = png_bytes(&checker(8));
        let truncated = &png[..png.len() - 5];
        assert_eq!(strip_png_exif(truncated).as_ref(), truncated);
        assert!(decode_gray(b"not an image").is_err());
    }

    #[test]
    fn texture_signals_separate_flat_from_busy() {
        let flat = GrayImage::from_pixel(32, 32, Luma([128]));
        let busy = checker(32);
        assert_eq!(edge_pixel_count(&flat), 0);
        assert_eq!(laplacian_variance(&flat), 0.0);
        assert!(edge_pixel_count(&busy) > 8);
        assert!(laplacian_variance(&busy) > 3.5);
    }

    #[test]
    fn histogram_correlation_of_identical_images_is_one() {
        let img = checker(32);
        let h = histogram(&img, 32);
        assert!((h.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((histogram_correlation(&h, &h) - 1.0).abs() < 1e-9);

        let dark = GrayImage::from_fn(32, 32, |x, _| Luma([(x * 2) as u8]));
        let bright = GrayImage::from_fn(32, 32, |x, _| Luma([190 + (x * 2) as u8]));
        let c = histogram_correlation(&histogram(&dark, 32), &histogram(&bright, 32));
        assert!(c < 0.2, "disjoint tones correlated at {c}");
    }

    #[test]
    fn reduced_rendition_respects_minimum_side() {
        let img = checker(64);
        assert_eq!(
            reduced_rendition(&img, 4, 16).map(|r| r.dimensions()),
            Some((16, 16))
        );
        assert!(reduced_rendition(&img, 4, 17).is_none());
    }

    #[test]
    fn resized_edge_maps_keep_their_gradients() {
        let template = Template::from_gray(checker(64));
        assert!(matches!(template.edges_at(64, 64), Cow::Borrowed(_)));

        let half = template.edges_at(32, 32);
        assert_eq!(half.dimensions(), (32, 32));
        let max = half.pixels().map(|p| p[0]).fold(0.0f32, f32::max);
        let min = half.pixels().map(|p| p[0]).fold(f32::MAX, f32::min);
        assert!(max > 100.0, "edge magnitudes collapsed to {max}");
        assert!(min < max);
        assert_eq!(*half, sobel_magnitude(&resize_gray(&checker(64), 32, 32)));
    }

    #[test]
    fn missing_template_is_not_found() {
        let err = Template::load(Path::new("/definitely/not/here.png")).unwrap_err();
        assert_eq!(err.code(), "template_not_found");
    }
}
