use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// `...-1024x768.jpg` style size hints embedded in image file names.
static DIMENSIONS_IN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2,5})[xX×](\d{2,5})").expect("valid dimension pattern"));

/// Raster formats the crawler registers as candidates.
pub const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// An image URL discovered while crawling. Never mutated after registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageCandidate {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Lowercase file extension without the dot.
    pub extension: String,
    pub source_page: String,
}

impl ImageCandidate {
    pub fn new(
        url: impl Into<String>,
        width: Option<u32>,
        height: Option<u32>,
        extension: impl Into<String>,
        source_page: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            extension: extension.into(),
            source_page: source_page.into(),
        }
    }

    /// Width and height when both are known.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        }
    }
}

/// Coarse grouping of file extensions used by the heuristic ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionClass {
    Preferred,
    Legacy,
    Other,
}

impl ExtensionClass {
    pub fn of(extension: &str) -> Self {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "webp" => ExtensionClass::Preferred,
            "gif" | "bmp" => ExtensionClass::Legacy,
            _ => ExtensionClass::Other,
        }
    }
}

/// Returns the lowercase raster extension of a URL path, if it has one.
pub fn raster_extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    RASTER_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Parses an HTML `width`/`height` attribute; only positive integers count.
pub fn parse_dimension_attr(value: Option<&str>) -> Option<u32> {
    value
        .map(str::trim)
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
}

/// Best-effort size estimate: markup attributes first, each missing side
/// filled from a `WIDTHxHEIGHT` pattern in the URL.
pub fn estimate_dimensions(
    width_attr: Option<&str>,
    height_attr: Option<&str>,
    url: &str,
) -> (Option<u32>, Option<u32>) {
    let mut width = parse_dimension_attr(width_attr);
    let mut height = parse_dimension_attr(height_attr);
    if width.is_none() || height.is_none() {
        if let Some(caps) = DIMENSIONS_IN_NAME.captures(url) {
            let from_name = |idx: usize| {
                caps.get(idx)
                    .and_then(|m| m.as_str().parse::<u32>().ok())
                    .filter(|v| *v > 0)
            };
            width = width.or_else(|| from_name(1));
            height = height.or_else(|| from_name(2));
        }
    }
    (width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_win_over_file_name() {
        let dims = estimate_dimensions(Some("300"), Some("200"), "https://a.com/x-1024x768.jpg");
        assert_eq!(dims, (Some(300), Some(200)));
    }

    #[test]
    fn missing_side_is_filled_from_file_name() {
        let dims = estimate_dimensions(Some("300"), None, "https://a.com/x-1024x768.jpg");
        assert_eq!(dims, (Some(300), Some(768)));
        let dims = estimate_dimensions(None, None, "https://a.com/x_640×480.png");
        assert_eq!(dims, (Some(640), Some(480)));
    }

    #[test]
    fn junk_attributes_are_unknown() {
        let dims = estimate_dimensions(Some("100%"), Some("0"), "https://a.com/photo.jpg");
        assert_eq!(dims, (None, None));
    }

    #[test]
    fn raster_extension_ignores_non_images() {
        assert_eq!(raster_extension("/img/Photo.JPG"), Some("jpg".to_string()));
        assert_eq!(raster_extension("/img/logo.svg"), None);
        assert_eq!(raster_extension("/img.d/noext"), None);
    }

    #[test]
    fn extension_classes() {
        assert_eq!(ExtensionClass::of("webp"), ExtensionClass::Preferred);
        assert_eq!(ExtensionClass::of(".GIF"), ExtensionClass::Legacy);
        assert_eq!(ExtensionClass::of("tiff"), ExtensionClass::Other);
    }
}
