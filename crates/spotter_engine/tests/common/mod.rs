#![allow(dead_code)]

use std::io::Cursor;
use std::time::Duration;

use image::{GrayImage, Luma};
use spotter_core::SearchConfig;
use spotter_engine::{FetchSettings, RetryPolicy};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A smooth, non-repeating texture; `phase` shifts it to make a different image.
pub fn textured(width: u32, height: u32, phase: f64) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as f64, y as f64);
        let v = 128.0
            + 60.0 * (x / 5.0 + phase).sin() * (y / 4.0).cos()
            + 30.0 * ((x + 2.0 * y) / 9.0 + phase * 2.0).sin();
        Luma([v.clamp(0.0, 255.0) as u8])
    })
}

pub fn png(image: &GrayImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

pub fn fast_fetch() -> FetchSettings {
    let quick = RetryPolicy::new(2, Duration::from_millis(5), Duration::from_millis(5));
    FetchSettings {
        page_timeout: Duration::from_secs(5),
        image_timeout: Duration::from_secs(5),
        page_retry: quick.clone(),
        image_retry: quick,
        ..FetchSettings::default()
    }
}

pub fn fast_config() -> SearchConfig {
    let mut config = SearchConfig::default();
    config.crawl.workers = 4;
    config.crawl.idle_wait_ms = 200;
    config.matching.local_workers = 2;
    config.execution.retry_delay_ms = 5;
    config
}

pub async fn mount_html(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

pub async fn mount_png(server: &MockServer, route: &str, bytes: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(bytes, "image/png"))
        .mount(server)
        .await;
}

/// A page listing the given images.
pub fn gallery(images: &[&str]) -> String {
    let tags: String = images
        .iter()
        .map(|src| format!("<img src=\"{src}\">"))
        .collect();
    format!("<html><body>{tags}</body></html>")
}
