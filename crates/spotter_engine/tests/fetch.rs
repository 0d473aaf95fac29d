mod common;

use spotter_engine::{FailureKind, FetchSettings, Fetcher, ReqwestFetcher};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::fast_fetch;

#[tokio::test]
async fn fetch_page_returns_decoded_html() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"<p>caf\xe9</p>".to_vec(), "text/html; charset=windows-1252"),
        )
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(fast_fetch()).expect("client");
    let url = format!("{}/doc", server.uri());
    let page = fetcher.fetch_page(&url).await.expect("page");
    assert_eq!(page.final_url, url);
    assert_eq!(page.html, "<p>café</p>");
}

#[tokio::test]
async fn non_html_pages_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .expect(2)
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(fast_fetch()).expect("client");
    assert!(fetcher
        .fetch_page(&format!("{}/data", server.uri()))
        .await
        .is_none());

    let err = fetcher
        .try_fetch_page(&format!("{}/data", server.uri()))
        .await;
    assert!(matches!(
        err.map_err(|e| e.kind),
        Err(FailureKind::UnsupportedContentType { .. })
    ));
}

#[tokio::test]
async fn missing_pages_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(fast_fetch()).expect("client");
    assert!(fetcher
        .fetch_page(&format!("{}/gone", server.uri()))
        .await
        .is_none());
}

#[tokio::test]
async fn downloads_retry_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img.png"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8, 2, 3], "image/png"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(fast_fetch()).expect("client");
    let bytes = fetcher
        .download_bytes(&format!("{}/img.png", server.uri()))
        .await
        .expect("bytes after retry");
    assert_eq!(bytes.as_ref(), &[1, 2, 3]);
}

#[tokio::test]
async fn oversized_downloads_fail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 100], "image/png"))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(FetchSettings {
        max_image_bytes: 10,
        ..fast_fetch()
    })
    .expect("client");
    let err = fetcher
        .try_download(&format!("{}/big.png", server.uri()))
        .await
        .expect_err("too large");
    assert!(matches!(err.kind, FailureKind::TooLarge { max_bytes: 10, .. }));
    assert!(fetcher
        .download_bytes(&format!("{}/big.png", server.uri()))
        .await
        .is_none());
}

#[tokio::test]
async fn invalid_urls_fail_without_network() {
    let fetcher = ReqwestFetcher::new(fast_fetch()).expect("client");
    let err = fetcher.try_download("not a url").await.expect_err("invalid");
    assert_eq!(err.kind, FailureKind::InvalidUrl);
}
