//! End-to-end renders through headless Chrome

#![cfg(feature = "cdp")]

use snapcache::browser::cdp::CdpLauncher;
use snapcache::browser::BrowserLauncher;
use snapcache::cache::MemoryCache;
use snapcache::lifecycle::BrowserActor;
use snapcache::{LaunchConfig, ServiceConfig, Viewport};
use std::sync::{Arc, Once};
use std::time::Duration;
use tiny_http::{Response, Server};
use url::Url;

static INIT: Once = Once::new();

/// Start a simple test HTTP server
fn start_test_server() -> String {
    INIT.call_once(|| {
        std::thread::spawn(|| {
            let server = Server::http("127.0.0.1:18090").unwrap();
            for request in server.incoming_requests() {
                let response = Response::from_string(
                    r#"<!DOCTYPE html>
<html>
<head><title>Test Page</title></head>
<body style="margin:0">
<div style="height:3000px;background:#36c">Tall page</div>
</body>
</html>"#,
                )
                .with_header(
                    "Content-Type: text/html; charset=utf-8"
                        .parse::<tiny_http::Header>()
                        .unwrap(),
                );
                let _ = request.respond(response);
            }
        });
        // Give the server time to start
        std::thread::sleep(Duration::from_millis(100));
    });

    "http://127.0.0.1:18090".to_string()
}

fn launcher() -> CdpLauncher {
    let config = LaunchConfig {
        no_sandbox: std::env::var("CI").is_ok(),
        ..Default::default()
    };
    CdpLauncher::new(config, Duration::from_secs(20))
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_full_page_jpeg() {
    let base_url = start_test_server();
    let browser = launcher().launch().await.expect("Failed to launch browser");

    let mut page = browser.new_page().await.expect("Failed to open page");
    page.set_viewport(Viewport { width: 360, height: 800 }).await.unwrap();
    page.goto(&Url::parse(&base_url).unwrap()).await.expect("Failed to load URL");
    let jpeg = page.screenshot_jpeg(80).await.expect("Failed to capture");
    page.close().await.unwrap();

    assert!(jpeg.len() > 100, "JPEG data seems too small");
    // JPEG files start with an SOI marker
    assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);

    browser.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_launch_reports_connected() {
    let browser = launcher().launch().await.expect("Failed to launch browser");
    assert!(browser.is_connected().await);
    browser.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Chrome to be installed
async fn test_actor_renders_and_caches() {
    let base_url = start_test_server();
    let actor = BrowserActor::spawn(
        "browser",
        ServiceConfig::default(),
        Arc::new(launcher()),
        Arc::new(MemoryCache::new()),
    );

    let mut target = Url::parse(&base_url).unwrap();
    target
        .query_pairs_mut()
        .append_pair("options", r#"{"xMax":"480","yMax":600}"#);

    let first = actor.fetch(target.clone()).await.expect("render failed");
    assert!(!first.cache_hit);
    assert_eq!(&first.bytes[0..2], &[0xFF, 0xD8]);

    let second = actor.fetch(target).await.expect("cached fetch failed");
    assert!(second.cache_hit);
    assert_eq!(first.bytes, second.bytes);

    actor.shutdown().await.unwrap();
}
