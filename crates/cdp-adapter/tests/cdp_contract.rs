//! Contract test against a real Chromium binary.
//!
//! Ignored by default; run with `AUTOPOST_REAL_CHROME=1 cargo test -- --ignored`.

use std::env;
use std::time::Duration;

use cdp_adapter::{CdpAdapter, CdpConfig};
use serde_json::json;

fn real_chrome_enabled() -> bool {
    env::var("AUTOPOST_REAL_CHROME")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set AUTOPOST_REAL_CHROME=1"]
async fn open_tab_evaluate_and_type() {
    if !real_chrome_enabled() {
        eprintln!("skipping CDP contract test (AUTOPOST_REAL_CHROME not set)");
        return;
    }

    let profile = tempfile::tempdir().expect("profile dir");
    let cfg = CdpConfig {
        headless: true,
        user_data_dir: profile.path().to_path_buf(),
        websocket_url: None,
        ..CdpConfig::default()
    };
    let adapter = CdpAdapter::new(cfg);
    adapter.start().await.expect("adapter start");

    let tab = adapter
        .create_target("data:text/html,<textarea id=t></textarea>")
        .await
        .expect("create target");
    adapter
        .wait_for_load(&tab, Duration::from_secs(15))
        .await
        .expect("page loads");

    adapter
        .add_init_script(&tab, "window.__autopostMarker = 1;")
        .await
        .expect("init script");

    adapter
        .evaluate(&tab, "document.getElementById('t').focus()")
        .await
        .expect("focus");
    adapter.insert_text(&tab, "hello").await.expect("insert text");

    let value = adapter
        .evaluate(&tab, "document.getElementById('t').value")
        .await
        .expect("read value");
    assert_eq!(value, json!("hello"));

    let tabs = adapter.targets().await.expect("targets");
    assert!(tabs.iter().any(|info| info.target_id == tab));

    adapter.close_target(&tab).await.expect("close");
    adapter.shutdown().await;
}
