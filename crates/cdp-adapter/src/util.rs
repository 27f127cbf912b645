use anyhow::{anyhow, Result};
use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

const DEVTOOLS_MARKER: &str = "DevTools listening on ";

/// Reads Chromium's stderr until it announces the DevTools websocket.
pub async fn extract_ws_url(child: &mut Child, wait: Duration) -> Result<String> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("chromium process missing stderr handle"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut preview = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Some(url) = parse_devtools_line(&line) {
                return Ok(url);
            }
            if preview.len() < 8 {
                preview.push(line);
            }
        }
        Err(anyhow!(
            "chromium exited before exposing devtools websocket url. stderr preview: {}",
            preview.join(" | ")
        ))
    };

    timeout(wait, reader)
        .await
        .map_err(|_| anyhow!("timed out after {wait:?} waiting for chromium devtools websocket url"))?
}

fn parse_devtools_line(line: &str) -> Option<String> {
    let (_, url) = line.split_once(DEVTOOLS_MARKER)?;
    let url = url.trim();
    (url.starts_with("ws") && url.contains("devtools/browser")).then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::parse_devtools_line;

    #[test]
    fn picks_browser_endpoint_only() {
        assert_eq!(
            parse_devtools_line("DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc"),
            Some("ws://127.0.0.1:9222/devtools/browser/abc".to_string())
        );
        assert_eq!(parse_devtools_line("[WARNING] something else"), None);
        assert_eq!(
            parse_devtools_line("DevTools listening on http://127.0.0.1:9222"),
            None
        );
    }
}
