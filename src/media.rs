//! Cross-origin media downloads on behalf of the page agent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use autopost_core_types::{MediaAsset, MediaFetchResult};
use autopost_page_agent::MediaRequest;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::MediaConfig;
use crate::errors::MediaError;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT: &str = "image/webp,image/apng,image/*,*/*;q=0.8,video/*";
const OCTET_STREAM: &str = "application/octet-stream";

/// Hosts that refuse hot-linked downloads without their own Referer.
const REFERERS: &[(&str, &str)] = &[
    ("github", "https://github.com/"),
    ("imgur", "https://imgur.com/"),
    ("dropbox", "https://www.dropbox.com/"),
];

pub struct MediaFetcher {
    client: Client,
    cfg: MediaConfig,
    unnamed: AtomicU64,
}

impl MediaFetcher {
    pub fn new(cfg: MediaConfig) -> Result<Self, MediaError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9,vi;q=0.8"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(cfg.timeout())
            .build()?;
        Ok(Self {
            client,
            cfg,
            unnamed: AtomicU64::new(0),
        })
    }

    /// Never fails as a call; problems come back as `MediaFetchResult::Failed`.
    pub async fn fetch(&self, raw: &str) -> MediaFetchResult {
        match self.fetch_asset(raw).await {
            Ok(asset) => MediaFetchResult::Fetched(asset),
            Err(err) => MediaFetchResult::failed(raw, err.to_string()),
        }
    }

    #[instrument(skip(self), fields(url = %raw))]
    pub async fn fetch_asset(&self, raw: &str) -> Result<MediaAsset, MediaError> {
        let url = parse_media_url(raw)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.download(&url).await {
                Ok(asset) => {
                    info!(
                        target: "media",
                        filename = %asset.filename,
                        mime = %asset.mime_type,
                        size = asset.bytes.len(),
                        "media fetched"
                    );
                    return Ok(asset);
                }
                Err(err) if err.is_transient() && attempt <= self.cfg.retries => {
                    warn!(target: "media", attempt, error = %err, "transient media failure, retrying");
                    sleep(self.cfg.retry_delay() * attempt).await;
                }
                Err(err) => {
                    warn!(target: "media", attempt, error = %err, "media fetch failed");
                    return Err(err);
                }
            }
        }
    }

    async fn download(&self, url: &Url) -> Result<MediaAsset, MediaError> {
        let mut request = self.client.get(url.clone());
        if let Some(referer) = referer_for(url) {
            request = request.header(header::REFERER, referer);
        }
        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Http(status.as_u16()));
        }
        if let Some(size) = response.content_length() {
            if size > self.cfg.max_bytes {
                return Err(MediaError::TooLarge {
                    size,
                    limit: self.cfg.max_bytes,
                });
            }
        }
        let declared = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty() && value != OCTET_STREAM);

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let size = (bytes.len() + chunk.len()) as u64;
            if size > self.cfg.max_bytes {
                return Err(MediaError::TooLarge {
                    size,
                    limit: self.cfg.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }

        let mime_type = declared.unwrap_or_else(|| {
            mime_guess::from_path(url.path())
                .first_raw()
                .unwrap_or(OCTET_STREAM)
                .to_string()
        });
        let stem = url
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|last| !last.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("media_{}", self.unnamed.fetch_add(1, Ordering::Relaxed) + 1));
        debug!(target: "media", %mime_type, stem = %stem, "naming media");

        Ok(MediaAsset {
            source_url: url.to_string(),
            filename: ensure_extension(&stem, &mime_type),
            mime_type,
            bytes,
        })
    }
}

/// Answers agent fetch requests until every sender is gone.
pub async fn serve_media(fetcher: Arc<MediaFetcher>, mut rx: mpsc::Receiver<MediaRequest>) {
    while let Some(MediaRequest { url, reply }) = rx.recv().await {
        let fetcher = Arc::clone(&fetcher);
        tokio::spawn(async move {
            let result = fetcher.fetch(&url).await;
            if reply.send(result).is_err() {
                debug!(target: "media", %url, "requester went away before the media arrived");
            }
        });
    }
    debug!(target: "media", "media service stopped");
}

fn parse_media_url(raw: &str) -> Result<Url, MediaError> {
    let mut cleaned = raw.trim();
    for quote in ['"', '\''] {
        if cleaned.len() >= 2 && cleaned.starts_with(quote) && cleaned.ends_with(quote) {
            cleaned = &cleaned[1..cleaned.len() - 1];
        }
    }
    let url = Url::parse(cleaned.trim()).map_err(|_| MediaError::InvalidUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(MediaError::InvalidUrl(raw.to_string())),
    }
}

fn referer_for(url: &Url) -> Option<&'static str> {
    let host = url.host_str()?.to_ascii_lowercase();
    REFERERS
        .iter()
        .find(|(needle, _)| host.contains(needle))
        .map(|(_, referer)| *referer)
}

/// Appends the extension for `mime` unless the name already carries one of its extensions.
fn ensure_extension(name: &str, mime: &str) -> String {
    let mime = if mime == "image/jpg" { "image/jpeg" } else { mime };
    let preferred = match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        other => mime_guess::get_mime_extensions_str(other).and_then(|exts| exts.first().copied()),
    };
    let Some(preferred) = preferred else {
        return name.to_string();
    };
    let matches_mime = mime_guess::from_path(name)
        .iter_raw()
        .any(|guess| guess.eq_ignore_ascii_case(mime));
    if matches_mime {
        name.to_string()
    } else {
        format!("{name}.{preferred}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopost_page_agent::MediaSource;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> MediaFetcher {
        MediaFetcher::new(MediaConfig {
            timeout_secs: 5,
            max_bytes: 1024,
            retries: 2,
            retry_delay_ms: 10,
        })
        .unwrap()
    }

    #[test]
    fn urls_are_unquoted_and_scheme_checked() {
        assert_eq!(
            parse_media_url("  \"https://i.imgur.com/a.png\" ").unwrap().as_str(),
            "https://i.imgur.com/a.png"
        );
        assert!(parse_media_url("'http://x.y/z.gif'").is_ok());
        assert!(matches!(parse_media_url("file:///etc/passwd"), Err(MediaError::InvalidUrl(_))));
        assert!(matches!(parse_media_url("not a url"), Err(MediaError::InvalidUrl(_))));
    }

    #[test]
    fn referers_follow_known_hosts() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert_eq!(referer_for(&url("https://raw.githubusercontent.com/x.png")), Some("https://github.com/"));
        assert_eq!(referer_for(&url("https://i.imgur.com/x.png")), Some("https://imgur.com/"));
        assert_eq!(referer_for(&url("https://dl.dropbox.com/x.png")), Some("https://www.dropbox.com/"));
        assert_eq!(referer_for(&url("https://example.com/x.png")), None);
    }

    #[test]
    fn extensions_match_the_mime_type() {
        assert_eq!(ensure_extension("photo", "image/png"), "photo.png");
        assert_eq!(ensure_extension("photo.png", "image/png"), "photo.png");
        assert_eq!(ensure_extension("photo.jpeg", "image/jpeg"), "photo.jpeg");
        assert_eq!(ensure_extension("download", "image/jpeg"), "download.jpg");
        assert_eq!(ensure_extension("clip", "video/mp4"), "clip.mp4");
        assert_eq!(ensure_extension("blob", "application/x-unknown-thing"), "blob");
    }

    #[tokio::test]
    async fn fetch_uses_header_mime_and_names_the_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/cat"))
            .and(header("cache-control", "no-cache"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png; charset=binary")
                    .set_body_bytes(vec![1u8, 2, 3]),
            )
            .mount(&server)
            .await;

        let asset = fetcher()
            .fetch_asset(&format!("{}/img/cat", server.uri()))
            .await
            .unwrap();
        assert_eq!(asset.mime_type, "image/png");
        assert_eq!(asset.filename, "cat.png");
        assert_eq!(asset.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn missing_content_type_falls_back_to_extension() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v/clip.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 8]))
            .mount(&server)
            .await;

        let asset = fetcher()
            .fetch_asset(&format!("{}/v/clip.mp4", server.uri()))
            .await
            .unwrap();
        assert_eq!(asset.mime_type, "video/mp4");
        assert_eq!(asset.filename, "clip.mp4");
    }

    #[tokio::test]
    async fn empty_and_oversized_bodies_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(path("/empty.png"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(path("/huge.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let fetcher = fetcher();
        assert!(matches!(
            fetcher.fetch_asset(&format!("{}/empty.png", server.uri())).await,
            Err(MediaError::Empty)
        ));
        assert!(matches!(
            fetcher.fetch_asset(&format!("{}/huge.png", server.uri())).await,
            Err(MediaError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn chunked_body_is_cut_off_at_the_size_limit() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        // Chunked transfer: no Content-Length, and far more data than the limit.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;
            let head = "HTTP/1.1 200 OK\r\ncontent-type: image/png\r\ntransfer-encoding: chunked\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let chunk = [7u8; 512];
            for _ in 0..256 {
                let frame = [format!("{:x}\r\n", chunk.len()).as_bytes(), &chunk, b"\r\n"].concat();
                if socket.write_all(&frame).await.is_err() {
                    return;
                }
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        });

        let result = fetcher().fetch_asset(&format!("http://{addr}/stream.png")).await;
        match result {
            Err(MediaError::TooLarge { size, limit }) => {
                assert_eq!(limit, 1024);
                assert!(size > 1024 && size <= 1024 + 512, "stopped at {size}");
            }
            other => panic!("unexpected {other:?}"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(path("/flaky.png"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher();
        assert!(matches!(
            fetcher.fetch_asset(&format!("{}/flaky.png", server.uri())).await,
            Err(MediaError::Http(503))
        ));
        match fetcher.fetch(&format!("{}/gone.png", server.uri())).await {
            MediaFetchResult::Failed(failure) => assert!(failure.error.contains("404")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn served_requests_are_answered() {
        let server = MockServer::start().await;
        Mock::given(path("/a.gif"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/gif")
                    .set_body_bytes(vec![7u8; 4]),
            )
            .mount(&server)
            .await;

        let (source, rx) = autopost_page_agent::media_channel(4, Duration::from_secs(5));
        tokio::spawn(serve_media(Arc::new(fetcher()), rx));

        match source.fetch(&format!("{}/a.gif", server.uri())).await {
            MediaFetchResult::Fetched(asset) => assert!(asset.is_gif()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
