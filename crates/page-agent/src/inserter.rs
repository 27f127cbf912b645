use autopost_core_types::protocol::MediaSummary;
use autopost_core_types::{MediaAsset, MediaFetchResult};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::AgentConfig;
use crate::errors::AgentError;
use crate::model::{ElementSnapshot, NodeRef, Query, TextMode};
use crate::ports::{MediaSource, PagePort};
use crate::resample::upscale_small_image;
use crate::scoring::PHOTO_BUTTON;

static BARE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://\S+$").expect("bare url regex"));

/// A body that is nothing but a URL is pasted plainly so the page unfurls it.
pub fn text_mode(text: &str) -> TextMode {
    if BARE_URL.is_match(text.trim()) {
        TextMode::PlainUrl
    } else {
        TextMode::Body
    }
}

pub struct ContentInserter<'a> {
    page: &'a dyn PagePort,
    media: &'a dyn MediaSource,
    cfg: &'a AgentConfig,
}

impl<'a> ContentInserter<'a> {
    pub fn new(page: &'a dyn PagePort, media: &'a dyn MediaSource, cfg: &'a AgentConfig) -> Self {
        Self { page, media, cfg }
    }

    /// The editable region inside `surface`, visible ones first.
    pub async fn resolve_editor(&self, surface: &ElementSnapshot) -> Result<Option<NodeRef>, AgentError> {
        if surface.editable {
            return Ok(Some(surface.node));
        }
        let editables = self.page.query(Some(surface.node), Query::Editables).await?;
        Ok(editables
            .iter()
            .find(|el| el.visible)
            .or_else(|| editables.first())
            .map(|el| el.node))
    }

    #[instrument(skip_all, fields(editor = %editor, len = text.len()))]
    pub async fn insert_content(&self, editor: NodeRef, text: &str) -> Result<bool, AgentError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(true);
        }
        let mode = text_mode(text);
        let written = self.page.replace_text(editor, text, mode).await?;
        if written {
            debug!(target: "page-agent", ?mode, "content written");
            sleep(self.cfg.content_settle()).await;
        } else {
            warn!(target: "page-agent", ?mode, "editor did not take the content");
        }
        Ok(written)
    }

    /// Fetches every URL and attaches what it can.
    ///
    /// Failures are collected per URL; the caller decides whether what
    /// remains is still worth posting.
    #[instrument(skip_all, fields(surface = %surface, requested = urls.len()))]
    pub async fn attach_media(
        &self,
        surface: NodeRef,
        editor: Option<NodeRef>,
        urls: &[String],
    ) -> Result<MediaSummary, AgentError> {
        let mut summary = MediaSummary {
            requested: urls.len(),
            ..MediaSummary::default()
        };
        if urls.is_empty() {
            return Ok(summary);
        }

        let mut uploads: Vec<MediaAsset> = Vec::new();
        for url in urls {
            match self.media.fetch(url).await {
                MediaFetchResult::Failed(failure) => {
                    warn!(target: "page-agent", url = %failure.source_url, error = %failure.error, "media fetch failed");
                    summary.errors.push(format!("{}: {}", failure.source_url, failure.error));
                }
                MediaFetchResult::Fetched(asset) if asset.is_gif() && self.cfg.gif_as_link => {
                    match editor {
                        Some(editor) => {
                            self.page
                                .append_text(editor, &format!(" {}", asset.source_url))
                                .await?;
                            summary.linked += 1;
                        }
                        None => summary
                            .errors
                            .push(format!("{}: no editor to link the gif into", asset.source_url)),
                    }
                }
                MediaFetchResult::Fetched(asset) => {
                    let asset = if asset.is_image() && !asset.is_gif() {
                        upscale_small_image(asset, self.cfg.min_image_px, self.cfg.resize_canvas_px)
                    } else {
                        asset
                    };
                    uploads.push(asset);
                }
            }
        }

        if !uploads.is_empty() {
            match self.find_file_input(surface).await? {
                Some(input) => {
                    let assigned = self.page.assign_files(input, &uploads).await?;
                    summary.attached = assigned.min(uploads.len());
                    if assigned < uploads.len() {
                        summary.errors.push(format!(
                            "file input kept {assigned} of {} files",
                            uploads.len()
                        ));
                    }
                    if assigned > 0 && !self.wait_for_previews(surface).await? {
                        warn!(target: "page-agent", "no upload preview appeared");
                    }
                }
                None => {
                    warn!(target: "page-agent", "file input not found");
                    summary.errors.push("file input not found".to_string());
                }
            }
        }

        info!(
            target: "page-agent",
            attached = summary.attached,
            linked = summary.linked,
            failed = summary.failed(),
            "media step finished"
        );
        Ok(summary)
    }

    async fn find_file_input(&self, surface: NodeRef) -> Result<Option<NodeRef>, AgentError> {
        let buttons = self.page.query(Some(surface), Query::Buttons).await?;
        if let Some(button) = PHOTO_BUTTON.best(buttons) {
            debug!(target: "page-agent", node = %button.element.node, "opening photo/video picker");
            self.page.click(button.element.node).await?;
            sleep(self.cfg.photo_button_settle()).await;
        }

        let deadline = Instant::now() + self.cfg.file_input_wait();
        loop {
            for scope in [Some(surface), None] {
                let inputs = self.page.query(scope, Query::FileInputs).await?;
                if let Some(input) = inputs.iter().find(|el| el.accepts_media()) {
                    return Ok(Some(input.node));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.cfg.file_input_poll()).await;
        }
    }

    async fn wait_for_previews(&self, surface: NodeRef) -> Result<bool, AgentError> {
        for _ in 0..self.cfg.preview_polls {
            let previews = self.page.count(Some(surface), Query::MediaPreviews).await?
                + self.page.count(None, Query::MediaPreviews).await?;
            let uploading = self
                .page
                .query(None, Query::ProgressIndicators)
                .await?
                .iter()
                .any(|el| el.visible);
            if previews > 0 || uploading {
                return Ok(true);
            }
            sleep(self.cfg.preview_poll()).await;
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeNode, FakePage, StaticMedia};

    fn composer(page: &FakePage) -> (NodeRef, NodeRef, NodeRef) {
        let dialog = page.add(None, FakeNode::dialog("Create post"));
        let editor = page.add(Some(dialog), FakeNode::editor("What's on your mind?"));
        let tools = page.add(Some(dialog), FakeNode::element("div"));
        let photo = page.add(Some(tools), FakeNode::button("").aria("Photo/video"));
        let input = page.add(Some(tools), FakeNode::file_input("image/*,video/*").hidden());
        page.add(Some(dialog), FakeNode::button("Post"));
        let _ = input;
        (dialog, editor, photo)
    }

    #[test]
    fn bare_urls_are_pasted_plainly() {
        assert_eq!(text_mode("https://example.com/article?id=1"), TextMode::PlainUrl);
        assert_eq!(text_mode("  http://x.y/z  "), TextMode::PlainUrl);
        assert_eq!(text_mode("read https://example.com"), TextMode::Body);
        assert_eq!(text_mode("Hello"), TextMode::Body);
    }

    #[tokio::test(start_paused = true)]
    async fn content_reaches_editor() {
        let page = FakePage::new("https://www.facebook.com/");
        let (_, editor, _) = composer(&page);
        let media = StaticMedia::new();
        let cfg = AgentConfig::default();
        let inserter = ContentInserter::new(&page, &media, &cfg);

        assert!(inserter.insert_content(editor, "  Hello  ").await.unwrap());
        assert_eq!(page.value_of(editor).as_deref(), Some("Hello"));
        assert_eq!(page.writes()[0].2, TextMode::Body);

        assert!(inserter.insert_content(editor, "https://example.com/x").await.unwrap());
        assert_eq!(page.writes()[1].2, TextMode::PlainUrl);
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_editor_inside_surface() {
        let page = FakePage::new("https://www.facebook.com/");
        let (dialog, editor, _) = composer(&page);
        let media = StaticMedia::new();
        let cfg = AgentConfig::default();
        let inserter = ContentInserter::new(&page, &media, &cfg);

        let surface = page.snapshot(dialog).await.unwrap().unwrap();
        assert_eq!(inserter.resolve_editor(&surface).await.unwrap(), Some(editor));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_media_failure_is_tolerated() {
        let page = FakePage::new("https://www.facebook.com/");
        let (dialog, editor, photo) = composer(&page);
        let media = StaticMedia::new()
            .with_png("https://i.imgur.com/a.png", 640, 480)
            .with_png("https://i.imgur.com/b.png", 64, 64)
            .with_failure("https://i.imgur.com/missing.png", "404 Not Found");
        let cfg = AgentConfig::default();
        let inserter = ContentInserter::new(&page, &media, &cfg);

        let urls = vec![
            "https://i.imgur.com/a.png".to_string(),
            "https://i.imgur.com/missing.png".to_string(),
            "https://i.imgur.com/b.png".to_string(),
        ];
        let summary = inserter.attach_media(dialog, Some(editor), &urls).await.unwrap();

        assert!(summary.is_usable());
        assert_eq!(summary.attached, 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(page.uploads(), vec![vec!["a.png".to_string(), "b.png".to_string()]]);
        assert!(page.was_clicked(photo));
    }

    #[tokio::test(start_paused = true)]
    async fn gifs_become_links() {
        let page = FakePage::new("https://www.facebook.com/");
        let (dialog, editor, photo) = composer(&page);
        let media = StaticMedia::new().with_gif("https://media.giphy.com/x.gif");
        let cfg = AgentConfig::default();
        let inserter = ContentInserter::new(&page, &media, &cfg);

        inserter.insert_content(editor, "Hi").await.unwrap();
        let summary = inserter
            .attach_media(dialog, Some(editor), &["https://media.giphy.com/x.gif".to_string()])
            .await
            .unwrap();

        assert_eq!(summary.linked, 1);
        assert_eq!(summary.attached, 0);
        assert!(summary.is_usable());
        assert_eq!(page.value_of(editor).as_deref(), Some("Hi https://media.giphy.com/x.gif"));
        assert!(page.uploads().is_empty());
        assert!(!page.was_clicked(photo));
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_are_unusable() {
        let page = FakePage::new("https://www.facebook.com/");
        let (dialog, editor, _) = composer(&page);
        let media = StaticMedia::new();
        let cfg = AgentConfig::default();
        let inserter = ContentInserter::new(&page, &media, &cfg);

        let summary = inserter
            .attach_media(dialog, Some(editor), &["https://nowhere.invalid/a.png".to_string()])
            .await
            .unwrap();
        assert!(!summary.is_usable());
        assert_eq!(summary.errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_file_input_is_reported() {
        let page = FakePage::new("https://www.facebook.com/");
        let dialog = page.add(None, FakeNode::dialog("Create post"));
        let editor = page.add(Some(dialog), FakeNode::editor(""));
        let media = StaticMedia::new().with_png("https://i.imgur.com/a.png", 640, 480);
        let cfg = AgentConfig::default();
        let inserter = ContentInserter::new(&page, &media, &cfg);

        let summary = inserter
            .attach_media(dialog, Some(editor), &["https://i.imgur.com/a.png".to_string()])
            .await
            .unwrap();
        assert_eq!(summary.attached, 0);
        assert!(summary.errors.iter().any(|e| e.contains("file input")));
    }
}
