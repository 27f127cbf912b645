use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and threshold knobs for the page agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub locate_timeout_ms: u64,
    pub locate_poll_ms: u64,
    pub compose_threshold: i32,
    /// Opener clicks allowed while no surface scores.
    pub opener_attempts: u32,
    pub file_input_wait_ms: u64,
    pub file_input_poll_ms: u64,
    pub photo_button_settle_ms: u64,
    pub preview_polls: u32,
    pub preview_poll_ms: u64,
    pub content_settle_ms: u64,
    pub submit_search_ms: u64,
    pub submit_poll_ms: u64,
    pub max_clicks: usize,
    pub max_polls: u32,
    pub polls_per_click: u32,
    pub overlay_grace_ms: u64,
    pub min_image_px: u32,
    pub resize_canvas_px: u32,
    pub gif_as_link: bool,
    pub media_fetch_timeout_ms: u64,
    /// Overall budget the orchestrator grants one PostRequest.
    pub post_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            locate_timeout_ms: 20_000,
            locate_poll_ms: 300,
            compose_threshold: 50,
            opener_attempts: 2,
            file_input_wait_ms: 15_000,
            file_input_poll_ms: 500,
            photo_button_settle_ms: 1_500,
            preview_polls: 30,
            preview_poll_ms: 500,
            content_settle_ms: 800,
            submit_search_ms: 10_000,
            submit_poll_ms: 500,
            max_clicks: 5,
            max_polls: 20,
            polls_per_click: 4,
            overlay_grace_ms: 30_000,
            min_image_px: 200,
            resize_canvas_px: 400,
            gif_as_link: true,
            media_fetch_timeout_ms: 60_000,
            post_timeout_secs: 180,
        }
    }
}

impl AgentConfig {
    pub fn locate_timeout(&self) -> Duration {
        Duration::from_millis(self.locate_timeout_ms)
    }

    pub fn locate_poll(&self) -> Duration {
        Duration::from_millis(self.locate_poll_ms)
    }

    pub fn file_input_wait(&self) -> Duration {
        Duration::from_millis(self.file_input_wait_ms)
    }

    pub fn file_input_poll(&self) -> Duration {
        Duration::from_millis(self.file_input_poll_ms)
    }

    pub fn photo_button_settle(&self) -> Duration {
        Duration::from_millis(self.photo_button_settle_ms)
    }

    pub fn preview_poll(&self) -> Duration {
        Duration::from_millis(self.preview_poll_ms)
    }

    pub fn content_settle(&self) -> Duration {
        Duration::from_millis(self.content_settle_ms)
    }

    pub fn submit_search(&self) -> Duration {
        Duration::from_millis(self.submit_search_ms)
    }

    pub fn submit_poll(&self) -> Duration {
        Duration::from_millis(self.submit_poll_ms)
    }

    pub fn overlay_grace(&self) -> Duration {
        Duration::from_millis(self.overlay_grace_ms)
    }

    pub fn media_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.media_fetch_timeout_ms)
    }

    pub fn post_timeout(&self) -> Duration {
        Duration::from_secs(self.post_timeout_secs)
    }
}
