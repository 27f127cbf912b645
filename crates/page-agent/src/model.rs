use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to an element assigned by the page bridge.
///
/// Refs stay valid while the element is connected; a detached element
/// snapshots as `None`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRef(pub u64);

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything the scoring rules look at for one element.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementSnapshot {
    pub node: NodeRef,
    pub tag: String,
    pub role: Option<String>,
    /// Rendered text, whitespace collapsed.
    pub text: String,
    pub aria_label: Option<String>,
    pub test_id: Option<String>,
    pub placeholder: Option<String>,
    pub class_name: String,
    pub pagelet: Option<String>,
    pub input_type: Option<String>,
    pub accept: Option<String>,
    pub src: Option<String>,
    pub visible: bool,
    pub disabled: bool,
    pub aria_disabled: bool,
    pub busy: bool,
    pub editable: bool,
    pub has_editable_descendant: bool,
    pub has_submit_descendant: bool,
    pub has_lexical_editor: bool,
    pub in_main: bool,
}

impl ElementSnapshot {
    pub fn label(&self) -> String {
        normalize(&self.text)
    }

    pub fn aria(&self) -> Option<String> {
        self.aria_label.as_deref().map(normalize)
    }

    /// Text, aria-label and placeholder: what a reader would see or hear.
    pub fn spoken_labels(&self) -> Vec<String> {
        let mut labels = vec![self.label()];
        labels.extend(self.aria());
        labels.extend(self.placeholder.as_deref().map(normalize));
        labels.retain(|label| !label.is_empty());
        labels
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref().is_some_and(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn is_actionable(&self) -> bool {
        self.visible && !self.disabled && !self.aria_disabled
    }

    /// Short human label used in diagnostics.
    pub fn describe(&self) -> String {
        let label = self
            .aria_label
            .clone()
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| self.text.clone());
        let mut label: String = label.chars().take(60).collect();
        if label.is_empty() {
            label = format!("<{}>", self.tag);
        }
        label
    }

    pub fn accepts_media(&self) -> bool {
        if !self.tag.eq_ignore_ascii_case("input")
            || !self
                .input_type
                .as_deref()
                .is_some_and(|kind| kind.eq_ignore_ascii_case("file"))
        {
            return false;
        }
        match self.accept.as_deref().map(str::trim) {
            None | Some("") | Some("*") | Some("*/*") => true,
            Some(accept) => {
                let accept = accept.to_ascii_lowercase();
                accept.contains("image") || accept.contains("video")
            }
        }
    }
}

/// Lowercase, collapse whitespace and fold typographic apostrophes.
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(['\u{2019}', '\u{2018}'], "'")
        .to_lowercase()
}

/// Element families the agent asks the page for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Query {
    ComposeSurfaces,
    Dialogs,
    Editables,
    Buttons,
    OpenerTriggers,
    FileInputs,
    ProgressIndicators,
    StatusRegions,
    MediaPreviews,
}

impl Query {
    pub fn selector(&self) -> &'static str {
        match self {
            Query::ComposeSurfaces => {
                "[role='dialog'], form, [role='form'], [data-pagelet*='FeedComposer'], [contenteditable='true']"
            }
            Query::Dialogs => "[role='dialog']",
            Query::Editables => {
                "[contenteditable='true'], [role='textbox'], textarea, [data-lexical-editor='true']"
            }
            Query::Buttons => "[role='button'], button, input[type='submit']",
            Query::OpenerTriggers => "[role='button'], button, [data-testid]",
            Query::FileInputs => "input[type='file']",
            Query::ProgressIndicators => "[role='progressbar'], [aria-busy='true']",
            Query::StatusRegions => "[role='alert'], [role='status']",
            Query::MediaPreviews => "img[src^='blob:'], video[src^='blob:']",
        }
    }
}

/// How text reaches the editor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TextMode {
    /// Regular body copy, written so the editor framework registers it.
    Body,
    /// A lone URL, pasted as plain text so the page unfurls a link preview.
    PlainUrl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_space_and_apostrophes() {
        assert_eq!(normalize("  What\u{2019}s  on your\nmind? "), "what's on your mind?");
        assert_eq!(normalize("Tạo BÀI viết"), "tạo bài viết");
    }

    #[test]
    fn file_input_accept_rules() {
        let mut input = ElementSnapshot {
            tag: "input".into(),
            input_type: Some("file".into()),
            ..Default::default()
        };
        assert!(input.accepts_media());
        input.accept = Some("image/*,image/heif,video/*".into());
        assert!(input.accepts_media());
        input.accept = Some(".pdf".into());
        assert!(!input.accepts_media());
    }

    #[test]
    fn snapshot_decodes_bridge_shape() {
        let raw = serde_json::json!({
            "node": 7,
            "tag": "div",
            "role": "button",
            "text": "Post",
            "ariaLabel": "Post",
            "visible": true,
            "hasSubmitDescendant": false
        });
        let snapshot: ElementSnapshot = serde_json::from_value(raw).unwrap();
        assert_eq!(snapshot.node, NodeRef(7));
        assert!(snapshot.has_role("button"));
        assert!(snapshot.is_actionable());
        assert_eq!(snapshot.aria().as_deref(), Some("post"));
    }
}
