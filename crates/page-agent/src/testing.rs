//! In-memory doubles for the page port and the media source.
//!
//! `FakePage` models just enough DOM to exercise the agent: a tree of
//! elements with roles, labels and visibility, bubbling clicks, and scripted
//! reactions that mutate the tree when a given element is activated.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use async_trait::async_trait;
use autopost_core_types::{MediaAsset, MediaFetchResult};
use parking_lot::Mutex;

use crate::errors::AgentError;
use crate::model::{normalize, ElementSnapshot, NodeRef, Query, TextMode};
use crate::ports::{MediaSource, PagePort};

#[derive(Clone, Debug)]
pub struct FakeNode {
    pub tag: String,
    pub role: Option<String>,
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
    pub lexical: bool,
    pub in_main: bool,
}

impl FakeNode {
    pub fn element(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            role: None,
            text: String::new(),
            aria_label: None,
            test_id: None,
            placeholder: None,
            class_name: String::new(),
            pagelet: None,
            input_type: None,
            accept: None,
            src: None,
            visible: true,
            disabled: false,
            aria_disabled: false,
            busy: false,
            editable: false,
            lexical: false,
            in_main: false,
        }
    }

    pub fn dialog(title: &str) -> Self {
        Self::element("div").role("dialog").text(title)
    }

    pub fn button(label: &str) -> Self {
        Self::element("div").role("button").text(label)
    }

    pub fn editor(placeholder: &str) -> Self {
        let mut node = Self::element("div").role("textbox");
        node.editable = true;
        node.lexical = true;
        if !placeholder.is_empty() {
            node.aria_label = Some(placeholder.to_string());
            node.placeholder = Some(placeholder.to_string());
        }
        node
    }

    pub fn file_input(accept: &str) -> Self {
        let mut node = Self::element("input");
        node.input_type = Some("file".into());
        node.accept = Some(accept.to_string());
        // File inputs are usually display:none.
        node.visible = false;
        node
    }

    pub fn progress() -> Self {
        Self::element("div").role("progressbar")
    }

    pub fn status(text: &str) -> Self {
        Self::element("div").role("status").text(text)
    }

    pub fn role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn aria(mut self, label: &str) -> Self {
        self.aria_label = Some(label.to_string());
        self
    }

    pub fn test_id(mut self, id: &str) -> Self {
        self.test_id = Some(id.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.class_name = class.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn in_main(mut self) -> Self {
        self.in_main = true;
        self
    }
}

#[derive(Clone, Debug)]
pub enum Effect {
    Remove(NodeRef),
    Show(NodeRef),
    Hide(NodeRef),
    Disable(NodeRef),
    MarkBusy(NodeRef),
    Add { parent: Option<NodeRef>, node: FakeNode },
    SetUrl(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClickKind {
    Click,
    Pointer,
    Enter,
}

#[derive(Clone, Debug)]
pub struct ClickRecord {
    pub kind: ClickKind,
    pub node: NodeRef,
    /// The clicked node followed by its ancestors at click time.
    pub path: Vec<NodeRef>,
}

struct Reaction {
    target: NodeRef,
    fire_on: usize,
    hits: usize,
    fired: bool,
    effects: Vec<Effect>,
}

struct Entry {
    parent: Option<NodeRef>,
    node: FakeNode,
    value: String,
}

struct Dom {
    nodes: BTreeMap<NodeRef, Entry>,
    next: u64,
    url: String,
    bridge: bool,
    reject_text: bool,
    reactions: Vec<Reaction>,
    clicks: Vec<ClickRecord>,
    writes: Vec<(NodeRef, String, TextMode)>,
    uploads: Vec<Vec<String>>,
}

pub struct FakePage {
    dom: Mutex<Dom>,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        Self {
            dom: Mutex::new(Dom {
                nodes: BTreeMap::new(),
                next: 1,
                url: url.to_string(),
                bridge: true,
                reject_text: false,
                reactions: Vec::new(),
                clicks: Vec::new(),
                writes: Vec::new(),
                uploads: Vec::new(),
            }),
        }
    }

    pub fn add(&self, parent: Option<NodeRef>, node: FakeNode) -> NodeRef {
        self.dom.lock().insert(parent, node)
    }

    /// Apply `effects` the first time `node` (or a descendant) is activated.
    pub fn on_click(&self, node: NodeRef, effects: Vec<Effect>) {
        self.on_click_nth(node, 1, effects);
    }

    /// Apply `effects` on the `n`th activation; earlier ones do nothing.
    pub fn on_click_nth(&self, node: NodeRef, n: usize, effects: Vec<Effect>) {
        self.dom.lock().reactions.push(Reaction {
            target: node,
            fire_on: n.max(1),
            hits: 0,
            fired: false,
            effects,
        });
    }

    /// Mutate the tree outside any click, e.g. from a timed task.
    pub fn apply(&self, effect: Effect) {
        self.dom.lock().apply(effect);
    }

    pub fn set_bridge(&self, installed: bool) {
        self.dom.lock().bridge = installed;
    }

    pub fn set_url(&self, url: &str) {
        self.dom.lock().url = url.to_string();
    }

    /// Editors refuse every write.
    pub fn reject_text(&self) {
        self.dom.lock().reject_text = true;
    }

    pub fn clicks(&self) -> Vec<ClickRecord> {
        self.dom.lock().clicks.clone()
    }

    pub fn was_clicked(&self, node: NodeRef) -> bool {
        self.first_click(node).is_some()
    }

    /// Index of the first activation that landed on `node` or inside it.
    pub fn first_click(&self, node: NodeRef) -> Option<usize> {
        self.dom
            .lock()
            .clicks
            .iter()
            .position(|record| record.path.contains(&node))
    }

    pub fn exists(&self, node: NodeRef) -> bool {
        self.dom.lock().nodes.contains_key(&node)
    }

    pub fn value_of(&self, node: NodeRef) -> Option<String> {
        self.dom.lock().nodes.get(&node).map(|entry| entry.value.clone())
    }

    pub fn writes(&self) -> Vec<(NodeRef, String, TextMode)> {
        self.dom.lock().writes.clone()
    }

    pub fn uploads(&self) -> Vec<Vec<String>> {
        self.dom.lock().uploads.clone()
    }

    fn activate(&self, kind: ClickKind, node: NodeRef) -> Result<(), AgentError> {
        let mut dom = self.dom.lock();
        if !dom.nodes.contains_key(&node) {
            return Err(AgentError::Page(format!("node {node} is detached")));
        }
        let path = dom.path(node);
        dom.clicks.push(ClickRecord {
            kind,
            node,
            path: path.clone(),
        });

        let mut due = Vec::new();
        for reaction in dom.reactions.iter_mut() {
            if reaction.fired || !path.contains(&reaction.target) {
                continue;
            }
            reaction.hits += 1;
            if reaction.hits >= reaction.fire_on {
                reaction.fired = true;
                due.extend(reaction.effects.iter().cloned());
            }
        }
        for effect in due {
            dom.apply(effect);
        }
        Ok(())
    }
}

impl Dom {
    fn insert(&mut self, parent: Option<NodeRef>, node: FakeNode) -> NodeRef {
        let id = NodeRef(self.next);
        self.next += 1;
        self.nodes.insert(
            id,
            Entry {
                parent,
                node,
                value: String::new(),
            },
        );
        id
    }

    fn path(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut path = vec![node];
        let mut current = self.nodes.get(&node).and_then(|entry| entry.parent);
        while let Some(id) = current {
            path.push(id);
            current = self.nodes.get(&id).and_then(|entry| entry.parent);
        }
        path
    }

    fn children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.nodes
            .iter()
            .filter(|(_, entry)| entry.parent == Some(node))
            .map(|(id, _)| *id)
            .collect()
    }

    fn is_descendant(&self, node: NodeRef, of: NodeRef) -> bool {
        node != of && self.path(node).contains(&of)
    }

    fn descendants(&self, node: NodeRef) -> Vec<NodeRef> {
        self.nodes
            .keys()
            .copied()
            .filter(|id| self.is_descendant(*id, node))
            .collect()
    }

    fn rendered_text(&self, node: NodeRef) -> String {
        let Some(entry) = self.nodes.get(&node) else {
            return String::new();
        };
        let mut parts = vec![entry.node.text.clone(), entry.value.clone()];
        parts.extend(self.children(node).into_iter().map(|child| self.rendered_text(child)));
        parts
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn visible(&self, node: NodeRef) -> bool {
        self.path(node)
            .iter()
            .all(|id| self.nodes.get(id).is_some_and(|entry| entry.node.visible))
    }

    fn matches(&self, id: NodeRef, query: Query) -> bool {
        let Some(entry) = self.nodes.get(&id) else {
            return false;
        };
        let node = &entry.node;
        let role = |r: &str| node.role.as_deref() == Some(r);
        let input_type = |t: &str| node.tag == "input" && node.input_type.as_deref() == Some(t);
        match query {
            Query::ComposeSurfaces => {
                role("dialog")
                    || role("form")
                    || node.tag == "form"
                    || node.pagelet.as_deref().is_some_and(|p| p.contains("FeedComposer"))
                    || node.editable
            }
            Query::Dialogs => role("dialog"),
            Query::Editables => node.editable || role("textbox") || node.tag == "textarea" || node.lexical,
            Query::Buttons => role("button") || node.tag == "button" || input_type("submit"),
            Query::OpenerTriggers => role("button") || node.tag == "button" || node.test_id.is_some(),
            Query::FileInputs => input_type("file"),
            Query::ProgressIndicators => role("progressbar") || node.busy,
            Query::StatusRegions => role("alert") || role("status"),
            Query::MediaPreviews => {
                (node.tag == "img" || node.tag == "video")
                    && node.src.as_deref().is_some_and(|src| src.starts_with("blob:"))
            }
        }
    }

    fn snapshot(&self, id: NodeRef) -> Option<ElementSnapshot> {
        let entry = self.nodes.get(&id)?;
        let node = &entry.node;
        let descendants = self.descendants(id);
        let has = |pred: &dyn Fn(&FakeNode) -> bool| {
            descendants
                .iter()
                .filter_map(|d| self.nodes.get(d))
                .any(|entry| pred(&entry.node))
        };
        let in_main = self
            .path(id)
            .iter()
            .filter_map(|p| self.nodes.get(p))
            .any(|entry| entry.node.in_main || entry.node.role.as_deref() == Some("main"));

        Some(ElementSnapshot {
            node: id,
            tag: node.tag.clone(),
            role: node.role.clone(),
            text: self.rendered_text(id),
            aria_label: node.aria_label.clone(),
            test_id: node.test_id.clone(),
            placeholder: node.placeholder.clone(),
            class_name: node.class_name.clone(),
            pagelet: node.pagelet.clone(),
            input_type: node.input_type.clone(),
            accept: node.accept.clone(),
            src: node.src.clone(),
            visible: self.visible(id),
            disabled: node.disabled,
            aria_disabled: node.aria_disabled,
            busy: node.busy,
            editable: node.editable,
            has_editable_descendant: has(&|n: &FakeNode| n.editable || n.lexical),
            has_submit_descendant: has(&|n: &FakeNode| {
                let label = normalize(n.aria_label.as_deref().unwrap_or(&n.text));
                let button = n.role.as_deref() == Some("button") || n.tag == "button";
                (button && matches!(label.as_str(), "post" | "đăng" | "publish"))
                    || n.input_type.as_deref() == Some("submit")
            }),
            has_lexical_editor: has(&|n: &FakeNode| n.lexical),
            in_main,
        })
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Remove(node) => {
                let mut doomed = self.descendants(node);
                doomed.push(node);
                for id in doomed {
                    self.nodes.remove(&id);
                }
            }
            Effect::Show(node) => self.update(node, |n| n.visible = true),
            Effect::Hide(node) => self.update(node, |n| n.visible = false),
            Effect::Disable(node) => self.update(node, |n| n.disabled = true),
            Effect::MarkBusy(node) => self.update(node, |n| n.busy = true),
            Effect::Add { parent, node } => {
                self.insert(parent, node);
            }
            Effect::SetUrl(url) => self.url = url,
        }
    }

    fn update(&mut self, node: NodeRef, change: impl FnOnce(&mut FakeNode)) {
        if let Some(entry) = self.nodes.get_mut(&node) {
            change(&mut entry.node);
        }
    }
}

#[async_trait]
impl PagePort for FakePage {
    async fn bridge_installed(&self) -> Result<bool, AgentError> {
        Ok(self.dom.lock().bridge)
    }

    async fn current_url(&self) -> Result<String, AgentError> {
        Ok(self.dom.lock().url.clone())
    }

    async fn query(&self, scope: Option<NodeRef>, query: Query) -> Result<Vec<ElementSnapshot>, AgentError> {
        let dom = self.dom.lock();
        if let Some(scope) = scope {
            if !dom.nodes.contains_key(&scope) {
                return Ok(Vec::new());
            }
        }
        Ok(dom
            .nodes
            .keys()
            .copied()
            .filter(|id| scope.map_or(true, |scope| dom.is_descendant(*id, scope)))
            .filter(|id| dom.matches(*id, query))
            .filter_map(|id| dom.snapshot(id))
            .collect())
    }

    async fn count(&self, scope: Option<NodeRef>, query: Query) -> Result<usize, AgentError> {
        Ok(self.query(scope, query).await?.len())
    }

    async fn snapshot(&self, node: NodeRef) -> Result<Option<ElementSnapshot>, AgentError> {
        Ok(self.dom.lock().snapshot(node))
    }

    async fn ancestors(&self, node: NodeRef, depth: usize) -> Result<Vec<NodeRef>, AgentError> {
        let dom = self.dom.lock();
        if !dom.nodes.contains_key(&node) {
            return Ok(Vec::new());
        }
        Ok(dom.path(node).into_iter().skip(1).take(depth).collect())
    }

    async fn text_target(&self, node: NodeRef) -> Result<NodeRef, AgentError> {
        let dom = self.dom.lock();
        let wanted = normalize(&dom.rendered_text(node));
        let mut best = node;
        if wanted.is_empty() {
            return Ok(best);
        }
        loop {
            let next = dom
                .children(best)
                .into_iter()
                .find(|child| normalize(&dom.rendered_text(*child)) == wanted);
            match next {
                Some(child) => best = child,
                None => return Ok(best),
            }
        }
    }

    async fn click(&self, node: NodeRef) -> Result<(), AgentError> {
        self.activate(ClickKind::Click, node)
    }

    async fn pointer_click(&self, node: NodeRef) -> Result<(), AgentError> {
        self.activate(ClickKind::Pointer, node)
    }

    async fn press_enter(&self, node: NodeRef) -> Result<(), AgentError> {
        self.activate(ClickKind::Enter, node)
    }

    async fn replace_text(&self, node: NodeRef, text: &str, mode: TextMode) -> Result<bool, AgentError> {
        let mut dom = self.dom.lock();
        let reject = dom.reject_text;
        let Some(entry) = dom.nodes.get_mut(&node) else {
            return Err(AgentError::Page(format!("node {node} is detached")));
        };
        if reject || !(entry.node.editable || entry.node.tag == "textarea") {
            return Ok(false);
        }
        entry.value = text.to_string();
        dom.writes.push((node, text.to_string(), mode));
        Ok(true)
    }

    async fn append_text(&self, node: NodeRef, text: &str) -> Result<(), AgentError> {
        let mut dom = self.dom.lock();
        let Some(entry) = dom.nodes.get_mut(&node) else {
            return Err(AgentError::Page(format!("node {node} is detached")));
        };
        entry.value.push_str(text);
        Ok(())
    }

    async fn assign_files(&self, input: NodeRef, files: &[MediaAsset]) -> Result<usize, AgentError> {
        let mut dom = self.dom.lock();
        let Some(entry) = dom.nodes.get(&input) else {
            return Err(AgentError::Page(format!("node {input} is detached")));
        };
        let parent = entry.parent;
        dom.uploads
            .push(files.iter().map(|file| file.filename.clone()).collect());
        for (idx, _) in files.iter().enumerate() {
            let mut preview = FakeNode::element("img");
            preview.src = Some(format!("blob:https://www.facebook.com/preview-{idx}"));
            dom.insert(parent, preview);
        }
        Ok(files.len())
    }
}

/// Media source answering from a fixed table; unknown URLs fail.
#[derive(Default)]
pub struct StaticMedia {
    table: HashMap<String, MediaFetchResult>,
    fetched: Mutex<Vec<String>>,
}

impl StaticMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, asset: MediaAsset) -> Self {
        self.table
            .insert(asset.source_url.clone(), MediaFetchResult::Fetched(asset));
        self
    }

    pub fn with_png(self, url: &str, width: u32, height: u32) -> Self {
        let name = url.rsplit('/').next().unwrap_or("image.png").to_string();
        self.with_asset(MediaAsset {
            source_url: url.to_string(),
            filename: name,
            mime_type: "image/png".into(),
            bytes: png_bytes(width, height),
        })
    }

    pub fn with_gif(self, url: &str) -> Self {
        self.with_asset(MediaAsset {
            source_url: url.to_string(),
            filename: "anim.gif".into(),
            mime_type: "image/gif".into(),
            bytes: b"GIF89a\x01\x00\x01\x00".to_vec(),
        })
    }

    pub fn with_failure(mut self, url: &str, error: &str) -> Self {
        self.table
            .insert(url.to_string(), MediaFetchResult::failed(url, error));
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl MediaSource for StaticMedia {
    async fn fetch(&self, url: &str) -> MediaFetchResult {
        self.fetched.lock().push(url.to_string());
        self.table
            .get(url)
            .cloned()
            .unwrap_or_else(|| MediaFetchResult::failed(url, "unreachable"))
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgba8(image::RgbaImage::new(width, height));
    let mut buf = Vec::new();
    // Encoding an in-memory RGBA buffer to PNG cannot fail.
    let _ = img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png);
    buf
}
