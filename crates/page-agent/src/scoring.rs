//! Weighted rule tables shared by the compose locator and the submit resolver.
//!
//! A profile scores one element by summing the weight of every rule
//! category that fires. Each category counts at most once, so a dialog that
//! repeats "create post" three times scores the same as one that says it once.

use crate::model::ElementSnapshot;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchMode {
    Equals,
    Contains,
}

#[derive(Clone, Copy, Debug)]
pub struct PhraseRule {
    pub phrases: &'static [&'static str],
    pub mode: MatchMode,
    pub weight: i32,
}

impl PhraseRule {
    pub const NONE: PhraseRule = PhraseRule {
        phrases: &[],
        mode: MatchMode::Contains,
        weight: 0,
    };

    fn first_hit<'a, I>(&self, labels: I) -> Option<&'static str>
    where
        I: IntoIterator<Item = &'a String> + Clone,
    {
        self.phrases.iter().copied().find(|&phrase| {
            labels.clone().into_iter().any(|label| match self.mode {
                MatchMode::Equals => label.as_str() == phrase,
                MatchMode::Contains => label.contains(phrase),
            })
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Structural {
    DialogRole,
    /// The element is editable or contains an editable region.
    EditableRegion,
    SubmitDescendant,
    LexicalEditor,
    InMain,
    ButtonShape,
    SubmitType,
    /// Lowercase fragment of the class list or pagelet name.
    Fingerprint(&'static str),
}

impl Structural {
    fn holds(&self, el: &ElementSnapshot) -> bool {
        match self {
            Structural::DialogRole => el.has_role("dialog"),
            Structural::EditableRegion => el.editable || el.has_editable_descendant,
            Structural::SubmitDescendant => el.has_submit_descendant,
            Structural::LexicalEditor => el.has_lexical_editor,
            Structural::InMain => el.in_main,
            Structural::ButtonShape => el.has_role("button") || el.tag.eq_ignore_ascii_case("button"),
            Structural::SubmitType => el
                .input_type
                .as_deref()
                .is_some_and(|kind| kind.eq_ignore_ascii_case("submit")),
            Structural::Fingerprint(fragment) => {
                el.class_name.to_lowercase().contains(fragment)
                    || el
                        .pagelet
                        .as_deref()
                        .is_some_and(|pagelet| pagelet.to_lowercase().contains(fragment))
            }
        }
    }

    fn name(&self) -> String {
        match self {
            Structural::DialogRole => "dialog".into(),
            Structural::EditableRegion => "editable".into(),
            Structural::SubmitDescendant => "submit-descendant".into(),
            Structural::LexicalEditor => "lexical".into(),
            Structural::InMain => "main".into(),
            Structural::ButtonShape => "button".into(),
            Structural::SubmitType => "type=submit".into(),
            Structural::Fingerprint(fragment) => format!("class:{fragment}"),
        }
    }
}

/// Which elements may score above zero at all.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Gate {
    Visible,
    Actionable,
}

#[derive(Clone, Copy, Debug)]
pub struct ScoringProfile {
    pub name: &'static str,
    /// Matched against text, aria-label and placeholder.
    pub exact: PhraseRule,
    pub partial: PhraseRule,
    /// Matched against aria-label only.
    pub aria: PhraseRule,
    pub test_id: PhraseRule,
    pub structural: &'static [(Structural, i32)],
    pub negative: PhraseRule,
    /// Without this signal the total is capped at zero.
    pub requires: Option<Structural>,
    pub gate: Gate,
    pub threshold: i32,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Score {
    pub total: i32,
    pub signals: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Scored {
    pub element: ElementSnapshot,
    pub score: Score,
}

impl ScoringProfile {
    pub fn score(&self, el: &ElementSnapshot) -> Score {
        let gated = match self.gate {
            Gate::Visible => !el.visible,
            Gate::Actionable => !el.is_actionable(),
        };
        if gated {
            return Score {
                total: 0,
                signals: vec!["gated".into()],
            };
        }

        let labels = el.spoken_labels();
        let aria: Vec<String> = el.aria().into_iter().collect();
        let test_ids: Vec<String> = el.test_id.as_deref().map(str::to_lowercase).into_iter().collect();

        let mut score = Score::default();
        let mut add = |weight: i32, signal: String| {
            score.total += weight;
            score.signals.push(signal);
        };

        if let Some(hit) = self.exact.first_hit(&labels) {
            add(self.exact.weight, format!("exact:{hit}"));
        }
        if let Some(hit) = self.partial.first_hit(&labels) {
            add(self.partial.weight, format!("partial:{hit}"));
        }
        if let Some(hit) = self.aria.first_hit(&aria) {
            add(self.aria.weight, format!("aria:{hit}"));
        }
        if let Some(hit) = self.test_id.first_hit(&test_ids) {
            add(self.test_id.weight, format!("testid:{hit}"));
        }
        for (signal, weight) in self.structural {
            if signal.holds(el) {
                add(*weight, signal.name());
            }
        }
        if let Some(hit) = self.negative.first_hit(&labels) {
            add(self.negative.weight, format!("negative:{hit}"));
        }

        if let Some(required) = self.requires {
            if !required.holds(el) && score.total > 0 {
                score.total = 0;
                score.signals.push(format!("missing:{}", required.name()));
            }
        }
        score
    }

    /// Scores every candidate, best first; ties keep document order.
    pub fn rank(&self, candidates: Vec<ElementSnapshot>) -> Vec<Scored> {
        let mut seen = std::collections::HashSet::new();
        let mut ranked: Vec<Scored> = candidates
            .into_iter()
            .filter(|el| seen.insert(el.node))
            .map(|element| Scored {
                score: self.score(&element),
                element,
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total.cmp(&a.score.total));
        ranked
    }

    pub fn best_over(&self, candidates: Vec<ElementSnapshot>, threshold: i32) -> Option<Scored> {
        self.rank(candidates)
            .into_iter()
            .next()
            .filter(|top| top.score.total >= threshold)
    }

    pub fn best(&self, candidates: Vec<ElementSnapshot>) -> Option<Scored> {
        self.best_over(candidates, self.threshold)
    }
}

const FEATURE_NEGATIVES: &[&str] = &[
    "marketplace",
    "live video",
    "video trực tiếp",
    "create event",
    "events",
    "sự kiện",
];

const DISMISS_NEGATIVES: &[&str] = &[
    "cancel",
    "close",
    "hủy",
    "đóng",
    "discard",
    "back",
    "quay lại",
    "delete",
    "xóa",
];

pub const COMPOSE: ScoringProfile = ScoringProfile {
    name: "compose",
    exact: PhraseRule {
        phrases: &["create post", "tạo bài viết", "what's on your mind", "bạn đang nghĩ gì"],
        mode: MatchMode::Contains,
        weight: 100,
    },
    partial: PhraseRule {
        phrases: &["đăng bài", "write post", "write something", "viết gì đó", "write", "viết"],
        mode: MatchMode::Contains,
        weight: 60,
    },
    aria: PhraseRule {
        phrases: &["create post", "tạo bài viết"],
        mode: MatchMode::Contains,
        weight: 80,
    },
    test_id: PhraseRule {
        phrases: &["creation", "composer"],
        mode: MatchMode::Contains,
        weight: 80,
    },
    structural: &[
        (Structural::DialogRole, 40),
        (Structural::EditableRegion, 50),
        (Structural::SubmitDescendant, 40),
        (Structural::Fingerprint("feedcomposer"), 30),
        (Structural::LexicalEditor, 30),
        (Structural::InMain, 20),
    ],
    negative: PhraseRule {
        phrases: FEATURE_NEGATIVES,
        mode: MatchMode::Contains,
        weight: -100,
    },
    requires: Some(Structural::EditableRegion),
    gate: Gate::Visible,
    threshold: 50,
};

/// Controls that open the composer when none is on screen.
pub const OPENER: ScoringProfile = ScoringProfile {
    name: "opener",
    exact: PhraseRule {
        phrases: &["what's on your mind", "bạn đang nghĩ gì", "create post", "tạo bài viết"],
        mode: MatchMode::Contains,
        weight: 100,
    },
    partial: PhraseRule::NONE,
    aria: PhraseRule {
        phrases: &["create post", "tạo bài viết"],
        mode: MatchMode::Contains,
        weight: 80,
    },
    test_id: PhraseRule {
        phrases: &["creation-trigger", "composer-trigger"],
        mode: MatchMode::Contains,
        weight: 80,
    },
    structural: &[(Structural::ButtonShape, 20), (Structural::InMain, 20)],
    negative: PhraseRule {
        phrases: FEATURE_NEGATIVES,
        mode: MatchMode::Contains,
        weight: -100,
    },
    requires: None,
    gate: Gate::Actionable,
    threshold: 50,
};

pub const PHOTO_BUTTON: ScoringProfile = ScoringProfile {
    name: "photo-button",
    exact: PhraseRule {
        phrases: &["ảnh/video", "photo/video"],
        mode: MatchMode::Contains,
        weight: 100,
    },
    partial: PhraseRule {
        phrases: &["photo", "ảnh", "media", "image"],
        mode: MatchMode::Contains,
        weight: 50,
    },
    aria: PhraseRule {
        phrases: &["photo", "ảnh"],
        mode: MatchMode::Contains,
        weight: 50,
    },
    test_id: PhraseRule::NONE,
    structural: &[(Structural::ButtonShape, 10)],
    negative: PhraseRule {
        phrases: &["live", "trực tiếp", "gif", "sticker", "nhãn dán"],
        mode: MatchMode::Contains,
        weight: -100,
    },
    requires: None,
    gate: Gate::Actionable,
    threshold: 50,
};

pub const SUBMIT: ScoringProfile = ScoringProfile {
    name: "submit",
    exact: PhraseRule {
        phrases: &[
            "post",
            "đăng",
            "publish",
            "share",
            "share now",
            "chia sẻ",
            "chia sẻ ngay",
            "đăng bài",
        ],
        mode: MatchMode::Equals,
        weight: 100,
    },
    partial: PhraseRule::NONE,
    aria: PhraseRule {
        phrases: &["post", "đăng", "publish"],
        mode: MatchMode::Contains,
        weight: 50,
    },
    test_id: PhraseRule::NONE,
    structural: &[
        (Structural::ButtonShape, 10),
        (Structural::SubmitType, 20),
        (Structural::Fingerprint("submit"), 10),
    ],
    negative: PhraseRule {
        phrases: DISMISS_NEGATIVES,
        mode: MatchMode::Contains,
        weight: -200,
    },
    requires: None,
    gate: Gate::Actionable,
    threshold: 50,
};

/// Intermediate confirmation step shown before the final post action.
pub const NEXT: ScoringProfile = ScoringProfile {
    name: "next",
    exact: PhraseRule {
        phrases: &["next", "tiếp", "tiếp tục", "continue"],
        mode: MatchMode::Equals,
        weight: 100,
    },
    partial: PhraseRule::NONE,
    aria: PhraseRule {
        phrases: &["next", "tiếp"],
        mode: MatchMode::Contains,
        weight: 50,
    },
    test_id: PhraseRule::NONE,
    structural: &[(Structural::ButtonShape, 10)],
    negative: PhraseRule {
        phrases: DISMISS_NEGATIVES,
        mode: MatchMode::Contains,
        weight: -200,
    },
    requires: None,
    gate: Gate::Actionable,
    threshold: 50,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeRef;

    fn button(node: u64, text: &str) -> ElementSnapshot {
        ElementSnapshot {
            node: NodeRef(node),
            tag: "div".into(),
            role: Some("button".into()),
            text: text.into(),
            visible: true,
            ..Default::default()
        }
    }

    #[test]
    fn compose_dialog_with_editor_scores_high() {
        let dialog = ElementSnapshot {
            node: NodeRef(1),
            tag: "div".into(),
            role: Some("dialog".into()),
            text: "Create post What's on your mind? Post".into(),
            visible: true,
            has_editable_descendant: true,
            has_submit_descendant: true,
            ..Default::default()
        };
        let score = COMPOSE.score(&dialog);
        // exact 100 + dialog 40 + editable 50 + submit 40
        assert_eq!(score.total, 230);
        assert!(score.signals.iter().any(|s| s == "exact:create post"));
    }

    #[test]
    fn feature_dialogs_go_negative() {
        let dialog = ElementSnapshot {
            node: NodeRef(2),
            tag: "div".into(),
            role: Some("dialog".into()),
            text: "Marketplace Sell something".into(),
            visible: true,
            ..Default::default()
        };
        assert!(COMPOSE.score(&dialog).total < 0);
    }

    #[test]
    fn surface_without_editor_is_capped() {
        let trigger = button(3, "What's on your mind, Lan?");
        assert_eq!(COMPOSE.score(&trigger).total, 0);
        assert!(OPENER.score(&trigger).total >= OPENER.threshold);
    }

    #[test]
    fn submit_prefers_exact_label_and_punishes_dismissals() {
        let post = button(1, "Post");
        let cancel = ElementSnapshot {
            aria_label: Some("Cancel post".into()),
            ..button(2, "Cancel")
        };
        assert_eq!(SUBMIT.score(&post).total, 110);
        assert!(SUBMIT.score(&cancel).total < 0);

        let best = SUBMIT.best(vec![cancel, post]).unwrap();
        assert_eq!(best.element.node, NodeRef(1));
    }

    #[test]
    fn disabled_or_hidden_controls_score_zero() {
        let disabled = ElementSnapshot {
            aria_disabled: true,
            ..button(1, "Post")
        };
        let hidden = ElementSnapshot {
            visible: false,
            ..button(2, "Đăng")
        };
        assert_eq!(SUBMIT.score(&disabled).total, 0);
        assert_eq!(SUBMIT.score(&hidden).total, 0);
        assert!(SUBMIT.best(vec![disabled, hidden]).is_none());
    }

    #[test]
    fn categories_count_once() {
        let el = ElementSnapshot {
            aria_label: Some("Post".into()),
            ..button(1, "Post")
        };
        // exact (text and aria both equal) counted once, aria partial once
        assert_eq!(SUBMIT.score(&el).total, 100 + 50 + 10);
    }

    #[test]
    fn next_is_separate_from_submit() {
        let next = button(1, "Tiếp");
        assert!(NEXT.score(&next).total >= NEXT.threshold);
        assert!(SUBMIT.score(&next).total < SUBMIT.threshold);
    }

    #[test]
    fn rank_drops_duplicate_nodes() {
        let ranked = SUBMIT.rank(vec![button(1, "Post"), button(1, "Post"), button(2, "Share")]);
        assert_eq!(ranked.len(), 2);
    }
}
