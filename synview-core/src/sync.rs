use std::path::{Path, PathBuf};

use anyhow::Result;
use regex::Regex;
use tracing::{debug, warn};

use crate::geometry::Rect;
use crate::DocumentBackend;

/// How many words before the cursor are used to tell candidates apart.
const CONTEXT_WORDS: usize = 5;

/// Cursor position in a source file. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

/// Result of an inverse search. `line` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub file: PathBuf,
    pub line: u32,
}

/// Where the editor cursor sits, plus enough surrounding text to pick between
/// several candidate boxes.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncAnchor {
    pub position: SourcePosition,
    /// Source text around the cursor.
    pub text: String,
    /// Cursor offset into `text`, in characters.
    pub offset: usize,
}

impl SyncAnchor {
    pub fn new(position: SourcePosition) -> Self {
        Self {
            position,
            text: String::new(),
            offset: 0,
        }
    }

    /// Anchor over a whole source file, placing the cursor at the position's
    /// line and column.
    pub fn from_source(position: SourcePosition, text: String) -> Self {
        let mut offset = 0;
        for (index, line) in text.split_inclusive('\n').enumerate() {
            if index + 1 == position.line as usize {
                let column = (position.column.max(1) - 1) as usize;
                offset += column.min(line.trim_end_matches('\n').chars().count());
                break;
            }
            offset += line.chars().count();
        }
        Self {
            position,
            text,
            offset,
        }
    }
}

/// Candidate box from a forward search, in unscaled page coordinates with the
/// origin at the top-left of the page.
///
/// `score` is zero until text matching bumps it; `-1` marks the selected node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncNode {
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub score: i32,
}

impl SyncNode {
    pub fn new(page: usize, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            page,
            x,
            y,
            width,
            height,
            score: 0,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn is_selected(&self) -> bool {
        self.score < 0
    }
}

pub trait SyncBackend: Send + Sync {
    /// Boxes produced by the source position, in document order.
    fn forward(&self, document: &Path, position: &SourcePosition) -> Result<Vec<SyncNode>>;
    /// Source line that produced the point on `page` (unscaled page
    /// coordinates).
    fn inverse(&self, document: &Path, page: usize, x: f64, y: f64) -> Result<Option<SourceLine>>;
}

/// Candidates of the latest forward search.
#[derive(Debug, Clone, Default)]
pub struct SyncSession {
    nodes: Vec<SyncNode>,
}

impl SyncSession {
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn replace(&mut self, nodes: Vec<SyncNode>) {
        self.nodes = nodes;
    }

    pub fn nodes(&self) -> &[SyncNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut Vec<SyncNode> {
        &mut self.nodes
    }

    pub fn selected(&self) -> Option<&SyncNode> {
        self.nodes.iter().find(|node| node.is_selected())
    }

    pub fn on_page(&self, page: usize) -> impl Iterator<Item = &SyncNode> {
        self.nodes.iter().filter(move |node| node.page == page)
    }
}

/// Collapses all candidates into their bounding box when they sit on one
/// page and span less than a third of the view height at `scale`.
pub fn merge_if_close(nodes: &mut Vec<SyncNode>, view_height: f64, scale: f64) -> bool {
    let Some(first) = nodes.first().copied() else {
        return false;
    };
    if nodes.iter().any(|node| node.page != first.page) {
        return false;
    }

    let bounds = nodes
        .iter()
        .skip(1)
        .fold(first.rect(), |acc, node| acc.union(&node.rect()));
    if bounds.height * scale >= view_height / 3.0 {
        return false;
    }

    debug!(count = nodes.len(), page = first.page, "merged close sync nodes");
    *nodes = vec![SyncNode::new(
        first.page,
        bounds.x,
        bounds.y,
        bounds.width,
        bounds.height,
    )];
    true
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

/// Up to `limit` whole words ending at or containing `offset`, walking
/// backwards from the cursor. A word the cursor sits inside is returned in
/// full.
pub fn preceding_words(text: &str, offset: usize, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut start = offset.min(chars.len());
    let mut words = Vec::new();

    while words.len() < limit {
        let mut pos = start;
        while pos > 0 && !is_word_char(chars[pos - 1]) {
            pos -= 1;
        }
        if pos == 0 {
            break;
        }
        while pos > 0 && is_word_char(chars[pos - 1]) {
            pos -= 1;
        }
        let mut end = pos;
        while end < chars.len() && is_word_char(chars[end]) {
            end += 1;
        }
        words.push(chars[pos..end].iter().collect());
        start = pos;
    }
    words
}

/// Bumps the score of every candidate whose page text contains one of the
/// words before the cursor, as a whole word. Only runs with two or more
/// candidates.
pub fn disambiguate_by_text(
    nodes: &mut [SyncNode],
    anchor: &SyncAnchor,
    backend: &dyn DocumentBackend,
) {
    if nodes.len() < 2 {
        return;
    }

    let texts: Vec<Option<String>> = nodes
        .iter()
        .map(|node| match backend.page_text(node.page, node.rect()) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(page = node.page, "text extraction failed: {err:#}");
                None
            }
        })
        .collect();

    for word in preceding_words(&anchor.text, anchor.offset, CONTEXT_WORDS) {
        let pattern = match Regex::new(&format!(r"\b{}\b", regex::escape(&word))) {
            Ok(pattern) => pattern,
            Err(err) => {
                warn!(%word, "skipping unmatchable word: {err}");
                continue;
            }
        };
        for (node, text) in nodes.iter_mut().zip(&texts) {
            if text.as_deref().is_some_and(|text| pattern.is_match(text)) {
                node.score += 1;
            }
        }
    }
}

/// Picks the one candidate to show: a lone candidate, else the unique
/// highest positive score. The winner is marked with score `-1`.
pub fn select_unique(nodes: &mut [SyncNode]) -> Option<usize> {
    if nodes.len() == 1 {
        nodes[0].score = -1;
        return Some(0);
    }

    let best = nodes.iter().map(|node| node.score).max()?;
    if best <= 0 {
        return None;
    }
    let mut winners = nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.score == best)
        .map(|(index, _)| index);
    let winner = winners.next()?;
    if winners.next().is_some() {
        return None;
    }
    nodes[winner].score = -1;
    Some(winner)
}

fn axis_target(node_start: f64, node_size: f64, view_start: f64, view_size: f64) -> f64 {
    if node_start >= view_start && node_start + node_size <= view_start + view_size {
        view_start
    } else if node_size < view_size {
        node_start + (node_size - view_size) / 2.0
    } else {
        node_start
    }
}

/// Scroll offset that shows `node` (document pixel space) inside `view`:
/// per axis, stay if already visible, center if it fits, else align to its
/// origin.
pub fn scroll_target(node: Rect, view: Rect) -> (f64, f64) {
    (
        axis_target(node.x, node.width, view.x, view.width),
        axis_target(node.y, node.height, view.y, view.height),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    fn anchor(text: &str, offset: usize) -> SyncAnchor {
        SyncAnchor {
            position: SourcePosition {
                file: PathBuf::from("main.tex"),
                line: 1,
                column: 1,
            },
            text: text.to_string(),
            offset,
        }
    }

    #[test]
    fn close_nodes_on_one_page_merge_into_bounding_box() {
        let mut nodes = vec![
            SyncNode::new(0, 10.0, 100.0, 50.0, 10.0),
            SyncNode::new(0, 5.0, 112.0, 80.0, 10.0),
        ];
        assert!(merge_if_close(&mut nodes, 600.0, 1.0));
        assert_eq!(nodes, vec![SyncNode::new(0, 5.0, 100.0, 80.0, 22.0)]);
    }

    #[test]
    fn nodes_on_different_pages_never_merge() {
        let mut nodes = vec![
            SyncNode::new(0, 10.0, 100.0, 50.0, 10.0),
            SyncNode::new(1, 10.0, 100.0, 50.0, 10.0),
        ];
        assert!(!merge_if_close(&mut nodes, 600.0, 1.0));
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn tall_spans_do_not_merge() {
        let mut nodes = vec![
            SyncNode::new(0, 0.0, 0.0, 10.0, 10.0),
            SyncNode::new(0, 0.0, 290.0, 10.0, 10.0),
        ];
        // span of 300 at scale 1 against a third of 600
        assert!(!merge_if_close(&mut nodes, 600.0, 1.0));
    }

    #[test]
    fn three_candidates_merge_only_within_a_third_of_the_view() {
        let spread = |height: f64| {
            vec![
                SyncNode::new(0, 0.0, 0.0, 10.0, 10.0),
                SyncNode::new(0, 0.0, height / 2.0, 10.0, 10.0),
                SyncNode::new(0, 0.0, height - 10.0, 10.0, 10.0),
            ]
        };

        let mut near = spread(100.0);
        assert!(merge_if_close(&mut near, 1000.0, 1.0));
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].height, 100.0);

        let mut far = spread(500.0);
        assert!(!merge_if_close(&mut far, 1000.0, 1.0));
        assert_eq!(far.len(), 3);
    }

    #[test]
    fn preceding_words_walk_backwards_and_complete_the_cursor_word() {
        let text = "alpha beta, gamma delta epsilon zeta";
        let cursor = text.find("ilon").unwrap();
        assert_eq!(
            preceding_words(text, cursor, 5),
            vec!["epsilon", "delta", "gamma", "beta", "alpha"]
        );
        assert_eq!(preceding_words(text, 5, 5), vec!["alpha"]);
        assert!(preceding_words("  ", 2, 5).is_empty());
    }

    #[test]
    fn select_unique_prefers_lone_node_then_unique_best() {
        let mut single = vec![SyncNode::new(0, 0.0, 0.0, 1.0, 1.0)];
        assert_eq!(select_unique(&mut single), Some(0));
        assert!(single[0].is_selected());

        let mut tied = vec![SyncNode::new(0, 0.0, 0.0, 1.0, 1.0); 2];
        tied[0].score = 2;
        tied[1].score = 2;
        assert_eq!(select_unique(&mut tied), None);

        let mut unscored = vec![SyncNode::new(0, 0.0, 0.0, 1.0, 1.0); 3];
        assert_eq!(select_unique(&mut unscored), None);

        let mut first = vec![SyncNode::new(0, 0.0, 0.0, 1.0, 1.0); 3];
        first[0].score = 1;
        assert_eq!(select_unique(&mut first), Some(0));

        let mut split = vec![SyncNode::new(0, 0.0, 0.0, 1.0, 1.0); 3];
        split[0].score = 1;
        split[1].score = 1;
        assert_eq!(select_unique(&mut split), None);

        let mut ranked = vec![SyncNode::new(0, 0.0, 0.0, 1.0, 1.0); 3];
        ranked[2].score = 1;
        assert_eq!(select_unique(&mut ranked), Some(2));
        assert_eq!(ranked[2].score, -1);
    }

    #[test]
    fn text_matching_scores_whole_words_only() {
        let backend = FakeBackend::uniform(2, 600.0, 800.0)
            .with_text(0, Rect::new(0.0, 0.0, 600.0, 400.0), "the lemma holds")
            .with_text(1, Rect::new(0.0, 0.0, 600.0, 400.0), "dilemmas abound");
        let mut nodes = vec![
            SyncNode::new(0, 10.0, 10.0, 100.0, 10.0),
            SyncNode::new(1, 10.0, 10.0, 100.0, 10.0),
        ];

        disambiguate_by_text(&mut nodes, &anchor("by the lemma", 12), &backend);

        assert_eq!(nodes[0].score, 2);
        assert_eq!(nodes[1].score, 0);
        assert_eq!(select_unique(&mut nodes), Some(0));
    }

    #[test]
    fn anchor_offset_counts_characters_up_to_the_column() {
        let position = SourcePosition {
            file: PathBuf::from("a.tex"),
            line: 2,
            column: 4,
        };
        let anchor = SyncAnchor::from_source(position, "héllo\nworld\n".to_string());
        assert_eq!(anchor.offset, 6 + 3);
    }

    #[test]
    fn scroll_target_keeps_visible_axes_and_centers_small_nodes() {
        let view = Rect::new(0.0, 0.0, 400.0, 300.0);

        assert_eq!(scroll_target(Rect::new(10.0, 10.0, 50.0, 50.0), view), (0.0, 0.0));
        assert_eq!(
            scroll_target(Rect::new(10.0, 1000.0, 50.0, 100.0), view),
            (0.0, 900.0)
        );
        assert_eq!(
            scroll_target(Rect::new(10.0, 1000.0, 50.0, 500.0), view),
            (0.0, 1000.0)
        );
    }
}
