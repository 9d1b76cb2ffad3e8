//! Rich text view interface.
//!
//! The widget that shows the buffer to a human is external. The engine
//! needs only a handful of its capabilities: inline annotations, the
//! selection, scroll, and remote-cursor overlays.

use std::sync::Arc;

use indexmap::IndexMap;
use kyodo_crdt::SharedBuffer;
use kyodo_types::{Color, TextRange};
use parking_lot::RwLock;
use serde_json::Value;

/// Pixel geometry of one position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub top: f32,
    pub left: f32,
    pub height: f32,
}

pub trait TextView: Send + Sync {
    fn apply_annotation(&self, range: TextRange, kind: &str, payload: Value);
    fn set_selection(&self, range: TextRange);
    /// The local human's selection, if the view has focus.
    fn selection(&self) -> Option<TextRange>;
    fn bounds(&self, index: usize) -> Option<Bounds>;
    fn scroll_into_view(&self, index: usize);
    fn show_cursor(&self, id: &str, label: &str, color: Color, range: TextRange);
    fn remove_cursor(&self, id: &str);
}

pub type SharedView = Arc<dyn TextView>;

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub range: TextRange,
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCursor {
    pub label: String,
    pub color: Color,
    pub range: TextRange,
}

#[derive(Default)]
struct ViewState {
    selection: Option<TextRange>,
    annotations: Vec<Annotation>,
    cursors: IndexMap<String, RenderedCursor>,
    scrolled_to: Option<usize>,
}

const LINE_HEIGHT: f32 = 20.0;
const CHAR_WIDTH: f32 = 8.0;

/// Headless view: records everything, lays text out on a monospace grid.
pub struct MemoryView {
    buffer: SharedBuffer,
    state: RwLock<ViewState>,
}

impl MemoryView {
    pub fn new(buffer: SharedBuffer) -> Self {
        Self {
            buffer,
            state: RwLock::new(ViewState::default()),
        }
    }

    pub fn annotations(&self) -> Vec<Annotation> {
        self.state.read().annotations.clone()
    }

    pub fn cursors(&self) -> IndexMap<String, RenderedCursor> {
        self.state.read().cursors.clone()
    }

    pub fn scrolled_to(&self) -> Option<usize> {
        self.state.read().scrolled_to
    }
}

impl TextView for MemoryView {
    fn apply_annotation(&self, range: TextRange, kind: &str, payload: Value) {
        self.state.write().annotations.push(Annotation {
            range,
            kind: kind.to_string(),
            payload,
        });
    }

    fn set_selection(&self, range: TextRange) {
        self.state.write().selection = Some(range);
    }

    fn selection(&self) -> Option<TextRange> {
        self.state.read().selection
    }

    fn bounds(&self, index: usize) -> Option<Bounds> {
        let text = self.buffer.full_text();
        if index > text.chars().count() {
            return None;
        }
        let (mut line, mut column) = (0usize, 0usize);
        for ch in text.chars().take(index) {
            if ch == '\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }
        }
        Some(Bounds {
            top: line as f32 * LINE_HEIGHT,
            left: column as f32 * CHAR_WIDTH,
            height: LINE_HEIGHT,
        })
    }

    fn scroll_into_view(&self, index: usize) {
        self.state.write().scrolled_to = Some(index);
    }

    fn show_cursor(&self, id: &str, label: &str, color: Color, range: TextRange) {
        self.state.write().cursors.insert(
            id.to_string(),
            RenderedCursor {
                label: label.to_string(),
                color,
                range,
            },
        );
    }

    fn remove_cursor(&self, id: &str) {
        self.state.write().cursors.shift_remove(id);
    }
}
