//! Highlights math nodes covered by a text selection.

use std::cell::RefCell;

use plate_core::{Decoration, Document, EditorState, Node, PlatePlugin, Selection, Transaction};

use crate::schema::NodeClass;

pub const MATH_SELECT_CLASS: &str = "math-select";

/// One decoration per math node overlapping the selection. Empty selections
/// produce none.
pub fn math_select_decorations(selection: Selection, doc: &Document) -> Vec<Decoration> {
    if selection.is_empty() {
        return Vec::new();
    }
    let mut decorations = Vec::new();
    doc.nodes_between(selection.from(), selection.to(), &mut |node: &Node, pos| {
        if node.is_text() {
            return false;
        }
        if NodeClass::classify(node).math_kind().is_some() {
            decorations.push(Decoration::inline(
                pos,
                pos + node.node_size(),
                MATH_SELECT_CLASS,
            ));
            return false;
        }
        true
    });
    decorations
}

#[derive(Default)]
pub struct MathSelectPlugin {
    decorations: RefCell<Vec<Decoration>>,
}

impl PlatePlugin for MathSelectPlugin {
    fn id(&self) -> &'static str {
        "math.select"
    }

    fn init(&self, state: &EditorState) {
        *self.decorations.borrow_mut() = math_select_decorations(state.selection(), state.doc());
    }

    fn apply(&self, tr: &Transaction, _old: &EditorState, new: &EditorState) {
        if tr.selection_set() {
            *self.decorations.borrow_mut() = math_select_decorations(new.selection(), new.doc());
        } else if tr.doc_changed() {
            let mapped = self
                .decorations
                .borrow()
                .iter()
                .filter_map(|decoration| decoration.map(tr.mapping()))
                .collect();
            *self.decorations.borrow_mut() = mapped;
        }
    }

    fn decorations(&self, _state: &EditorState) -> Vec<Decoration> {
        self.decorations.borrow().clone()
    }
}
