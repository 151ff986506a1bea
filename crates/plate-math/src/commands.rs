use std::rc::Rc;

use plate_core::{Bias, Command, Dispatch, EditorState, Mappable, Selection};

use crate::schema::{MathKind, NodeClass};

/// Replaces the selection with a new math node holding `source` and selects
/// it, which opens its editor.
pub fn insert_math_cmd(kind: MathKind, source: &str) -> Command {
    let source = source.to_string();
    Rc::new(
        move |state: &EditorState, dispatch: Option<&Dispatch<'_>>| -> anyhow::Result<bool> {
            let selection = state.selection();
            let rp = state.doc().resolve(selection.from())?;
            let end = state.doc().resolve(selection.to())?;
            let registry = state.registry();
            if !registry.can_replace_with(
                rp.parent_kind(),
                rp.parent_children(),
                rp.index(),
                end.index_after(end.depth()),
                kind.node_kind(),
            ) {
                return Ok(false);
            }

            let mut tr = state.tr();
            if tr.replace_selection_with(kind.node(source.as_str())).is_err() {
                return Ok(false);
            }
            let Some(dispatch) = dispatch else {
                return Ok(true);
            };
            let from = selection.from();
            if let Some(node_selection) = Selection::node(tr.doc(), from) {
                tr.set_selection(node_selection);
            }
            dispatch(tr)?;
            Ok(true)
        },
    )
}

/// Backspace right after a math node deletes the whole node, including a
/// display block directly above the cursor's block.
pub fn math_backspace_cmd() -> Command {
    Rc::new(
        |state: &EditorState, dispatch: Option<&Dispatch<'_>>| -> anyhow::Result<bool> {
            let selection = state.selection();
            if !selection.is_empty() || selection.is_node() {
                return Ok(false);
            }
            let doc = state.doc();
            let rp = doc.resolve(selection.head())?;

            let target = match rp.node_before() {
                Some(node) if NodeClass::classify(node).math_kind().is_some() => {
                    Some((rp.pos - node.node_size(), rp.pos))
                }
                Some(_) => None,
                None if rp.depth() > 0 && rp.parent_offset() == 0 => {
                    let depth = rp.depth() - 1;
                    let index = rp.index_at(depth);
                    index
                        .checked_sub(1)
                        .and_then(|ix| rp.children_at(depth).get(ix))
                        .filter(|node| NodeClass::classify(node) == NodeClass::BlockMath)
                        .and_then(|node| {
                            let end = rp.before(rp.depth())?;
                            Some((end - node.node_size(), end))
                        })
                }
                None => None,
            };
            let Some((from, to)) = target else {
                return Ok(false);
            };

            let mut tr = state.tr();
            if tr.delete(from, to).is_err() {
                return Ok(false);
            }
            let Some(dispatch) = dispatch else {
                return Ok(true);
            };
            let cursor = tr.mapping().map(selection.head(), -1);
            tr.set_selection(Selection::near(
                tr.doc(),
                state.registry(),
                cursor,
                Bias::Left,
            ));
            tracing::trace!(from, to, "deleted math node with backspace");
            dispatch(tr)?;
            Ok(true)
        },
    )
}
