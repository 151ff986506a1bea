use std::rc::{Rc, Weak};

use plate_core::{Bias, Command, Dispatch, EditorState, EditorView, Node, Selection};
use serde::{Deserialize, Serialize};

use crate::error::MathError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn bias(self) -> Bias {
        match self {
            Direction::Forward => Bias::Right,
            Direction::Backward => Bias::Left,
        }
    }
}

/// Conditions under which leaving a nested math editor is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitPolicy {
    /// Only leave when the cursor already sits at the edge of the content.
    pub require_border: bool,
    /// Never leave while text is selected.
    pub require_empty_selection: bool,
}

impl ExitPolicy {
    pub const AT_BORDER: ExitPolicy = ExitPolicy {
        require_border: true,
        require_empty_selection: true,
    };

    pub const ANYWHERE: ExitPolicy = ExitPolicy {
        require_border: false,
        require_empty_selection: true,
    };
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self::ANYWHERE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitTarget {
    /// Outer position right before or after the math node.
    pub pos: usize,
    /// The exit leaves the document at its start or end, so an empty
    /// paragraph has to be inserted there.
    pub insert_paragraph: bool,
}

/// Decides whether moving in `direction` leaves the math node, and where the
/// outer cursor goes if so.
pub fn exit_target(
    inner_selection: Selection,
    inner_size: usize,
    outer_selection: Selection,
    outer_size: usize,
    direction: Direction,
    policy: ExitPolicy,
) -> Option<ExitTarget> {
    if policy.require_empty_selection && !inner_selection.is_empty() {
        return None;
    }
    let current = match direction {
        Direction::Forward => inner_selection.to(),
        Direction::Backward => inner_selection.from(),
    };
    if policy.require_border {
        let at_border = match direction {
            Direction::Forward => current >= inner_size,
            Direction::Backward => current == 0,
        };
        if !at_border {
            return None;
        }
    }
    let pos = match direction {
        Direction::Forward => outer_selection.to(),
        Direction::Backward => outer_selection.from(),
    };
    Some(ExitTarget {
        pos,
        insert_paragraph: match direction {
            Direction::Forward => pos == outer_size,
            Direction::Backward => pos == 0,
        },
    })
}

/// A command for the nested editor that moves the outer cursor out of the
/// math node. The outer editor is only touched when a dispatcher is given.
pub fn collapse_math_cmd(
    outer: Weak<EditorView>,
    direction: Direction,
    policy: ExitPolicy,
) -> Command {
    Rc::new(
        move |inner: &EditorState, dispatch: Option<&Dispatch<'_>>| -> anyhow::Result<bool> {
            let outer = outer.upgrade().ok_or(MathError::OuterViewGone)?;
            let outer_state = outer.state();
            let Some(target) = exit_target(
                inner.selection(),
                inner.doc().content_size(),
                outer_state.selection(),
                outer_state.doc().content_size(),
                direction,
                policy,
            ) else {
                return Ok(false);
            };
            if dispatch.is_none() {
                return Ok(true);
            }

            let registry = outer_state.registry();
            let mut tr = outer_state.tr();
            let found = if target.insert_paragraph {
                None
            } else {
                Selection::find_toward(tr.doc(), registry, target.pos, direction.bias())
            };
            let selection = match found {
                Some(selection) => selection,
                None => {
                    tr.insert(target.pos, Node::paragraph(""))?;
                    Selection::cursor(target.pos + 1)
                }
            };
            tr.set_selection(selection);
            tracing::trace!(?direction, pos = target.pos, "leaving math node");
            outer.dispatch(tr)?;
            outer.focus();
            Ok(true)
        },
    )
}
