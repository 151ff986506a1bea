//! Moving edits between a nested math editor and the outer document.

use plate_core::{EditorState, Node, Step, StepMap, Transaction};

use crate::error::MathError;

/// Marks transactions that carry outer changes into a nested editor. They are
/// never mirrored back out.
pub const FROM_OUTSIDE_META: &str = "math.from_outside";

pub fn is_from_outside(tr: &Transaction) -> bool {
    tr.get_meta(FROM_OUTSIDE_META)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

/// Shifts every step of `transactions` by `offset` positions.
pub fn offset_steps(transactions: &[Transaction], offset: usize) -> Result<Vec<Step>, MathError> {
    let map = StepMap::offset(offset);
    transactions
        .iter()
        .flat_map(|tr| tr.steps())
        .enumerate()
        .map(|(index, step)| step.map(&map).ok_or(MathError::StepDiscarded { index }))
        .collect()
}

/// The outer transaction mirroring inner `transactions` for the math node at
/// `node_pos`, or `None` when it would not change the outer document.
pub fn propagate_outward(
    outer: &EditorState,
    transactions: &[Transaction],
    node_pos: usize,
) -> Result<Option<Transaction>, MathError> {
    let steps = offset_steps(transactions, node_pos + 1)?;
    let mut tr = outer.tr();
    for step in steps {
        tr.step(step)?;
    }
    tracing::trace!(steps = tr.steps().len(), node_pos, "propagating inner steps");
    Ok(tr.doc_changed().then_some(tr))
}

/// The differing middle of two texts, in chars: `current[start..end_current]`
/// has to become `target[start..end_target]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextDiff {
    pub start: usize,
    pub end_current: usize,
    pub end_target: usize,
}

pub fn diff_range(current: &str, target: &str) -> Option<TextDiff> {
    let a: Vec<char> = current.chars().collect();
    let b: Vec<char> = target.chars().collect();

    let start = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    if start == a.len() && start == b.len() {
        return None;
    }
    let suffix = a
        .iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let mut end_current = a.len() - suffix;
    let mut end_target = b.len() - suffix;
    // Prefix and suffix may claim the same chars when one text repeats.
    let overlap = start.saturating_sub(end_current.min(end_target));
    end_current += overlap;
    end_target += overlap;

    Some(TextDiff {
        start,
        end_current,
        end_target,
    })
}

/// A transaction bringing the nested editor's content in line with `node`,
/// touching only the range that differs.
pub fn reconcile(inner: &EditorState, node: &Node) -> Result<Option<Transaction>, MathError> {
    let current = inner.doc().text_content();
    let target = node.text_content();
    let Some(diff) = diff_range(&current, &target) else {
        return Ok(None);
    };
    let replacement: String = target
        .chars()
        .skip(diff.start)
        .take(diff.end_target - diff.start)
        .collect();

    let mut tr = inner.tr();
    tr.insert_text(&replacement, diff.start, diff.end_current)?;
    tr.set_meta(FROM_OUTSIDE_META, true)
        .set_add_to_history(false);
    tracing::debug!(?diff, "reconciling nested math editor");
    Ok(Some(tr))
}
