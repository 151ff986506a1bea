//! Typing `$x$` or `$$ ` turns the typed text into math.

use plate_core::{EditorState, LEAF_CHAR, Mappable, PlatePlugin, Selection, Transaction};
use regex::Regex;

use crate::plugin::MathPluginOptions;
use crate::schema::MathKind;

/// How much text before the cursor the rules look at.
const MAX_MATCH: usize = 500;

#[derive(Debug, Clone)]
pub struct InputRule {
    pub pattern: Regex,
    pub kind: MathKind,
}

impl InputRule {
    /// Text wrapped in `delimiter` on both sides, typed as the closing delimiter.
    pub fn inline(delimiter: char) -> Self {
        let d = regex::escape(&delimiter.to_string());
        Self {
            pattern: Regex::new(&format!("{d}([^{d}]+){d}$"))
                .expect("inline math pattern must be valid"),
            kind: MathKind::Inline,
        }
    }

    /// A doubled delimiter and whitespace at the very start of a block.
    pub fn block(delimiter: char) -> Self {
        let d = regex::escape(&delimiter.to_string());
        Self {
            pattern: Regex::new(&format!(r"^{d}{d}\s+$")).expect("block math pattern must be valid"),
            kind: MathKind::Block,
        }
    }
}

pub struct MathInputRules {
    rules: Vec<InputRule>,
}

impl MathInputRules {
    pub fn new(options: &MathPluginOptions) -> Self {
        Self {
            rules: vec![
                InputRule::inline(options.inline_delimiter),
                InputRule::block(options.block_delimiter),
            ],
        }
    }

    pub fn rules(&self) -> &[InputRule] {
        &self.rules
    }

    fn apply_rule(
        &self,
        rule: &InputRule,
        state: &EditorState,
        from: usize,
        to: usize,
        text: &str,
    ) -> Option<Transaction> {
        let doc = state.doc();
        let registry = state.registry();
        let rp = doc.resolve(from).ok()?;
        if registry.is_code(rp.parent_kind()) || !registry.is_textblock(rp.parent_kind()) {
            return None;
        }

        let before = format!("{}{text}", rp.text_before(MAX_MATCH));
        let captures = rule.pattern.captures(&before)?;
        let matched = captures.get(0)?.as_str();
        if matched.contains(LEAF_CHAR) {
            tracing::trace!(kind = ?rule.kind, "input rule spans a non-text node");
            return None;
        }
        let typed = text.chars().count();
        let start = from.checked_sub(matched.chars().count() - typed)?;
        let end = to;

        match rule.kind {
            MathKind::Inline => {
                let source = captures.get(1)?.as_str();
                let rp_start = doc.resolve(start).ok()?;
                let rp_end = doc.resolve(end).ok()?;
                if !registry.can_replace_with(
                    rp_start.parent_kind(),
                    rp_start.parent_children(),
                    rp_start.index(),
                    rp_end.index_after(rp_end.depth()),
                    rule.kind.node_kind(),
                ) {
                    tracing::trace!("inline math not allowed here");
                    return None;
                }
                let mut tr = state.tr();
                tr.replace_with(start, end, vec![rule.kind.node(source)]).ok()?;
                Some(tr)
            }
            MathKind::Block => {
                let depth = rp.depth().checked_sub(1)?;
                if !registry.can_replace_with(
                    rp.kind_at(depth),
                    rp.children_at(depth),
                    rp.index_at(depth),
                    rp.index_after(depth),
                    rule.kind.node_kind(),
                ) {
                    tracing::trace!("display math not allowed here");
                    return None;
                }
                if start != rp.start(rp.depth()) {
                    return None;
                }
                let mut tr = state.tr();
                tr.delete(start, end).ok()?;
                tr.set_block_type(start, start, rule.kind.node_kind(), Default::default())
                    .ok()?;
                let node_pos = tr.mapping().map(start, -1).checked_sub(1)?;
                if let Some(selection) = Selection::node(tr.doc(), node_pos) {
                    tr.set_selection(selection);
                }
                Some(tr)
            }
        }
    }
}

impl PlatePlugin for MathInputRules {
    fn id(&self) -> &'static str {
        "math.input_rules"
    }

    fn handle_text_input(
        &self,
        state: &EditorState,
        from: usize,
        to: usize,
        text: &str,
    ) -> Option<Transaction> {
        self.rules
            .iter()
            .find_map(|rule| self.apply_rule(rule, state, from, to, text))
    }
}
