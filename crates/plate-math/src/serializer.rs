//! Plain-text serialization with math written back as delimited TeX, used for
//! copying to the clipboard.

use plate_core::{Document, EditorState, Node, NodeRole, PluginRegistry};

use crate::plugin::MathPluginOptions;
use crate::schema::NodeClass;

const BLOCK_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MathSerializer {
    pub inline_delimiter: char,
    pub block_delimiter: char,
}

impl Default for MathSerializer {
    fn default() -> Self {
        Self {
            inline_delimiter: '$',
            block_delimiter: '$',
        }
    }
}

impl MathSerializer {
    pub fn new(options: &MathPluginOptions) -> Self {
        Self {
            inline_delimiter: options.inline_delimiter,
            block_delimiter: options.block_delimiter,
        }
    }

    /// Text for a math node, `None` for anything else.
    pub fn serialize_node(&self, node: &Node) -> Option<String> {
        let source = node.text_content();
        match NodeClass::classify(node) {
            NodeClass::InlineMath => {
                let d = self.inline_delimiter;
                Some(format!("{d}{source}{d}"))
            }
            NodeClass::BlockMath => {
                let d = self.block_delimiter;
                Some(format!("\n\n{d}{d}\n{source}\n{d}{d}"))
            }
            NodeClass::Other => None,
        }
    }

    /// Text of `from..to`. Math nodes overlapping the range are written whole.
    pub fn serialize_range(
        &self,
        doc: &Document,
        registry: &PluginRegistry,
        from: usize,
        to: usize,
    ) -> String {
        let mut text = String::new();
        let mut separated = true;
        doc.nodes_between(from, to, &mut |node, pos| {
            if let Some(serialized) = self.serialize_node(node) {
                text.push_str(&serialized);
                return false;
            }
            match node {
                Node::Text(t) => {
                    let start = from.max(pos) - pos;
                    let end = to.min(pos + t.len_chars()).saturating_sub(pos);
                    text.extend(t.text.chars().skip(start).take(end.saturating_sub(start)));
                    separated = false;
                }
                Node::Element(el) => {
                    let is_block = registry
                        .node_spec(&el.kind)
                        .is_some_and(|spec| spec.role == NodeRole::Block);
                    if is_block && !separated {
                        text.push_str(BLOCK_SEPARATOR);
                        separated = true;
                    }
                }
            }
            true
        });
        text
    }

    pub fn serialize_selection(&self, state: &EditorState) -> String {
        let selection = state.selection();
        self.serialize_range(
            state.doc(),
            state.registry(),
            selection.from(),
            selection.to(),
        )
    }

    pub fn serialize_document(&self, doc: &Document, registry: &PluginRegistry) -> String {
        self.serialize_range(doc, registry, 0, doc.content_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{math_display, math_inline};

    #[test]
    fn math_nodes_use_their_delimiters() {
        let serializer = MathSerializer::default();
        assert_eq!(
            serializer.serialize_node(&math_inline("x^2")).as_deref(),
            Some("$x^2$")
        );
        assert_eq!(
            serializer.serialize_node(&math_display("a=b")).as_deref(),
            Some("\n\n$$\na=b\n$$")
        );
        assert_eq!(serializer.serialize_node(&Node::paragraph("x")), None);
    }

    #[test]
    fn custom_delimiters_are_respected() {
        let serializer = MathSerializer {
            inline_delimiter: '%',
            block_delimiter: '#',
        };
        assert_eq!(
            serializer.serialize_node(&math_inline("y")).as_deref(),
            Some("%y%")
        );
        assert_eq!(
            serializer.serialize_node(&math_display("y")).as_deref(),
            Some("\n\n##\ny\n##")
        );
    }
}
