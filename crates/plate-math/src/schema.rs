use plate_core::{ChildConstraint, MarkSpec, Node, NodeSpec, PlatePlugin};
use serde::{Deserialize, Serialize};

pub const MATH_INLINE: &str = "math_inline";
pub const MATH_DISPLAY: &str = "math_display";
/// Zero-content mark used only to tag selection highlights.
pub const MATH_SELECT_MARK: &str = "math_select";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathKind {
    Inline,
    Block,
}

impl MathKind {
    pub fn node_kind(self) -> &'static str {
        match self {
            MathKind::Inline => MATH_INLINE,
            MathKind::Block => MATH_DISPLAY,
        }
    }

    pub fn from_node_kind(kind: &str) -> Option<Self> {
        match kind {
            MATH_INLINE => Some(MathKind::Inline),
            MATH_DISPLAY => Some(MathKind::Block),
            _ => None,
        }
    }

    pub fn display_mode(self) -> bool {
        matches!(self, MathKind::Block)
    }

    pub fn tag_name(self) -> &'static str {
        match self {
            MathKind::Inline => "math-inline",
            MathKind::Block => "math-display",
        }
    }

    /// A math node of this kind holding `source`.
    pub fn node(self, source: impl Into<String>) -> Node {
        Node::text_element(self.node_kind(), source)
    }
}

pub fn math_inline(source: impl Into<String>) -> Node {
    MathKind::Inline.node(source)
}

pub fn math_display(source: impl Into<String>) -> Node {
    MathKind::Block.node(source)
}

/// How a node is treated by rendering and serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    InlineMath,
    BlockMath,
    Other,
}

impl NodeClass {
    pub fn classify(node: &Node) -> Self {
        match MathKind::from_node_kind(node.kind()) {
            Some(MathKind::Inline) => NodeClass::InlineMath,
            Some(MathKind::Block) => NodeClass::BlockMath,
            None => NodeClass::Other,
        }
    }

    pub fn math_kind(self) -> Option<MathKind> {
        match self {
            NodeClass::InlineMath => Some(MathKind::Inline),
            NodeClass::BlockMath => Some(MathKind::Block),
            NodeClass::Other => None,
        }
    }
}

/// Registers the math node types and the selection mark.
pub struct MathSchemaPlugin;

impl PlatePlugin for MathSchemaPlugin {
    fn id(&self) -> &'static str {
        "math.schema"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![
            NodeSpec::inline(MATH_INLINE, ChildConstraint::TextOnly).atom(),
            NodeSpec::block(MATH_DISPLAY, ChildConstraint::TextOnly)
                .atom()
                .code(),
        ]
    }

    fn mark_specs(&self) -> Vec<MarkSpec> {
        vec![MarkSpec::new(MATH_SELECT_MARK)]
    }
}
