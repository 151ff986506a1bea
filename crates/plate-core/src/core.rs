use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ops::{Mappable, Mapping, StepError};
use crate::plugin::PluginRegistry;

pub type Attrs = BTreeMap<String, serde_json::Value>;
pub type ElementKind = String;

pub const DOC_KIND: &str = "doc";
pub const PARAGRAPH_KIND: &str = "paragraph";
pub const TEXT_KIND: &str = "text";

/// Stands in for a non-text inline node when a parent's content is flattened to text.
pub const LEAF_CHAR: char = '\u{fffc}';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Element(ElementNode),
    Text(TextNode),
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(TextNode { text: text.into() })
    }

    pub fn element(kind: impl Into<String>, children: Vec<Node>) -> Self {
        Node::Element(ElementNode {
            kind: kind.into(),
            attrs: Attrs::default(),
            children: normalize_children(children),
        })
    }

    pub fn text_element(kind: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let children = if text.is_empty() {
            Vec::new()
        } else {
            vec![Node::text(text)]
        };
        Self::element(kind, children)
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::text_element(PARAGRAPH_KIND, text)
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        if let Node::Element(el) = &mut self {
            el.attrs = attrs;
        }
        self
    }

    pub fn kind(&self) -> &str {
        match self {
            Node::Element(el) => &el.kind,
            Node::Text(_) => TEXT_KIND,
        }
    }

    pub fn attrs(&self) -> Option<&Attrs> {
        match self {
            Node::Element(el) => Some(&el.attrs),
            Node::Text(_) => None,
        }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Node::Element(el) => &el.children,
            Node::Text(_) => &[],
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Node::Text(_))
    }

    pub fn node_size(&self) -> usize {
        match self {
            Node::Element(el) => content_size(&el.children) + 2,
            Node::Text(t) => t.len_chars(),
        }
    }

    pub fn content_size(&self) -> usize {
        match self {
            Node::Element(el) => content_size(&el.children),
            Node::Text(t) => t.len_chars(),
        }
    }

    pub fn text_content(&self) -> String {
        match self {
            Node::Element(el) => text_content(&el.children),
            Node::Text(t) => t.text.clone(),
        }
    }

    /// Same kind and attributes; content is not compared.
    pub fn same_markup(&self, other: &Node) -> bool {
        self.kind() == other.kind() && self.attrs() == other.attrs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    pub kind: ElementKind,
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub text: String,
}

impl TextNode {
    pub fn len_chars(&self) -> usize {
        self.text.chars().count()
    }
}

pub(crate) fn content_size(children: &[Node]) -> usize {
    children.iter().map(Node::node_size).sum()
}

fn text_content(children: &[Node]) -> String {
    let mut out = String::new();
    for child in children {
        match child {
            Node::Text(t) => out.push_str(&t.text),
            Node::Element(el) => out.push_str(&text_content(&el.children)),
        }
    }
    out
}

pub(crate) fn normalize_children(children: Vec<Node>) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::with_capacity(children.len());
    for child in children {
        match child {
            Node::Text(t) if t.text.is_empty() => {}
            Node::Text(t) => match out.last_mut() {
                Some(Node::Text(prev)) => prev.text.push_str(&t.text),
                _ => out.push(Node::Text(t)),
            },
            other => out.push(other),
        }
    }
    out
}

pub(crate) fn char_slice(s: &str, from: usize, to: usize) -> String {
    s.chars().skip(from).take(to.saturating_sub(from)).collect()
}

/// Copies the part of `children` between two content offsets. Only text leaves
/// may be cut partially; elements are kept whole or dropped.
fn cut_children(children: &[Node], from: usize, to: usize) -> Vec<Node> {
    let mut out = Vec::new();
    let mut pos = 0;
    for child in children {
        let end = pos + child.node_size();
        if end > from && pos < to {
            match child {
                Node::Text(t) => {
                    let start = from.max(pos) - pos;
                    let stop = to.min(end) - pos;
                    out.push(Node::text(char_slice(&t.text, start, stop)));
                }
                Node::Element(_) => out.push(child.clone()),
            }
        }
        pos = end;
        if pos >= to {
            break;
        }
    }
    out
}

fn find_index(children: &[Node], offset: usize) -> (usize, usize) {
    let mut pos = 0;
    for (ix, child) in children.iter().enumerate() {
        if offset == pos {
            return (ix, pos);
        }
        let end = pos + child.node_size();
        if end > offset {
            return (ix, pos);
        }
        pos = end;
    }
    (children.len(), pos)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("position {pos} is outside of the document (size {size})")]
    OutOfRange { pos: usize, size: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "default_doc_kind")]
    pub kind: ElementKind,
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub children: Vec<Node>,
}

fn default_doc_kind() -> ElementKind {
    DOC_KIND.to_string()
}

impl Default for Document {
    fn default() -> Self {
        Self {
            kind: default_doc_kind(),
            attrs: Attrs::default(),
            children: Vec::new(),
        }
    }
}

impl Document {
    pub fn new(children: Vec<Node>) -> Self {
        Self {
            children: normalize_children(children),
            ..Self::default()
        }
    }

    pub fn from_node(node: &Node) -> Self {
        match node {
            Node::Element(el) => Self {
                kind: el.kind.clone(),
                attrs: el.attrs.clone(),
                children: el.children.clone(),
            },
            Node::Text(_) => Self::new(vec![node.clone()]),
        }
    }

    pub fn content_size(&self) -> usize {
        content_size(&self.children)
    }

    pub fn text_content(&self) -> String {
        text_content(&self.children)
    }

    pub fn resolve(&self, pos: usize) -> Result<ResolvedPos<'_>, PositionError> {
        let size = self.content_size();
        if pos > size {
            return Err(PositionError::OutOfRange { pos, size });
        }

        let mut frames = Vec::new();
        let mut kind = self.kind.as_str();
        let mut attrs = &self.attrs;
        let mut children = self.children.as_slice();
        let mut start = 0;
        let mut parent_offset = pos;

        loop {
            let (index, offset) = find_index(children, parent_offset);
            let rem = parent_offset - offset;
            frames.push(Frame {
                kind,
                attrs,
                children,
                index,
                offset,
                start,
            });
            if rem == 0 {
                break;
            }
            match &children[index] {
                Node::Text(_) => break,
                Node::Element(el) => {
                    parent_offset = rem - 1;
                    start += offset + 1;
                    kind = &el.kind;
                    attrs = &el.attrs;
                    children = &el.children;
                }
            }
        }

        Ok(ResolvedPos {
            pos,
            frames,
            parent_offset,
        })
    }

    pub fn node_at(&self, pos: usize) -> Option<&Node> {
        let rp = self.resolve(pos).ok()?;
        if rp.text_offset() != 0 {
            return None;
        }
        rp.node_after()
    }

    /// Calls `f` with every node overlapping `from..to` and its absolute
    /// position. Returning `false` skips the node's descendants.
    pub fn nodes_between(&self, from: usize, to: usize, f: &mut dyn FnMut(&Node, usize) -> bool) {
        nodes_between_in(&self.children, from, to, 0, f);
    }

    pub fn descendants(&self, f: &mut dyn FnMut(&Node, usize) -> bool) {
        self.nodes_between(0, self.content_size(), f);
    }

    pub fn text_between(
        &self,
        from: usize,
        to: usize,
        block_separator: &str,
        registry: &PluginRegistry,
    ) -> String {
        let mut out = String::new();
        let mut separated = true;
        self.nodes_between(from, to, &mut |node, pos| match node {
            Node::Text(t) => {
                let start = from.max(pos) - pos;
                let end = to.min(pos + t.len_chars()) - pos;
                out.push_str(&char_slice(&t.text, start, end));
                separated = false;
                false
            }
            Node::Element(el) => {
                let is_block = registry
                    .node_spec(&el.kind)
                    .is_some_and(|spec| spec.role == crate::plugin::NodeRole::Block);
                if is_block && !separated {
                    out.push_str(block_separator);
                    separated = true;
                }
                true
            }
        });
        out
    }

    pub fn slice_content(&self, from: usize, to: usize) -> Result<Vec<Node>, StepError> {
        let (rf, rt) = self.resolve_flat_range(from, to)?;
        Ok(normalize_children(cut_children(
            rf.parent_children(),
            rf.parent_offset(),
            rt.parent_offset(),
        )))
    }

    fn resolve_flat_range(
        &self,
        from: usize,
        to: usize,
    ) -> Result<(ResolvedPos<'_>, ResolvedPos<'_>), StepError> {
        if from > to {
            return Err(StepError::InvalidRange { from, to });
        }
        let rf = self.resolve(from)?;
        let rt = self.resolve(to)?;
        let depth = rf.depth();
        if rt.depth() != depth || rf.start(depth) != rt.start(depth) {
            return Err(StepError::CrossesBoundary { from, to });
        }
        Ok((rf, rt))
    }

    pub(crate) fn replace(
        &self,
        from: usize,
        to: usize,
        content: &[Node],
        registry: &PluginRegistry,
    ) -> Result<Document, StepError> {
        let (rf, rt) = self.resolve_flat_range(from, to)?;
        let parent_kind = rf.parent_kind().to_string();
        let children = rf.parent_children();

        let mut next = cut_children(children, 0, rf.parent_offset());
        next.extend(content.iter().cloned());
        next.extend(cut_children(
            children,
            rt.parent_offset(),
            content_size(children),
        ));
        let next = normalize_children(next);

        if !registry.valid_content(&parent_kind, &next) {
            return Err(StepError::InvalidContent { kind: parent_kind });
        }

        let path: Vec<usize> = (0..rf.depth()).map(|depth| rf.index_at(depth)).collect();
        let mut doc = self.clone();
        let slot = doc
            .children_at_path_mut(&path)
            .ok_or(StepError::NoNodeAt { pos: from })?;
        *slot = next;
        Ok(doc)
    }

    pub(crate) fn set_node_kind(
        &self,
        pos: usize,
        kind: &str,
        attrs: &Attrs,
        registry: &PluginRegistry,
    ) -> Result<Document, StepError> {
        let rp = self.resolve(pos)?;
        if rp.text_offset() != 0 {
            return Err(StepError::NoNodeAt { pos });
        }
        let Some(Node::Element(el)) = rp.node_after() else {
            return Err(StepError::NoNodeAt { pos });
        };
        if !registry.valid_content(kind, &el.children) {
            return Err(StepError::InvalidContent {
                kind: kind.to_string(),
            });
        }
        if !registry.allows_child(rp.parent_kind(), kind) {
            return Err(StepError::InvalidContent {
                kind: rp.parent_kind().to_string(),
            });
        }

        let path: Vec<usize> = (0..=rp.depth()).map(|depth| rp.index_at(depth)).collect();
        let mut doc = self.clone();
        let (last, parent_path) = path.split_last().ok_or(StepError::NoNodeAt { pos })?;
        let slot = doc
            .children_at_path_mut(parent_path)
            .and_then(|children| children.get_mut(*last))
            .ok_or(StepError::NoNodeAt { pos })?;
        if let Node::Element(el) = slot {
            el.kind = kind.to_string();
            el.attrs = attrs.clone();
        }
        Ok(doc)
    }

    fn children_at_path_mut(&mut self, path: &[usize]) -> Option<&mut Vec<Node>> {
        let mut children = &mut self.children;
        for &ix in path {
            children = match children.get_mut(ix)? {
                Node::Element(el) => &mut el.children,
                Node::Text(_) => return None,
            };
        }
        Some(children)
    }
}

fn nodes_between_in(
    children: &[Node],
    from: usize,
    to: usize,
    node_start: usize,
    f: &mut dyn FnMut(&Node, usize) -> bool,
) {
    let mut pos = 0;
    for child in children {
        if pos >= to {
            break;
        }
        let end = pos + child.node_size();
        if end > from && f(child, node_start + pos) && !child.children().is_empty() {
            let start = pos + 1;
            nodes_between_in(
                child.children(),
                from.saturating_sub(start),
                child.content_size().min(to - start),
                node_start + start,
                f,
            );
        }
        pos = end;
    }
}

#[derive(Debug, Clone)]
struct Frame<'a> {
    kind: &'a str,
    attrs: &'a Attrs,
    children: &'a [Node],
    index: usize,
    offset: usize,
    start: usize,
}

#[derive(Debug, Clone)]
pub struct ResolvedPos<'a> {
    pub pos: usize,
    frames: Vec<Frame<'a>>,
    parent_offset: usize,
}

impl<'a> ResolvedPos<'a> {
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    fn frame(&self, depth: usize) -> &Frame<'a> {
        &self.frames[depth.min(self.depth())]
    }

    fn last(&self) -> &Frame<'a> {
        self.frame(self.depth())
    }

    pub fn parent_kind(&self) -> &'a str {
        self.last().kind
    }

    pub fn parent_children(&self) -> &'a [Node] {
        self.last().children
    }

    pub fn kind_at(&self, depth: usize) -> &'a str {
        self.frame(depth).kind
    }

    pub fn attrs_at(&self, depth: usize) -> &'a Attrs {
        self.frame(depth).attrs
    }

    pub fn children_at(&self, depth: usize) -> &'a [Node] {
        self.frame(depth).children
    }

    pub fn parent_offset(&self) -> usize {
        self.parent_offset
    }

    pub fn index(&self) -> usize {
        self.last().index
    }

    pub fn index_at(&self, depth: usize) -> usize {
        self.frame(depth).index
    }

    pub fn index_after(&self, depth: usize) -> usize {
        let frame = self.frame(depth);
        if depth >= self.depth() && self.text_offset() == 0 {
            frame.index
        } else {
            frame.index + 1
        }
    }

    pub fn text_offset(&self) -> usize {
        self.parent_offset - self.last().offset
    }

    pub fn start(&self, depth: usize) -> usize {
        self.frame(depth).start
    }

    pub fn end(&self, depth: usize) -> usize {
        let frame = self.frame(depth);
        frame.start + content_size(frame.children)
    }

    pub fn before(&self, depth: usize) -> Option<usize> {
        (depth > 0).then(|| self.start(depth) - 1)
    }

    pub fn after(&self, depth: usize) -> Option<usize> {
        (depth > 0).then(|| self.end(depth) + 1)
    }

    pub fn node_after(&self) -> Option<&'a Node> {
        let frame = self.last();
        frame.children.get(frame.index)
    }

    pub fn node_before(&self) -> Option<&'a Node> {
        let frame = self.last();
        if self.text_offset() > 0 {
            return frame.children.get(frame.index);
        }
        frame
            .index
            .checked_sub(1)
            .and_then(|ix| frame.children.get(ix))
    }

    pub fn pos_at_index(&self, index: usize, depth: usize) -> usize {
        let frame = self.frame(depth);
        let index = index.min(frame.children.len());
        frame.start + content_size(&frame.children[..index])
    }

    pub fn text_before(&self, max_chars: usize) -> String {
        let mut flat: Vec<char> = Vec::new();
        let mut pos = 0;
        for child in self.parent_children() {
            if pos >= self.parent_offset {
                break;
            }
            match child {
                Node::Text(t) => {
                    let take = self.parent_offset - pos;
                    flat.extend(t.text.chars().take(take));
                }
                Node::Element(_) => flat.push(LEAF_CHAR),
            }
            pos += child.node_size();
        }
        let skip = flat.len().saturating_sub(max_chars);
        flat.into_iter().skip(skip).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Left,
    Right,
}

impl Bias {
    pub fn flip(self) -> Self {
        match self {
            Bias::Left => Bias::Right,
            Bias::Right => Bias::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Selection {
    Text { anchor: usize, head: usize },
    Node { from: usize, to: usize },
}

impl Selection {
    pub fn cursor(pos: usize) -> Self {
        Selection::Text {
            anchor: pos,
            head: pos,
        }
    }

    pub fn text(anchor: usize, head: usize) -> Self {
        Selection::Text { anchor, head }
    }

    pub fn node(doc: &Document, pos: usize) -> Option<Self> {
        let node = doc.node_at(pos)?;
        if node.is_text() {
            return None;
        }
        Some(Selection::Node {
            from: pos,
            to: pos + node.node_size(),
        })
    }

    pub fn anchor(&self) -> usize {
        match *self {
            Selection::Text { anchor, .. } => anchor,
            Selection::Node { from, .. } => from,
        }
    }

    pub fn head(&self) -> usize {
        match *self {
            Selection::Text { head, .. } => head,
            Selection::Node { to, .. } => to,
        }
    }

    pub fn from(&self) -> usize {
        self.anchor().min(self.head())
    }

    pub fn to(&self) -> usize {
        self.anchor().max(self.head())
    }

    pub fn is_empty(&self) -> bool {
        self.from() == self.to()
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Selection::Node { .. })
    }

    /// A cursor at `pos`, or at the closest position in `bias` direction
    /// (then the other one) where text can be typed.
    pub fn near(doc: &Document, registry: &PluginRegistry, pos: usize, bias: Bias) -> Self {
        let pos = pos.min(doc.content_size());
        Self::find_toward(doc, registry, pos, bias)
            .or_else(|| Self::find_toward(doc, registry, pos, bias.flip()))
            .unwrap_or(Selection::cursor(pos))
    }

    pub fn find_toward(
        doc: &Document,
        registry: &PluginRegistry,
        pos: usize,
        bias: Bias,
    ) -> Option<Self> {
        let size = doc.content_size();
        let pos = pos.min(size);
        let is_text_pos = |p: usize| -> bool {
            let Ok(rp) = doc.resolve(p) else {
                return false;
            };
            let kind = rp.parent_kind();
            registry.accepts_text(kind) && (rp.depth() == 0 || !registry.is_atom(kind))
        };
        let found = match bias {
            Bias::Right => (pos..=size).find(|&p| is_text_pos(p)),
            Bias::Left => (0..=pos).rev().find(|&p| is_text_pos(p)),
        };
        found.map(Selection::cursor)
    }

    pub fn at_start(doc: &Document, registry: &PluginRegistry) -> Self {
        Self::near(doc, registry, 0, Bias::Right)
    }

    pub(crate) fn map(&self, doc: &Document, mapping: &Mapping) -> Self {
        let size = doc.content_size();
        match *self {
            Selection::Text { anchor, head } => Selection::Text {
                anchor: mapping.map(anchor, 1).min(size),
                head: mapping.map(head, 1).min(size),
            },
            Selection::Node { from, to } => {
                let start = mapping.map_result(from, 1);
                let end = mapping.map(to, -1);
                if !start.deleted {
                    if let Some(sel @ Selection::Node { to: new_to, .. }) =
                        Selection::node(doc, start.pos)
                    {
                        if new_to == end {
                            return sel;
                        }
                    }
                }
                Selection::cursor(start.pos.min(size))
            }
        }
    }
}
