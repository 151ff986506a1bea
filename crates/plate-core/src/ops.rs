use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::{Attrs, Document, ElementKind, Node, PositionError, Selection, content_size};
use crate::plugin::PluginRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error(transparent)]
    Position(#[from] PositionError),
    #[error("invalid range {from}..{to}")]
    InvalidRange { from: usize, to: usize },
    #[error("range {from}..{to} crosses node boundaries")]
    CrossesBoundary { from: usize, to: usize },
    #[error("`{kind}` cannot hold the resulting content")]
    InvalidContent { kind: String },
    #[error("no element node at position {pos}")]
    NoNodeAt { pos: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Replace {
        from: usize,
        to: usize,
        #[serde(default)]
        content: Vec<Node>,
    },
    SetNodeKind {
        pos: usize,
        kind: ElementKind,
        #[serde(default)]
        attrs: Attrs,
    },
}

impl Step {
    pub fn replace(from: usize, to: usize, content: Vec<Node>) -> Self {
        Step::Replace { from, to, content }
    }

    pub fn apply(&self, doc: &Document, registry: &PluginRegistry) -> Result<Document, StepError> {
        match self {
            Step::Replace { from, to, content } => doc.replace(*from, *to, content, registry),
            Step::SetNodeKind { pos, kind, attrs } => {
                doc.set_node_kind(*pos, kind, attrs, registry)
            }
        }
    }

    pub fn step_map(&self) -> StepMap {
        match self {
            Step::Replace { from, to, content } => StepMap::new(vec![MapRange {
                start: *from,
                old_size: to - from,
                new_size: content_size(content),
            }]),
            Step::SetNodeKind { .. } => StepMap::identity(),
        }
    }

    /// Rebases the step onto a document that went through `mapping`.
    /// Returns `None` when the step's range was deleted entirely.
    pub fn map(&self, mapping: &dyn Mappable) -> Option<Step> {
        match self {
            Step::Replace { from, to, content } => {
                let from = mapping.map_result(*from, 1);
                let to = mapping.map_result(*to, -1);
                if from.deleted && to.deleted {
                    return None;
                }
                Some(Step::Replace {
                    from: from.pos,
                    to: to.pos.max(from.pos),
                    content: content.clone(),
                })
            }
            Step::SetNodeKind { pos, kind, attrs } => {
                let mapped = mapping.map_result(*pos, 1);
                (!mapped.deleted).then(|| Step::SetNodeKind {
                    pos: mapped.pos,
                    kind: kind.clone(),
                    attrs: attrs.clone(),
                })
            }
        }
    }

    pub fn invert(&self, doc: &Document) -> Result<Step, StepError> {
        match self {
            Step::Replace { from, to, content } => Ok(Step::Replace {
                from: *from,
                to: from + content_size(content),
                content: doc.slice_content(*from, *to)?,
            }),
            Step::SetNodeKind { pos, .. } => match doc.node_at(*pos) {
                Some(Node::Element(el)) => Ok(Step::SetNodeKind {
                    pos: *pos,
                    kind: el.kind.clone(),
                    attrs: el.attrs.clone(),
                }),
                _ => Err(StepError::NoNodeAt { pos: *pos }),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapResult {
    pub pos: usize,
    /// The position sat strictly inside a replaced range.
    pub deleted: bool,
}

pub trait Mappable {
    fn map_result(&self, pos: usize, assoc: i8) -> MapResult;

    fn map(&self, pos: usize, assoc: i8) -> usize {
        self.map_result(pos, assoc).pos
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRange {
    pub start: usize,
    pub old_size: usize,
    pub new_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepMap {
    ranges: Vec<MapRange>,
}

impl StepMap {
    pub fn new(ranges: Vec<MapRange>) -> Self {
        Self { ranges }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    pub fn offset(offset: usize) -> Self {
        Self::new(vec![MapRange {
            start: 0,
            old_size: 0,
            new_size: offset,
        }])
    }

    pub fn ranges(&self) -> &[MapRange] {
        &self.ranges
    }
}

impl Mappable for StepMap {
    fn map_result(&self, pos: usize, assoc: i8) -> MapResult {
        let mut diff: isize = 0;
        for range in &self.ranges {
            if range.start > pos {
                break;
            }
            let end = range.start + range.old_size;
            if pos <= end {
                let side = if range.old_size == 0 {
                    assoc
                } else if pos == range.start {
                    -1
                } else if pos == end {
                    1
                } else {
                    assoc
                };
                let base = (range.start as isize + diff) as usize;
                let mapped = if side < 0 { base } else { base + range.new_size };
                return MapResult {
                    pos: mapped,
                    deleted: pos > range.start && pos < end,
                };
            }
            diff += range.new_size as isize - range.old_size as isize;
        }
        MapResult {
            pos: (pos as isize + diff) as usize,
            deleted: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    maps: Vec<StepMap>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, map: StepMap) {
        self.maps.push(map);
    }

    pub fn maps(&self) -> &[StepMap] {
        &self.maps
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl Mappable for Mapping {
    fn map_result(&self, pos: usize, assoc: i8) -> MapResult {
        let mut pos = pos;
        let mut deleted = false;
        for map in &self.maps {
            let result = map.map_result(pos, assoc);
            pos = result.pos;
            deleted |= result.deleted;
        }
        MapResult { pos, deleted }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default = "default_true")]
    pub add_to_history: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,
}

impl Default for TransactionMeta {
    fn default() -> Self {
        Self {
            source: None,
            add_to_history: true,
            values: BTreeMap::new(),
        }
    }
}

#[derive(Clone)]
pub struct Transaction {
    before: Document,
    doc: Document,
    steps: Vec<Step>,
    inverse: Vec<Step>,
    mapping: Mapping,
    selection: Selection,
    selection_set: bool,
    meta: TransactionMeta,
    registry: Rc<PluginRegistry>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("steps", &self.steps)
            .field("selection", &self.selection)
            .field("selection_set", &self.selection_set)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub fn new(doc: Document, selection: Selection, registry: Rc<PluginRegistry>) -> Self {
        Self {
            before: doc.clone(),
            doc,
            steps: Vec::new(),
            inverse: Vec::new(),
            mapping: Mapping::new(),
            selection,
            selection_set: false,
            meta: TransactionMeta::default(),
            registry,
        }
    }

    pub fn before(&self) -> &Document {
        &self.before
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn inverse_steps(&self) -> &[Step] {
        &self.inverse
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn selection_set(&self) -> bool {
        self.selection_set
    }

    pub fn doc_changed(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn meta(&self) -> &TransactionMeta {
        &self.meta
    }

    pub fn registry(&self) -> &Rc<PluginRegistry> {
        &self.registry
    }

    pub fn step(&mut self, step: Step) -> Result<&mut Self, StepError> {
        let next = step.apply(&self.doc, &self.registry)?;
        let inverse = step.invert(&self.doc)?;
        let map = step.step_map();

        let mut single = Mapping::new();
        single.push(map.clone());
        self.selection = self.selection.map(&next, &single);
        self.doc = next;
        self.mapping.push(map);
        self.steps.push(step);
        self.inverse.push(inverse);
        Ok(self)
    }

    pub fn replace_with(
        &mut self,
        from: usize,
        to: usize,
        content: Vec<Node>,
    ) -> Result<&mut Self, StepError> {
        self.step(Step::Replace { from, to, content })
    }

    pub fn delete(&mut self, from: usize, to: usize) -> Result<&mut Self, StepError> {
        self.replace_with(from, to, Vec::new())
    }

    pub fn insert(&mut self, pos: usize, node: Node) -> Result<&mut Self, StepError> {
        self.replace_with(pos, pos, vec![node])
    }

    pub fn insert_text(
        &mut self,
        text: &str,
        from: usize,
        to: usize,
    ) -> Result<&mut Self, StepError> {
        let content = if text.is_empty() {
            Vec::new()
        } else {
            vec![Node::text(text)]
        };
        self.replace_with(from, to, content)
    }

    pub fn replace_selection_with(&mut self, node: Node) -> Result<&mut Self, StepError> {
        let (from, to) = (self.selection.from(), self.selection.to());
        self.replace_with(from, to, vec![node])
    }

    pub fn delete_selection(&mut self) -> Result<&mut Self, StepError> {
        let (from, to) = (self.selection.from(), self.selection.to());
        self.delete(from, to)
    }

    pub fn set_block_type(
        &mut self,
        from: usize,
        to: usize,
        kind: &str,
        attrs: Attrs,
    ) -> Result<&mut Self, StepError> {
        let mut targets = Vec::new();
        let registry = self.registry.clone();
        self.doc.nodes_between(from, to, &mut |node, pos| {
            if let Node::Element(el) = node {
                if registry.is_textblock(&el.kind) {
                    if el.kind != kind {
                        targets.push(pos);
                    }
                    return false;
                }
            }
            true
        });
        for pos in targets {
            self.step(Step::SetNodeKind {
                pos,
                kind: kind.to_string(),
                attrs: attrs.clone(),
            })?;
        }
        Ok(self)
    }

    pub fn set_selection(&mut self, selection: Selection) -> &mut Self {
        self.selection = selection;
        self.selection_set = true;
        self
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.meta.values.insert(key.into(), value.into());
        self
    }

    pub fn get_meta(&self, key: &str) -> Option<&Value> {
        self.meta.values.get(key)
    }

    pub fn set_source(&mut self, source: impl Into<String>) -> &mut Self {
        self.meta.source = Some(source.into());
        self
    }

    pub fn set_add_to_history(&mut self, add: bool) -> &mut Self {
        self.meta.add_to_history = add;
        self
    }
}
