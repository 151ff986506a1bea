use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::core::{Bias, DOC_KIND, Node, PARAGRAPH_KIND, Selection, TEXT_KIND};
use crate::ops::Transaction;
use crate::state::EditorState;
use crate::view::{Decoration, NodeViewFactory};

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CommandError {
    message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Dispatch<'a> = dyn Fn(Transaction) -> anyhow::Result<()> + 'a;

/// A command checks whether it applies to `state`; when a dispatcher is given
/// it also performs its effect. `Ok(false)` means "not handled".
pub type Command = Rc<dyn Fn(&EditorState, Option<&Dispatch<'_>>) -> anyhow::Result<bool>>;

#[derive(Clone)]
pub struct CommandSpec {
    pub id: String,
    pub label: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub hidden: bool,
    pub handler: Command,
}

impl CommandSpec {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        handler: impl Fn(&EditorState, Option<&Dispatch<'_>>) -> anyhow::Result<bool> + 'static,
    ) -> Self {
        Self::from_command(id, label, Rc::new(handler))
    }

    pub fn from_command(id: impl Into<String>, label: impl Into<String>, handler: Command) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            keywords: Vec::new(),
            hidden: false,
            handler,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }
}

#[derive(Clone)]
pub struct KeyBinding {
    pub key: String,
    pub command: Command,
}

impl KeyBinding {
    pub fn new(
        key: impl Into<String>,
        handler: impl Fn(&EditorState, Option<&Dispatch<'_>>) -> anyhow::Result<bool> + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            command: Rc::new(handler),
        }
    }

    pub fn from_command(key: impl Into<String>, command: Command) -> Self {
        Self {
            key: key.into(),
            command,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Block,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildConstraint {
    None,
    BlockOnly,
    InlineOnly,
    TextOnly,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub kind: String,
    pub role: NodeRole,
    pub is_atom: bool,
    pub is_code: bool,
    pub children: ChildConstraint,
}

impl NodeSpec {
    pub fn block(kind: impl Into<String>, children: ChildConstraint) -> Self {
        Self {
            kind: kind.into(),
            role: NodeRole::Block,
            is_atom: false,
            is_code: false,
            children,
        }
    }

    pub fn inline(kind: impl Into<String>, children: ChildConstraint) -> Self {
        Self {
            role: NodeRole::Inline,
            ..Self::block(kind, children)
        }
    }

    pub fn atom(mut self) -> Self {
        self.is_atom = true;
        self
    }

    pub fn code(mut self) -> Self {
        self.is_code = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSpec {
    pub name: String,
}

impl MarkSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

pub trait PlatePlugin {
    fn id(&self) -> &'static str;
    fn node_specs(&self) -> Vec<NodeSpec> {
        Vec::new()
    }
    fn mark_specs(&self) -> Vec<MarkSpec> {
        Vec::new()
    }
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }
    fn keymap(&self) -> Vec<KeyBinding> {
        Vec::new()
    }
    fn node_views(&self) -> Vec<(String, Rc<dyn NodeViewFactory>)> {
        Vec::new()
    }
    fn init(&self, _state: &EditorState) {}
    fn apply(&self, _tr: &Transaction, _old: &EditorState, _new: &EditorState) {}
    fn handle_text_input(
        &self,
        _state: &EditorState,
        _from: usize,
        _to: usize,
        _text: &str,
    ) -> Option<Transaction> {
        None
    }
    fn decorations(&self, _state: &EditorState) -> Vec<Decoration> {
        Vec::new()
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Rc<dyn PlatePlugin>>,
    node_specs: HashMap<String, NodeSpec>,
    mark_specs: HashMap<String, MarkSpec>,
    commands: HashMap<String, CommandSpec>,
    node_views: HashMap<String, Rc<dyn NodeViewFactory>>,
}

impl PluginRegistry {
    pub fn new(plugins: impl IntoIterator<Item = Rc<dyn PlatePlugin>>) -> Result<Self, String> {
        let mut registry = Self::default();
        for plugin in plugins {
            registry.register_plugin(plugin)?;
        }
        Ok(registry)
    }

    pub fn core() -> Self {
        let plugins: Vec<Rc<dyn PlatePlugin>> = vec![Rc::new(CorePlugin)];
        Self::new(plugins).expect("core registry must be valid")
    }

    pub fn register_plugin(&mut self, plugin: Rc<dyn PlatePlugin>) -> Result<(), String> {
        if self.plugins.iter().any(|p| p.id() == plugin.id()) {
            return Err(format!("Duplicate plugin id: {}", plugin.id()));
        }

        for spec in plugin.node_specs() {
            if self.node_specs.contains_key(&spec.kind) {
                return Err(format!("Duplicate node spec kind: {}", spec.kind));
            }
            self.node_specs.insert(spec.kind.clone(), spec);
        }

        for spec in plugin.mark_specs() {
            if self.mark_specs.contains_key(&spec.name) {
                return Err(format!("Duplicate mark spec: {}", spec.name));
            }
            self.mark_specs.insert(spec.name.clone(), spec);
        }

        for cmd in plugin.commands() {
            if self.commands.contains_key(&cmd.id) {
                return Err(format!("Duplicate command id: {}", cmd.id));
            }
            self.commands.insert(cmd.id.clone(), cmd);
        }

        for (kind, factory) in plugin.node_views() {
            if self.node_views.contains_key(&kind) {
                return Err(format!("Duplicate node view for kind: {kind}"));
            }
            self.node_views.insert(kind, factory);
        }

        self.plugins.push(plugin);
        Ok(())
    }

    pub fn plugins(&self) -> &[Rc<dyn PlatePlugin>] {
        &self.plugins
    }

    pub fn node_specs(&self) -> &HashMap<String, NodeSpec> {
        &self.node_specs
    }

    pub fn node_spec(&self, kind: &str) -> Option<&NodeSpec> {
        self.node_specs.get(kind)
    }

    pub fn mark_spec(&self, name: &str) -> Option<&MarkSpec> {
        self.mark_specs.get(name)
    }

    pub fn commands(&self) -> &HashMap<String, CommandSpec> {
        &self.commands
    }

    pub fn command(&self, id: &str) -> Option<CommandSpec> {
        self.commands.get(id).cloned()
    }

    pub fn node_view_factory(&self, kind: &str) -> Option<Rc<dyn NodeViewFactory>> {
        self.node_views.get(kind).cloned()
    }

    pub fn bindings_for(&self, key: &str) -> Vec<KeyBinding> {
        self.plugins
            .iter()
            .flat_map(|plugin| plugin.keymap())
            .filter(|binding| binding.key == key)
            .collect()
    }

    pub fn is_known_kind(&self, kind: &str) -> bool {
        self.node_specs.contains_key(kind)
    }

    pub fn is_atom(&self, kind: &str) -> bool {
        self.node_spec(kind).is_some_and(|spec| spec.is_atom)
    }

    pub fn is_code(&self, kind: &str) -> bool {
        self.node_spec(kind).is_some_and(|spec| spec.is_code)
    }

    pub fn accepts_text(&self, kind: &str) -> bool {
        self.node_spec(kind).is_some_and(|spec| {
            matches!(
                spec.children,
                ChildConstraint::InlineOnly | ChildConstraint::TextOnly | ChildConstraint::Any
            )
        })
    }

    pub fn is_textblock(&self, kind: &str) -> bool {
        self.node_spec(kind).is_some_and(|spec| {
            spec.role == NodeRole::Block
                && matches!(
                    spec.children,
                    ChildConstraint::InlineOnly | ChildConstraint::TextOnly
                )
        })
    }

    pub fn allows_child(&self, parent: &str, child: &str) -> bool {
        let Some(parent_spec) = self.node_spec(parent) else {
            return false;
        };
        if child == TEXT_KIND {
            return self.accepts_text(parent);
        }
        let Some(child_spec) = self.node_spec(child) else {
            return false;
        };
        match parent_spec.children {
            ChildConstraint::None | ChildConstraint::TextOnly => false,
            ChildConstraint::BlockOnly => child_spec.role == NodeRole::Block,
            ChildConstraint::InlineOnly => child_spec.role == NodeRole::Inline,
            ChildConstraint::Any => true,
        }
    }

    pub fn valid_content(&self, parent: &str, children: &[Node]) -> bool {
        children
            .iter()
            .all(|child| self.allows_child(parent, child.kind()))
    }

    pub fn can_replace_with(
        &self,
        parent: &str,
        children: &[Node],
        from_index: usize,
        to_index: usize,
        kind: &str,
    ) -> bool {
        if from_index > to_index || to_index > children.len() {
            return false;
        }
        self.allows_child(parent, kind)
            && self.valid_content(parent, &children[..from_index])
            && self.valid_content(parent, &children[to_index..])
    }
}

pub struct KeymapPlugin {
    id: &'static str,
    bindings: Vec<KeyBinding>,
}

impl KeymapPlugin {
    pub fn new(id: &'static str, bindings: Vec<KeyBinding>) -> Self {
        Self { id, bindings }
    }
}

impl PlatePlugin for KeymapPlugin {
    fn id(&self) -> &'static str {
        self.id
    }

    fn keymap(&self) -> Vec<KeyBinding> {
        self.bindings.clone()
    }
}

pub struct CorePlugin;

impl PlatePlugin for CorePlugin {
    fn id(&self) -> &'static str {
        "core"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![
            NodeSpec::block(DOC_KIND, ChildConstraint::BlockOnly),
            NodeSpec::block(PARAGRAPH_KIND, ChildConstraint::InlineOnly),
        ]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("core.delete_backward", "Delete backward", delete_backward)
                .keywords(["backspace", "delete"]),
            CommandSpec::new("core.move_left", "Move left", |state, dispatch| {
                move_horizontal(state, dispatch, Bias::Left)
            })
            .hidden(true),
            CommandSpec::new("core.move_right", "Move right", |state, dispatch| {
                move_horizontal(state, dispatch, Bias::Right)
            })
            .hidden(true),
        ]
    }

    fn keymap(&self) -> Vec<KeyBinding> {
        vec![
            KeyBinding::new("Backspace", delete_backward),
            KeyBinding::new("ArrowLeft", |state, dispatch| {
                move_horizontal(state, dispatch, Bias::Left)
            }),
            KeyBinding::new("ArrowRight", |state, dispatch| {
                move_horizontal(state, dispatch, Bias::Right)
            }),
        ]
    }
}

fn delete_backward(state: &EditorState, dispatch: Option<&Dispatch<'_>>) -> anyhow::Result<bool> {
    let selection = state.selection();
    let mut tr = state.tr();

    if !selection.is_empty() {
        if tr.delete_selection().is_err() {
            return Ok(false);
        }
        let near = Selection::near(tr.doc(), state.registry(), selection.from(), Bias::Left);
        tr.set_selection(near);
    } else {
        let head = selection.head();
        let rp = state.doc().resolve(head)?;
        let Some(before) = rp.node_before() else {
            return Ok(false);
        };
        let len = if before.is_text() {
            1
        } else {
            before.node_size()
        };
        if tr.delete(head - len, head).is_err() {
            return Ok(false);
        }
    }

    if let Some(dispatch) = dispatch {
        dispatch(tr)?;
    }
    Ok(true)
}

fn move_horizontal(
    state: &EditorState,
    dispatch: Option<&Dispatch<'_>>,
    bias: Bias,
) -> anyhow::Result<bool> {
    let doc = state.doc();
    let registry = state.registry();
    let selection = state.selection();
    let size = doc.content_size();

    let next = match (selection, bias) {
        (Selection::Node { to, .. }, Bias::Right) => Selection::near(doc, registry, to, bias),
        (Selection::Node { from, .. }, Bias::Left) => Selection::near(doc, registry, from, bias),
        (sel, Bias::Right) if !sel.is_empty() => Selection::cursor(sel.to()),
        (sel, Bias::Left) if !sel.is_empty() => Selection::cursor(sel.from()),
        (sel, Bias::Right) => {
            let pos = sel.head();
            let rp = doc.resolve(pos)?;
            match rp.node_after() {
                Some(node) if node.is_text() => Selection::cursor(pos + 1),
                Some(node) if registry.is_atom(node.kind()) => {
                    Selection::node(doc, pos).unwrap_or(Selection::cursor(pos))
                }
                Some(_) => Selection::near(doc, registry, pos + 1, bias),
                None if pos >= size => return Ok(false),
                None => {
                    let outside = pos + 1;
                    match doc.node_at(outside) {
                        Some(node) if registry.is_atom(node.kind()) => {
                            Selection::node(doc, outside).unwrap_or(Selection::cursor(outside))
                        }
                        _ => Selection::near(doc, registry, outside, bias),
                    }
                }
            }
        }
        (sel, Bias::Left) => {
            let pos = sel.head();
            let rp = doc.resolve(pos)?;
            match rp.node_before() {
                Some(node) if node.is_text() => Selection::cursor(pos - 1),
                Some(node) if registry.is_atom(node.kind()) => {
                    let start = pos - node.node_size();
                    Selection::node(doc, start).unwrap_or(Selection::cursor(pos))
                }
                Some(_) => Selection::near(doc, registry, pos - 1, bias),
                None if pos == 0 => return Ok(false),
                None => {
                    let outside = pos - 1;
                    let before = doc.resolve(outside)?.node_before();
                    match before {
                        Some(node) if registry.is_atom(node.kind()) => {
                            let start = outside - node.node_size();
                            Selection::node(doc, start).unwrap_or(Selection::cursor(outside))
                        }
                        _ => Selection::near(doc, registry, outside, bias),
                    }
                }
            }
        }
    };

    if next == selection {
        return Ok(false);
    }
    if let Some(dispatch) = dispatch {
        let mut tr = state.tr();
        tr.set_selection(next);
        dispatch(tr)?;
    }
    Ok(true)
}
