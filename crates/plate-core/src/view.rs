use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::{Node, Selection};
use crate::ops::{Mappable, Mapping, Step, Transaction};
use crate::plugin::{Command, CommandError, Dispatch};
use crate::state::EditorState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomId(u64);

impl DomId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        DomId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Shared record of which view currently holds focus. Nested views share
/// their parent's scope, so focusing one blurs the other.
pub type FocusScope = Rc<Cell<Option<DomId>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEvent {
    pub kind: String,
    pub target: Option<DomId>,
}

impl ViewEvent {
    pub fn new(kind: impl Into<String>, target: Option<DomId>) -> Self {
        Self {
            kind: kind.into(),
            target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoration {
    pub from: usize,
    pub to: usize,
    pub class: String,
}

impl Decoration {
    pub fn inline(from: usize, to: usize, class: impl Into<String>) -> Self {
        Self {
            from,
            to,
            class: class.into(),
        }
    }

    pub fn map(&self, mapping: &dyn Mappable) -> Option<Decoration> {
        let from = mapping.map(self.from, 1);
        let to = mapping.map(self.to, -1);
        (from < to).then(|| Decoration {
            from,
            to,
            class: self.class.clone(),
        })
    }
}

pub type GetPos = Rc<dyn Fn() -> usize>;

pub trait NodeView {
    fn dom(&self) -> DomId;
    /// Returns `false` when the view can't show `node`; it is then recreated.
    fn update(&self, node: &Node) -> anyhow::Result<bool>;
    fn select_node(&self) -> anyhow::Result<()> {
        Ok(())
    }
    fn deselect_node(&self) -> anyhow::Result<()> {
        Ok(())
    }
    fn stop_event(&self, _event: &ViewEvent) -> bool {
        false
    }
    fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }
    fn contains_dom(&self, id: DomId) -> bool {
        id == self.dom()
    }
}

pub trait NodeViewFactory {
    fn create(
        &self,
        node: &Node,
        view: &Rc<EditorView>,
        get_pos: GetPos,
    ) -> anyhow::Result<Rc<dyn NodeView>>;
}

pub type DispatchHook = Box<dyn Fn(&EditorView, Transaction) -> anyhow::Result<()>>;

#[derive(Default)]
pub struct ViewOptions {
    pub dispatch: Option<DispatchHook>,
    pub read_only: bool,
    pub focus_scope: Option<FocusScope>,
}

impl ViewOptions {
    pub fn dispatch(
        mut self,
        hook: impl Fn(&EditorView, Transaction) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.dispatch = Some(Box::new(hook));
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn focus_scope(mut self, scope: FocusScope) -> Self {
        self.focus_scope = Some(scope);
        self
    }
}

struct MountedView {
    kind: String,
    node: RefCell<Node>,
    pos: Rc<Cell<usize>>,
    view: Rc<dyn NodeView>,
    selected: Cell<bool>,
}

impl MountedView {
    fn size(&self) -> usize {
        self.node.borrow().node_size()
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    steps: Vec<Step>,
    selection: Selection,
}

pub struct EditorView {
    this: Weak<EditorView>,
    id: DomId,
    state: RefCell<EditorState>,
    dispatch_hook: Option<DispatchHook>,
    node_views: RefCell<Vec<Rc<MountedView>>>,
    syncing: Cell<bool>,
    resync: RefCell<Option<Option<Mapping>>>,
    undo_stack: RefCell<Vec<HistoryEntry>>,
    redo_stack: RefCell<Vec<HistoryEntry>>,
    editable: Cell<bool>,
    focus: FocusScope,
    destroyed: Cell<bool>,
}

impl fmt::Debug for EditorView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorView")
            .field("id", &self.id)
            .field("state", &self.state.borrow())
            .field("editable", &self.editable.get())
            .finish_non_exhaustive()
    }
}

impl EditorView {
    pub fn new(state: EditorState, options: ViewOptions) -> anyhow::Result<Rc<Self>> {
        let ViewOptions {
            dispatch,
            read_only,
            focus_scope,
        } = options;
        let view = Rc::new_cyclic(|this| EditorView {
            this: this.clone(),
            id: DomId::next(),
            state: RefCell::new(state.clone()),
            dispatch_hook: dispatch,
            node_views: RefCell::new(Vec::new()),
            syncing: Cell::new(false),
            resync: RefCell::new(None),
            undo_stack: RefCell::new(Vec::new()),
            redo_stack: RefCell::new(Vec::new()),
            editable: Cell::new(!read_only),
            focus: focus_scope.unwrap_or_default(),
            destroyed: Cell::new(false),
        });
        for plugin in state.registry().plugins() {
            plugin.init(&state);
        }
        view.sync_node_views(None)?;
        Ok(view)
    }

    pub fn id(&self) -> DomId {
        self.id
    }

    pub fn state(&self) -> EditorState {
        self.state.borrow().clone()
    }

    pub fn editable(&self) -> bool {
        self.editable.get()
    }

    pub fn set_editable(&self, editable: bool) {
        self.editable.set(editable);
    }

    pub fn focus_scope(&self) -> FocusScope {
        self.focus.clone()
    }

    pub fn focus(&self) {
        self.focus.set(Some(self.id));
    }

    pub fn blur(&self) {
        if self.has_focus() {
            self.focus.set(None);
        }
    }

    pub fn has_focus(&self) -> bool {
        self.focus.get() == Some(self.id)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn dispatch(&self, tr: Transaction) -> anyhow::Result<()> {
        if self.destroyed.get() {
            tracing::debug!(view = ?self.id, "dropping transaction for destroyed view");
            return Ok(());
        }
        match &self.dispatch_hook {
            Some(hook) => hook(self, tr),
            None => self.commit(tr),
        }
    }

    fn commit(&self, tr: Transaction) -> anyhow::Result<()> {
        let old = self.state();
        let entry = (tr.doc_changed() && tr.meta().add_to_history).then(|| HistoryEntry {
            steps: tr.inverse_steps().iter().rev().cloned().collect(),
            selection: old.selection(),
        });
        let mapping = tr.mapping().clone();
        let (next, _) = old.apply_transaction(tr)?;
        if let Some(entry) = entry {
            self.undo_stack.borrow_mut().push(entry);
            self.redo_stack.borrow_mut().clear();
        }
        self.update_state_mapped(next, Some(mapping))
    }

    pub fn update_state(&self, state: EditorState) -> anyhow::Result<()> {
        self.update_state_mapped(state, None)
    }

    fn update_state_mapped(&self, state: EditorState, mapping: Option<Mapping>) -> anyhow::Result<()> {
        *self.state.borrow_mut() = state;
        self.sync_node_views(mapping)
    }

    fn sync_node_views(&self, mapping: Option<Mapping>) -> anyhow::Result<()> {
        if self.destroyed.get() {
            return Ok(());
        }
        if self.syncing.get() {
            // Re-entrant update from a node view callout: positions are
            // stale, so run another pass afterwards without a mapping.
            *self.resync.borrow_mut() = Some(None);
            return Ok(());
        }
        self.syncing.set(true);
        let mut result = self.sync_pass(mapping);
        while result.is_ok() {
            let Some(next) = self.resync.borrow_mut().take() else {
                break;
            };
            result = self.sync_pass(next);
        }
        self.syncing.set(false);
        result
    }

    fn sync_pass(&self, mapping: Option<Mapping>) -> anyhow::Result<()> {
        let Some(this) = self.this.upgrade() else {
            return Ok(());
        };
        let state = self.state();
        let registry = state.registry().clone();

        let mut wanted: Vec<(usize, Node)> = Vec::new();
        state.doc().descendants(&mut |node, pos| {
            if registry.node_view_factory(node.kind()).is_some() {
                wanted.push((pos, node.clone()));
                false
            } else {
                true
            }
        });

        let old: Vec<Rc<MountedView>> = self.node_views.borrow().clone();
        let mut claimed = vec![false; old.len()];
        let mut plan: Vec<(usize, Node, Option<Rc<MountedView>>)> = Vec::new();
        for (pos, node) in wanted {
            let found = old.iter().enumerate().find(|(ix, mounted)| {
                if claimed[*ix] || mounted.kind != node.kind() {
                    return false;
                }
                let start = mounted.pos.get();
                match &mapping {
                    Some(mapping) => {
                        let mapped = mapping.map_result(start, 1);
                        let end = mapping.map(start + mounted.size(), -1);
                        !mapped.deleted && mapped.pos == pos && end == pos + node.node_size()
                    }
                    None => start == pos,
                }
            });
            let reused = found.map(|(ix, mounted)| {
                claimed[ix] = true;
                mounted.clone()
            });
            plan.push((pos, node, reused));
        }

        for (ix, mounted) in old.iter().enumerate() {
            if !claimed[ix] {
                tracing::trace!(kind = %mounted.kind, "destroying node view");
                mounted.view.destroy()?;
            }
        }

        let mut next: Vec<Rc<MountedView>> = Vec::with_capacity(plan.len());
        for (pos, node, reused) in plan {
            if let Some(mounted) = reused {
                mounted.pos.set(pos);
                let changed = *mounted.node.borrow() != node;
                if !changed {
                    next.push(mounted);
                    continue;
                }
                *mounted.node.borrow_mut() = node.clone();
                if mounted.view.update(&node)? {
                    next.push(mounted);
                    continue;
                }
                tracing::trace!(kind = %mounted.kind, "node view refused update, recreating");
                mounted.view.destroy()?;
            }
            let Some(factory) = registry.node_view_factory(node.kind()) else {
                continue;
            };
            let pos_cell = Rc::new(Cell::new(pos));
            let get_pos: GetPos = {
                let pos_cell = pos_cell.clone();
                Rc::new(move || pos_cell.get())
            };
            let view = factory.create(&node, &this, get_pos)?;
            next.push(Rc::new(MountedView {
                kind: node.kind().to_string(),
                node: RefCell::new(node),
                pos: pos_cell,
                view,
                selected: Cell::new(false),
            }));
        }
        *self.node_views.borrow_mut() = next.clone();

        let selected_pos = match self.state.borrow().selection() {
            Selection::Node { from, .. } => Some(from),
            Selection::Text { .. } => None,
        };
        for mounted in next.iter().filter(|m| m.selected.get()) {
            if selected_pos != Some(mounted.pos.get()) {
                mounted.selected.set(false);
                mounted.view.deselect_node()?;
            }
        }
        for mounted in next.iter().filter(|m| !m.selected.get()) {
            if selected_pos == Some(mounted.pos.get()) {
                mounted.selected.set(true);
                mounted.view.select_node()?;
            }
        }
        Ok(())
    }

    pub fn run(&self, command: &Command) -> anyhow::Result<bool> {
        let state = self.state();
        let dispatch: &Dispatch<'_> = &|tr: Transaction| self.dispatch(tr);
        command(&state, Some(dispatch))
    }

    pub fn can_run(&self, command: &Command) -> anyhow::Result<bool> {
        command(&self.state(), None)
    }

    pub fn run_command(&self, id: &str) -> anyhow::Result<bool> {
        let Some(spec) = self.state().registry().command(id) else {
            return Err(CommandError::new(format!("Unknown command: {id}")).into());
        };
        self.run(&spec.handler)
    }

    pub fn handle_key(&self, key: &str) -> anyhow::Result<bool> {
        if !self.editable() {
            return Ok(false);
        }
        let registry = self.state().registry().clone();
        for binding in registry.bindings_for(key) {
            if self.run(&binding.command)? {
                tracing::trace!(key, "key handled");
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn handle_text_input(&self, text: &str) -> anyhow::Result<bool> {
        if !self.editable() {
            return Ok(false);
        }
        let state = self.state();
        let selection = state.selection();
        let (from, to) = (selection.from(), selection.to());
        for plugin in state.registry().plugins() {
            if let Some(tr) = plugin.handle_text_input(&state, from, to, text) {
                tracing::trace!(plugin = plugin.id(), "text input intercepted");
                self.dispatch(tr)?;
                return Ok(true);
            }
        }
        let mut tr = state.tr();
        tr.insert_text(text, from, to)?;
        self.dispatch(tr)?;
        Ok(true)
    }

    pub fn type_text(&self, text: &str) -> anyhow::Result<()> {
        for ch in text.chars() {
            self.handle_text_input(ch.encode_utf8(&mut [0; 4]))?;
        }
        Ok(())
    }

    pub fn decorations(&self) -> Vec<Decoration> {
        let state = self.state();
        state
            .registry()
            .plugins()
            .iter()
            .flat_map(|plugin| plugin.decorations(&state))
            .collect()
    }

    pub fn contains(&self, id: DomId) -> bool {
        id == self.id
            || self
                .node_views
                .borrow()
                .iter()
                .any(|mounted| mounted.view.contains_dom(id))
    }

    pub fn send_event(&self, event: &ViewEvent) -> bool {
        let Some(target) = event.target else {
            return false;
        };
        let owner = self
            .node_views
            .borrow()
            .iter()
            .find(|mounted| mounted.view.contains_dom(target))
            .map(|mounted| mounted.view.clone());
        owner.is_some_and(|view| view.stop_event(event))
    }

    pub fn node_view_at(&self, pos: usize) -> Option<Rc<dyn NodeView>> {
        self.node_views
            .borrow()
            .iter()
            .find(|mounted| mounted.pos.get() == pos)
            .map(|mounted| mounted.view.clone())
    }

    pub fn node_view_count(&self) -> usize {
        self.node_views.borrow().len()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.borrow().len()
    }

    pub fn undo(&self) -> anyhow::Result<bool> {
        self.replay(&self.undo_stack, &self.redo_stack)
    }

    pub fn redo(&self) -> anyhow::Result<bool> {
        self.replay(&self.redo_stack, &self.undo_stack)
    }

    fn replay(
        &self,
        from: &RefCell<Vec<HistoryEntry>>,
        to: &RefCell<Vec<HistoryEntry>>,
    ) -> anyhow::Result<bool> {
        let Some(entry) = from.borrow_mut().pop() else {
            return Ok(false);
        };
        let state = self.state();
        let mut tr = state.tr();
        for step in entry.steps {
            tr.step(step)?;
        }
        tr.set_selection(entry.selection);
        tr.set_add_to_history(false);
        to.borrow_mut().push(HistoryEntry {
            steps: tr.inverse_steps().iter().rev().cloned().collect(),
            selection: state.selection(),
        });
        self.dispatch(tr)?;
        Ok(true)
    }

    pub fn destroy(&self) -> anyhow::Result<()> {
        if self.destroyed.replace(true) {
            return Ok(());
        }
        let mounted = std::mem::take(&mut *self.node_views.borrow_mut());
        for mounted in mounted {
            mounted.view.destroy()?;
        }
        self.blur();
        Ok(())
    }
}
