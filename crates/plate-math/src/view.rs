//! The node view shown for every math node: rendered output while collapsed,
//! a nested source editor while expanded.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use plate_core::{
    Bias, Command, CorePlugin, Dispatch, Document, DomId, EditorState, EditorView, GetPos,
    KeyBinding, KeymapPlugin, Node, NodeView, PlatePlugin, PluginRegistry, Selection, Transaction,
    ViewEvent, ViewOptions,
};
use serde::{Deserialize, Serialize};

use crate::boundary::{Direction, ExitPolicy, collapse_math_cmd};
use crate::error::MathError;
use crate::plugin::{MathPluginState, Registration};
use crate::propagate::{is_from_outside, propagate_outward, reconcile};
use crate::render::{MathRenderer, RenderError};
use crate::schema::{MathKind, MathSchemaPlugin};

pub const CLASS_MATH_NODE: &str = "math-node";
pub const CLASS_EMPTY: &str = "empty-math";
pub const CLASS_PARSE_ERROR: &str = "parse-error";
pub const CLASS_SELECTED: &str = "selected-node";
pub const CLASS_EDITING: &str = "math-editing";

/// Which edge the inner cursor starts at when the node is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorSide {
    Start,
    End,
}

/// What the node view currently displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MathDom {
    pub id: DomId,
    pub tag: &'static str,
    pub classes: BTreeSet<String>,
    /// Error description shown on hover.
    pub title: Option<String>,
    /// Markup of the last successful render.
    pub rendered: Option<String>,
    /// Live render of the source while a block node is edited.
    pub preview: Option<String>,
}

impl MathDom {
    fn new(kind: MathKind) -> Self {
        Self {
            id: DomId::next(),
            tag: kind.tag_name(),
            classes: BTreeSet::from([CLASS_MATH_NODE.to_string()]),
            title: None,
            rendered: None,
            preview: None,
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    fn set_class(&mut self, class: &str, on: bool) {
        if on {
            self.classes.insert(class.to_string());
        } else {
            self.classes.remove(class);
        }
    }
}

pub struct MathView {
    this: Weak<MathView>,
    kind: MathKind,
    node: RefCell<Node>,
    outer: Weak<EditorView>,
    get_pos: GetPos,
    shared: Rc<MathPluginState>,
    renderer: Rc<dyn MathRenderer>,
    dom: RefCell<MathDom>,
    inner: RefCell<Option<Rc<EditorView>>>,
    editing: Cell<bool>,
    cursor_side: Cell<CursorSide>,
    registration: RefCell<Option<Registration>>,
}

impl MathView {
    pub fn new(
        node: &Node,
        outer: &Rc<EditorView>,
        get_pos: GetPos,
        kind: MathKind,
        shared: Rc<MathPluginState>,
        renderer: Rc<dyn MathRenderer>,
    ) -> Result<Rc<Self>, MathError> {
        let view = Rc::new_cyclic(|this| MathView {
            this: this.clone(),
            kind,
            node: RefCell::new(node.clone()),
            outer: Rc::downgrade(outer),
            get_pos,
            shared: shared.clone(),
            renderer,
            dom: RefCell::new(MathDom::new(kind)),
            inner: RefCell::new(None),
            editing: Cell::new(false),
            cursor_side: Cell::new(CursorSide::Start),
            registration: RefCell::new(None),
        });
        *view.registration.borrow_mut() = Some(shared.register(&view));
        view.render_math()?;
        tracing::trace!(?kind, pos = (view.get_pos)(), "created math view");
        Ok(view)
    }

    pub fn kind(&self) -> MathKind {
        self.kind
    }

    pub fn node(&self) -> Node {
        self.node.borrow().clone()
    }

    pub fn pos(&self) -> usize {
        (self.get_pos)()
    }

    pub fn dom_snapshot(&self) -> MathDom {
        self.dom.borrow().clone()
    }

    pub fn is_editing(&self) -> bool {
        self.editing.get()
    }

    pub fn inner_view(&self) -> Option<Rc<EditorView>> {
        self.inner.borrow().clone()
    }

    pub fn cursor_side(&self) -> CursorSide {
        self.cursor_side.get()
    }

    /// Renders the node's source into the render region. Bad source marks the
    /// node instead of failing.
    pub fn render_math(&self) -> Result<(), MathError> {
        let source = self.node.borrow().text_content().trim().to_string();
        if source.is_empty() {
            let mut dom = self.dom.borrow_mut();
            dom.set_class(CLASS_EMPTY, true);
            dom.set_class(CLASS_PARSE_ERROR, false);
            dom.rendered = None;
            dom.title = None;
            return Ok(());
        }

        let result = self
            .renderer
            .render(&source, &self.shared.render_options(self.kind));
        let mut dom = self.dom.borrow_mut();
        dom.set_class(CLASS_EMPTY, false);
        match result {
            Ok(markup) => {
                dom.rendered = Some(markup);
                dom.set_class(CLASS_PARSE_ERROR, false);
                dom.title = None;
            }
            Err(err @ RenderError::Parse { .. }) => {
                tracing::debug!(%err, "math source failed to parse");
                dom.set_class(CLASS_PARSE_ERROR, true);
                dom.title = Some(err.to_string());
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn refresh_preview(&self) -> Result<(), MathError> {
        let wanted = self.editing.get()
            && self.kind == MathKind::Block
            && self.shared.enable_block_preview();
        if !wanted {
            self.dom.borrow_mut().preview = None;
            return Ok(());
        }
        let source = self.node.borrow().text_content().trim().to_string();
        if source.is_empty() {
            self.dom.borrow_mut().preview = None;
            return Ok(());
        }
        match self
            .renderer
            .render(&source, &self.shared.render_options(self.kind))
        {
            Ok(markup) => self.dom.borrow_mut().preview = Some(markup),
            // Keep showing the last good preview while the source is incomplete.
            Err(RenderError::Parse { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Opens the nested source editor. Opening twice is an error.
    pub fn open_editor(&self) -> Result<(), MathError> {
        if self.inner.borrow().is_some() {
            return Err(MathError::EditorAlreadyOpen);
        }
        let outer = self.outer.upgrade().ok_or(MathError::OuterViewGone)?;

        let doc = Document::from_node(&self.node.borrow());
        let size = doc.content_size();
        let pos = self.pos();
        let side = if self.shared.prev_cursor_pos() <= pos {
            CursorSide::Start
        } else {
            CursorSide::End
        };
        self.cursor_side.set(side);
        let cursor = match side {
            CursorSide::Start => 0,
            CursorSide::End => size,
        };

        let registry = Rc::new(self.inner_registry()?);
        let state = EditorState::new(doc, Selection::cursor(cursor), registry);
        let this = self.this.clone();
        let options = ViewOptions::default()
            .focus_scope(outer.focus_scope())
            .dispatch(move |inner, tr| match this.upgrade() {
                Some(view) => view.dispatch_inner(inner, tr),
                None => Ok(()),
            });
        let inner = EditorView::new(state, options)?;

        *self.inner.borrow_mut() = Some(inner.clone());
        self.editing.set(true);
        self.dom.borrow_mut().set_class(CLASS_EDITING, true);
        inner.focus();
        self.refresh_preview()?;
        tracing::trace!(kind = ?self.kind, pos, ?side, "opened math editor");
        Ok(())
    }

    /// Closes the nested editor, rendering the final source when `render`.
    pub fn close_editor(&self, render: bool) -> Result<(), MathError> {
        let inner = self.inner.borrow_mut().take();
        if let Some(inner) = inner {
            inner.destroy()?;
            tracing::trace!(kind = ?self.kind, "closed math editor");
        }
        {
            let mut dom = self.dom.borrow_mut();
            dom.set_class(CLASS_EDITING, false);
            dom.preview = None;
        }
        self.editing.set(false);
        if render {
            self.render_math()?;
        }
        Ok(())
    }

    /// Dispatch hook of the nested editor.
    fn dispatch_inner(&self, inner: &EditorView, tr: Transaction) -> anyhow::Result<()> {
        let from_outside = is_from_outside(&tr);
        let (state, transactions) = inner
            .state()
            .apply_transaction(tr)
            .map_err(MathError::from)?;
        inner.update_state(state)?;
        if from_outside {
            return Ok(());
        }

        let outer = self.outer.upgrade().ok_or(MathError::OuterViewGone)?;
        let outer_tr = propagate_outward(&outer.state(), &transactions, self.pos())?;
        if let Some(outer_tr) = outer_tr {
            outer.dispatch(outer_tr)?;
        }
        Ok(())
    }

    /// Refocuses an open nested editor while the outer editor holds focus.
    pub fn ensure_focus(&self) {
        let Some(inner) = self.inner_view() else {
            return;
        };
        if self.outer.upgrade().is_some_and(|outer| outer.has_focus()) {
            inner.focus();
        }
    }

    fn inner_registry(&self) -> Result<PluginRegistry, MathError> {
        let plugins: Vec<Rc<dyn PlatePlugin>> = vec![
            Rc::new(KeymapPlugin::new("math.inner_keymap", self.inner_keymap())),
            Rc::new(CorePlugin),
            Rc::new(MathSchemaPlugin),
        ];
        PluginRegistry::new(plugins).map_err(MathError::Registry)
    }

    fn inner_keymap(&self) -> Vec<KeyBinding> {
        let outer = self.outer.clone();
        let forward = collapse_math_cmd(outer.clone(), Direction::Forward, ExitPolicy::AT_BORDER);
        let backward = collapse_math_cmd(outer.clone(), Direction::Backward, ExitPolicy::AT_BORDER);
        let exit = collapse_math_cmd(outer.clone(), Direction::Forward, ExitPolicy::ANYWHERE);
        let enter = match self.kind {
            MathKind::Block => insert_text_cmd("\n"),
            MathKind::Inline => exit.clone(),
        };

        vec![
            KeyBinding::from_command("Tab", insert_text_cmd("\t")),
            KeyBinding::from_command("Enter", enter),
            KeyBinding::from_command("Ctrl-Enter", exit),
            KeyBinding::from_command(
                "Backspace",
                delete_node_cmd(outer.clone(), self.get_pos.clone(), true),
            ),
            KeyBinding::from_command(
                "Ctrl-Backspace",
                delete_node_cmd(outer, self.get_pos.clone(), false),
            ),
            KeyBinding::from_command("ArrowLeft", backward.clone()),
            KeyBinding::from_command("ArrowUp", backward),
            KeyBinding::from_command("ArrowRight", forward.clone()),
            KeyBinding::from_command("ArrowDown", forward),
        ]
    }
}

fn insert_text_cmd(text: &'static str) -> Command {
    Rc::new(
        move |state: &EditorState, dispatch: Option<&Dispatch<'_>>| -> anyhow::Result<bool> {
            if let Some(dispatch) = dispatch {
                let selection = state.selection();
                let mut tr = state.tr();
                tr.insert_text(text, selection.from(), selection.to())?;
                dispatch(tr)?;
            }
            Ok(true)
        },
    )
}

/// Removes the whole math node from the outer document and hands focus back.
fn delete_node_cmd(outer: Weak<EditorView>, get_pos: GetPos, only_when_empty: bool) -> Command {
    Rc::new(
        move |inner: &EditorState, dispatch: Option<&Dispatch<'_>>| -> anyhow::Result<bool> {
            if only_when_empty && inner.doc().content_size() > 0 {
                return Ok(false);
            }
            if dispatch.is_none() {
                return Ok(true);
            }
            let outer = outer.upgrade().ok_or(MathError::OuterViewGone)?;
            let state = outer.state();
            let pos = get_pos();
            let Some(node) = state.doc().node_at(pos) else {
                return Ok(false);
            };
            let mut tr = state.tr();
            tr.delete(pos, pos + node.node_size())?;
            let selection = Selection::near(tr.doc(), state.registry(), pos, Bias::Left);
            tr.set_selection(selection);
            outer.dispatch(tr)?;
            outer.focus();
            Ok(true)
        },
    )
}

impl NodeView for MathView {
    fn dom(&self) -> DomId {
        self.dom.borrow().id
    }

    fn update(&self, node: &Node) -> anyhow::Result<bool> {
        if !node.same_markup(&self.node.borrow()) {
            return Ok(false);
        }
        *self.node.borrow_mut() = node.clone();

        if let Some(inner) = self.inner_view() {
            if let Some(tr) = reconcile(&inner.state(), node)? {
                inner.dispatch(tr)?;
            }
        }
        if !self.editing.get() {
            self.render_math()?;
        }
        self.refresh_preview()?;
        Ok(true)
    }

    fn select_node(&self) -> anyhow::Result<()> {
        let editable = self.outer.upgrade().is_some_and(|outer| outer.editable());
        if !editable {
            return Ok(());
        }
        self.dom.borrow_mut().set_class(CLASS_SELECTED, true);
        if !self.editing.get() {
            self.open_editor()?;
        }
        Ok(())
    }

    fn deselect_node(&self) -> anyhow::Result<()> {
        self.dom.borrow_mut().set_class(CLASS_SELECTED, false);
        if self.editing.get() {
            self.close_editor(true)?;
        }
        Ok(())
    }

    fn stop_event(&self, event: &ViewEvent) -> bool {
        let Some(target) = event.target else {
            return false;
        };
        if event.kind == "click" && target == self.dom() {
            self.ensure_focus();
        }
        self.inner_view().is_some_and(|inner| inner.contains(target))
    }

    fn destroy(&self) -> anyhow::Result<()> {
        self.close_editor(false)?;
        if let Some(registration) = self.registration.borrow_mut().take() {
            registration.dispose();
        }
        tracing::trace!(kind = ?self.kind, "destroyed math view");
        Ok(())
    }

    fn contains_dom(&self, id: DomId) -> bool {
        id == self.dom() || self.inner_view().is_some_and(|inner| inner.contains(id))
    }
}
