//! The math plugin: node view factories, shared view registry and the outer
//! key bindings.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use plate_core::{
    CommandSpec, CorePlugin, EditorState, EditorView, GetPos, KeyBinding, Node, NodeView,
    NodeViewFactory, PlatePlugin, Transaction,
};
use serde::{Deserialize, Serialize};

use crate::commands::{insert_math_cmd, math_backspace_cmd};
use crate::error::MathError;
use crate::input_rules::MathInputRules;
use crate::render::{LatexRenderer, Macros, MathRenderer, RenderOptions};
use crate::schema::{MathKind, MathSchemaPlugin};
use crate::select::MathSelectPlugin;
use crate::view::MathView;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MathPluginOptions {
    /// Live-render display math below its source while it is edited.
    pub enable_block_preview: bool,
    /// Macro definitions shared by every math node of one editor.
    pub macros: Macros,
    /// Delimiter of the inline input rule, `$x$`.
    pub inline_delimiter: char,
    /// Delimiter of the display input rule, doubled: `$$`.
    pub block_delimiter: char,
}

impl Default for MathPluginOptions {
    fn default() -> Self {
        Self {
            enable_block_preview: false,
            macros: Macros::new(),
            inline_delimiter: '$',
            block_delimiter: '$',
        }
    }
}

impl MathPluginOptions {
    pub fn from_json_str(json: &str) -> Result<Self, MathError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// State shared by all math node views of one outer editor.
pub struct MathPluginState {
    macros: RefCell<Macros>,
    active: RefCell<Vec<(u64, Weak<MathView>)>>,
    next_id: Cell<u64>,
    prev_cursor_pos: Cell<usize>,
    enable_block_preview: Cell<bool>,
}

impl MathPluginState {
    pub fn new(options: &MathPluginOptions) -> Rc<Self> {
        Rc::new(Self {
            macros: RefCell::new(options.macros.clone()),
            active: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            prev_cursor_pos: Cell::new(0),
            enable_block_preview: Cell::new(options.enable_block_preview),
        })
    }

    pub fn macros(&self) -> Macros {
        self.macros.borrow().clone()
    }

    /// Defines a macro for renders from now on. Views already rendered keep
    /// their output until they render again.
    pub fn set_macro(&self, name: impl Into<String>, expansion: impl Into<String>) {
        self.macros.borrow_mut().insert(name.into(), expansion.into());
    }

    /// Outer selection start before the latest transaction.
    pub fn prev_cursor_pos(&self) -> usize {
        self.prev_cursor_pos.get()
    }

    pub fn set_prev_cursor_pos(&self, pos: usize) {
        self.prev_cursor_pos.set(pos);
    }

    pub fn enable_block_preview(&self) -> bool {
        self.enable_block_preview.get()
    }

    pub fn set_enable_block_preview(&self, enabled: bool) {
        self.enable_block_preview.set(enabled);
    }

    pub fn render_options(&self, kind: MathKind) -> RenderOptions {
        RenderOptions {
            display_mode: kind.display_mode(),
            macros: self.macros(),
            annotate: true,
        }
    }

    /// Adds `view` to the active set until the returned handle is dropped.
    pub fn register(self: &Rc<Self>, view: &Rc<MathView>) -> Registration {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.active.borrow_mut().push((id, Rc::downgrade(view)));
        Registration {
            id,
            state: Rc::downgrade(self),
        }
    }

    /// Live views in registration order. Callers iterate the snapshot, so
    /// views may register or leave while it is walked.
    pub fn active_views(&self) -> Vec<Rc<MathView>> {
        self.active
            .borrow()
            .iter()
            .filter_map(|(_, view)| view.upgrade())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active_views().len()
    }

    fn deregister(&self, id: u64) {
        self.active.borrow_mut().retain(|(entry, _)| *entry != id);
    }
}

/// Membership of one view in [`MathPluginState`]'s active set.
#[must_use]
pub struct Registration {
    id: u64,
    state: Weak<MathPluginState>,
}

impl Registration {
    pub fn dispose(self) {}
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.deregister(self.id);
        }
    }
}

pub struct MathPlugin {
    state: Rc<MathPluginState>,
    renderer: Rc<dyn MathRenderer>,
}

impl fmt::Debug for MathPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MathPlugin").finish_non_exhaustive()
    }
}

impl MathPlugin {
    pub fn new(options: &MathPluginOptions) -> Self {
        Self::with_renderer(options, Rc::new(LatexRenderer))
    }

    pub fn with_renderer(options: &MathPluginOptions, renderer: Rc<dyn MathRenderer>) -> Self {
        Self {
            state: MathPluginState::new(options),
            renderer,
        }
    }

    pub fn state(&self) -> &Rc<MathPluginState> {
        &self.state
    }
}

impl PlatePlugin for MathPlugin {
    fn id(&self) -> &'static str {
        "math"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::from_command(
                "math.insert_inline",
                "Insert inline math",
                insert_math_cmd(MathKind::Inline, ""),
            )
            .keywords(["math", "latex", "formula"]),
            CommandSpec::from_command(
                "math.insert_display",
                "Insert display math",
                insert_math_cmd(MathKind::Block, ""),
            )
            .keywords(["math", "latex", "equation"]),
            CommandSpec::from_command("math.backspace", "Delete math before cursor", math_backspace_cmd())
                .hidden(true),
        ]
    }

    fn keymap(&self) -> Vec<KeyBinding> {
        vec![
            KeyBinding::from_command("Ctrl-Space", insert_math_cmd(MathKind::Inline, "")),
            KeyBinding::from_command("Backspace", math_backspace_cmd()),
        ]
    }

    fn node_views(&self) -> Vec<(String, Rc<dyn NodeViewFactory>)> {
        [MathKind::Inline, MathKind::Block]
            .into_iter()
            .map(|kind| {
                let factory: Rc<dyn NodeViewFactory> = Rc::new(MathViewFactory {
                    kind,
                    state: Rc::downgrade(&self.state),
                    renderer: self.renderer.clone(),
                });
                (kind.node_kind().to_string(), factory)
            })
            .collect()
    }

    fn apply(&self, _tr: &Transaction, old: &EditorState, _new: &EditorState) {
        self.state.set_prev_cursor_pos(old.selection().from());
    }
}

struct MathViewFactory {
    kind: MathKind,
    state: Weak<MathPluginState>,
    renderer: Rc<dyn MathRenderer>,
}

impl NodeViewFactory for MathViewFactory {
    fn create(
        &self,
        node: &Node,
        view: &Rc<EditorView>,
        get_pos: GetPos,
    ) -> anyhow::Result<Rc<dyn NodeView>> {
        let state = self.state.upgrade().ok_or(MathError::PluginStateMissing)?;
        let math = MathView::new(node, view, get_pos, self.kind, state, self.renderer.clone())?;
        Ok(math)
    }
}

/// The full plugin set for an outer editor with math support. Math plugins
/// come before the core plugin so their bindings are tried first.
pub fn default_plugins(
    math: Rc<MathPlugin>,
    options: &MathPluginOptions,
) -> Vec<Rc<dyn PlatePlugin>> {
    vec![
        math,
        Rc::new(MathInputRules::new(options)),
        Rc::new(MathSelectPlugin::default()),
        Rc::new(MathSchemaPlugin),
        Rc::new(CorePlugin),
    ]
}
