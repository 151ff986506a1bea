#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use plate_core::{Document, EditorState, EditorView, Node, PluginRegistry, Selection, ViewOptions};
use plate_math::{
    MathPlugin, MathPluginOptions, MathRenderer, MathView, RenderError, RenderOptions,
    default_plugins,
};

/// Renders `<math>source</math>`, fails to parse anything containing `\bad`,
/// and counts its calls.
#[derive(Default)]
pub struct FakeRenderer {
    pub calls: Cell<usize>,
    pub engine_failure: bool,
    pub last_options: RefCell<Option<RenderOptions>>,
}

impl FakeRenderer {
    pub fn broken() -> Self {
        Self {
            engine_failure: true,
            ..Self::default()
        }
    }
}

impl MathRenderer for FakeRenderer {
    fn render(&self, source: &str, options: &RenderOptions) -> Result<String, RenderError> {
        self.calls.set(self.calls.get() + 1);
        *self.last_options.borrow_mut() = Some(options.clone());
        if self.engine_failure {
            return Err(RenderError::Engine("engine unavailable".into()));
        }
        if source.contains("\\bad") {
            return Err(RenderError::Parse {
                message: "unknown command \\bad".into(),
            });
        }
        Ok(format!("<math>{source}</math>"))
    }
}

pub struct Harness {
    pub view: Rc<EditorView>,
    pub math: Rc<MathPlugin>,
    pub renderer: Rc<FakeRenderer>,
}

impl Harness {
    pub fn new(children: Vec<Node>) -> Self {
        Self::build(children, MathPluginOptions::default(), ViewOptions::default())
    }

    pub fn build(children: Vec<Node>, options: MathPluginOptions, view_options: ViewOptions) -> Self {
        let renderer = Rc::new(FakeRenderer::default());
        let (view, math) =
            try_build(children, &options, view_options, renderer.clone()).expect("view builds");
        Self {
            view,
            math,
            renderer,
        }
    }

    pub fn select(&self, selection: Selection) {
        let mut tr = self.view.state().tr();
        tr.set_selection(selection);
        self.view.dispatch(tr).unwrap();
    }

    /// The math view mounted at `pos`.
    pub fn math_at(&self, pos: usize) -> Rc<MathView> {
        self.math
            .state()
            .active_views()
            .into_iter()
            .find(|view| view.pos() == pos)
            .unwrap_or_else(|| panic!("no math view at {pos}"))
    }

    pub fn inner(&self, pos: usize) -> Rc<EditorView> {
        self.math_at(pos).inner_view().expect("math editor is open")
    }

    pub fn children(&self) -> Vec<Node> {
        self.view.state().doc().children.clone()
    }
}

pub fn try_build(
    children: Vec<Node>,
    options: &MathPluginOptions,
    view_options: ViewOptions,
    renderer: Rc<dyn MathRenderer>,
) -> anyhow::Result<(Rc<EditorView>, Rc<MathPlugin>)> {
    let math = Rc::new(MathPlugin::with_renderer(options, renderer));
    let registry = PluginRegistry::new(default_plugins(math.clone(), options))
        .map_err(anyhow::Error::msg)?;
    let state = EditorState::create(Document::new(children), Rc::new(registry));
    let view = EditorView::new(state, view_options)?;
    Ok((view, math))
}

pub fn para(children: Vec<Node>) -> Node {
    Node::element("paragraph", children)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
