mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::{FakeRenderer, Harness, init_tracing, para, try_build};
use plate_core::{Attrs, Node, NodeView, Selection, ViewEvent, ViewOptions};
use plate_math::{
    CLASS_EDITING, CLASS_EMPTY, CLASS_PARSE_ERROR, CLASS_SELECTED, CursorSide, MathError,
    MathPluginOptions, RenderError, math_display, math_inline,
};
use serde_json::json;

// 0 <p> 1 a 2 <math_inline> 3 x 4 </math_inline> 5 b 6 </p> 7
fn inline_doc(source: &str) -> Vec<Node> {
    vec![para(vec![
        Node::text("a"),
        math_inline(source),
        Node::text("b"),
    ])]
}

/// Opens the editor of the inline node at 2, entering from the right.
fn open_from_right(h: &Harness) {
    let size = h.math_at(2).node().node_size();
    h.select(Selection::cursor(2 + size));
    assert!(h.view.handle_key("ArrowLeft").unwrap());
}

#[test]
fn collapsed_node_renders_its_source() {
    init_tracing();
    let h = Harness::new(inline_doc("x^2"));
    let math = h.math_at(2);
    let dom = math.dom_snapshot();
    assert_eq!(dom.tag, "math-inline");
    assert_eq!(dom.rendered.as_deref(), Some("<math>x^2</math>"));
    assert!(!math.is_editing());

    let options = h.renderer.last_options.borrow().clone().unwrap();
    assert!(!options.display_mode);
}

#[test]
fn empty_source_skips_the_renderer() {
    let h = Harness::new(vec![para(vec![math_inline("")]), math_display("   ")]);
    assert_eq!(h.renderer.calls.get(), 0);
    for pos in [1, 4] {
        let dom = h.math_at(pos).dom_snapshot();
        assert!(dom.has_class(CLASS_EMPTY));
        assert_eq!(dom.rendered, None);
    }
}

#[test]
fn parse_errors_are_shown_on_the_node() {
    let h = Harness::new(inline_doc("\\bad"));
    let dom = h.math_at(2).dom_snapshot();
    assert!(dom.has_class(CLASS_PARSE_ERROR));
    assert!(dom.title.unwrap().contains("unknown command"));
    assert_eq!(dom.rendered, None);
}

#[test]
fn clearing_a_bad_source_drops_the_error() {
    // 0 <p> 1 a 2 <math_inline> 3 \bad 7 </math_inline> 8 b 9 </p> 10
    let h = Harness::new(inline_doc("\\bad"));
    let mut tr = h.view.state().tr();
    tr.delete(3, 7).unwrap();
    h.view.dispatch(tr).unwrap();

    let dom = h.math_at(2).dom_snapshot();
    assert!(dom.has_class(CLASS_EMPTY));
    assert!(!dom.has_class(CLASS_PARSE_ERROR));
    assert_eq!(dom.title, None);
}

#[test]
fn engine_failures_propagate() {
    let err = try_build(
        inline_doc("x"),
        &MathPluginOptions::default(),
        ViewOptions::default(),
        Rc::new(FakeRenderer::broken()),
    )
    .unwrap_err();
    let Some(MathError::Render(RenderError::Engine(message))) = err.downcast_ref::<MathError>()
    else {
        panic!("expected engine error, got {err:?}");
    };
    assert_eq!(message, "engine unavailable");
}

#[test]
fn editing_round_trips_into_the_outer_document() {
    let h = Harness::new(inline_doc("x"));
    open_from_right(&h);
    let math = h.math_at(2);
    assert!(math.is_editing());
    assert!(math.dom_snapshot().has_class(CLASS_EDITING));
    assert!(math.dom_snapshot().has_class(CLASS_SELECTED));

    let inner = h.inner(2);
    assert!(inner.has_focus());
    inner.type_text("+1").unwrap();
    assert_eq!(
        h.children(),
        vec![para(vec![
            Node::text("a"),
            math_inline("x+1"),
            Node::text("b"),
        ])]
    );
    assert_eq!(h.view.state().selection(), Selection::Node { from: 2, to: 7 });

    assert!(inner.handle_key("ArrowRight").unwrap());
    assert_eq!(h.view.state().selection(), Selection::cursor(7));
    assert!(!math.is_editing());
    assert!(inner.is_destroyed());
    assert!(h.view.has_focus());

    let dom = math.dom_snapshot();
    assert!(!dom.has_class(CLASS_SELECTED));
    assert!(!dom.has_class(CLASS_EDITING));
    assert_eq!(dom.rendered.as_deref(), Some("<math>x+1</math>"));
}

#[test]
fn arrow_inside_the_source_does_not_leave() {
    let h = Harness::new(inline_doc("xyz"));
    h.select(Selection::cursor(2));
    assert!(h.view.handle_key("ArrowRight").unwrap());
    let inner = h.inner(2);
    assert_eq!(inner.state().selection(), Selection::cursor(0));

    assert!(inner.handle_key("ArrowRight").unwrap());
    assert_eq!(inner.state().selection(), Selection::cursor(1));
    assert_eq!(h.view.state().selection(), Selection::Node { from: 2, to: 7 });
    assert!(h.math_at(2).is_editing());
}

#[test]
fn leaving_backward_lands_before_the_node() {
    let h = Harness::new(inline_doc("x"));
    h.select(Selection::cursor(2));
    assert!(h.view.handle_key("ArrowRight").unwrap());
    let inner = h.inner(2);
    assert!(inner.handle_key("ArrowLeft").unwrap());
    assert_eq!(h.view.state().selection(), Selection::cursor(2));
    assert!(!h.math_at(2).is_editing());
}

#[test]
fn leaving_forward_at_document_end_appends_a_paragraph() {
    let h = Harness::new(vec![math_display("y")]);
    h.select(Selection::Node { from: 0, to: 3 });
    let inner = h.inner(0);
    assert!(inner.handle_key("Ctrl-Enter").unwrap());
    assert_eq!(h.children(), vec![math_display("y"), Node::paragraph("")]);
    assert_eq!(h.view.state().selection(), Selection::cursor(4));
}

#[test]
fn leaving_backward_at_document_start_prepends_a_paragraph() {
    // 0 <math_display> 1 y 2 </math_display> 3 <p> 4 z 5 </p> 6
    let h = Harness::new(vec![math_display("y"), Node::paragraph("z")]);
    h.select(Selection::Node { from: 0, to: 3 });
    let inner = h.inner(0);
    assert_eq!(inner.state().selection(), Selection::cursor(0));

    assert!(inner.handle_key("ArrowLeft").unwrap());
    assert_eq!(
        h.children(),
        vec![Node::paragraph(""), math_display("y"), Node::paragraph("z")]
    );
    assert_eq!(h.view.state().selection(), Selection::cursor(1));
    assert!(!h.math_at(2).is_editing());
}

#[test]
fn entry_side_follows_the_direction_of_approach() {
    let h = Harness::new(inline_doc("abc"));
    h.select(Selection::cursor(2));
    assert!(h.view.handle_key("ArrowRight").unwrap());
    assert_eq!(h.math_at(2).cursor_side(), CursorSide::Start);
    assert_eq!(h.inner(2).state().selection(), Selection::cursor(0));

    h.select(Selection::cursor(7));
    assert!(!h.math_at(2).is_editing());
    assert!(h.view.handle_key("ArrowLeft").unwrap());
    assert_eq!(h.math_at(2).cursor_side(), CursorSide::End);
    assert_eq!(h.inner(2).state().selection(), Selection::cursor(3));
}

#[test]
fn outer_changes_are_not_echoed_back() {
    let dispatched = Rc::new(Cell::new(0));
    let options = {
        let dispatched = dispatched.clone();
        ViewOptions::default().dispatch(move |view, tr| {
            dispatched.set(dispatched.get() + 1);
            let next = view.state().apply(tr)?;
            view.update_state(next)
        })
    };
    let h = Harness::build(inline_doc("abc"), MathPluginOptions::default(), options);
    open_from_right(&h);
    let inner = h.inner(2);
    assert_eq!(inner.state().selection(), Selection::cursor(3));

    dispatched.set(0);
    let mut tr = h.view.state().tr();
    tr.insert_text("Z", 3, 3).unwrap();
    h.view.dispatch(tr).unwrap();

    assert_eq!(dispatched.get(), 1);
    assert_eq!(inner.state().doc().text_content(), "Zabc");
    assert_eq!(inner.state().selection(), Selection::cursor(4));
    assert_eq!(h.math_at(2).node(), math_inline("Zabc"));
}

#[test]
fn outer_changes_after_the_cursor_keep_it_in_place() {
    let dispatched = Rc::new(Cell::new(0));
    let options = {
        let dispatched = dispatched.clone();
        ViewOptions::default().dispatch(move |view, tr| {
            dispatched.set(dispatched.get() + 1);
            let next = view.state().apply(tr)?;
            view.update_state(next)
        })
    };
    // 0 <p> 1 a 2 <math_inline> 3 a 4 b 5 c 6 </math_inline> 7 b 8 </p> 9
    let h = Harness::build(inline_doc("abc"), MathPluginOptions::default(), options);
    h.select(Selection::cursor(2));
    assert!(h.view.handle_key("ArrowRight").unwrap());
    let inner = h.inner(2);
    assert_eq!(inner.state().selection(), Selection::cursor(0));

    dispatched.set(0);
    let mut tr = h.view.state().tr();
    tr.insert_text("Z", 6, 6).unwrap();
    h.view.dispatch(tr).unwrap();

    assert_eq!(dispatched.get(), 1);
    assert_eq!(inner.state().doc().text_content(), "abcZ");
    assert_eq!(inner.state().selection(), Selection::cursor(0));
}

#[test]
fn changing_attrs_replaces_the_view() {
    let h = Harness::new(inline_doc("x"));
    open_from_right(&h);
    let old = h.math_at(2);
    let inner = h.inner(2);

    let mut attrs = Attrs::new();
    attrs.insert("label".into(), json!("eq-1"));
    let mut tr = h.view.state().tr();
    tr.replace_with(2, 5, vec![math_inline("x").with_attrs(attrs)])
        .unwrap();
    h.view.dispatch(tr).unwrap();

    let current = h.math_at(2);
    assert!(!Rc::ptr_eq(&old, &current));
    assert_eq!(h.math.state().active_count(), 1);
    assert!(!old.is_editing());
    assert!(old.inner_view().is_none());
    assert!(inner.is_destroyed());
}

#[test]
fn undo_in_the_outer_editor_updates_an_open_source_editor() {
    let h = Harness::new(inline_doc("x"));
    open_from_right(&h);
    let inner = h.inner(2);
    inner.type_text("y").unwrap();
    assert_eq!(h.math_at(2).node(), math_inline("xy"));
    assert_eq!(h.view.undo_depth(), 1);

    assert!(h.view.undo().unwrap());
    assert_eq!(h.math_at(2).node(), math_inline("x"));
    assert_eq!(inner.state().doc().text_content(), "x");
    assert!(h.math_at(2).is_editing());
}

#[test]
fn opening_twice_is_rejected() {
    let h = Harness::new(inline_doc("x"));
    open_from_right(&h);
    let err = h.math_at(2).open_editor().unwrap_err();
    assert!(matches!(err, MathError::EditorAlreadyOpen));
}

#[test]
fn read_only_editors_do_not_open_math() {
    let h = Harness::new(inline_doc("x"));
    h.view.set_editable(false);
    h.select(Selection::Node { from: 2, to: 5 });
    let math = h.math_at(2);
    assert!(!math.is_editing());
    assert!(!math.dom_snapshot().has_class(CLASS_SELECTED));
}

#[test]
fn events_inside_the_source_editor_are_stopped() {
    let h = Harness::new(inline_doc("x"));
    let math = h.math_at(2);
    let click = ViewEvent::new("click", Some(math.dom()));
    assert!(!h.view.send_event(&click));

    open_from_right(&h);
    let inner = h.inner(2);
    assert!(h.view.send_event(&ViewEvent::new("keydown", Some(inner.id()))));

    h.view.focus();
    assert!(!h.view.send_event(&click));
    assert!(inner.has_focus());
}

#[test]
fn inner_keymap_edits_the_source() {
    let h = Harness::new(vec![math_display("a")]);
    h.select(Selection::Node { from: 0, to: 3 });
    let inner = h.inner(0);
    assert_eq!(inner.state().selection(), Selection::cursor(0));

    assert!(inner.handle_key("Tab").unwrap());
    assert!(inner.handle_key("Enter").unwrap());
    assert_eq!(h.children(), vec![math_display("\t\na")]);
    assert!(h.math_at(0).is_editing());
}

#[test]
fn enter_leaves_inline_math() {
    let h = Harness::new(inline_doc("abc"));
    h.select(Selection::cursor(2));
    assert!(h.view.handle_key("ArrowRight").unwrap());
    assert!(h.inner(2).handle_key("Enter").unwrap());
    assert_eq!(h.view.state().selection(), Selection::cursor(7));
}

#[test]
fn backspace_in_empty_source_removes_the_node() {
    let h = Harness::new(inline_doc("x"));
    open_from_right(&h);
    let inner = h.inner(2);
    assert!(inner.handle_key("Backspace").unwrap());
    assert_eq!(inner.state().doc().content_size(), 0);
    assert_eq!(h.math_at(2).node(), math_inline(""));

    assert!(inner.handle_key("Backspace").unwrap());
    assert_eq!(h.children(), vec![Node::paragraph("ab")]);
    assert_eq!(h.view.state().selection(), Selection::cursor(2));
    assert!(h.view.has_focus());
    assert_eq!(h.math.state().active_count(), 0);
}

#[test]
fn block_preview_renders_while_editing() {
    let options = MathPluginOptions {
        enable_block_preview: true,
        ..MathPluginOptions::default()
    };
    let h = Harness::build(vec![math_display("a")], options, ViewOptions::default());
    assert_eq!(h.math_at(0).dom_snapshot().preview, None);

    h.select(Selection::Node { from: 0, to: 3 });
    assert_eq!(
        h.math_at(0).dom_snapshot().preview.as_deref(),
        Some("<math>a</math>")
    );
    h.inner(0).type_text("b").unwrap();
    assert_eq!(
        h.math_at(0).dom_snapshot().preview.as_deref(),
        Some("<math>ba</math>")
    );
}

#[test]
fn views_leave_the_active_set_when_destroyed() {
    let h = Harness::new(vec![
        para(vec![math_inline("a"), math_inline("b")]),
        math_display("c"),
    ]);
    assert_eq!(h.math.state().active_count(), 3);
    let order: Vec<usize> = h.math.state().active_views().iter().map(|v| v.pos()).collect();
    assert_eq!(order, vec![1, 4, 8]);

    let mut tr = h.view.state().tr();
    tr.delete(1, 4).unwrap();
    h.view.dispatch(tr).unwrap();
    assert_eq!(h.math.state().active_count(), 2);

    h.view.destroy().unwrap();
    assert_eq!(h.math.state().active_count(), 0);
}

#[test]
fn shared_macros_reach_the_renderer() {
    let h = Harness::new(inline_doc("x"));
    h.math.state().set_macro("\\R", "\\mathbb{R}");
    open_from_right(&h);
    h.inner(2).type_text("\\R").unwrap();
    h.select(Selection::cursor(1));

    let options = h.renderer.last_options.borrow().clone().unwrap();
    assert_eq!(options.macros.get("\\R").map(String::as_str), Some("\\mathbb{R}"));
}
