mod common;

use std::rc::Rc;

use common::{Harness, para};
use plate_core::{
    CorePlugin, Decoration, Document, EditorState, Node, PlateValue, PlatePlugin, PluginRegistry,
    Selection,
};
use plate_math::{
    MATH_SELECT_CLASS, MathError, MathInputRules, MathPluginOptions, MathSchemaPlugin,
    MathSerializer, math_display, math_inline,
};

#[test]
fn typing_a_closing_dollar_creates_inline_math() {
    let h = Harness::new(vec![Node::paragraph("")]);
    h.select(Selection::cursor(1));
    h.view.type_text("see $x+1$").unwrap();

    assert_eq!(
        h.children(),
        vec![para(vec![Node::text("see "), math_inline("x+1")])]
    );
    assert_eq!(h.view.state().selection(), Selection::cursor(10));
    assert_eq!(h.math.state().active_count(), 1);
}

#[test]
fn double_dollar_and_space_starts_display_math() {
    let h = Harness::new(vec![Node::paragraph("")]);
    h.select(Selection::cursor(1));
    h.view.type_text("$$ ").unwrap();

    assert_eq!(h.children(), vec![math_display("")]);
    assert_eq!(h.view.state().selection(), Selection::Node { from: 0, to: 2 });
    assert!(h.math_at(0).is_editing());
}

#[test]
fn double_dollar_after_text_stays_text() {
    let h = Harness::new(vec![Node::paragraph("")]);
    h.select(Selection::cursor(1));
    h.view.type_text("a$$ ").unwrap();
    assert_eq!(h.children(), vec![Node::paragraph("a$$ ")]);
}

#[test]
fn input_rules_skip_code_blocks() {
    let h = Harness::new(vec![math_display("a")]);
    h.select(Selection::cursor(2));
    h.view.type_text("$y$").unwrap();
    assert_eq!(h.children(), vec![math_display("a$y$")]);
}

#[test]
fn input_rules_do_nothing_inside_math_sources() {
    let plugins: Vec<Rc<dyn PlatePlugin>> = vec![Rc::new(CorePlugin), Rc::new(MathSchemaPlugin)];
    let registry = Rc::new(PluginRegistry::new(plugins).unwrap());
    let doc = Document::from_node(&math_inline("$x+1"));
    let state = EditorState::new(doc, Selection::cursor(4), registry);

    let rules = MathInputRules::new(&MathPluginOptions::default());
    assert!(rules.handle_text_input(&state, 4, 4, "$").is_none());
}

#[test]
fn custom_delimiters_drive_the_rules() {
    let options = MathPluginOptions {
        inline_delimiter: '%',
        ..MathPluginOptions::default()
    };
    let rules = MathInputRules::new(&options);
    assert!(rules.rules()[0].pattern.is_match("%a%"));
    assert!(!rules.rules()[0].pattern.is_match("$a$"));
}

#[test]
fn insert_command_selects_the_new_node() {
    let h = Harness::new(vec![Node::paragraph("ab")]);
    h.select(Selection::cursor(2));
    assert!(h.view.run_command("math.insert_inline").unwrap());

    assert_eq!(
        h.children(),
        vec![para(vec![Node::text("a"), math_inline(""), Node::text("b")])]
    );
    assert_eq!(h.view.state().selection(), Selection::Node { from: 2, to: 4 });
    assert!(h.math_at(2).is_editing());
}

#[test]
fn display_math_cannot_be_inserted_inside_a_paragraph() {
    let h = Harness::new(vec![Node::paragraph("ab")]);
    h.select(Selection::cursor(2));
    assert!(!h.view.run_command("math.insert_display").unwrap());
    assert_eq!(h.children(), vec![Node::paragraph("ab")]);
}

#[test]
fn ctrl_space_inserts_inline_math() {
    let h = Harness::new(vec![Node::paragraph("")]);
    h.select(Selection::cursor(1));
    assert!(h.view.handle_key("Ctrl-Space").unwrap());
    assert_eq!(h.children(), vec![para(vec![math_inline("")])]);
}

#[test]
fn backspace_after_inline_math_deletes_it() {
    // 0 <p> 1 a 2 <math_inline> 3 x 4 </math_inline> 5 </p> 6
    let h = Harness::new(vec![para(vec![Node::text("a"), math_inline("x")])]);
    h.select(Selection::cursor(5));
    assert!(h.view.handle_key("Backspace").unwrap());
    assert_eq!(h.children(), vec![Node::paragraph("a")]);
    assert_eq!(h.view.state().selection(), Selection::cursor(2));
}

#[test]
fn backspace_at_block_start_deletes_display_math_above() {
    // 0 <math_display> 1 y 2 </math_display> 3 <p> 4 z 5 </p> 6
    let h = Harness::new(vec![math_display("y"), Node::paragraph("z")]);
    h.select(Selection::cursor(4));
    assert!(h.view.handle_key("Backspace").unwrap());
    assert_eq!(h.children(), vec![Node::paragraph("z")]);
    assert_eq!(h.view.state().selection(), Selection::cursor(1));
    assert_eq!(h.math.state().active_count(), 0);
}

#[test]
fn text_selections_highlight_covered_math() {
    let h = Harness::new(vec![para(vec![
        Node::text("a"),
        math_inline("x"),
        Node::text("b"),
    ])]);
    h.select(Selection::text(1, 6));
    assert_eq!(
        h.view.decorations(),
        vec![Decoration::inline(2, 5, MATH_SELECT_CLASS)]
    );

    let mut tr = h.view.state().tr();
    tr.insert_text("zz", 1, 1).unwrap();
    h.view.dispatch(tr).unwrap();
    assert_eq!(
        h.view.decorations(),
        vec![Decoration::inline(4, 7, MATH_SELECT_CLASS)]
    );

    h.select(Selection::cursor(1));
    assert!(h.view.decorations().is_empty());
}

#[test]
fn documents_serialize_with_delimited_math() {
    let h = Harness::new(vec![
        para(vec![Node::text("a"), math_inline("x"), Node::text("b")]),
        math_display("y=1"),
        Node::paragraph("c"),
    ]);
    let state = h.view.state();
    let serializer = MathSerializer::default();
    assert_eq!(
        serializer.serialize_document(state.doc(), state.registry()),
        "a$x$b\n\n$$\ny=1\n$$\n\nc"
    );
    assert_eq!(
        serializer.serialize_range(state.doc(), state.registry(), 1, 3),
        "a$x$"
    );

    h.select(Selection::text(2, 6));
    assert_eq!(serializer.serialize_selection(&h.view.state()), "$x$b");
}

#[test]
fn options_load_from_json() {
    let options = MathPluginOptions::from_json_str(
        r#"{"enable_block_preview": true, "macros": {"\\R": "\\mathbb{R}"}}"#,
    )
    .unwrap();
    assert!(options.enable_block_preview);
    assert_eq!(options.inline_delimiter, '$');
    assert_eq!(
        options.macros.get("\\R").map(String::as_str),
        Some("\\mathbb{R}")
    );

    let err = MathPluginOptions::from_json_str("{\"macros\": 3}").unwrap_err();
    assert!(matches!(err, MathError::Options(_)));
}

#[test]
fn documents_with_math_round_trip_through_json() {
    let h = Harness::new(vec![
        para(vec![Node::text("a"), math_inline("x^2")]),
        math_display("\\int f"),
    ]);
    let state = h.view.state();
    let value = PlateValue::from_document(state.doc().clone());
    let parsed = PlateValue::from_json_str(&value.to_json_pretty().unwrap()).unwrap();
    assert_eq!(parsed, value);
    assert!(parsed.validate(state.registry()).is_ok());
}
