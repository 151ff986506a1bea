//! TeX source to MathML via pulldown-latex.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use pulldown_latex::{
    Parser, Storage, config::DisplayMode, config::RenderConfig, mathml::push_mathml,
};
use regex::{Captures, Regex};
use thiserror::Error;

/// Macro name (with or without the leading backslash) to its expansion.
pub type Macros = BTreeMap<String, String>;

const MAX_MACRO_DEPTH: usize = 16;

static CONTROL_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\([A-Za-z]+)").expect("control word pattern must be valid"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The source is not valid TeX.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Anything else going wrong inside the engine.
    #[error("render engine error: {0}")]
    Engine(String),
}

impl RenderError {
    pub fn is_parse(&self) -> bool {
        matches!(self, RenderError::Parse { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub display_mode: bool,
    pub macros: Macros,
    /// Embed the TeX source as a MathML annotation.
    pub annotate: bool,
}

pub trait MathRenderer {
    fn render(&self, source: &str, options: &RenderOptions) -> Result<String, RenderError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LatexRenderer;

impl MathRenderer for LatexRenderer {
    fn render(&self, source: &str, options: &RenderOptions) -> Result<String, RenderError> {
        let expanded = expand_macros(source, &options.macros)?;
        let storage = Storage::new();
        let parser = Parser::new(&expanded, &storage);
        let config = RenderConfig {
            display_mode: if options.display_mode {
                DisplayMode::Block
            } else {
                DisplayMode::Inline
            },
            annotation: options.annotate.then_some(source),
            ..Default::default()
        };

        let events: Vec<_> = parser.collect();
        let errors: Vec<String> = events
            .iter()
            .filter_map(|e| e.as_ref().err().map(|err| err.to_string()))
            .collect();
        if !errors.is_empty() {
            return Err(RenderError::Parse {
                message: errors.join("; "),
            });
        }

        let mut mathml = String::new();
        push_mathml(&mut mathml, events.into_iter(), config)
            .map_err(|e| RenderError::Engine(e.to_string()))?;
        Ok(mathml)
    }
}

fn lookup<'a>(macros: &'a Macros, name: &str) -> Option<&'a str> {
    macros
        .get(name)
        .or_else(|| macros.get(&format!("\\{name}")))
        .map(String::as_str)
}

/// Replaces argument-less macros until no known control word is left.
pub fn expand_macros(source: &str, macros: &Macros) -> Result<String, RenderError> {
    if macros.is_empty() {
        return Ok(source.to_string());
    }
    let mut current = source.to_string();
    for _ in 0..MAX_MACRO_DEPTH {
        let mut changed = false;
        let next = CONTROL_WORD.replace_all(&current, |caps: &Captures<'_>| {
            match lookup(macros, &caps[1]) {
                Some(expansion) => {
                    changed = true;
                    expansion.to_string()
                }
                None => caps[0].to_string(),
            }
        });
        if !changed {
            return Ok(current);
        }
        current = next.into_owned();
    }
    Err(RenderError::Parse {
        message: format!("macro expansion deeper than {MAX_MACRO_DEPTH} levels"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn macros(pairs: &[(&str, &str)]) -> Macros {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn expands_known_macros_only() {
        let table = macros(&[("\\RR", "\\mathbb{R}")]);
        assert_eq!(
            expand_macros(r"x \in \RR, \alpha", &table).unwrap(),
            r"x \in \mathbb{R}, \alpha"
        );
    }

    #[test]
    fn expands_nested_macros() {
        let table = macros(&[("half", r"\frac{1}{\two}"), ("two", "2")]);
        assert_eq!(expand_macros(r"\half", &table).unwrap(), r"\frac{1}{2}");
    }

    #[test]
    fn self_referencing_macro_is_a_parse_error() {
        let table = macros(&[("loop", r"\loop x")]);
        let err = expand_macros(r"\loop", &table).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn renders_inline_and_display_math() {
        let inline = LatexRenderer
            .render("x^2", &RenderOptions::default())
            .unwrap();
        assert!(inline.contains("<math"));

        let options = RenderOptions {
            display_mode: true,
            ..Default::default()
        };
        let display = LatexRenderer.render(r"\frac{a}{b}", &options).unwrap();
        assert!(display.contains("<mfrac"));
    }

    #[test]
    fn unclosed_brace_is_a_parse_error() {
        let err = LatexRenderer
            .render(r"\frac{a", &RenderOptions::default())
            .unwrap_err();
        assert!(err.is_parse());
    }
}
