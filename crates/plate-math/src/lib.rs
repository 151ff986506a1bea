mod boundary;
mod commands;
mod error;
mod input_rules;
mod plugin;
mod propagate;
mod render;
mod schema;
mod select;
mod serializer;
mod view;

pub use crate::boundary::*;
pub use crate::commands::*;
pub use crate::error::*;
pub use crate::input_rules::*;
pub use crate::plugin::*;
pub use crate::propagate::*;
pub use crate::render::*;
pub use crate::schema::*;
pub use crate::select::*;
pub use crate::serializer::*;
pub use crate::view::*;
