mod core;
mod ops;
mod plugin;
mod serde_value;
mod state;
mod view;

pub use crate::core::*;
pub use crate::ops::*;
pub use crate::plugin::*;
pub use crate::serde_value::*;
pub use crate::state::*;
pub use crate::view::*;
