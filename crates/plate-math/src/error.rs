//! Error types for math node editing.

use plate_core::{ApplyError, StepError};
use thiserror::Error;

use crate::render::RenderError;

/// Integration failures. Source that fails to typeset is not one of them;
/// that is shown on the node instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MathError {
    /// A nested editor was opened twice for the same node.
    #[error("nested math editor is already open")]
    EditorAlreadyOpen,

    /// An inner step could not be moved into outer document coordinates.
    #[error("inner step {index} could not be mapped into the outer document")]
    StepDiscarded { index: usize },

    /// A node view was created after its plugin state was dropped.
    #[error("math plugin state is not available")]
    PluginStateMissing,

    /// The outer editor view was dropped while a node view still referenced it.
    #[error("outer editor view is gone")]
    OuterViewGone,

    /// The renderer failed for a reason other than bad source.
    #[error("math renderer failed: {0}")]
    Render(#[from] RenderError),

    #[error("failed to apply transaction: {0}")]
    Apply(#[from] ApplyError),

    #[error("failed to build step: {0}")]
    Step(#[from] StepError),

    /// The plugin set for a nested editor was rejected by the registry.
    #[error("invalid plugin set: {0}")]
    Registry(String),

    /// A host callback failed.
    #[error(transparent)]
    Host(#[from] anyhow::Error),

    /// Options could not be loaded.
    #[error("invalid math options: {0}")]
    Options(#[from] serde_json::Error),
}
