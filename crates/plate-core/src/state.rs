use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::core::{Document, Selection};
use crate::ops::{StepError, Transaction};
use crate::plugin::PluginRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("transaction was built against a different document")]
    Mismatched,
    #[error(transparent)]
    Step(#[from] StepError),
}

#[derive(Clone)]
pub struct EditorState {
    doc: Document,
    selection: Selection,
    registry: Rc<PluginRegistry>,
}

impl fmt::Debug for EditorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorState")
            .field("doc", &self.doc)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl EditorState {
    pub fn new(doc: Document, selection: Selection, registry: Rc<PluginRegistry>) -> Self {
        Self {
            doc,
            selection,
            registry,
        }
    }

    pub fn create(doc: Document, registry: Rc<PluginRegistry>) -> Self {
        let selection = Selection::at_start(&doc, &registry);
        Self::new(doc, selection, registry)
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn registry(&self) -> &Rc<PluginRegistry> {
        &self.registry
    }

    pub fn tr(&self) -> Transaction {
        Transaction::new(self.doc.clone(), self.selection, self.registry.clone())
    }

    pub fn apply(&self, tr: Transaction) -> Result<EditorState, ApplyError> {
        self.apply_transaction(tr).map(|(state, _)| state)
    }

    pub fn apply_transaction(
        &self,
        tr: Transaction,
    ) -> Result<(EditorState, Vec<Transaction>), ApplyError> {
        if tr.before() != &self.doc {
            return Err(ApplyError::Mismatched);
        }
        let next = EditorState {
            doc: tr.doc().clone(),
            selection: tr.selection(),
            registry: self.registry.clone(),
        };
        for plugin in self.registry.plugins() {
            plugin.apply(&tr, self, &next);
        }
        tracing::trace!(
            steps = tr.steps().len(),
            selection_set = tr.selection_set(),
            "applied transaction"
        );
        Ok((next, vec![tr]))
    }
}
