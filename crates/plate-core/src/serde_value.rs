use serde::{Deserialize, Serialize};

use crate::core::{Document, Node};
use crate::plugin::PluginRegistry;

const DEFAULT_SCHEMA: &str = "plate";
const DEFAULT_VERSION: u32 = 1;

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_version() -> u32 {
    DEFAULT_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateValue {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub document: Document,
}

impl PlateValue {
    pub fn from_document(document: Document) -> Self {
        Self {
            schema: default_schema(),
            version: default_version(),
            document,
        }
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn validate(&self, registry: &PluginRegistry) -> Result<(), String> {
        let doc = &self.document;
        if !registry.valid_content(&doc.kind, &doc.children) {
            return Err(format!("Invalid content for `{}`", doc.kind));
        }
        let mut error = None;
        doc.descendants(&mut |node, pos| {
            if error.is_some() {
                return false;
            }
            if let Node::Element(el) = node {
                if !registry.is_known_kind(&el.kind) {
                    error = Some(format!("Unknown node kind `{}` at {pos}", el.kind));
                } else if !registry.valid_content(&el.kind, &el.children) {
                    error = Some(format!("Invalid content for `{}` at {pos}", el.kind));
                }
            }
            true
        });
        error.map_or(Ok(()), Err)
    }
}
