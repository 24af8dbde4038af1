//! Serialized subtree representation.
//!
//! [`NodeContent`] is the identity-free snapshot of a subtree: node kind,
//! attributes, text, and recursively its children. It is the payload of
//! insert-node operations and the document model the shared replica keeps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Serialized representation of a subtree at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeContent {
    Element {
        name: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        children: Vec<NodeContent>,
    },
    Text { text: String },
}

impl NodeContent {
    pub fn element(name: &str) -> Self {
        Self::Element {
            name: name.to_string(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn text(text: &str) -> Self {
        Self::Text {
            text: text.to_string(),
        }
    }

    /// Builder-style child append, for tests and fixtures.
    pub fn with_child(mut self, child: NodeContent) -> Self {
        if let Self::Element { children, .. } = &mut self {
            children.push(child);
        }
        self
    }

    /// Builder-style attribute set, for tests and fixtures.
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        if let Self::Element { attributes, .. } = &mut self {
            attributes.insert(name.to_string(), value.to_string());
        }
        self
    }

    pub fn is_element(&self) -> bool {
        matches!(self, Self::Element { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    /// Child list; empty for text nodes.
    pub fn children(&self) -> &[NodeContent] {
        match self {
            Self::Element { children, .. } => children,
            Self::Text { .. } => &[],
        }
    }

    /// Mutable child list; `None` for text nodes.
    pub fn children_mut(&mut self) -> Option<&mut Vec<NodeContent>> {
        match self {
            Self::Element { children, .. } => Some(children),
            Self::Text { .. } => None,
        }
    }

    /// Descend a path of child indices from this node.
    pub fn descend(&self, path: &[usize]) -> Option<&NodeContent> {
        let mut current = self;
        for &index in path {
            current = current.children().get(index)?;
        }
        Some(current)
    }

    /// Mutable descent of a path of child indices from this node.
    pub fn descend_mut(&mut self, path: &[usize]) -> Option<&mut NodeContent> {
        let mut current = self;
        for &index in path {
            current = current.children_mut()?.get_mut(index)?;
        }
        Some(current)
    }
}
