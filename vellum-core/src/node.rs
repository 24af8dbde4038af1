//! Node identity and node data for the live tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a node in the live tree.
///
/// Identities are stable for the lifetime of a node, including while it is
/// detached; paths are not (they are recomputed lazily, see
/// [`crate::tree::LiveTree::path_of`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node kind: element (named, attributed, with children) or text leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Element,
    Text,
}

/// A mutable node in the live tree.
///
/// Owned by the arena in [`crate::tree::LiveTree`]; consumers hold only
/// [`NodeId`] references.
#[derive(Debug, Clone)]
pub struct LiveNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Element tag name; empty for text nodes.
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    /// Character data; empty for elements.
    pub text: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl LiveNode {
    pub(crate) fn element(name: &str) -> Self {
        Self {
            id: NodeId::new(),
            kind: NodeKind::Element,
            name: name.to_string(),
            attributes: BTreeMap::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub(crate) fn text(text: &str) -> Self {
        Self {
            id: NodeId::new(),
            kind: NodeKind::Text,
            name: String::new(),
            attributes: BTreeMap::new(),
            text: text.to_string(),
            parent: None,
            children: Vec::new(),
        }
    }

    /// Parent node, `None` for the root and for detached nodes.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Ordered child identities.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_element(&self) -> bool {
        self.kind == NodeKind::Element
    }

    pub fn is_text(&self) -> bool {
        self.kind == NodeKind::Text
    }
}
