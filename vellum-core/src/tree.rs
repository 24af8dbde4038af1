//! The live tree: arena storage, mutation API with change capture,
//! path resolution, and observation.
//!
//! Mutations performed through [`LiveTree`] append one [`ChangeRecord`]
//! each to a pending buffer while an observer is attached. A synchronous
//! mutation burst ends with [`LiveTreeHandle::flush_changes`], which
//! delivers the pending records to the observer as one ordered batch.
//!
//! At most one observer is attached to a tree at a time; attaching
//! replaces any previous observer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::content::NodeContent;
use crate::node::{LiveNode, NodeId, NodeKind};
use crate::record::{AddedChild, ChangeBatch, ChangeRecord, RemovedChild};

/// Ordered child indices from the root; the root itself is `[]`.
///
/// Paths are not stable across structural changes and must be recomputed
/// lazily, never cached across batch boundaries.
pub type NodePath = Vec<usize>;

/// Callback receiving one batch per mutation burst.
pub type ObserverCallback = Arc<dyn Fn(ChangeBatch) + Send + Sync>;

/// Errors from live-tree operations.
#[derive(Debug, Clone)]
pub enum TreeError {
    /// The node id is not in the arena.
    UnknownNode(NodeId),
    /// The operation requires an element node.
    NotAnElement(NodeId),
    /// The operation requires a text node.
    NotAText(NodeId),
    /// Child index out of range for the parent.
    IndexOutOfRange { parent: NodeId, index: usize, len: usize },
    /// The node is already attached (or is the root) and cannot be inserted.
    AlreadyAttached(NodeId),
    /// The child is not a child of the given parent.
    NotAChild { parent: NodeId, child: NodeId },
    /// Observation cannot attach: the root is gone from the arena.
    InvalidRoot(NodeId),
    /// Tree construction requires element content at the root.
    RootNotElement,
    /// A lock was poisoned by a panicking writer.
    Poisoned(String),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNode(id) => write!(f, "unknown node {id}"),
            Self::NotAnElement(id) => write!(f, "node {id} is not an element"),
            Self::NotAText(id) => write!(f, "node {id} is not a text node"),
            Self::IndexOutOfRange { parent, index, len } => {
                write!(f, "index {index} out of range for parent {parent} with {len} children")
            }
            Self::AlreadyAttached(id) => write!(f, "node {id} is already attached"),
            Self::NotAChild { parent, child } => {
                write!(f, "node {child} is not a child of {parent}")
            }
            Self::InvalidRoot(id) => write!(f, "observation root {id} is not in the tree"),
            Self::RootNotElement => write!(f, "root content is not an element"),
            Self::Poisoned(e) => write!(f, "tree lock poisoned: {e}"),
        }
    }
}

impl std::error::Error for TreeError {}

/// The live editable tree.
///
/// Removed nodes stay in the arena (detached) so that same-batch re-adds
/// and subtree serialization of re-parented nodes keep working; they are
/// purged explicitly via [`LiveTree::destroy_subtree`].
pub struct LiveTree {
    nodes: HashMap<NodeId, LiveNode>,
    root: NodeId,
    pending: Vec<ChangeRecord>,
    observer: Option<ObserverCallback>,
}

impl LiveTree {
    /// Create a tree with an empty element root.
    pub fn new(root_name: &str) -> Self {
        let root_node = LiveNode::element(root_name);
        let root = root_node.id;
        let mut nodes = HashMap::new();
        nodes.insert(root, root_node);
        Self {
            nodes,
            root,
            pending: Vec::new(),
            observer: None,
        }
    }

    /// Build a tree from serialized content. Generates no change records.
    ///
    /// The content root must be an element.
    pub fn from_content(content: &NodeContent) -> Result<Self, TreeError> {
        let NodeContent::Element { name, .. } = content else {
            return Err(TreeError::RootNotElement);
        };
        let mut tree = Self::new(name);
        let root = tree.root;
        if let NodeContent::Element { attributes, children, .. } = content {
            if let Some(node) = tree.nodes.get_mut(&root) {
                node.attributes = attributes.clone();
            }
            for child in children {
                let id = tree.build_subtree(child);
                tree.link_child(root, usize::MAX, id);
            }
        }
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&LiveNode> {
        self.nodes.get(&id)
    }

    /// Whether the node is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.path_of(id).is_some()
    }

    // ------------------------------------------------------------------
    // Node creation
    // ------------------------------------------------------------------

    /// Create a detached element node.
    pub fn create_element(&mut self, name: &str) -> NodeId {
        let node = LiveNode::element(name);
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        let node = LiveNode::text(text);
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Instantiate serialized content as a detached subtree.
    ///
    /// Links inside the subtree are set directly, so materializing remote
    /// content never produces change records for its internal structure.
    pub fn build_subtree(&mut self, content: &NodeContent) -> NodeId {
        match content {
            NodeContent::Element { name, attributes, children } => {
                let id = self.create_element(name);
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.attributes = attributes.clone();
                }
                for child in children {
                    let child_id = self.build_subtree(child);
                    if let Some(node) = self.nodes.get_mut(&child_id) {
                        node.parent = Some(id);
                    }
                    if let Some(node) = self.nodes.get_mut(&id) {
                        node.children.push(child_id);
                    }
                }
                id
            }
            NodeContent::Text { text } => self.create_text(text),
        }
    }

    // ------------------------------------------------------------------
    // Mutation (captures change records while observed)
    // ------------------------------------------------------------------

    /// Insert a detached node under `parent` at `index`.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<(), TreeError> {
        let parent_node = self.nodes.get(&parent).ok_or(TreeError::UnknownNode(parent))?;
        if parent_node.kind != NodeKind::Element {
            return Err(TreeError::NotAnElement(parent));
        }
        let len = parent_node.children.len();
        if index > len {
            return Err(TreeError::IndexOutOfRange { parent, index, len });
        }
        let child_node = self.nodes.get(&child).ok_or(TreeError::UnknownNode(child))?;
        if child_node.parent.is_some() || child == self.root {
            return Err(TreeError::AlreadyAttached(child));
        }

        self.link_child(parent, index, child);

        let prev_sibling = if index > 0 {
            self.nodes.get(&parent).map(|p| p.children[index - 1])
        } else {
            None
        };
        self.capture(ChangeRecord::ChildList {
            target: parent,
            added: vec![AddedChild { node: child, prev_sibling }],
            removed: Vec::new(),
        });
        Ok(())
    }

    /// Insert a detached node as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        let len = self
            .nodes
            .get(&parent)
            .ok_or(TreeError::UnknownNode(parent))?
            .children
            .len();
        self.insert_child(parent, len, child)
    }

    /// Remove `child` from `parent`; the node stays in the arena, detached.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        let parent_node = self.nodes.get(&parent).ok_or(TreeError::UnknownNode(parent))?;
        let index = parent_node
            .children
            .iter()
            .position(|&c| c == child)
            .ok_or(TreeError::NotAChild { parent, child })?;
        let prev_sibling = if index > 0 {
            Some(parent_node.children[index - 1])
        } else {
            None
        };

        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.remove(index);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = None;
        }

        self.capture(ChangeRecord::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![RemovedChild { node: child, prev_sibling }],
        });
        Ok(())
    }

    /// Set an attribute on an element node.
    pub fn set_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        value: &str,
    ) -> Result<(), TreeError> {
        let node = self.nodes.get_mut(&id).ok_or(TreeError::UnknownNode(id))?;
        if node.kind != NodeKind::Element {
            return Err(TreeError::NotAnElement(id));
        }
        let old_value = node.attributes.insert(name.to_string(), value.to_string());
        self.capture(ChangeRecord::Attribute {
            target: id,
            name: name.to_string(),
            old_value,
        });
        Ok(())
    }

    /// Remove an attribute from an element node.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<(), TreeError> {
        let node = self.nodes.get_mut(&id).ok_or(TreeError::UnknownNode(id))?;
        if node.kind != NodeKind::Element {
            return Err(TreeError::NotAnElement(id));
        }
        let old_value = node.attributes.remove(name);
        self.capture(ChangeRecord::Attribute {
            target: id,
            name: name.to_string(),
            old_value,
        });
        Ok(())
    }

    /// Replace the character data of a text node.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), TreeError> {
        let node = self.nodes.get_mut(&id).ok_or(TreeError::UnknownNode(id))?;
        if node.kind != NodeKind::Text {
            return Err(TreeError::NotAText(id));
        }
        let old_text = std::mem::replace(&mut node.text, text.to_string());
        self.capture(ChangeRecord::CharacterData { target: id, old_text });
        Ok(())
    }

    /// Purge a detached node and its descendants from the arena.
    pub fn destroy_subtree(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.destroy_subtree(child);
            }
        }
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Index of `child` within `parent`'s children.
    pub fn index_of(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.nodes
            .get(&parent)?
            .children
            .iter()
            .position(|&c| c == child)
    }

    /// Recompute the path of a node from the root.
    ///
    /// `None` for detached or unknown nodes.
    pub fn path_of(&self, id: NodeId) -> Option<NodePath> {
        if id == self.root {
            return Some(Vec::new());
        }
        let mut path = Vec::new();
        let mut current = id;
        loop {
            let parent = self.nodes.get(&current)?.parent?;
            path.push(self.index_of(parent, current)?);
            if parent == self.root {
                path.reverse();
                return Some(path);
            }
            current = parent;
        }
    }

    /// Resolve a path of child indices from the root.
    pub fn resolve_path(&self, path: &[usize]) -> Option<NodeId> {
        let mut current = self.root;
        for &index in path {
            current = *self.nodes.get(&current)?.children.get(index)?;
        }
        Some(current)
    }

    /// Serialize the subtree rooted at `id`.
    pub fn to_content(&self, id: NodeId) -> Option<NodeContent> {
        let node = self.nodes.get(&id)?;
        Some(match node.kind {
            NodeKind::Text => NodeContent::Text { text: node.text.clone() },
            NodeKind::Element => NodeContent::Element {
                name: node.name.clone(),
                attributes: node.attributes.clone(),
                children: node
                    .children
                    .iter()
                    .filter_map(|&c| self.to_content(c))
                    .collect(),
            },
        })
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Attach an observer callback, replacing any previous one.
    ///
    /// Fails if the root has been purged from the arena.
    pub fn observe(&mut self, callback: ObserverCallback) -> Result<(), TreeError> {
        if !self.nodes.contains_key(&self.root) {
            return Err(TreeError::InvalidRoot(self.root));
        }
        if self.observer.is_some() {
            log::debug!("Replacing tree observer on root {}", self.root);
        }
        self.observer = Some(callback);
        Ok(())
    }

    /// Detach the observer and discard records captured since the last flush.
    pub fn unobserve(&mut self) {
        self.observer = None;
        self.pending.clear();
    }

    pub fn has_observer(&self) -> bool {
        self.observer.is_some()
    }

    /// Take the pending records of the current burst.
    pub fn take_pending(&mut self) -> ChangeBatch {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn observer(&self) -> Option<ObserverCallback> {
        self.observer.clone()
    }

    fn capture(&mut self, record: ChangeRecord) {
        // Records are only meaningful while observed, and only for targets
        // reachable from the root: edits staged on a detached subtree are
        // covered by the whole-subtree record of its eventual attachment.
        if self.observer.is_some() && self.is_attached(record.target()) {
            self.pending.push(record);
        }
    }

    /// Attach `child` under `parent` without capturing a record.
    fn link_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
        if let Some(p) = self.nodes.get_mut(&parent) {
            if index >= p.children.len() {
                p.children.push(child);
            } else {
                p.children.insert(index, child);
            }
        }
    }
}

/// Shared handle to a live tree.
///
/// Cloneable; locks per call. The renderer/session side mutates through
/// the write guard, the synthesizer reads through the read guard.
#[derive(Clone)]
pub struct LiveTreeHandle(Arc<RwLock<LiveTree>>);

impl LiveTreeHandle {
    pub fn new(tree: LiveTree) -> Self {
        Self(Arc::new(RwLock::new(tree)))
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, LiveTree>, TreeError> {
        self.0.read().map_err(|e| TreeError::Poisoned(e.to_string()))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, LiveTree>, TreeError> {
        self.0.write().map_err(|e| TreeError::Poisoned(e.to_string()))
    }

    /// End the current mutation burst: deliver pending records to the
    /// observer as one batch. Returns the number of records delivered.
    ///
    /// The observer is invoked outside the tree lock.
    pub fn flush_changes(&self) -> Result<usize, TreeError> {
        let (batch, observer) = {
            let mut tree = self.write()?;
            (tree.take_pending(), tree.observer())
        };
        let delivered = batch.len();
        if delivered > 0 {
            if let Some(observer) = observer {
                observer(batch);
            }
        }
        Ok(delivered)
    }
}
