//! # vellum-core — live document tree for the Vellum editing pipeline
//!
//! The live tree is the in-memory, user-rendered document structure: a
//! uuid-identified arena of element and text nodes with ordered children,
//! attribute maps and character data.
//!
//! Every mutation performed through the tree API captures one raw
//! [`ChangeRecord`] (old values taken at mutation time). A synchronous
//! mutation burst ends with [`LiveTreeHandle::flush_changes`], which hands
//! the accumulated records to the attached observer as one ordered batch.
//!
//! ## Modules
//!
//! - [`node`] — node identity, kinds, and the node struct
//! - [`record`] — raw change records (child-list / attribute / character-data)
//! - [`content`] — serialized subtree representation ([`NodeContent`])
//! - [`tree`] — the arena tree, mutation API, path resolution, observation

pub mod content;
pub mod node;
pub mod record;
pub mod tree;

pub use content::NodeContent;
pub use node::{LiveNode, NodeId, NodeKind};
pub use record::{AddedChild, ChangeBatch, ChangeRecord, RemovedChild};
pub use tree::{LiveTree, LiveTreeHandle, NodePath, ObserverCallback, TreeError};
