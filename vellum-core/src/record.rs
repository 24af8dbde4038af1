//! Raw change records: one atomic observed mutation of the live tree.
//!
//! Records arrive in temporal batches (all records from one synchronous
//! mutation burst) and must be processed in arrival order within a batch:
//! later records may reference nodes whose position depends on earlier
//! records in the same batch.

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// A child added by a child-list mutation, with the sibling that preceded
/// it at insertion time (`None` = inserted first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedChild {
    pub node: NodeId,
    pub prev_sibling: Option<NodeId>,
}

/// A child removed by a child-list mutation, with the sibling that preceded
/// it at removal time (`None` = was first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedChild {
    pub node: NodeId,
    pub prev_sibling: Option<NodeId>,
}

/// One atomic observed mutation.
///
/// Old values are captured at mutation time, never reconstructed later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeRecord {
    /// Children were added to / removed from `target`.
    ChildList {
        target: NodeId,
        added: Vec<AddedChild>,
        removed: Vec<RemovedChild>,
    },
    /// An attribute of `target` changed; `old_value` is the value before
    /// the mutation (`None` = attribute was absent).
    Attribute {
        target: NodeId,
        name: String,
        old_value: Option<String>,
    },
    /// The character data of `target` changed; `old_text` is the full text
    /// before the mutation.
    CharacterData { target: NodeId, old_text: String },
}

impl ChangeRecord {
    /// The node this record was observed on.
    pub fn target(&self) -> NodeId {
        match self {
            Self::ChildList { target, .. }
            | Self::Attribute { target, .. }
            | Self::CharacterData { target, .. } => *target,
        }
    }
}

/// All records resulting from one synchronous mutation burst, in order.
pub type ChangeBatch = Vec<ChangeRecord>;
