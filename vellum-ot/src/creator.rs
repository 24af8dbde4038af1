//! The op synthesizer: raw change records in, ordered ops out.
//!
//! One call covers one raw batch (or one flushed cache) and must happen
//! at the burst boundary: synthesis reads the live tree as it stands at
//! the end of the batch's burst, before any later mutation.
//!
//! Child-list addresses come from a simulated child list per parent,
//! reconstructed to its pre-batch state from the records' captured prior
//! siblings and then replayed record by record. Replaying the emitted ops
//! in order therefore lands every child where the live tree has it, even
//! when a record's anchor sibling was detached later in the batch.
//!
//! Structural policy: whole-subtree inserts and deletes, no recursive
//! diff. A re-parented node synthesizes as delete at the old address plus
//! insert at the new one.

use std::collections::{HashMap, HashSet};

use vellum_core::{ChangeRecord, LiveTree, LiveTreeHandle, NodeId};

use crate::op::Op;

/// Synthesizes op batches from raw change records.
pub struct OpSynthesizer {
    tree: LiveTreeHandle,
}

impl OpSynthesizer {
    pub fn new(tree: LiveTreeHandle) -> Self {
        Self { tree }
    }

    /// Process one ordered record list and return the resulting ops.
    ///
    /// Records whose target is unreachable are skipped with a diagnostic;
    /// they never abort the rest of the batch. An empty return means the
    /// batch was semantically a no-op and nothing should be emitted.
    pub fn synthesize(&self, records: &[ChangeRecord]) -> Vec<Op> {
        let tree = match self.tree.read() {
            Ok(tree) => tree,
            Err(e) => {
                log::error!("Synthesis pass skipped: {e}");
                return Vec::new();
            }
        };

        let mut ops: Vec<Op> = Vec::new();
        // Simulated child list per parent, replayed alongside emission.
        let mut working: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        // Adds whose node is detached again by the end of the batch; each
        // one cancels the later removal of the same node (the pair never
        // reached the wire).
        let mut cancelled: HashSet<NodeId> = HashSet::new();
        // Character-data and attribute records after the first per target
        // are redundant: the first captured old value against the
        // burst-end state already covers the whole run.
        let mut spliced: HashSet<NodeId> = HashSet::new();
        let mut attributed: HashSet<(NodeId, String)> = HashSet::new();

        for record in records {
            match record {
                ChangeRecord::ChildList { target, added, removed } => {
                    let Some(parent_path) = tree.path_of(*target) else {
                        log::warn!("Skipping child-list record: target {target} is unreachable");
                        continue;
                    };
                    if !working.contains_key(target) {
                        working.insert(*target, pre_batch_children(&tree, records, *target));
                    }
                    let Some(children) = working.get_mut(target) else {
                        continue;
                    };
                    // Removed before added keeps sibling indices stable.
                    for r in removed {
                        if cancelled.remove(&r.node) {
                            continue;
                        }
                        let Some(index) = children.iter().position(|&n| n == r.node) else {
                            log::warn!(
                                "Skipping removed child {}: not under its record target",
                                r.node
                            );
                            continue;
                        };
                        children.remove(index);
                        let mut path = parent_path.clone();
                        path.push(index);
                        match ops.last_mut() {
                            // Contiguous removal run: same resolved address.
                            Some(Op::DeleteNode { path: last_path, count })
                                if *last_path == path =>
                            {
                                *count += 1;
                            }
                            _ => ops.push(Op::DeleteNode { path, count: 1 }),
                        }
                    }
                    for a in added {
                        if !tree.is_attached(a.node) {
                            log::debug!(
                                "Skipping added child {}: detached again within the batch",
                                a.node
                            );
                            cancelled.insert(a.node);
                            continue;
                        }
                        let index = match a.prev_sibling {
                            None => 0,
                            Some(prev) => match children.iter().position(|&n| n == prev) {
                                Some(i) => i + 1,
                                None => {
                                    log::warn!(
                                        "Skipping added child {}: prior sibling unresolvable",
                                        a.node
                                    );
                                    continue;
                                }
                            },
                        };
                        let Some(content) = tree.to_content(a.node) else {
                            continue;
                        };
                        children.insert(index, a.node);
                        let mut path = parent_path.clone();
                        path.push(index);
                        ops.push(Op::InsertNode { path, content });
                    }
                }
                ChangeRecord::Attribute { target, name, old_value } => {
                    let Some(path) = tree.path_of(*target) else {
                        log::warn!("Skipping attribute record: target {target} is unreachable");
                        continue;
                    };
                    if !attributed.insert((*target, name.clone())) {
                        continue;
                    }
                    let current = tree
                        .node(*target)
                        .and_then(|n| n.attributes.get(name))
                        .cloned();
                    if *old_value == current {
                        continue;
                    }
                    match current {
                        Some(value) => ops.push(Op::SetAttribute {
                            path,
                            name: name.clone(),
                            value,
                        }),
                        None => ops.push(Op::DeleteAttribute {
                            path,
                            name: name.clone(),
                        }),
                    }
                }
                ChangeRecord::CharacterData { target, old_text } => {
                    let Some(path) = tree.path_of(*target) else {
                        log::warn!(
                            "Skipping character-data record: target {target} is unreachable"
                        );
                        continue;
                    };
                    if !spliced.insert(*target) {
                        continue;
                    }
                    let Some(node) = tree.node(*target).filter(|n| n.is_text()) else {
                        continue;
                    };
                    if let Some((offset, delete, insert)) = splice_diff(old_text, &node.text) {
                        ops.push(Op::SpliceText {
                            path,
                            offset,
                            delete,
                            insert,
                        });
                    }
                }
            }
        }
        ops
    }
}

/// Reconstruct a parent's child list as it stood before the batch, by
/// undoing the batch's child-list records for it newest first.
///
/// Captured prior siblings were attached when each record was taken, so
/// every undo step finds its anchor in the list being rebuilt.
fn pre_batch_children(tree: &LiveTree, records: &[ChangeRecord], parent: NodeId) -> Vec<NodeId> {
    let mut list = tree
        .node(parent)
        .map(|n| n.children().to_vec())
        .unwrap_or_default();
    for record in records.iter().rev() {
        let ChangeRecord::ChildList { target, added, removed } = record else {
            continue;
        };
        if *target != parent {
            continue;
        }
        for a in added.iter().rev() {
            list.retain(|&n| n != a.node);
        }
        for r in removed.iter().rev() {
            let at = match r.prev_sibling {
                None => 0,
                Some(prev) => match list.iter().position(|&n| n == prev) {
                    Some(i) => i + 1,
                    None => list.len(),
                },
            };
            list.insert(at, r.node);
        }
    }
    list
}

/// Minimal splice between two strings: common-prefix / common-suffix trim
/// in chars. `None` when the texts are identical.
fn splice_diff(old: &str, new: &str) -> Option<(usize, usize, String)> {
    if old == new {
        return None;
    }
    let old: Vec<char> = old.chars().collect();
    let new: Vec<char> = new.chars().collect();

    let mut prefix = 0;
    while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old.len() - prefix
        && suffix < new.len() - prefix
        && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let delete = old.len() - prefix - suffix;
    let insert: String = new[prefix..new.len() - suffix].iter().collect();
    Some((prefix, delete, insert))
}
