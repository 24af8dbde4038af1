//! The operation model: addressed mutations against the shared document.
//!
//! Ops within one batch are ordered such that replaying them in sequence
//! against the pre-batch shared-document state reproduces the post-batch
//! live-tree state.

use serde::{Deserialize, Serialize};
use vellum_core::{NodeContent, NodePath};

/// One atomic, addressed mutation.
///
/// Offsets and counts for text are in Unicode scalar values, not bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Insert a whole serialized subtree at `path`.
    InsertNode { path: NodePath, content: NodeContent },
    /// Delete `count` consecutive children starting at `path`.
    DeleteNode { path: NodePath, count: usize },
    SetAttribute {
        path: NodePath,
        name: String,
        value: String,
    },
    DeleteAttribute { path: NodePath, name: String },
    /// Replace `delete` chars at `offset` with `insert`.
    SpliceText {
        path: NodePath,
        offset: usize,
        delete: usize,
        insert: String,
    },
}

/// One emitted batch of ops.
///
/// `seq` is a session-scoped counter assigned in emission order; batches
/// are delivered in the same relative order their triggering changes
/// occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpBatch {
    pub seq: u64,
    pub ops: Vec<Op>,
}

/// Merge consecutive text splices that continue a typing run.
///
/// A splice that inserts exactly where the previous splice's insertion
/// ended (same path, no deletion) is folded into it, so a run of
/// keystrokes submits as one op.
pub fn compose(ops: Vec<Op>) -> Vec<Op> {
    let mut out: Vec<Op> = Vec::with_capacity(ops.len());
    for op in ops {
        let merged = match (out.last_mut(), &op) {
            (
                Some(Op::SpliceText {
                    path: prev_path,
                    offset: prev_offset,
                    insert: prev_insert,
                    ..
                }),
                Op::SpliceText {
                    path,
                    offset,
                    delete: 0,
                    insert,
                },
            ) if prev_path == path
                && *offset == *prev_offset + prev_insert.chars().count() =>
            {
                prev_insert.push_str(insert);
                true
            }
            _ => false,
        };
        if !merged {
            out.push(op);
        }
    }
    out
}
