//! Applying ops to document state.
//!
//! Two targets: the serialized [`NodeContent`] tree the shared document
//! keeps, and the [`LiveTree`] a remote-apply path mutates. Both sides
//! resolve ops identically, which is what makes an emitted batch replay
//! against the pre-batch shared state into the post-batch live tree.

use vellum_core::{LiveTree, NodeContent};

use crate::error::OtError;
use crate::op::Op;

/// Apply one op to a serialized content tree.
pub fn apply_to_content(root: &mut NodeContent, op: &Op) -> Result<(), OtError> {
    match op {
        Op::InsertNode { path, content } => {
            let (index, parent_path) = split_leaf(path)?;
            let parent = root
                .descend_mut(parent_path)
                .ok_or_else(|| unresolvable(parent_path))?;
            let children = parent
                .children_mut()
                .ok_or_else(|| OtError::Apply(format!("parent at {parent_path:?} is not an element")))?;
            if index > children.len() {
                return Err(OtError::Apply(format!(
                    "insert index {index} out of range for {} children",
                    children.len()
                )));
            }
            children.insert(index, content.clone());
            Ok(())
        }
        Op::DeleteNode { path, count } => {
            let (index, parent_path) = split_leaf(path)?;
            let parent = root
                .descend_mut(parent_path)
                .ok_or_else(|| unresolvable(parent_path))?;
            let children = parent
                .children_mut()
                .ok_or_else(|| OtError::Apply(format!("parent at {parent_path:?} is not an element")))?;
            if index + count > children.len() {
                return Err(OtError::Apply(format!(
                    "delete range {index}..{} out of range for {} children",
                    index + count,
                    children.len()
                )));
            }
            children.drain(index..index + count);
            Ok(())
        }
        Op::SetAttribute { path, name, value } => {
            match root.descend_mut(path).ok_or_else(|| unresolvable(path))? {
                NodeContent::Element { attributes, .. } => {
                    attributes.insert(name.clone(), value.clone());
                    Ok(())
                }
                NodeContent::Text { .. } => {
                    Err(OtError::Apply(format!("attribute op on text node at {path:?}")))
                }
            }
        }
        Op::DeleteAttribute { path, name } => {
            match root.descend_mut(path).ok_or_else(|| unresolvable(path))? {
                NodeContent::Element { attributes, .. } => {
                    attributes.remove(name);
                    Ok(())
                }
                NodeContent::Text { .. } => {
                    Err(OtError::Apply(format!("attribute op on text node at {path:?}")))
                }
            }
        }
        Op::SpliceText {
            path,
            offset,
            delete,
            insert,
        } => match root.descend_mut(path).ok_or_else(|| unresolvable(path))? {
            NodeContent::Text { text } => {
                *text = splice_chars(text, *offset, *delete, insert)?;
                Ok(())
            }
            NodeContent::Element { .. } => {
                Err(OtError::Apply(format!("text op on element node at {path:?}")))
            }
        },
    }
}

/// Apply one op to a live tree.
///
/// Used for remote application; the caller is responsible for having
/// observation stopped so the mutations are not re-captured.
pub fn apply_to_tree(tree: &mut LiveTree, op: &Op) -> Result<(), OtError> {
    match op {
        Op::InsertNode { path, content } => {
            let (index, parent_path) = split_leaf(path)?;
            let parent = tree
                .resolve_path(parent_path)
                .ok_or_else(|| unresolvable(parent_path))?;
            let node = tree.build_subtree(content);
            tree.insert_child(parent, index, node)?;
            Ok(())
        }
        Op::DeleteNode { path, count } => {
            let (index, parent_path) = split_leaf(path)?;
            let parent = tree
                .resolve_path(parent_path)
                .ok_or_else(|| unresolvable(parent_path))?;
            for _ in 0..*count {
                let child = tree
                    .node(parent)
                    .and_then(|n| n.children().get(index).copied())
                    .ok_or_else(|| unresolvable(path))?;
                tree.remove_child(parent, child)?;
                tree.destroy_subtree(child);
            }
            Ok(())
        }
        Op::SetAttribute { path, name, value } => {
            let id = tree.resolve_path(path).ok_or_else(|| unresolvable(path))?;
            tree.set_attribute(id, name, value)?;
            Ok(())
        }
        Op::DeleteAttribute { path, name } => {
            let id = tree.resolve_path(path).ok_or_else(|| unresolvable(path))?;
            tree.remove_attribute(id, name)?;
            Ok(())
        }
        Op::SpliceText {
            path,
            offset,
            delete,
            insert,
        } => {
            let id = tree.resolve_path(path).ok_or_else(|| unresolvable(path))?;
            let text = tree
                .node(id)
                .filter(|n| n.is_text())
                .map(|n| n.text.clone())
                .ok_or_else(|| OtError::Apply(format!("text op on non-text node at {path:?}")))?;
            let spliced = splice_chars(&text, *offset, *delete, insert)?;
            tree.set_text(id, &spliced)?;
            Ok(())
        }
    }
}

/// Char-indexed splice: replace `delete` chars at `offset` with `insert`.
pub(crate) fn splice_chars(
    text: &str,
    offset: usize,
    delete: usize,
    insert: &str,
) -> Result<String, OtError> {
    let chars: Vec<char> = text.chars().collect();
    if offset + delete > chars.len() {
        return Err(OtError::Apply(format!(
            "splice range {offset}..{} out of range for {} chars",
            offset + delete,
            chars.len()
        )));
    }
    let mut out: String = chars[..offset].iter().collect();
    out.push_str(insert);
    out.extend(chars[offset + delete..].iter());
    Ok(out)
}

fn split_leaf(path: &[usize]) -> Result<(usize, &[usize]), OtError> {
    match path.split_last() {
        Some((index, parent)) => Ok((*index, parent)),
        None => Err(OtError::Apply("structural op addressing the root".to_string())),
    }
}

fn unresolvable(path: &[usize]) -> OtError {
    OtError::Apply(format!("path {path:?} does not resolve"))
}
