//! Reply-subtree collection and assembly.
//!
//! Subtrees are fetched one level per query (children of the whole previous
//! level at once) and assembled in memory, so the query count depends on the
//! depth of the tree, never on its width.

use crate::db::StoreTx;
use crate::error::Result;
use crate::models::{AuthorProfile, Comment, CommentId, CommentNode, UserId, MAX_COMMENT_LEVEL};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// All descendants of `root_ids`, grouped by distance from the roots
/// (`levels[0]` holds the direct children).
pub(crate) async fn collect_descendants<T: StoreTx>(
    tx: &mut T,
    root_ids: &[CommentId],
) -> Result<Vec<Vec<Comment>>> {
    let mut levels = Vec::new();
    let mut frontier: Vec<CommentId> = root_ids.to_vec();

    // A level-0 root has at most MAX_COMMENT_LEVEL levels below it; one more
    // round confirms the deepest level is empty.
    for _ in 0..=MAX_COMMENT_LEVEL {
        if frontier.is_empty() {
            return Ok(levels);
        }
        let children = tx.children_of(&frontier).await?;
        frontier = children.iter().map(|c| c.id).collect();
        if !children.is_empty() {
            levels.push(children);
        }
    }

    if !frontier.is_empty() {
        warn!(
            roots = ?root_ids,
            "comment subtree deeper than the nesting limit; ignoring extra levels"
        );
    }
    Ok(levels)
}

/// Build reply trees for `roots` from a flat list of their descendants.
///
/// Replies are ordered oldest first (`created_at`, then `id`).
pub(crate) fn assemble(
    roots: Vec<Comment>,
    descendants: Vec<Comment>,
    liked: &HashSet<CommentId>,
    authors: &HashMap<UserId, AuthorProfile>,
) -> Vec<CommentNode> {
    let mut children: HashMap<CommentId, Vec<Comment>> = HashMap::new();
    for comment in descendants {
        if let Some(parent_id) = comment.parent_id {
            children.entry(parent_id).or_default().push(comment);
        }
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|c| (c.created_at, c.id));
    }

    roots
        .into_iter()
        .map(|root| build_node(root, &mut children, liked, authors, 0))
        .collect()
}

fn build_node(
    comment: Comment,
    children: &mut HashMap<CommentId, Vec<Comment>>,
    liked: &HashSet<CommentId>,
    authors: &HashMap<UserId, AuthorProfile>,
    depth: i32,
) -> CommentNode {
    let replies = if depth <= MAX_COMMENT_LEVEL {
        children
            .remove(&comment.id)
            .unwrap_or_default()
            .into_iter()
            .map(|child| build_node(child, children, liked, authors, depth + 1))
            .collect()
    } else {
        Vec::new()
    };

    CommentNode {
        liked: liked.contains(&comment.id),
        author: authors.get(&comment.author_id).cloned(),
        replies,
        comment,
    }
}
