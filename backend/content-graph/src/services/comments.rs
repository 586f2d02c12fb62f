/// Comment service - reply trees, counters and cascading deletes
use super::{comment_tree, likes};
use crate::config::PaginationConfig;
use crate::db::{CommentInsert, ContentStore, StoreTx};
use crate::error::{ContentError, Result};
use crate::metrics;
use crate::models::{
    Comment, CommentId, CommentNode, LedgerKind, LikeRecord, NewComment, Page, PageRequest,
    PostId, UserId, MAX_COMMENT_LEVEL,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use validator::Validate;

/// What a committed comment delete removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentCascade {
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    /// The comment itself plus every descendant
    pub comments_removed: u64,
    pub likes_removed: u64,
}

/// What `delete_all_for_post` removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostCommentsPurge {
    pub comments_removed: u64,
    pub likes_removed: u64,
}

pub struct CommentService<S: ContentStore> {
    store: Arc<S>,
    pagination: PaginationConfig,
}

impl<S: ContentStore> Clone for CommentService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            pagination: self.pagination,
        }
    }
}

impl<S: ContentStore> CommentService<S> {
    pub fn new(store: Arc<S>, pagination: PaginationConfig) -> Self {
        Self { store, pagination }
    }

    /// Create a comment, optionally as a reply.
    ///
    /// Parent `reply_count`, the comment row and the post's `comment_count`
    /// are written in one transaction. A reply below a level-3 parent is
    /// rejected before anything is written.
    pub async fn create(&self, new: NewComment) -> Result<Comment> {
        new.validate()?;

        let mut tx = self.store.begin().await?;

        if tx.find_post_for_update(new.post_id).await?.is_none() {
            return Err(ContentError::PostNotFound(new.post_id));
        }

        let level = match new.parent_id {
            None => 0,
            Some(parent_id) => {
                let parent = tx
                    .find_comment(parent_id)
                    .await?
                    .ok_or(ContentError::ParentNotFound(parent_id))?;
                if parent.post_id != new.post_id {
                    return Err(ContentError::InvalidInput(format!(
                        "parent comment {} belongs to another post",
                        parent_id
                    )));
                }
                if parent.level + 1 > MAX_COMMENT_LEVEL {
                    metrics::record_rejection("max_nesting");
                    return Err(ContentError::MaxNestingExceeded);
                }
                tx.adjust_comment_reply_count(parent_id, 1).await?;
                parent.level + 1
            }
        };

        let comment = tx
            .insert_comment(CommentInsert {
                post_id: new.post_id,
                author_id: new.author_id,
                parent_id: new.parent_id,
                content: &new.content,
                level,
                now: Utc::now(),
            })
            .await?;
        tx.adjust_post_comment_count(new.post_id, 1).await?;

        tx.commit().await?;

        debug!(
            comment_id = comment.id,
            post_id = comment.post_id,
            level = comment.level,
            "comment created"
        );
        Ok(comment)
    }

    /// Load one comment. A top-level comment comes with its full reply tree.
    pub async fn get(&self, comment_id: CommentId, viewer_id: UserId) -> Result<CommentNode> {
        let mut tx = self.store.begin().await?;

        let comment = tx
            .find_comment(comment_id)
            .await?
            .ok_or(ContentError::CommentNotFound(comment_id))?;
        let expand = comment.is_top_level();

        let mut nodes = hydrate(&mut tx, vec![comment], viewer_id, expand).await?;
        tx.commit().await?;

        nodes.pop().ok_or(ContentError::CommentNotFound(comment_id))
    }

    /// Page through a post's top-level comments, newest first, each with its
    /// complete reply tree.
    ///
    /// Only the top level is paginated; replies are returned in full.
    pub async fn list(
        &self,
        post_id: PostId,
        page: i64,
        page_size: i64,
        viewer_id: UserId,
    ) -> Result<Page<CommentNode>> {
        let request = PageRequest::new(page, page_size, &self.pagination);
        let mut tx = self.store.begin().await?;

        let total = tx.count_top_level_comments(post_id).await?;
        let roots = tx
            .list_top_level_comments(post_id, request.limit(), request.offset())
            .await?;
        let items = hydrate(&mut tx, roots, viewer_id, true).await?;

        tx.commit().await?;
        Ok(Page::new(items, total, request))
    }

    /// Delete a comment with its whole reply subtree and their likes.
    ///
    /// The post row is locked before the subtree is read, so overlapping
    /// deletes (or a reply racing a delete) on the same post run one after
    /// the other. Counters move by the rows actually removed: the parent
    /// loses one reply and the post loses every deleted comment.
    pub async fn delete(&self, comment_id: CommentId) -> Result<CommentCascade> {
        let mut tx = self.store.begin().await?;

        let post_id = tx
            .find_comment(comment_id)
            .await?
            .ok_or(ContentError::CommentNotFound(comment_id))?
            .post_id;
        tx.find_post_for_update(post_id).await?;

        // Re-read under the lock: a delete that held it first may have
        // removed this comment already
        let comment = tx
            .find_comment_for_update(comment_id)
            .await?
            .ok_or(ContentError::CommentNotFound(comment_id))?;
        let parent_id = comment.parent_id;

        let levels = comment_tree::collect_descendants(&mut tx, &[comment_id]).await?;
        let mut subtree: Vec<CommentId> = vec![comment_id];
        subtree.extend(levels.iter().flatten().map(|c| c.id));

        let likes_removed = tx
            .delete_likes_for_targets(LedgerKind::Comment, &subtree)
            .await?;

        // Deepest level first so no row outlives its parent
        let mut comments_removed = 0;
        for level in levels.iter().rev() {
            let ids: Vec<CommentId> = level.iter().map(|c| c.id).collect();
            comments_removed += tx.delete_comments(&ids).await?;
        }
        if tx.delete_comments(&[comment_id]).await? == 0 {
            return Err(ContentError::CommentNotFound(comment_id));
        }
        comments_removed += 1;

        if let Some(parent_id) = parent_id {
            tx.adjust_comment_reply_count(parent_id, -1).await?;
        }
        tx.adjust_post_comment_count(post_id, -(comments_removed as i64))
            .await?;

        tx.commit().await?;

        metrics::record_cascade_rows("comments", comments_removed);
        metrics::record_cascade_rows("comment_likes", likes_removed);
        info!(
            comment_id,
            post_id,
            comments_removed,
            likes_removed,
            "comment subtree deleted"
        );

        Ok(CommentCascade {
            post_id,
            parent_id,
            comments_removed,
            likes_removed,
        })
    }

    /// Remove every comment of a post and every like on those comments,
    /// inside the caller's transaction.
    ///
    /// `post.comment_count` is left alone: the caller is deleting the post.
    pub async fn delete_all_for_post(
        &self,
        tx: &mut S::Tx,
        post_id: PostId,
    ) -> Result<PostCommentsPurge> {
        let likes_removed = tx.delete_comment_likes_for_post(post_id).await?;
        let comments_removed = tx.delete_comments_for_post(post_id).await?;

        Ok(PostCommentsPurge {
            comments_removed,
            likes_removed,
        })
    }

    pub async fn like(&self, comment_id: CommentId, user_id: UserId) -> Result<LikeRecord> {
        let mut tx = self.store.begin().await?;

        if tx.find_comment(comment_id).await?.is_none() {
            return Err(ContentError::CommentNotFound(comment_id));
        }
        let record = likes::like(&mut tx, LedgerKind::Comment, comment_id, user_id).await?;

        tx.commit().await?;

        metrics::record_like(LedgerKind::Comment.as_str(), "like");
        debug!(comment_id, user_id, "comment liked");
        Ok(record)
    }

    pub async fn unlike(&self, comment_id: CommentId, user_id: UserId) -> Result<()> {
        let mut tx = self.store.begin().await?;

        if tx.find_comment(comment_id).await?.is_none() {
            return Err(ContentError::CommentNotFound(comment_id));
        }
        likes::unlike(&mut tx, LedgerKind::Comment, comment_id, user_id).await?;

        tx.commit().await?;

        metrics::record_like(LedgerKind::Comment.as_str(), "unlike");
        debug!(comment_id, user_id, "comment unliked");
        Ok(())
    }
}

/// Attach liked flags, authors and (when `expand`) reply trees to `roots`.
async fn hydrate<T: StoreTx>(
    tx: &mut T,
    roots: Vec<Comment>,
    viewer_id: UserId,
    expand: bool,
) -> Result<Vec<CommentNode>> {
    let descendants: Vec<Comment> = if expand && !roots.is_empty() {
        let root_ids: Vec<CommentId> = roots.iter().map(|c| c.id).collect();
        comment_tree::collect_descendants(tx, &root_ids)
            .await?
            .into_iter()
            .flatten()
            .collect()
    } else {
        Vec::new()
    };

    let comment_ids: Vec<CommentId> = roots.iter().chain(&descendants).map(|c| c.id).collect();
    let mut author_ids: Vec<UserId> = roots
        .iter()
        .chain(&descendants)
        .map(|c| c.author_id)
        .collect();
    author_ids.sort_unstable();
    author_ids.dedup();

    let liked = tx
        .liked_among(LedgerKind::Comment, viewer_id, &comment_ids)
        .await?;
    let authors = tx.author_profiles(&author_ids).await?;

    Ok(comment_tree::assemble(roots, descendants, &liked, &authors))
}
