//! In-process content store.
//!
//! A transaction takes the state lock for its whole lifetime and works on a
//! private copy; `commit` publishes the copy, anything else discards it. This
//! gives serialisable, all-or-nothing transactions without a database.

use super::{CommentInsert, ContentStore, StoreTx};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    AuthorProfile, Comment, CommentId, LedgerKind, LikeRecord, Post, PostId, PostImage, UserId,
    MAX_COMMENT_LEVEL,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Store operations that can be armed to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertPostImages,
    InsertComment,
    InsertLike,
    AdjustPostLikeCount,
    AdjustPostCommentCount,
    AdjustCommentLikeCount,
    AdjustCommentReplyCount,
    DeleteCommentLikes,
    DeleteComments,
    DeleteCommentsForPost,
    DeletePost,
}

impl FailPoint {
    fn name(self) -> &'static str {
        match self {
            FailPoint::InsertPostImages => "insert_post_images",
            FailPoint::InsertComment => "insert_comment",
            FailPoint::InsertLike => "insert_like",
            FailPoint::AdjustPostLikeCount => "adjust_post_like_count",
            FailPoint::AdjustPostCommentCount => "adjust_post_comment_count",
            FailPoint::AdjustCommentLikeCount => "adjust_comment_like_count",
            FailPoint::AdjustCommentReplyCount => "adjust_comment_reply_count",
            FailPoint::DeleteCommentLikes => "delete_comment_likes",
            FailPoint::DeleteComments => "delete_comments",
            FailPoint::DeleteCommentsForPost => "delete_comments_for_post",
            FailPoint::DeletePost => "delete_post",
        }
    }
}

/// Full content of the in-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    next_id: i64,
    posts: BTreeMap<PostId, Post>,
    images: Vec<PostImage>,
    comments: BTreeMap<CommentId, Comment>,
    post_likes: Vec<LikeRecord>,
    comment_likes: Vec<LikeRecord>,
    profiles: HashMap<UserId, AuthorProfile>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn ledger(&self, kind: LedgerKind) -> &Vec<LikeRecord> {
        match kind {
            LedgerKind::Post => &self.post_likes,
            LedgerKind::Comment => &self.comment_likes,
        }
    }

    fn ledger_mut(&mut self, kind: LedgerKind) -> &mut Vec<LikeRecord> {
        match kind {
            LedgerKind::Post => &mut self.post_likes,
            LedgerKind::Comment => &mut self.comment_likes,
        }
    }

    pub fn post(&self, post_id: PostId) -> Option<&Post> {
        self.posts.get(&post_id)
    }

    pub fn comment(&self, comment_id: CommentId) -> Option<&Comment> {
        self.comments.get(&comment_id)
    }

    pub fn post_total(&self) -> usize {
        self.posts.len()
    }

    pub fn comment_total(&self) -> usize {
        self.comments.len()
    }

    pub fn comments_for_post(&self, post_id: PostId) -> usize {
        self.comments.values().filter(|c| c.post_id == post_id).count()
    }

    pub fn images_for_post(&self, post_id: PostId) -> Vec<&PostImage> {
        let mut images: Vec<&PostImage> =
            self.images.iter().filter(|i| i.post_id == post_id).collect();
        images.sort_by_key(|i| i.display_order);
        images
    }

    pub fn image_total(&self) -> usize {
        self.images.len()
    }

    /// Ledger rows recorded for one target
    pub fn like_rows(&self, kind: LedgerKind, target_id: i64) -> usize {
        self.ledger(kind)
            .iter()
            .filter(|l| l.target_id == target_id)
            .count()
    }

    pub fn like_total(&self, kind: LedgerKind) -> usize {
        self.ledger(kind).len()
    }

    /// Verify every cross-row invariant of the content graph.
    pub fn check_invariants(&self) -> Result<(), String> {
        for comment in self.comments.values() {
            let expected_level = match comment.parent_id {
                None => 0,
                Some(parent_id) => match self.comments.get(&parent_id) {
                    Some(parent) => parent.level + 1,
                    None => return Err(format!("comment {} has a dangling parent", comment.id)),
                },
            };
            if comment.level != expected_level || !(0..=MAX_COMMENT_LEVEL).contains(&comment.level)
            {
                return Err(format!("comment {} has level {}", comment.id, comment.level));
            }
            if !self.posts.contains_key(&comment.post_id) {
                return Err(format!("comment {} belongs to a missing post", comment.id));
            }

            let replies = self
                .comments
                .values()
                .filter(|c| c.parent_id == Some(comment.id))
                .count() as i64;
            if comment.reply_count != replies {
                return Err(format!(
                    "comment {} reply_count {} != {}",
                    comment.id, comment.reply_count, replies
                ));
            }

            let likes = self.like_rows(LedgerKind::Comment, comment.id) as i64;
            if comment.like_count != likes {
                return Err(format!(
                    "comment {} like_count {} != {}",
                    comment.id, comment.like_count, likes
                ));
            }
        }

        for post in self.posts.values() {
            let comments = self.comments_for_post(post.id) as i64;
            if post.comment_count != comments {
                return Err(format!(
                    "post {} comment_count {} != {}",
                    post.id, post.comment_count, comments
                ));
            }
            let likes = self.like_rows(LedgerKind::Post, post.id) as i64;
            if post.like_count != likes {
                return Err(format!(
                    "post {} like_count {} != {}",
                    post.id, post.like_count, likes
                ));
            }
        }

        for kind in [LedgerKind::Post, LedgerKind::Comment] {
            let mut seen = HashSet::new();
            for like in self.ledger(kind) {
                if !seen.insert((like.target_id, like.user_id)) {
                    return Err(format!(
                        "duplicate {} like ({}, {})",
                        kind.as_str(),
                        like.target_id,
                        like.user_id
                    ));
                }
            }
        }

        if let Some(image) = self.images.iter().find(|i| !self.posts.contains_key(&i.post_id)) {
            return Err(format!("image {} belongs to a missing post", image.id));
        }

        Ok(())
    }
}

/// In-memory `ContentStore`
#[derive(Clone, Default)]
pub struct MemoryContentStore {
    state: Arc<Mutex<MemoryState>>,
    fail_points: Arc<std::sync::Mutex<HashSet<FailPoint>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `point` fail with `StoreError::Injected`.
    pub fn arm(&self, point: FailPoint) {
        self.fail_points
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(point);
    }

    /// Copy of the committed state
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    /// Seed an author profile (profiles are owned outside the content graph)
    pub async fn upsert_profile(&self, profile: AuthorProfile) {
        self.state.lock().await.profiles.insert(profile.id, profile);
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    type Tx = MemoryStoreTx;

    async fn begin(&self) -> StoreResult<MemoryStoreTx> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryStoreTx {
            guard,
            working,
            fail_points: self.fail_points.clone(),
        })
    }

    async fn bump_view_count(&self, post_id: PostId) -> StoreResult<()> {
        if let Some(post) = self.state.lock().await.posts.get_mut(&post_id) {
            post.view_count += 1;
        }
        Ok(())
    }
}

/// Open in-memory transaction
pub struct MemoryStoreTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_points: Arc<std::sync::Mutex<HashSet<FailPoint>>>,
}

impl MemoryStoreTx {
    fn trip(&self, point: FailPoint) -> StoreResult<()> {
        let armed = self
            .fail_points
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&point);
        if armed {
            return Err(StoreError::Injected(point.name()));
        }
        Ok(())
    }
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, i64)) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

fn page<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl StoreTx for MemoryStoreTx {
    async fn commit(self) -> StoreResult<()> {
        let MemoryStoreTx {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_post(
        &mut self,
        author_id: UserId,
        content: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Post> {
        let post = Post {
            id: self.working.allocate_id(),
            author_id,
            content: content.to_string(),
            view_count: 0,
            like_count: 0,
            comment_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.working.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn insert_post_images(
        &mut self,
        post_id: PostId,
        paths: &[String],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<PostImage>> {
        self.trip(FailPoint::InsertPostImages)?;
        let mut created = Vec::with_capacity(paths.len());
        for (order, path) in paths.iter().enumerate() {
            let image = PostImage {
                id: self.working.allocate_id(),
                post_id,
                path: path.clone(),
                display_order: order as i32,
                created_at: now,
            };
            self.working.images.push(image.clone());
            created.push(image);
        }
        Ok(created)
    }

    async fn find_post(&mut self, post_id: PostId) -> StoreResult<Option<Post>> {
        Ok(self.working.posts.get(&post_id).cloned())
    }

    async fn find_post_for_update(&mut self, post_id: PostId) -> StoreResult<Option<Post>> {
        // The whole state is already held for the transaction
        self.find_post(post_id).await
    }

    async fn list_posts(
        &mut self,
        author_id: Option<UserId>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Post>> {
        let mut posts: Vec<Post> = self
            .working
            .posts
            .values()
            .filter(|p| author_id.map_or(true, |a| p.author_id == a))
            .cloned()
            .collect();
        newest_first(&mut posts, |p| (p.created_at, p.id));
        Ok(page(posts, limit, offset))
    }

    async fn count_posts(&mut self, author_id: Option<UserId>) -> StoreResult<i64> {
        Ok(self
            .working
            .posts
            .values()
            .filter(|p| author_id.map_or(true, |a| p.author_id == a))
            .count() as i64)
    }

    async fn images_for_posts(&mut self, post_ids: &[PostId]) -> StoreResult<Vec<PostImage>> {
        let mut images: Vec<PostImage> = self
            .working
            .images
            .iter()
            .filter(|i| post_ids.contains(&i.post_id))
            .cloned()
            .collect();
        images.sort_by_key(|i| (i.post_id, i.display_order));
        Ok(images)
    }

    async fn update_post_content(
        &mut self,
        post_id: PostId,
        content: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        match self.working.posts.get_mut(&post_id) {
            Some(post) => {
                post.content = content.to_string();
                post.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_post_images(&mut self, post_id: PostId) -> StoreResult<u64> {
        let before = self.working.images.len();
        self.working.images.retain(|i| i.post_id != post_id);
        Ok((before - self.working.images.len()) as u64)
    }

    async fn delete_post(&mut self, post_id: PostId) -> StoreResult<u64> {
        self.trip(FailPoint::DeletePost)?;
        Ok(self.working.posts.remove(&post_id).map_or(0, |_| 1))
    }

    async fn adjust_post_like_count(&mut self, post_id: PostId, delta: i64) -> StoreResult<()> {
        self.trip(FailPoint::AdjustPostLikeCount)?;
        if let Some(post) = self.working.posts.get_mut(&post_id) {
            post.like_count += delta;
        }
        Ok(())
    }

    async fn adjust_post_comment_count(
        &mut self,
        post_id: PostId,
        delta: i64,
    ) -> StoreResult<()> {
        self.trip(FailPoint::AdjustPostCommentCount)?;
        if let Some(post) = self.working.posts.get_mut(&post_id) {
            post.comment_count += delta;
        }
        Ok(())
    }

    async fn insert_comment(&mut self, new: CommentInsert<'_>) -> StoreResult<Comment> {
        self.trip(FailPoint::InsertComment)?;
        let comment = Comment {
            id: self.working.allocate_id(),
            post_id: new.post_id,
            author_id: new.author_id,
            parent_id: new.parent_id,
            content: new.content.to_string(),
            like_count: 0,
            reply_count: 0,
            level: new.level,
            created_at: new.now,
            updated_at: new.now,
        };
        self.working.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn find_comment(&mut self, comment_id: CommentId) -> StoreResult<Option<Comment>> {
        Ok(self.working.comments.get(&comment_id).cloned())
    }

    async fn find_comment_for_update(
        &mut self,
        comment_id: CommentId,
    ) -> StoreResult<Option<Comment>> {
        self.find_comment(comment_id).await
    }

    async fn list_top_level_comments(
        &mut self,
        post_id: PostId,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Comment>> {
        let mut comments: Vec<Comment> = self
            .working
            .comments
            .values()
            .filter(|c| c.post_id == post_id && c.level == 0)
            .cloned()
            .collect();
        newest_first(&mut comments, |c| (c.created_at, c.id));
        Ok(page(comments, limit, offset))
    }

    async fn count_top_level_comments(&mut self, post_id: PostId) -> StoreResult<i64> {
        Ok(self
            .working
            .comments
            .values()
            .filter(|c| c.post_id == post_id && c.level == 0)
            .count() as i64)
    }

    async fn children_of(&mut self, parent_ids: &[CommentId]) -> StoreResult<Vec<Comment>> {
        let mut children: Vec<Comment> = self
            .working
            .comments
            .values()
            .filter(|c| c.parent_id.map_or(false, |p| parent_ids.contains(&p)))
            .cloned()
            .collect();
        children.sort_by_key(|c| (c.created_at, c.id));
        Ok(children)
    }

    async fn delete_comments(&mut self, comment_ids: &[CommentId]) -> StoreResult<u64> {
        self.trip(FailPoint::DeleteComments)?;
        let mut removed = 0;
        for id in comment_ids {
            if self.working.comments.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_comments_for_post(&mut self, post_id: PostId) -> StoreResult<u64> {
        self.trip(FailPoint::DeleteCommentsForPost)?;
        let before = self.working.comments.len();
        self.working.comments.retain(|_, c| c.post_id != post_id);
        Ok((before - self.working.comments.len()) as u64)
    }

    async fn adjust_comment_like_count(
        &mut self,
        comment_id: CommentId,
        delta: i64,
    ) -> StoreResult<()> {
        self.trip(FailPoint::AdjustCommentLikeCount)?;
        if let Some(comment) = self.working.comments.get_mut(&comment_id) {
            comment.like_count += delta;
        }
        Ok(())
    }

    async fn adjust_comment_reply_count(
        &mut self,
        comment_id: CommentId,
        delta: i64,
    ) -> StoreResult<()> {
        self.trip(FailPoint::AdjustCommentReplyCount)?;
        if let Some(comment) = self.working.comments.get_mut(&comment_id) {
            comment.reply_count += delta;
        }
        Ok(())
    }

    async fn like_exists(
        &mut self,
        kind: LedgerKind,
        target_id: i64,
        user_id: UserId,
    ) -> StoreResult<bool> {
        Ok(self
            .working
            .ledger(kind)
            .iter()
            .any(|l| l.target_id == target_id && l.user_id == user_id))
    }

    async fn insert_like(
        &mut self,
        kind: LedgerKind,
        target_id: i64,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<LikeRecord> {
        self.trip(FailPoint::InsertLike)?;
        if self.like_exists(kind, target_id, user_id).await? {
            return Err(StoreError::UniqueViolation);
        }
        let record = LikeRecord {
            id: self.working.allocate_id(),
            target_id,
            user_id,
            created_at: now,
        };
        self.working.ledger_mut(kind).push(record.clone());
        Ok(record)
    }

    async fn delete_like(
        &mut self,
        kind: LedgerKind,
        target_id: i64,
        user_id: UserId,
    ) -> StoreResult<u64> {
        let ledger = self.working.ledger_mut(kind);
        let before = ledger.len();
        ledger.retain(|l| !(l.target_id == target_id && l.user_id == user_id));
        Ok((before - ledger.len()) as u64)
    }

    async fn liked_among(
        &mut self,
        kind: LedgerKind,
        user_id: UserId,
        target_ids: &[i64],
    ) -> StoreResult<HashSet<i64>> {
        Ok(self
            .working
            .ledger(kind)
            .iter()
            .filter(|l| l.user_id == user_id && target_ids.contains(&l.target_id))
            .map(|l| l.target_id)
            .collect())
    }

    async fn delete_likes_for_targets(
        &mut self,
        kind: LedgerKind,
        target_ids: &[i64],
    ) -> StoreResult<u64> {
        if kind == LedgerKind::Comment {
            self.trip(FailPoint::DeleteCommentLikes)?;
        }
        let ledger = self.working.ledger_mut(kind);
        let before = ledger.len();
        ledger.retain(|l| !target_ids.contains(&l.target_id));
        Ok((before - ledger.len()) as u64)
    }

    async fn delete_comment_likes_for_post(&mut self, post_id: PostId) -> StoreResult<u64> {
        self.trip(FailPoint::DeleteCommentLikes)?;
        let doomed: HashSet<CommentId> = self
            .working
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .map(|c| c.id)
            .collect();
        let before = self.working.comment_likes.len();
        self.working
            .comment_likes
            .retain(|l| !doomed.contains(&l.target_id));
        Ok((before - self.working.comment_likes.len()) as u64)
    }

    async fn author_profiles(
        &mut self,
        user_ids: &[UserId],
    ) -> StoreResult<HashMap<UserId, AuthorProfile>> {
        Ok(user_ids
            .iter()
            .filter_map(|id| self.working.profiles.get(id).map(|p| (*id, p.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_transaction_is_discarded() {
        let store = MemoryContentStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_post(1, "draft", Utc::now()).await.unwrap();
        drop(tx);
        assert_eq!(store.snapshot().await.post_total(), 0);

        let mut tx = store.begin().await.unwrap();
        tx.insert_post(1, "abandoned", Utc::now()).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.snapshot().await.post_total(), 0);

        let mut tx = store.begin().await.unwrap();
        tx.insert_post(1, "kept", Utc::now()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.snapshot().await.post_total(), 1);
    }

    #[tokio::test]
    async fn test_fail_point_trips_once() {
        let store = MemoryContentStore::new();
        store.arm(FailPoint::DeletePost);

        let mut tx = store.begin().await.unwrap();
        let err = tx.delete_post(1).await.unwrap_err();
        assert!(matches!(err, StoreError::Injected("delete_post")));
        assert_eq!(tx.delete_post(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_like_is_unique_violation() {
        let store = MemoryContentStore::new();
        let mut tx = store.begin().await.unwrap();
        let now = Utc::now();
        tx.insert_like(LedgerKind::Post, 5, 9, now).await.unwrap();
        let err = tx
            .insert_like(LedgerKind::Post, 5, 9, now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation));
        // The comment ledger is independent
        tx.insert_like(LedgerKind::Comment, 5, 9, now).await.unwrap();
    }
}
