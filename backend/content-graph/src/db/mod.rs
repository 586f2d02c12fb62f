/// Store abstraction for the content graph
///
/// Every multi-row mutation runs inside one `StoreTx`. Counters change only
/// through the typed `adjust_*` operations, which apply a relative delta
/// inside the caller's transaction. Dropping a transaction without calling
/// `commit` rolls it back.
use crate::error::StoreResult;
use crate::models::{
    AuthorProfile, Comment, CommentId, LedgerKind, LikeRecord, Post, PostId, PostImage, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

pub mod memory;
pub mod postgres;

pub use memory::{FailPoint, MemoryContentStore, MemoryState};
pub use postgres::PgContentStore;

/// Values for a new comment row
#[derive(Debug, Clone)]
pub struct CommentInsert<'a> {
    pub post_id: PostId,
    pub author_id: UserId,
    pub parent_id: Option<CommentId>,
    pub content: &'a str,
    pub level: i32,
    pub now: DateTime<Utc>,
}

/// Entry point to a backing store
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    type Tx: StoreTx;

    /// Open a transaction
    async fn begin(&self) -> StoreResult<Self::Tx>;

    /// Add one view to a post outside of any caller transaction.
    /// Concurrent bumps may be lost.
    async fn bump_view_count(&self, post_id: PostId) -> StoreResult<()>;
}

/// Typed operations available inside a transaction
#[async_trait]
pub trait StoreTx: Send {
    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;

    // ---- posts ----

    async fn insert_post(
        &mut self,
        author_id: UserId,
        content: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Post>;

    /// Insert images with `display_order` = position in `paths`
    async fn insert_post_images(
        &mut self,
        post_id: PostId,
        paths: &[String],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<PostImage>>;

    async fn find_post(&mut self, post_id: PostId) -> StoreResult<Option<Post>>;

    /// Like `find_post`, but holds the post row locked until the
    /// transaction ends. Structural comment writes on a post take this lock
    /// first, so they run one at a time per post.
    async fn find_post_for_update(&mut self, post_id: PostId) -> StoreResult<Option<Post>>;

    /// Newest first
    async fn list_posts(
        &mut self,
        author_id: Option<UserId>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Post>>;

    async fn count_posts(&mut self, author_id: Option<UserId>) -> StoreResult<i64>;

    /// Images of the given posts ordered by `display_order`
    async fn images_for_posts(&mut self, post_ids: &[PostId]) -> StoreResult<Vec<PostImage>>;

    /// Returns false when the post does not exist
    async fn update_post_content(
        &mut self,
        post_id: PostId,
        content: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn delete_post_images(&mut self, post_id: PostId) -> StoreResult<u64>;

    async fn delete_post(&mut self, post_id: PostId) -> StoreResult<u64>;

    async fn adjust_post_like_count(&mut self, post_id: PostId, delta: i64) -> StoreResult<()>;

    async fn adjust_post_comment_count(&mut self, post_id: PostId, delta: i64)
        -> StoreResult<()>;

    // ---- comments ----

    async fn insert_comment(&mut self, new: CommentInsert<'_>) -> StoreResult<Comment>;

    async fn find_comment(&mut self, comment_id: CommentId) -> StoreResult<Option<Comment>>;

    /// Like `find_comment`, but holds the comment row locked until the
    /// transaction ends
    async fn find_comment_for_update(
        &mut self,
        comment_id: CommentId,
    ) -> StoreResult<Option<Comment>>;

    /// Level-0 comments of a post, newest first
    async fn list_top_level_comments(
        &mut self,
        post_id: PostId,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Comment>>;

    async fn count_top_level_comments(&mut self, post_id: PostId) -> StoreResult<i64>;

    /// Direct children of any of `parent_ids`, oldest first
    async fn children_of(&mut self, parent_ids: &[CommentId]) -> StoreResult<Vec<Comment>>;

    async fn delete_comments(&mut self, comment_ids: &[CommentId]) -> StoreResult<u64>;

    async fn delete_comments_for_post(&mut self, post_id: PostId) -> StoreResult<u64>;

    async fn adjust_comment_like_count(
        &mut self,
        comment_id: CommentId,
        delta: i64,
    ) -> StoreResult<()>;

    async fn adjust_comment_reply_count(
        &mut self,
        comment_id: CommentId,
        delta: i64,
    ) -> StoreResult<()>;

    // ---- like ledgers ----

    async fn like_exists(
        &mut self,
        kind: LedgerKind,
        target_id: i64,
        user_id: UserId,
    ) -> StoreResult<bool>;

    /// Fails with `StoreError::UniqueViolation` if the pair already exists
    async fn insert_like(
        &mut self,
        kind: LedgerKind,
        target_id: i64,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<LikeRecord>;

    async fn delete_like(
        &mut self,
        kind: LedgerKind,
        target_id: i64,
        user_id: UserId,
    ) -> StoreResult<u64>;

    /// Subset of `target_ids` liked by `user_id`
    async fn liked_among(
        &mut self,
        kind: LedgerKind,
        user_id: UserId,
        target_ids: &[i64],
    ) -> StoreResult<HashSet<i64>>;

    async fn delete_likes_for_targets(
        &mut self,
        kind: LedgerKind,
        target_ids: &[i64],
    ) -> StoreResult<u64>;

    /// Comment-ledger rows whose comment belongs to `post_id`
    async fn delete_comment_likes_for_post(&mut self, post_id: PostId) -> StoreResult<u64>;

    // ---- authors ----

    async fn author_profiles(
        &mut self,
        user_ids: &[UserId],
    ) -> StoreResult<HashMap<UserId, AuthorProfile>>;
}
