/// Post service - post lifecycle, images, post likes and the delete cascade
use super::comments::CommentService;
use super::likes;
use crate::config::PaginationConfig;
use crate::db::{ContentStore, StoreTx};
use crate::error::{ContentError, Result};
use crate::metrics;
use crate::models::{
    LedgerKind, LikeRecord, NewPost, Page, PageRequest, Post, PostId, PostImage, PostView, UserId,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::Validate;

/// What a committed post delete removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostCascade {
    pub images_removed: u64,
    pub post_likes_removed: u64,
    pub comments_removed: u64,
    pub comment_likes_removed: u64,
}

pub struct PostService<S: ContentStore> {
    store: Arc<S>,
    comments: CommentService<S>,
    pagination: PaginationConfig,
}

impl<S: ContentStore> Clone for PostService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            comments: self.comments.clone(),
            pagination: self.pagination,
        }
    }
}

impl<S: ContentStore> PostService<S> {
    pub fn new(store: Arc<S>, comments: CommentService<S>, pagination: PaginationConfig) -> Self {
        Self {
            store,
            comments,
            pagination,
        }
    }

    /// Create a post and its images in one transaction
    pub async fn create(&self, new: NewPost) -> Result<PostView> {
        new.validate()?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let post = tx.insert_post(new.author_id, &new.content, now).await?;
        let images = if new.image_paths.is_empty() {
            Vec::new()
        } else {
            tx.insert_post_images(post.id, &new.image_paths, now)
                .await?
        };
        let author = tx
            .author_profiles(&[post.author_id])
            .await?
            .remove(&post.author_id);

        tx.commit().await?;

        debug!(post_id = post.id, images = images.len(), "post created");
        Ok(PostView {
            post,
            images,
            liked: false,
            author,
        })
    }

    /// Load a post for `viewer_id` and count the view.
    ///
    /// The returned `view_count` is the value before this view. The bump
    /// runs after the read has committed; if it fails the read still
    /// succeeds.
    pub async fn get(&self, post_id: PostId, viewer_id: UserId) -> Result<PostView> {
        let mut tx = self.store.begin().await?;

        let post = tx
            .find_post(post_id)
            .await?
            .ok_or(ContentError::PostNotFound(post_id))?;
        let mut views = hydrate(&mut tx, vec![post], viewer_id).await?;

        tx.commit().await?;

        if let Err(e) = self.store.bump_view_count(post_id).await {
            warn!(post_id, error = %e, "failed to record post view");
        }

        views.pop().ok_or(ContentError::PostNotFound(post_id))
    }

    /// Page through posts newest first, optionally for a single author
    pub async fn list(
        &self,
        page: i64,
        page_size: i64,
        author_id: Option<UserId>,
        viewer_id: UserId,
    ) -> Result<Page<PostView>> {
        let request = PageRequest::new(page, page_size, &self.pagination);
        let mut tx = self.store.begin().await?;

        let total = tx.count_posts(author_id).await?;
        let posts = tx
            .list_posts(author_id, request.limit(), request.offset())
            .await?;
        let items = hydrate(&mut tx, posts, viewer_id).await?;

        tx.commit().await?;
        Ok(Page::new(items, total, request))
    }

    /// Replace a post's content. Images are not touched.
    pub async fn update(&self, post_id: PostId, content: &str) -> Result<Post> {
        crate::models::non_blank(content).map_err(|e| {
            ContentError::InvalidInput(
                e.message
                    .map(|m| m.into_owned())
                    .unwrap_or_else(|| "content is blank".to_string()),
            )
        })?;

        let mut tx = self.store.begin().await?;

        if !tx.update_post_content(post_id, content, Utc::now()).await? {
            return Err(ContentError::PostNotFound(post_id));
        }
        let post = tx
            .find_post(post_id)
            .await?
            .ok_or(ContentError::PostNotFound(post_id))?;

        tx.commit().await?;

        debug!(post_id, "post updated");
        Ok(post)
    }

    /// Delete a post with its images, post likes, every comment and every
    /// like on those comments. Nothing is removed unless everything is.
    pub async fn delete(&self, post_id: PostId) -> Result<PostCascade> {
        let mut tx = self.store.begin().await?;

        if tx.find_post_for_update(post_id).await?.is_none() {
            return Err(ContentError::PostNotFound(post_id));
        }

        let images_removed = tx.delete_post_images(post_id).await?;
        let post_likes_removed = tx
            .delete_likes_for_targets(LedgerKind::Post, &[post_id])
            .await?;
        let purge = self.comments.delete_all_for_post(&mut tx, post_id).await?;

        if tx.delete_post(post_id).await? == 0 {
            return Err(ContentError::PostNotFound(post_id));
        }

        tx.commit().await?;

        let cascade = PostCascade {
            images_removed,
            post_likes_removed,
            comments_removed: purge.comments_removed,
            comment_likes_removed: purge.likes_removed,
        };
        metrics::record_cascade_rows("posts", 1);
        metrics::record_cascade_rows("post_images", cascade.images_removed);
        metrics::record_cascade_rows("post_likes", cascade.post_likes_removed);
        metrics::record_cascade_rows("comments", cascade.comments_removed);
        metrics::record_cascade_rows("comment_likes", cascade.comment_likes_removed);
        info!(
            post_id,
            images = cascade.images_removed,
            post_likes = cascade.post_likes_removed,
            comments = cascade.comments_removed,
            comment_likes = cascade.comment_likes_removed,
            "post deleted"
        );

        Ok(cascade)
    }

    pub async fn like(&self, post_id: PostId, user_id: UserId) -> Result<LikeRecord> {
        let mut tx = self.store.begin().await?;

        if tx.find_post(post_id).await?.is_none() {
            return Err(ContentError::PostNotFound(post_id));
        }
        let record = likes::like(&mut tx, LedgerKind::Post, post_id, user_id).await?;

        tx.commit().await?;

        metrics::record_like(LedgerKind::Post.as_str(), "like");
        debug!(post_id, user_id, "post liked");
        Ok(record)
    }

    pub async fn unlike(&self, post_id: PostId, user_id: UserId) -> Result<()> {
        let mut tx = self.store.begin().await?;

        if tx.find_post(post_id).await?.is_none() {
            return Err(ContentError::PostNotFound(post_id));
        }
        likes::unlike(&mut tx, LedgerKind::Post, post_id, user_id).await?;

        tx.commit().await?;

        metrics::record_like(LedgerKind::Post.as_str(), "unlike");
        debug!(post_id, user_id, "post unliked");
        Ok(())
    }
}

/// Attach images, liked flags and authors to `posts`, keeping their order
async fn hydrate<T: StoreTx>(
    tx: &mut T,
    posts: Vec<Post>,
    viewer_id: UserId,
) -> Result<Vec<PostView>> {
    if posts.is_empty() {
        return Ok(Vec::new());
    }

    let post_ids: Vec<PostId> = posts.iter().map(|p| p.id).collect();
    let mut author_ids: Vec<UserId> = posts.iter().map(|p| p.author_id).collect();
    author_ids.sort_unstable();
    author_ids.dedup();

    let mut images: HashMap<PostId, Vec<PostImage>> = HashMap::new();
    for image in tx.images_for_posts(&post_ids).await? {
        images.entry(image.post_id).or_default().push(image);
    }
    let liked = tx
        .liked_among(LedgerKind::Post, viewer_id, &post_ids)
        .await?;
    let authors = tx.author_profiles(&author_ids).await?;

    Ok(posts
        .into_iter()
        .map(|post| PostView {
            images: images.remove(&post.id).unwrap_or_default(),
            liked: liked.contains(&post.id),
            author: authors.get(&post.author_id).cloned(),
            post,
        })
        .collect())
}
