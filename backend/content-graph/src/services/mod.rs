/// Business logic layer for the content graph
///
/// - Post service: post lifecycle, images, post likes, delete cascade
/// - Comment service: reply trees, comment likes, subtree deletes
///
/// Every public operation opens its own store transaction and commits only
/// when all of its writes succeeded.
mod comment_tree;
pub mod comments;
mod likes;
pub mod posts;

pub use comments::{CommentCascade, CommentService, PostCommentsPurge};
pub use posts::{PostCascade, PostService};

use crate::config::PaginationConfig;
use crate::db::ContentStore;
use std::sync::Arc;

/// Both services wired to one store
pub struct ContentGraph<S: ContentStore> {
    posts: PostService<S>,
    comments: CommentService<S>,
}

impl<S: ContentStore> Clone for ContentGraph<S> {
    fn clone(&self) -> Self {
        Self {
            posts: self.posts.clone(),
            comments: self.comments.clone(),
        }
    }
}

impl<S: ContentStore> ContentGraph<S> {
    pub fn new(store: S, pagination: PaginationConfig) -> Self {
        let store = Arc::new(store);
        let comments = CommentService::new(store.clone(), pagination);
        let posts = PostService::new(store, comments.clone(), pagination);
        Self { posts, comments }
    }

    pub fn posts(&self) -> &PostService<S> {
        &self.posts
    }

    pub fn comments(&self) -> &CommentService<S> {
        &self.comments
    }
}
