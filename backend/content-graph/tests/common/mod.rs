//! Shared fixtures for content-graph integration tests
#![allow(dead_code)]

use content_graph::config::PaginationConfig;
use content_graph::db::{MemoryContentStore, MemoryState};
use content_graph::models::{Comment, CommentId, NewComment, NewPost, PostId, UserId};
use content_graph::ContentGraph;

pub const ALICE: UserId = 1;
pub const BOB: UserId = 2;
pub const CAROL: UserId = 3;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "content_graph=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// A fresh in-memory graph plus a handle on the same store
pub fn setup() -> (ContentGraph<MemoryContentStore>, MemoryContentStore) {
    init_tracing();
    let store = MemoryContentStore::new();
    let graph = ContentGraph::new(store.clone(), PaginationConfig::default());
    (graph, store)
}

pub async fn create_post(graph: &ContentGraph<MemoryContentStore>, author_id: UserId) -> PostId {
    graph
        .posts()
        .create(NewPost {
            author_id,
            content: format!("post by {author_id}"),
            image_paths: vec![],
        })
        .await
        .expect("failed to create post")
        .post
        .id
}

pub async fn comment(
    graph: &ContentGraph<MemoryContentStore>,
    post_id: PostId,
    author_id: UserId,
    parent_id: Option<CommentId>,
) -> Comment {
    graph
        .comments()
        .create(NewComment {
            post_id,
            author_id,
            content: format!("comment by {author_id}"),
            parent_id,
        })
        .await
        .expect("failed to create comment")
}

/// Build a chain root -> level 1 -> level 2 -> level 3 and return it
pub async fn comment_chain(
    graph: &ContentGraph<MemoryContentStore>,
    post_id: PostId,
) -> Vec<Comment> {
    let mut chain: Vec<Comment> = Vec::new();
    for depth in 0..4 {
        let parent_id = chain.last().map(|c| c.id);
        let author_id = if depth % 2 == 0 { ALICE } else { BOB };
        chain.push(comment(graph, post_id, author_id, parent_id).await);
    }
    chain
}

/// Committed state, after asserting every counter matches its rows
pub async fn consistent_state(store: &MemoryContentStore) -> MemoryState {
    let state = store.snapshot().await;
    if let Err(violation) = state.check_invariants() {
        panic!("store is inconsistent: {violation}");
    }
    state
}
