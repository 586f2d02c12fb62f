//! All-or-nothing behaviour of multi-row mutations
//!
//! Each test arms one store fail point, runs an operation that reaches it,
//! and checks the committed state is exactly what it was before.

mod common;

use common::{comment, comment_chain, consistent_state, create_post, setup, ALICE, BOB, CAROL};
use content_graph::db::FailPoint;
use content_graph::models::{LedgerKind, NewComment, NewPost};
use content_graph::ContentError;

fn assert_store_failure(err: ContentError) {
    assert!(
        matches!(err, ContentError::Store(_)),
        "expected a store failure, got {err:?}"
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_comment_create_rolls_back_parent_counter() {
    let (graph, store) = setup();
    let post_id = create_post(&graph, ALICE).await;
    let root = comment(&graph, post_id, ALICE, None).await;
    let before = consistent_state(&store).await;

    for point in [FailPoint::InsertComment, FailPoint::AdjustPostCommentCount] {
        store.arm(point);
        let err = graph
            .comments()
            .create(NewComment {
                post_id,
                author_id: BOB,
                content: "reply".to_string(),
                parent_id: Some(root.id),
            })
            .await
            .unwrap_err();
        assert_store_failure(err);

        let after = consistent_state(&store).await;
        assert_eq!(after.comment_total(), before.comment_total());
        assert_eq!(after.comment(root.id).unwrap().reply_count, 0);
        assert_eq!(after.post(post_id).unwrap().comment_count, 1);
    }
}

#[tokio::test]
async fn test_like_rolls_back_ledger_row() {
    let (graph, store) = setup();
    let post_id = create_post(&graph, ALICE).await;
    let c = comment(&graph, post_id, ALICE, None).await;

    store.arm(FailPoint::AdjustPostLikeCount);
    assert_store_failure(graph.posts().like(post_id, BOB).await.unwrap_err());

    store.arm(FailPoint::AdjustCommentLikeCount);
    assert_store_failure(graph.comments().like(c.id, BOB).await.unwrap_err());

    let state = consistent_state(&store).await;
    assert_eq!(state.like_total(LedgerKind::Post), 0);
    assert_eq!(state.like_total(LedgerKind::Comment), 0);

    // Nothing was recorded, so the retry succeeds
    graph.posts().like(post_id, BOB).await.unwrap();
    graph.comments().like(c.id, BOB).await.unwrap();
    consistent_state(&store).await;
}

#[tokio::test]
async fn test_unlike_rolls_back_ledger_delete() {
    let (graph, store) = setup();
    let post_id = create_post(&graph, ALICE).await;
    graph.posts().like(post_id, BOB).await.unwrap();

    store.arm(FailPoint::AdjustPostLikeCount);
    assert_store_failure(graph.posts().unlike(post_id, BOB).await.unwrap_err());

    let state = consistent_state(&store).await;
    assert_eq!(state.like_rows(LedgerKind::Post, post_id), 1);
    assert_eq!(state.post(post_id).unwrap().like_count, 1);
}

#[tokio::test]
async fn test_comment_unlike_rolls_back_ledger_delete() {
    let (graph, store) = setup();
    let post_id = create_post(&graph, ALICE).await;
    let c = comment(&graph, post_id, ALICE, None).await;
    graph.comments().like(c.id, BOB).await.unwrap();

    store.arm(FailPoint::AdjustCommentLikeCount);
    assert_store_failure(graph.comments().unlike(c.id, BOB).await.unwrap_err());

    let state = consistent_state(&store).await;
    assert_eq!(state.like_rows(LedgerKind::Comment, c.id), 1);
    assert_eq!(state.comment(c.id).unwrap().like_count, 1);

    graph.comments().unlike(c.id, BOB).await.unwrap();
    let state = consistent_state(&store).await;
    assert_eq!(state.comment(c.id).unwrap().like_count, 0);
}

#[tokio::test]
async fn test_comment_delete_rolls_back_at_every_step() {
    let (graph, store) = setup();
    let post_id = create_post(&graph, ALICE).await;
    let chain = comment_chain(&graph, post_id).await;
    graph.comments().like(chain[2].id, CAROL).await.unwrap();
    let before = consistent_state(&store).await;

    for point in [
        FailPoint::DeleteCommentLikes,
        FailPoint::DeleteComments,
        FailPoint::AdjustCommentReplyCount,
        FailPoint::AdjustPostCommentCount,
    ] {
        store.arm(point);
        assert_store_failure(graph.comments().delete(chain[1].id).await.unwrap_err());

        let after = consistent_state(&store).await;
        assert_eq!(after.comment_total(), before.comment_total(), "{point:?}");
        assert_eq!(after.like_total(LedgerKind::Comment), 1, "{point:?}");
        assert_eq!(after.post(post_id).unwrap().comment_count, 4, "{point:?}");
    }
}

#[tokio::test]
async fn test_post_delete_rolls_back_at_every_step() {
    let (graph, store) = setup();
    let view = graph
        .posts()
        .create(NewPost {
            author_id: ALICE,
            content: "with pictures".to_string(),
            image_paths: vec!["a.jpg".to_string(), "b.jpg".to_string()],
        })
        .await
        .unwrap();
    let post_id = view.post.id;
    let chain = comment_chain(&graph, post_id).await;
    graph.posts().like(post_id, BOB).await.unwrap();
    graph.comments().like(chain[3].id, CAROL).await.unwrap();

    for point in [
        FailPoint::DeleteCommentLikes,
        FailPoint::DeleteCommentsForPost,
        FailPoint::DeletePost,
    ] {
        store.arm(point);
        assert_store_failure(graph.posts().delete(post_id).await.unwrap_err());

        let state = consistent_state(&store).await;
        assert!(state.post(post_id).is_some(), "{point:?}");
        assert_eq!(state.images_for_post(post_id).len(), 2, "{point:?}");
        assert_eq!(state.comments_for_post(post_id), 4, "{point:?}");
        assert_eq!(state.like_total(LedgerKind::Post), 1, "{point:?}");
        assert_eq!(state.like_total(LedgerKind::Comment), 1, "{point:?}");
    }

    graph.posts().delete(post_id).await.unwrap();
    let state = consistent_state(&store).await;
    assert_eq!(state.post_total(), 0);
    assert_eq!(state.comment_total(), 0);
}
