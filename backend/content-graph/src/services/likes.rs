/// Like ledger - one like per (user, target), mirrored in the target's
/// `like_count`.
///
/// These helpers run inside a transaction the caller already opened, after
/// the caller has checked that the target exists.
use crate::db::StoreTx;
use crate::error::{ContentError, Result, StoreError};
use crate::metrics;
use crate::models::{LedgerKind, LikeRecord, UserId};
use chrono::Utc;

/// Record a like and bump the target's counter.
///
/// The existence check and the insert share the transaction; the ledger's
/// unique constraint turns a concurrent duplicate into `AlreadyLiked` too.
pub(crate) async fn like<T: StoreTx>(
    tx: &mut T,
    kind: LedgerKind,
    target_id: i64,
    user_id: UserId,
) -> Result<LikeRecord> {
    if tx.like_exists(kind, target_id, user_id).await? {
        metrics::record_rejection("already_liked");
        return Err(ContentError::AlreadyLiked);
    }

    let record = match tx.insert_like(kind, target_id, user_id, Utc::now()).await {
        Ok(record) => record,
        Err(StoreError::UniqueViolation) => {
            metrics::record_rejection("already_liked");
            return Err(ContentError::AlreadyLiked);
        }
        Err(e) => return Err(e.into()),
    };

    adjust_like_count(tx, kind, target_id, 1).await?;
    Ok(record)
}

/// Remove a like and decrement the target's counter.
pub(crate) async fn unlike<T: StoreTx>(
    tx: &mut T,
    kind: LedgerKind,
    target_id: i64,
    user_id: UserId,
) -> Result<()> {
    if !tx.like_exists(kind, target_id, user_id).await? {
        metrics::record_rejection("not_liked");
        return Err(ContentError::NotLiked);
    }

    // A concurrent unlike may have won between the check and the delete
    if tx.delete_like(kind, target_id, user_id).await? == 0 {
        metrics::record_rejection("not_liked");
        return Err(ContentError::NotLiked);
    }

    adjust_like_count(tx, kind, target_id, -1).await
}

async fn adjust_like_count<T: StoreTx>(
    tx: &mut T,
    kind: LedgerKind,
    target_id: i64,
    delta: i64,
) -> Result<()> {
    match kind {
        LedgerKind::Post => tx.adjust_post_like_count(target_id, delta).await?,
        LedgerKind::Comment => tx.adjust_comment_like_count(target_id, delta).await?,
    }
    Ok(())
}
