use super::{CommentInsert, ContentStore, StoreTx};
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    AuthorProfile, Comment, CommentId, LedgerKind, LikeRecord, Post, PostId, PostImage, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use tracing::debug;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const POST_COLUMNS: &str =
    "id, user_id, content, view_count, like_count, comment_count, created_at, updated_at";

const COMMENT_COLUMNS: &str = "id, post_id, user_id, parent_id, content, like_count, reply_count, \
     level, created_at, updated_at";

/// Static SQL for one like ledger. Both ledgers share the same shape; only
/// the table and target column differ.
struct LedgerSql {
    exists: &'static str,
    insert: &'static str,
    delete: &'static str,
    liked_among: &'static str,
    delete_for_targets: &'static str,
}

const POST_LEDGER: LedgerSql = LedgerSql {
    exists: "SELECT EXISTS(SELECT 1 FROM post_likes WHERE post_id = $1 AND user_id = $2)",
    insert: r#"
        INSERT INTO post_likes (post_id, user_id, created_at)
        VALUES ($1, $2, $3)
        RETURNING id, post_id AS target_id, user_id, created_at
    "#,
    delete: "DELETE FROM post_likes WHERE post_id = $1 AND user_id = $2",
    liked_among: "SELECT post_id FROM post_likes WHERE user_id = $1 AND post_id = ANY($2)",
    delete_for_targets: "DELETE FROM post_likes WHERE post_id = ANY($1)",
};

const COMMENT_LEDGER: LedgerSql = LedgerSql {
    exists: "SELECT EXISTS(SELECT 1 FROM comment_likes WHERE comment_id = $1 AND user_id = $2)",
    insert: r#"
        INSERT INTO comment_likes (comment_id, user_id, created_at)
        VALUES ($1, $2, $3)
        RETURNING id, comment_id AS target_id, user_id, created_at
    "#,
    delete: "DELETE FROM comment_likes WHERE comment_id = $1 AND user_id = $2",
    liked_among: "SELECT comment_id FROM comment_likes WHERE user_id = $1 AND comment_id = ANY($2)",
    delete_for_targets: "DELETE FROM comment_likes WHERE comment_id = ANY($1)",
};

fn ledger_sql(kind: LedgerKind) -> &'static LedgerSql {
    match kind {
        LedgerKind::Post => &POST_LEDGER,
        LedgerKind::Comment => &COMMENT_LEDGER,
    }
}

/// PostgreSQL-backed content store
#[derive(Clone)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a verified pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let db_config = config.to_db_config();
        db_config.log_config();
        let pool = db_pool::create_pool(db_config).await?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        db_pool::migrate(&self.pool, &MIGRATOR)
            .await
            .map_err(|e| StoreError::Database(e.into()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    type Tx = PgStoreTx;

    async fn begin(&self) -> StoreResult<PgStoreTx> {
        let tx = self.pool.begin().await?;
        Ok(PgStoreTx { tx })
    }

    async fn bump_view_count(&self, post_id: PostId) -> StoreResult<()> {
        sqlx::query("UPDATE posts SET view_count = view_count + 1 WHERE id = $1")
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Open PostgreSQL transaction
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn insert_post(
        &mut self,
        author_id: UserId,
        content: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Post> {
        let post = sqlx::query_as::<_, Post>(&format!(
            r#"
            INSERT INTO posts (user_id, content, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(author_id)
        .bind(content)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(post)
    }

    async fn insert_post_images(
        &mut self,
        post_id: PostId,
        paths: &[String],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<PostImage>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let orders: Vec<i32> = (0..paths.len() as i32).collect();
        let mut images = sqlx::query_as::<_, PostImage>(
            r#"
            INSERT INTO post_images (post_id, image_path, display_order, created_at)
            SELECT $1, path, ord, $4
            FROM UNNEST($2::varchar[], $3::int4[]) AS t(path, ord)
            RETURNING id, post_id, image_path, display_order, created_at
            "#,
        )
        .bind(post_id)
        .bind(paths)
        .bind(&orders)
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;

        images.sort_by_key(|img| img.display_order);
        Ok(images)
    }

    async fn find_post(&mut self, post_id: PostId) -> StoreResult<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1"
        ))
        .bind(post_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(post)
    }

    async fn find_post_for_update(&mut self, post_id: PostId) -> StoreResult<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1 FOR UPDATE"
        ))
        .bind(post_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(post)
    }

    async fn list_posts(
        &mut self,
        author_id: Option<UserId>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts
            WHERE ($1::BIGINT IS NULL OR user_id = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(author_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(posts)
    }

    async fn count_posts(&mut self, author_id: Option<UserId>) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM posts WHERE ($1::BIGINT IS NULL OR user_id = $1)",
        )
        .bind(author_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(count)
    }

    async fn images_for_posts(&mut self, post_ids: &[PostId]) -> StoreResult<Vec<PostImage>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let images = sqlx::query_as::<_, PostImage>(
            r#"
            SELECT id, post_id, image_path, display_order, created_at
            FROM post_images
            WHERE post_id = ANY($1)
            ORDER BY post_id, display_order
            "#,
        )
        .bind(post_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(images)
    }

    async fn update_post_content(
        &mut self,
        post_id: PostId,
        content: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE posts SET content = $1, updated_at = $2 WHERE id = $3")
            .bind(content)
            .bind(now)
            .bind(post_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_post_images(&mut self, post_id: PostId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM post_images WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_post(&mut self, post_id: PostId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn adjust_post_like_count(&mut self, post_id: PostId, delta: i64) -> StoreResult<()> {
        sqlx::query("UPDATE posts SET like_count = like_count + $1 WHERE id = $2")
            .bind(delta)
            .bind(post_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn adjust_post_comment_count(
        &mut self,
        post_id: PostId,
        delta: i64,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE posts SET comment_count = comment_count + $1 WHERE id = $2")
            .bind(delta)
            .bind(post_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_comment(&mut self, new: CommentInsert<'_>) -> StoreResult<Comment> {
        let comment = sqlx::query_as::<_, Comment>(&format!(
            r#"
            INSERT INTO comments (post_id, user_id, parent_id, content, level, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {COMMENT_COLUMNS}
            "#
        ))
        .bind(new.post_id)
        .bind(new.author_id)
        .bind(new.parent_id)
        .bind(new.content)
        .bind(new.level)
        .bind(new.now)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(comment)
    }

    async fn find_comment(&mut self, comment_id: CommentId) -> StoreResult<Option<Comment>> {
        let comment = sqlx::query_as::<_, Comment>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1"
        ))
        .bind(comment_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(comment)
    }

    async fn find_comment_for_update(
        &mut self,
        comment_id: CommentId,
    ) -> StoreResult<Option<Comment>> {
        let comment = sqlx::query_as::<_, Comment>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1 FOR UPDATE"
        ))
        .bind(comment_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(comment)
    }

    async fn list_top_level_comments(
        &mut self,
        post_id: PostId,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Comment>> {
        let comments = sqlx::query_as::<_, Comment>(&format!(
            r#"
            SELECT {COMMENT_COLUMNS}
            FROM comments
            WHERE post_id = $1 AND level = 0
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(post_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(comments)
    }

    async fn count_top_level_comments(&mut self, post_id: PostId) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE post_id = $1 AND level = 0")
                .bind(post_id)
                .fetch_one(&mut *self.tx)
                .await?;

        Ok(count)
    }

    async fn children_of(&mut self, parent_ids: &[CommentId]) -> StoreResult<Vec<Comment>> {
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }

        let comments = sqlx::query_as::<_, Comment>(&format!(
            r#"
            SELECT {COMMENT_COLUMNS}
            FROM comments
            WHERE parent_id = ANY($1)
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(parent_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(comments)
    }

    async fn delete_comments(&mut self, comment_ids: &[CommentId]) -> StoreResult<u64> {
        if comment_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM comments WHERE id = ANY($1)")
            .bind(comment_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_comments_for_post(&mut self, post_id: PostId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM comments WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn adjust_comment_like_count(
        &mut self,
        comment_id: CommentId,
        delta: i64,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE comments SET like_count = like_count + $1 WHERE id = $2")
            .bind(delta)
            .bind(comment_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn adjust_comment_reply_count(
        &mut self,
        comment_id: CommentId,
        delta: i64,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE comments SET reply_count = reply_count + $1 WHERE id = $2")
            .bind(delta)
            .bind(comment_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn like_exists(
        &mut self,
        kind: LedgerKind,
        target_id: i64,
        user_id: UserId,
    ) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(ledger_sql(kind).exists)
            .bind(target_id)
            .bind(user_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn insert_like(
        &mut self,
        kind: LedgerKind,
        target_id: i64,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<LikeRecord> {
        let result = sqlx::query_as::<_, LikeRecord>(ledger_sql(kind).insert)
            .bind(target_id)
            .bind(user_id)
            .bind(now)
            .fetch_one(&mut *self.tx)
            .await;

        match result {
            Ok(record) => Ok(record),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                debug!(
                    ledger = kind.as_str(),
                    target_id,
                    user_id,
                    "like rejected by unique constraint"
                );
                Err(StoreError::UniqueViolation)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_like(
        &mut self,
        kind: LedgerKind,
        target_id: i64,
        user_id: UserId,
    ) -> StoreResult<u64> {
        let result = sqlx::query(ledger_sql(kind).delete)
            .bind(target_id)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn liked_among(
        &mut self,
        kind: LedgerKind,
        user_id: UserId,
        target_ids: &[i64],
    ) -> StoreResult<HashSet<i64>> {
        if target_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let liked: Vec<i64> = sqlx::query_scalar(ledger_sql(kind).liked_among)
            .bind(user_id)
            .bind(target_ids)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(liked.into_iter().collect())
    }

    async fn delete_likes_for_targets(
        &mut self,
        kind: LedgerKind,
        target_ids: &[i64],
    ) -> StoreResult<u64> {
        if target_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(ledger_sql(kind).delete_for_targets)
            .bind(target_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_comment_likes_for_post(&mut self, post_id: PostId) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM comment_likes
            WHERE comment_id IN (SELECT id FROM comments WHERE post_id = $1)
            "#,
        )
        .bind(post_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn author_profiles(
        &mut self,
        user_ids: &[UserId],
    ) -> StoreResult<HashMap<UserId, AuthorProfile>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let profiles = sqlx::query_as::<_, AuthorProfile>(
            r#"
            SELECT id, user_nickname AS nickname, user_avatar AS avatar
            FROM user_profiles
            WHERE id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(profiles.into_iter().map(|p| (p.id, p)).collect())
    }
}
