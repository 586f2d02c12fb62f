/// Data models for the content graph
///
/// Row types mirror the tables in `migrations/`; the `*View`/`*Node` types
/// are hydrated read models returned to callers.
use crate::config::PaginationConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

pub type PostId = i64;
pub type CommentId = i64;
pub type UserId = i64;

/// Deepest allowed comment level; top-level comments are level 0.
pub const MAX_COMMENT_LEVEL: i32 = 3;

/// Most images a single post may carry.
pub const MAX_POST_IMAGES: usize = 9;

/// Post row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: PostId,
    #[sqlx(rename = "user_id")]
    pub author_id: UserId,
    pub content: String,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Image attached to a post, kept in insertion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostImage {
    pub id: i64,
    pub post_id: PostId,
    #[sqlx(rename = "image_path")]
    pub path: String,
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
}

/// Comment row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    #[sqlx(rename = "user_id")]
    pub author_id: UserId,
    pub parent_id: Option<CommentId>,
    pub content: String,
    pub like_count: i64,
    pub reply_count: i64,
    pub level: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_top_level(&self) -> bool {
        self.level == 0
    }
}

/// Ledger row: `user_id` liked `target_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LikeRecord {
    pub id: i64,
    pub target_id: i64,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Which of the two like ledgers an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Post,
    Comment,
}

impl LedgerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerKind::Post => "post",
            LedgerKind::Comment => "comment",
        }
    }
}

/// Public projection of a user profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthorProfile {
    pub id: UserId,
    pub nickname: String,
    pub avatar: String,
}

/// Post with images, viewer like flag and author
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub images: Vec<PostImage>,
    pub liked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorProfile>,
}

/// Comment with its reply subtree (oldest reply first)
#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub liked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorProfile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.replies
            .iter()
            .map(|reply| 1 + reply.descendant_count())
            .sum()
    }
}

/// Input for creating a post
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPost {
    pub author_id: UserId,
    #[validate(custom(function = "non_blank"))]
    pub content: String,
    /// Already-stored image paths, in display order
    #[validate(length(max = 9, message = "Maximum of 9 images allowed"))]
    #[serde(default)]
    pub image_paths: Vec<String>,
}

/// Input for creating a comment
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewComment {
    pub post_id: PostId,
    pub author_id: UserId,
    #[validate(custom(function = "non_blank"))]
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<CommentId>,
}

pub(crate) fn non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Content is required".into());
        return Err(err);
    }
    Ok(())
}

/// Normalised page coordinates (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    /// Clamp raw caller input: `page < 1` becomes 1, a non-positive size
    /// becomes the default, and sizes above the maximum are capped.
    pub fn new(page: i64, page_size: i64, limits: &PaginationConfig) -> Self {
        let page = page.max(1);
        let page_size = if page_size < 1 {
            limits.default_page_size
        } else {
            page_size.min(limits.max_page_size)
        };
        Self { page, page_size }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

/// One page of results plus the total row count
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_normalisation() {
        let limits = PaginationConfig::default();

        let req = PageRequest::new(0, 0, &limits);
        assert_eq!(req, PageRequest { page: 1, page_size: 10 });
        assert_eq!(req.offset(), 0);

        let req = PageRequest::new(3, 500, &limits);
        assert_eq!(req.page_size, 50);
        assert_eq!(req.offset(), 100);

        let req = PageRequest::new(-2, 7, &limits);
        assert_eq!(req, PageRequest { page: 1, page_size: 7 });
    }

    #[test]
    fn test_new_post_validation() {
        let post = NewPost {
            author_id: 1,
            content: "  ".to_string(),
            image_paths: vec![],
        };
        assert!(post.validate().is_err());

        let post = NewPost {
            author_id: 1,
            content: "hello".to_string(),
            image_paths: (0..MAX_POST_IMAGES).map(|i| format!("posts/{i}.jpg")).collect(),
        };
        assert!(post.validate().is_ok());

        let post = NewPost {
            image_paths: (0..=MAX_POST_IMAGES).map(|i| format!("posts/{i}.jpg")).collect(),
            ..post
        };
        assert!(post.validate().is_err());
    }

    #[test]
    fn test_new_comment_requires_content() {
        let comment = NewComment {
            post_id: 1,
            author_id: 2,
            content: "\n\t".to_string(),
            parent_id: None,
        };
        assert!(comment.validate().is_err());
    }

    #[test]
    fn test_top_level_is_level_zero() {
        let at = chrono::Utc::now();
        let root = Comment {
            id: 1,
            post_id: 1,
            author_id: 5,
            parent_id: None,
            content: "root".to_string(),
            like_count: 0,
            reply_count: 1,
            level: 0,
            created_at: at,
            updated_at: at,
        };
        assert!(root.is_top_level());

        let reply = Comment {
            id: 2,
            parent_id: Some(1),
            level: 1,
            ..root
        };
        assert!(!reply.is_top_level());
    }

    #[test]
    fn test_ledger_kind_labels() {
        assert_eq!(LedgerKind::Post.as_str(), "post");
        assert_eq!(LedgerKind::Comment.as_str(), "comment");
    }

    #[test]
    fn test_comment_node_serialises_flat() {
        let at = chrono::Utc::now();
        let reply = Comment {
            id: 2,
            post_id: 1,
            author_id: 5,
            parent_id: Some(1),
            content: "reply".to_string(),
            like_count: 0,
            reply_count: 0,
            level: 1,
            created_at: at,
            updated_at: at,
        };
        let node = CommentNode {
            comment: Comment {
                id: 1,
                parent_id: None,
                level: 0,
                reply_count: 1,
                content: "root".to_string(),
                ..reply.clone()
            },
            liked: true,
            author: None,
            replies: vec![CommentNode {
                comment: reply,
                liked: false,
                author: None,
                replies: vec![],
            }],
        };

        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["liked"], true);
        assert!(json.get("author").is_none());
        assert_eq!(json["replies"][0]["parent_id"], 1);
        assert!(json["replies"][0].get("replies").is_none());
    }
}
