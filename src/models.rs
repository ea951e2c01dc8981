use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = i64;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub date_joined: DateTime<Utc>,
}
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
}

/// A community posts can be filed under. Listed by title.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub description: String,
}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGroup {
    pub title: String,
    pub slug: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub text: String,
    pub pub_date: DateTime<Utc>,
    pub author_id: Option<Id>,
    pub group_id: Option<Id>,
    pub image_hash: Option<String>, // content address under the media store
    pub image_mime: Option<String>,
}
#[derive(Debug, Clone)]
pub struct NewPost {
    pub text: String,
    pub author_id: Id,
    pub group_id: Option<Id>,
    pub image: Option<ImageRef>,
}

/// Partial update applied by the post edit form.
#[derive(Debug, Clone)]
pub struct UpdatePost {
    pub text: String,
    pub group_id: Option<Id>,
    pub image: ImageChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub hash: String,
    pub mime: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChange {
    Keep,
    Clear,
    Replace(ImageRef),
}

/// Post joined with the bits every listing needs to render a card.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PostCard {
    pub id: Id,
    pub text: String,
    pub pub_date: DateTime<Utc>,
    pub author_id: Option<Id>,
    pub author_username: Option<String>,
    pub group_id: Option<Id>,
    pub group_slug: Option<String>,
    pub group_title: Option<String>,
    pub image_hash: Option<String>,
    pub image_mime: Option<String>,
    pub comment_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostFilter {
    All,
    Group(Id),
    Author(Id),
    /// Posts whose author is followed by the given user.
    FollowedBy(Id),
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub post_id: Option<Id>,
    pub author_id: Option<Id>,
    pub text: String,
    pub created: DateTime<Utc>,
}
#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: Id,
    pub author_id: Id,
    pub text: String,
}

/// Comment with its author's username, oldest first on the detail page.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CommentView {
    pub id: Id,
    pub text: String,
    pub created: DateTime<Utc>,
    pub author_username: Option<String>,
}

/// Directed edge: `user_id` follows `author_id`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Follow {
    pub id: Id,
    pub user_id: Id,
    pub author_id: Id,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowStats {
    pub followers: i64,
    pub following: i64,
}
