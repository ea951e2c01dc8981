use std::sync::Arc;

use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("storage failure: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            // referenced row vanished between lookup and insert
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepoError::NotFound,
            other => RepoError::Internal(other.to_string()),
        }
    }
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<User>;
    /// Removes the user together with their posts, comments and follow edges.
    async fn delete_user(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait GroupRepo: Send + Sync {
    async fn list_groups(&self) -> RepoResult<Vec<Group>>;
    async fn get_group(&self, id: Id) -> RepoResult<Group>;
    async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group>;
    async fn create_group(&self, new: NewGroup) -> RepoResult<Group>;
    /// Removes the group and every post filed under it.
    async fn delete_group(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn count_posts(&self, filter: PostFilter) -> RepoResult<i64>;
    /// Newest first.
    async fn list_posts(&self, filter: PostFilter, limit: i64, offset: i64) -> RepoResult<Vec<PostCard>>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    async fn get_post_card(&self, id: Id) -> RepoResult<PostCard>;
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Oldest first.
    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<CommentView>>;
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
}

#[async_trait]
pub trait FollowRepo: Send + Sync {
    /// Returns `false` when the edge already existed. Check and insert are atomic.
    async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<bool>;
    /// Removes every matching edge; zero is not an error.
    async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<u64>;
    async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool>;
    async fn follow_stats(&self, user_id: Id) -> RepoResult<FollowStats>;
    /// Usernames the user follows, ordered by author.
    async fn list_followed_authors(&self, user_id: Id) -> RepoResult<Vec<String>>;
}

pub trait Repo: UserRepo + GroupRepo + PostRepo + CommentRepo + FollowRepo {}

impl<T> Repo for T where T: UserRepo + GroupRepo + PostRepo + CommentRepo + FollowRepo {}

pub type SharedRepo = Arc<dyn Repo>;

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
    use tracing::{error, info, warn};

    const SNAPSHOT_FILE: &str = "state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: BTreeMap<Id, User>,
        groups: BTreeMap<Id, Group>,
        posts: BTreeMap<Id, Post>,
        comments: BTreeMap<Id, Comment>,
        follows: BTreeMap<Id, Follow>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn card(&self, p: &Post) -> PostCard {
            let author = p.author_id.and_then(|id| self.users.get(&id));
            let group = p.group_id.and_then(|id| self.groups.get(&id));
            PostCard {
                id: p.id,
                text: p.text.clone(),
                pub_date: p.pub_date,
                author_id: p.author_id,
                author_username: author.map(|u| u.username.clone()),
                group_id: p.group_id,
                group_slug: group.map(|g| g.slug.clone()),
                group_title: group.map(|g| g.title.clone()),
                image_hash: p.image_hash.clone(),
                image_mime: p.image_mime.clone(),
                comment_count: self.comments.values().filter(|c| c.post_id == Some(p.id)).count() as i64,
            }
        }

        fn matching(&self, filter: PostFilter) -> Vec<&Post> {
            let followed: HashSet<Id> = match filter {
                PostFilter::FollowedBy(uid) => self.follows.values()
                    .filter(|f| f.user_id == uid)
                    .map(|f| f.author_id)
                    .collect(),
                _ => HashSet::new(),
            };
            let mut v: Vec<&Post> = self.posts.values()
                .filter(|p| match filter {
                    PostFilter::All => true,
                    PostFilter::Group(gid) => p.group_id == Some(gid),
                    PostFilter::Author(uid) => p.author_id == Some(uid),
                    PostFilter::FollowedBy(_) => p.author_id.is_some_and(|a| followed.contains(&a)),
                })
                .collect();
            v.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then(b.id.cmp(&a.id)));
            v
        }

        fn drop_posts_where(&mut self, pred: impl Fn(&Post) -> bool) {
            let doomed: HashSet<Id> = self.posts.values().filter(|p| pred(p)).map(|p| p.id).collect();
            self.posts.retain(|id, _| !doomed.contains(id));
            self.comments.retain(|_, c| !c.post_id.is_some_and(|pid| doomed.contains(&pid)));
        }
    }

    /// Process-local backend. Optionally snapshots to `<dir>/state.json` after each write.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
        // serializes snapshot writes so an older state never lands after a newer one
        persist_lock: Arc<Mutex<()>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self {
                state: Arc::new(RwLock::new(State::default())),
                snapshot_path: None,
                persist_lock: Arc::new(Mutex::new(())),
            }
        }

        pub fn with_snapshot(dir: impl AsRef<Path>) -> Self {
            let path = dir.as_ref().join(SNAPSHOT_FILE);
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
                persist_lock: Arc::new(Mutex::new(())),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!(path = %path.display(), "loaded snapshot");
                        s
                    }
                    Err(e) => {
                        warn!(path = %path.display(), "failed to parse snapshot, starting empty: {e}");
                        State::default()
                    }
                },
                Err(e) => {
                    info!(path = %path.display(), "no snapshot, starting empty: {e}");
                    State::default()
                }
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let Ok(_guard) = self.persist_lock.lock() else {
                error!("snapshot lock poisoned");
                return;
            };
            let bytes = match self.read().map(|s| serde_json::to_vec_pretty(&*s)) {
                Ok(Ok(b)) => b,
                Ok(Err(e)) => { error!("failed to encode snapshot: {e}"); return; }
                Err(e) => { error!("failed to read state for snapshot: {e}"); return; }
            };
            if let Some(dir) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    error!(dir = %dir.display(), "failed to create snapshot dir: {e}");
                    return;
                }
            }
            if let Err(e) = std::fs::write(path, bytes) {
                error!(path = %path.display(), "failed to write snapshot: {e}");
            }
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.write()?;
            if s.users.values().any(|u| u.username == new.username) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let user = User {
                id,
                username: new.username,
                password_hash: new.password_hash,
                is_admin: new.is_admin,
                date_joined: Utc::now(),
            };
            s.users.insert(id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            self.read()?.users.values().find(|u| u.username == username).cloned().ok_or(RepoError::NotFound)
        }
        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if s.users.remove(&id).is_none() { return Err(RepoError::NotFound); }
            s.drop_posts_where(|p| p.author_id == Some(id));
            s.comments.retain(|_, c| c.author_id != Some(id));
            s.follows.retain(|_, f| f.user_id != id && f.author_id != id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl GroupRepo for InMemRepo {
        async fn list_groups(&self) -> RepoResult<Vec<Group>> {
            let mut v: Vec<_> = self.read()?.groups.values().cloned().collect();
            v.sort_by(|a, b| a.title.cmp(&b.title));
            Ok(v)
        }
        async fn get_group(&self, id: Id) -> RepoResult<Group> {
            self.read()?.groups.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group> {
            self.read()?.groups.values().find(|g| g.slug == slug).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_group(&self, new: NewGroup) -> RepoResult<Group> {
            let mut s = self.write()?;
            if s.groups.values().any(|g| g.slug == new.slug) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let group = Group { id, title: new.title, slug: new.slug, description: new.description };
            s.groups.insert(id, group.clone());
            drop(s);
            self.persist();
            Ok(group)
        }
        async fn delete_group(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if s.groups.remove(&id).is_none() { return Err(RepoError::NotFound); }
            s.drop_posts_where(|p| p.group_id == Some(id));
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn count_posts(&self, filter: PostFilter) -> RepoResult<i64> {
            Ok(self.read()?.matching(filter).len() as i64)
        }
        async fn list_posts(&self, filter: PostFilter, limit: i64, offset: i64) -> RepoResult<Vec<PostCard>> {
            let s = self.read()?;
            let skip = usize::try_from(offset).unwrap_or(0);
            let take = usize::try_from(limit).unwrap_or(0);
            Ok(s.matching(filter).into_iter().skip(skip).take(take).map(|p| s.card(p)).collect())
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            self.read()?.posts.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_post_card(&self, id: Id) -> RepoResult<PostCard> {
            let s = self.read()?;
            s.posts.get(&id).map(|p| s.card(p)).ok_or(RepoError::NotFound)
        }
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let mut s = self.write()?;
            if !s.users.contains_key(&new.author_id) { return Err(RepoError::NotFound); }
            if let Some(gid) = new.group_id {
                if !s.groups.contains_key(&gid) { return Err(RepoError::NotFound); }
            }
            let id = s.next_id();
            let (image_hash, image_mime) = match new.image {
                Some(img) => (Some(img.hash), Some(img.mime)),
                None => (None, None),
            };
            let post = Post {
                id,
                text: new.text,
                pub_date: Utc::now(),
                author_id: Some(new.author_id),
                group_id: new.group_id,
                image_hash,
                image_mime,
            };
            s.posts.insert(id, post.clone());
            drop(s);
            self.persist();
            Ok(post)
        }
        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let mut s = self.write()?;
            if let Some(gid) = upd.group_id {
                if !s.groups.contains_key(&gid) { return Err(RepoError::NotFound); }
            }
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            post.text = upd.text;
            post.group_id = upd.group_id;
            match upd.image {
                ImageChange::Keep => {}
                ImageChange::Clear => { post.image_hash = None; post.image_mime = None; }
                ImageChange::Replace(img) => { post.image_hash = Some(img.hash); post.image_mime = Some(img.mime); }
            }
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<CommentView>> {
            let s = self.read()?;
            let mut v: Vec<&Comment> = s.comments.values().filter(|c| c.post_id == Some(post_id)).collect();
            v.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
            Ok(v.into_iter()
                .map(|c| CommentView {
                    id: c.id,
                    text: c.text.clone(),
                    created: c.created,
                    author_username: c.author_id.and_then(|a| s.users.get(&a)).map(|u| u.username.clone()),
                })
                .collect())
        }
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let mut s = self.write()?;
            if !s.posts.contains_key(&new.post_id) || !s.users.contains_key(&new.author_id) {
                return Err(RepoError::NotFound);
            }
            let id = s.next_id();
            let comment = Comment {
                id,
                post_id: Some(new.post_id),
                author_id: Some(new.author_id),
                text: new.text,
                created: Utc::now(),
            };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }
    }

    #[async_trait]
    impl FollowRepo for InMemRepo {
        async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            if user_id == author_id { return Err(RepoError::Conflict); }
            // existence check and insert share the write lock
            let mut s = self.write()?;
            if !s.users.contains_key(&user_id) || !s.users.contains_key(&author_id) {
                return Err(RepoError::NotFound);
            }
            if s.follows.values().any(|f| f.user_id == user_id && f.author_id == author_id) {
                return Ok(false);
            }
            let id = s.next_id();
            s.follows.insert(id, Follow { id, user_id, author_id });
            drop(s);
            self.persist();
            Ok(true)
        }
        async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<u64> {
            let mut s = self.write()?;
            let before = s.follows.len();
            s.follows.retain(|_, f| !(f.user_id == user_id && f.author_id == author_id));
            let removed = (before - s.follows.len()) as u64;
            drop(s);
            if removed > 0 { self.persist(); }
            Ok(removed)
        }
        async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            Ok(self.read()?.follows.values().any(|f| f.user_id == user_id && f.author_id == author_id))
        }
        async fn follow_stats(&self, user_id: Id) -> RepoResult<FollowStats> {
            let s = self.read()?;
            Ok(FollowStats {
                followers: s.follows.values().filter(|f| f.author_id == user_id).count() as i64,
                following: s.follows.values().filter(|f| f.user_id == user_id).count() as i64,
            })
        }
        async fn list_followed_authors(&self, user_id: Id) -> RepoResult<Vec<String>> {
            let s = self.read()?;
            let mut v: Vec<(Id, String)> = s.follows.values()
                .filter(|f| f.user_id == user_id)
                .filter_map(|f| s.users.get(&f.author_id).map(|u| (u.id, u.username.clone())))
                .collect();
            v.sort();
            Ok(v.into_iter().map(|(_, name)| name).collect())
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const POST_COLUMNS: &str = "id, text, pub_date, author_id, group_id, image_hash, image_mime";

    const CARD_SELECT: &str = r#"
        SELECT p.id, p.text, p.pub_date, p.author_id, u.username AS author_username,
               p.group_id, g.slug AS group_slug, g.title AS group_title,
               p.image_hash, p.image_mime,
               (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count
        FROM posts p
        LEFT JOIN users u ON u.id = p.author_id
        LEFT JOIN post_groups g ON g.id = p.group_id
    "#;

    fn filter_clause(filter: PostFilter) -> (&'static str, Option<Id>) {
        match filter {
            PostFilter::All => ("WHERE TRUE", None),
            PostFilter::Group(id) => ("WHERE p.group_id = $1", Some(id)),
            PostFilter::Author(id) => ("WHERE p.author_id = $1", Some(id)),
            PostFilter::FollowedBy(id) => (
                "WHERE p.author_id IN (SELECT f.author_id FROM follows f WHERE f.user_id = $1)",
                Some(id),
            ),
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
            sqlx::migrate!("./migrations").run(&self.pool).await
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let rec = sqlx::query_as::<_, User>(
                "INSERT INTO users (username, password_hash, is_admin) VALUES ($1,$2,$3) \
                 RETURNING id, username, password_hash, is_admin, date_joined"
            )
            .bind(&new.username).bind(&new.password_hash).bind(new.is_admin)
            .fetch_one(&self.pool).await?;
            Ok(rec)
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let rec = sqlx::query_as::<_, User>("SELECT id, username, password_hash, is_admin, date_joined FROM users WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool).await?;
            Ok(rec)
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            let rec = sqlx::query_as::<_, User>("SELECT id, username, password_hash, is_admin, date_joined FROM users WHERE username = $1")
                .bind(username)
                .fetch_one(&self.pool).await?;
            Ok(rec)
        }
        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            // posts, comments and follows go with it via ON DELETE CASCADE
            let res = sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&self.pool).await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl GroupRepo for PgRepo {
        async fn list_groups(&self) -> RepoResult<Vec<Group>> {
            let recs = sqlx::query_as::<_, Group>("SELECT id, title, slug, description FROM post_groups ORDER BY title")
                .fetch_all(&self.pool).await?;
            Ok(recs)
        }
        async fn get_group(&self, id: Id) -> RepoResult<Group> {
            let rec = sqlx::query_as::<_, Group>("SELECT id, title, slug, description FROM post_groups WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool).await?;
            Ok(rec)
        }
        async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group> {
            let rec = sqlx::query_as::<_, Group>("SELECT id, title, slug, description FROM post_groups WHERE slug = $1")
                .bind(slug)
                .fetch_one(&self.pool).await?;
            Ok(rec)
        }
        async fn create_group(&self, new: NewGroup) -> RepoResult<Group> {
            let rec = sqlx::query_as::<_, Group>(
                "INSERT INTO post_groups (title, slug, description) VALUES ($1,$2,$3) RETURNING id, title, slug, description"
            )
            .bind(&new.title).bind(&new.slug).bind(&new.description)
            .fetch_one(&self.pool).await?;
            Ok(rec)
        }
        async fn delete_group(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM post_groups WHERE id = $1").bind(id).execute(&self.pool).await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn count_posts(&self, filter: PostFilter) -> RepoResult<i64> {
            let (clause, arg) = filter_clause(filter);
            let sql = format!("SELECT COUNT(*) FROM posts p {clause}");
            let mut q = sqlx::query_scalar::<_, i64>(&sql);
            if let Some(id) = arg { q = q.bind(id); }
            Ok(q.fetch_one(&self.pool).await?)
        }
        async fn list_posts(&self, filter: PostFilter, limit: i64, offset: i64) -> RepoResult<Vec<PostCard>> {
            let (clause, arg) = filter_clause(filter);
            let n = if arg.is_some() { 2 } else { 1 };
            let sql = format!(
                "{CARD_SELECT} {clause} ORDER BY p.pub_date DESC, p.id DESC LIMIT ${} OFFSET ${}",
                n,
                n + 1
            );
            let mut q = sqlx::query_as::<_, PostCard>(&sql);
            if let Some(id) = arg { q = q.bind(id); }
            let recs = q.bind(limit).bind(offset).fetch_all(&self.pool).await?;
            Ok(recs)
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
            let rec = sqlx::query_as::<_, Post>(&sql).bind(id).fetch_one(&self.pool).await?;
            Ok(rec)
        }
        async fn get_post_card(&self, id: Id) -> RepoResult<PostCard> {
            let sql = format!("{CARD_SELECT} WHERE p.id = $1");
            let rec = sqlx::query_as::<_, PostCard>(&sql).bind(id).fetch_one(&self.pool).await?;
            Ok(rec)
        }
        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let (hash, mime) = match new.image {
                Some(img) => (Some(img.hash), Some(img.mime)),
                None => (None, None),
            };
            let sql = format!(
                "INSERT INTO posts (text, author_id, group_id, image_hash, image_mime) VALUES ($1,$2,$3,$4,$5) RETURNING {POST_COLUMNS}"
            );
            let rec = sqlx::query_as::<_, Post>(&sql)
                .bind(&new.text).bind(new.author_id).bind(new.group_id).bind(hash).bind(mime)
                .fetch_one(&self.pool).await?;
            Ok(rec)
        }
        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let (touch, hash, mime) = match upd.image {
                ImageChange::Keep => (false, None, None),
                ImageChange::Clear => (true, None, None),
                ImageChange::Replace(img) => (true, Some(img.hash), Some(img.mime)),
            };
            let sql = format!(
                "UPDATE posts SET text = $2, group_id = $3, \
                 image_hash = CASE WHEN $4 THEN $5 ELSE image_hash END, \
                 image_mime = CASE WHEN $4 THEN $6 ELSE image_mime END \
                 WHERE id = $1 RETURNING {POST_COLUMNS}"
            );
            let rec = sqlx::query_as::<_, Post>(&sql)
                .bind(id).bind(&upd.text).bind(upd.group_id).bind(touch).bind(hash).bind(mime)
                .fetch_one(&self.pool).await?;
            Ok(rec)
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<CommentView>> {
            let recs = sqlx::query_as::<_, CommentView>(r#"
                SELECT c.id, c.text, c.created, u.username AS author_username
                FROM comments c
                LEFT JOIN users u ON u.id = c.author_id
                WHERE c.post_id = $1
                ORDER BY c.created ASC, c.id ASC
            "#)
                .bind(post_id)
                .fetch_all(&self.pool).await?;
            Ok(recs)
        }
        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let rec = sqlx::query_as::<_, Comment>(
                "INSERT INTO comments (post_id, author_id, text) VALUES ($1,$2,$3) RETURNING id, post_id, author_id, text, created"
            )
            .bind(new.post_id).bind(new.author_id).bind(&new.text)
            .fetch_one(&self.pool).await?;
            Ok(rec)
        }
    }

    #[async_trait]
    impl FollowRepo for PgRepo {
        async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            if user_id == author_id { return Err(RepoError::Conflict); }
            let res = sqlx::query(
                "INSERT INTO follows (user_id, author_id) VALUES ($1,$2) ON CONFLICT (user_id, author_id) DO NOTHING"
            )
            .bind(user_id).bind(author_id)
            .execute(&self.pool).await?;
            Ok(res.rows_affected() == 1)
        }
        async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<u64> {
            let res = sqlx::query("DELETE FROM follows WHERE user_id = $1 AND author_id = $2")
                .bind(user_id).bind(author_id)
                .execute(&self.pool).await?;
            Ok(res.rows_affected())
        }
        async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let found = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM follows WHERE user_id = $1 AND author_id = $2)"
            )
            .bind(user_id).bind(author_id)
            .fetch_one(&self.pool).await?;
            Ok(found)
        }
        async fn follow_stats(&self, user_id: Id) -> RepoResult<FollowStats> {
            let (followers, following) = sqlx::query_as::<_, (i64, i64)>(r#"
                SELECT (SELECT COUNT(*) FROM follows WHERE author_id = $1),
                       (SELECT COUNT(*) FROM follows WHERE user_id = $1)
            "#)
                .bind(user_id)
                .fetch_one(&self.pool).await?;
            Ok(FollowStats { followers, following })
        }
        async fn list_followed_authors(&self, user_id: Id) -> RepoResult<Vec<String>> {
            let names = sqlx::query_scalar::<_, String>(r#"
                SELECT u.username FROM follows f
                JOIN users u ON u.id = f.author_id
                WHERE f.user_id = $1
                ORDER BY f.author_id
            "#)
                .bind(user_id)
                .fetch_all(&self.pool).await?;
            Ok(names)
        }
    }
}
