use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// `Conflict` when the email is taken.
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn get_user_by_email(&self, email: &str) -> RepoResult<User>;
    async fn update_subscription(&self, upd: SubscriptionUpdate) -> RepoResult<User>;
}

#[async_trait]
pub trait ArticleRepo: Send + Sync {
    /// Published articles newest first, plus the total published count.
    async fn list_published_articles(&self, offset: i64, limit: i64) -> RepoResult<(Vec<Article>, i64)>;
    /// Every article including drafts, newest first.
    async fn list_all_articles(&self) -> RepoResult<Vec<Article>>;
    async fn get_article(&self, id: Id) -> RepoResult<Article>;
    async fn create_article(&self, author_id: Id, new: NewArticle) -> RepoResult<Article>;
    async fn update_article(&self, id: Id, upd: UpdateArticle) -> RepoResult<Article>;
    /// Removes the article together with its comments.
    async fn delete_article(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Flat and unordered; see `comments::assemble`.
    async fn list_comments(&self, article_id: Id) -> RepoResult<Vec<Comment>>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn create_comment(&self, article_id: Id, author_id: Id, new: NewComment) -> RepoResult<Comment>;
    /// Replies are left in place.
    async fn delete_comment(&self, id: Id) -> RepoResult<()>;
}

pub trait Repo: UserRepo + ArticleRepo + CommentRepo {}

impl<T> Repo for T where T: UserRepo + ArticleRepo + CommentRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};
    use std::sync::{RwLockReadGuard, RwLockWriteGuard};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        articles: HashMap<Id, Article>,
        comments: HashMap<Id, Comment>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn email_of(&self, user_id: Id) -> Option<String> {
            self.users.get(&user_id).map(|u| u.email.clone())
        }

        fn article_out(&self, a: &Article) -> Article {
            Article { author_email: self.email_of(a.author_id), ..a.clone() }
        }

        fn comment_out(&self, c: &Comment) -> Comment {
            Comment { author_email: self.email_of(c.author_id), ..c.clone() }
        }
    }

    /// Process-local store, optionally snapshotted to a JSON file after each write.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Snapshot under `$NEWSGATE_DATA_DIR/state.json`, or `data/state.json`.
        pub fn new() -> Self {
            let path = std::env::var("NEWSGATE_DATA_DIR")
                .map(|dir| PathBuf::from(dir).join("state.json"))
                .unwrap_or_else(|_| PathBuf::from(SNAPSHOT_PATH));
            Self::at(path)
        }

        /// Load from (and persist to) an explicit snapshot file.
        pub fn at(path: impl Into<PathBuf>) -> Self {
            let path = path.into();
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
            }
        }

        /// Never touches the filesystem.
        pub fn ephemeral() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        tracing::warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    tracing::info!("no snapshot at '{}' ({e}); starting empty", path.display());
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

        /// Snapshot failures are logged, not surfaced: the in-memory state stays authoritative.
        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let bytes = match self.read().map(|s| serde_json::to_vec_pretty(&*s)) {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    tracing::warn!("failed to serialize snapshot: {e}");
                    return;
                }
                Err(e) => {
                    tracing::warn!("skipping snapshot: {e}");
                    return;
                }
            };
            if let Some(dir) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    tracing::warn!("cannot create snapshot dir '{}': {e}", dir.display());
                }
            }
            if let Err(e) = std::fs::write(path, bytes) {
                tracing::warn!("failed to write snapshot '{}': {e}", path.display());
            }
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    fn newest_first(v: &mut [Article]) {
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.write()?;
            if s.users.values().any(|u| u.email == new.email) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let user = User {
                id,
                email: new.email,
                password_hash: new.password_hash,
                role: new.role,
                is_subscribed: false,
                customer_id: None,
                subscription_id: None,
                subscription_status: None,
                created_at: Utc::now(),
            };
            s.users.insert(id, user.clone());
            drop(s);                       // release lock before persisting
            self.persist();
            Ok(user)
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_user_by_email(&self, email: &str) -> RepoResult<User> {
            let s = self.read()?;
            s.users.values().find(|u| u.email == email).cloned().ok_or(RepoError::NotFound)
        }
        async fn update_subscription(&self, upd: SubscriptionUpdate) -> RepoResult<User> {
            let mut s = self.write()?;
            let user = s.users.get_mut(&upd.user_id).ok_or(RepoError::NotFound)?;
            user.is_subscribed = upd.is_subscribed;
            user.customer_id = upd.customer_id;
            user.subscription_id = upd.subscription_id;
            user.subscription_status = upd.status;
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl ArticleRepo for InMemRepo {
        async fn list_published_articles(&self, offset: i64, limit: i64) -> RepoResult<(Vec<Article>, i64)> {
            let s = self.read()?;
            let mut v: Vec<_> = s.articles.values()
                .filter(|a| a.published)
                .map(|a| s.article_out(a))
                .collect();
            newest_first(&mut v);
            let total = v.len() as i64;
            let page = v.into_iter()
                .skip(usize::try_from(offset).unwrap_or(0))
                .take(usize::try_from(limit).unwrap_or(0))
                .collect();
            Ok((page, total))
        }
        async fn list_all_articles(&self) -> RepoResult<Vec<Article>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.articles.values().map(|a| s.article_out(a)).collect();
            newest_first(&mut v);
            Ok(v)
        }
        async fn get_article(&self, id: Id) -> RepoResult<Article> {
            let s = self.read()?;
            s.articles.get(&id).map(|a| s.article_out(a)).ok_or(RepoError::NotFound)
        }
        async fn create_article(&self, author_id: Id, new: NewArticle) -> RepoResult<Article> {
            let mut s = self.write()?;
            if !s.users.contains_key(&author_id) { return Err(RepoError::NotFound); }
            let now = Utc::now();
            let id = s.next_id();
            let article = Article {
                id,
                title: new.title,
                content: new.content,
                excerpt: new.excerpt,
                image_url: new.image_url,
                author_id,
                author_email: None,
                is_premium: new.is_premium,
                published: new.published,
                category: new.category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
                created_at: now,
                updated_at: now,
            };
            s.articles.insert(id, article.clone());
            let out = s.article_out(&article);
            drop(s);
            self.persist();
            Ok(out)
        }
        async fn update_article(&self, id: Id, upd: UpdateArticle) -> RepoResult<Article> {
            let mut s = self.write()?;
            let a = s.articles.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(v) = upd.title { a.title = v; }
            if let Some(v) = upd.content { a.content = v; }
            if let Some(v) = upd.excerpt { a.excerpt = v; }
            if let Some(v) = upd.image_url { a.image_url = v; }
            if let Some(v) = upd.is_premium { a.is_premium = v; }
            if let Some(v) = upd.published { a.published = v; }
            if let Some(v) = upd.category { a.category = v; }
            a.updated_at = Utc::now();
            let updated = a.clone();
            let out = s.article_out(&updated);
            drop(s);
            self.persist();
            Ok(out)
        }
        async fn delete_article(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            s.articles.remove(&id).ok_or(RepoError::NotFound)?;
            s.comments.retain(|_, c| c.article_id != id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, article_id: Id) -> RepoResult<Vec<Comment>> {
            let s = self.read()?;
            Ok(s.comments.values()
                .filter(|c| c.article_id == article_id)
                .map(|c| s.comment_out(c))
                .collect())
        }
        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let s = self.read()?;
            s.comments.get(&id).map(|c| s.comment_out(c)).ok_or(RepoError::NotFound)
        }
        async fn create_comment(&self, article_id: Id, author_id: Id, new: NewComment) -> RepoResult<Comment> {
            let mut s = self.write()?;
            if !s.articles.contains_key(&article_id) { return Err(RepoError::NotFound); }
            let id = s.next_id();
            let comment = Comment {
                id,
                content: new.content,
                article_id,
                author_id,
                author_email: None,
                parent_id: new.parent_id,
                created_at: Utc::now(),
            };
            s.comments.insert(id, comment.clone());
            let out = s.comment_out(&comment);
            drop(s);
            self.persist();
            Ok(out)
        }
        async fn delete_comment(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            s.comments.remove(&id).ok_or(RepoError::NotFound)?;
            drop(s);
            self.persist();
            Ok(())
        }
    }
}

// Postgres implementation (feature = "postgres-store"); schema in migrations/
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use crate::auth::Role;
    use chrono::{DateTime, Utc};
    use sqlx::{Pool, Postgres};

    const ARTICLE_SELECT: &str = r#"
        SELECT a.id, a.title, a.content, a.excerpt, a.image_url, a.author_id,
               u.email AS author_email, a.is_premium, a.published, a.category,
               a.created_at, a.updated_at
        FROM articles a
        LEFT JOIN users u ON u.id = a.author_id
    "#;

    const COMMENT_SELECT: &str = r#"
        SELECT c.id, c.content, c.article_id, c.author_id, u.email AS author_email,
               c.parent_id, c.created_at
        FROM comments c
        LEFT JOIN users u ON u.id = c.author_id
    "#;

    const USER_COLUMNS: &str = "id, email, password_hash, role, is_subscribed, customer_id, subscription_id, subscription_status, created_at";

    #[derive(sqlx::FromRow)]
    struct UserRow {
        id: Id,
        email: String,
        password_hash: String,
        role: String,
        is_subscribed: bool,
        customer_id: Option<String>,
        subscription_id: Option<String>,
        subscription_status: Option<String>,
        created_at: DateTime<Utc>,
    }

    impl TryFrom<UserRow> for User {
        type Error = RepoError;
        fn try_from(r: UserRow) -> Result<Self, Self::Error> {
            let role: Role = r.role.parse().map_err(|e: crate::auth::AuthError| RepoError::Internal(e.to_string()))?;
            Ok(User {
                id: r.id,
                email: r.email,
                password_hash: r.password_hash,
                role,
                is_subscribed: r.is_subscribed,
                customer_id: r.customer_id,
                subscription_id: r.subscription_id,
                subscription_status: r.subscription_status,
                created_at: r.created_at,
            })
        }
    }

    fn map_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepoError::NotFound,
            other => RepoError::Internal(other.to_string()),
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "INSERT INTO users (email, password_hash, role) VALUES ($1,$2,$3) RETURNING {USER_COLUMNS}"
            ))
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(new.role.as_str())
            .fetch_one(&self.pool).await.map_err(map_err)?;
            row.try_into()
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id=$1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            row.try_into()
        }
        async fn get_user_by_email(&self, email: &str) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email=$1"))
                .bind(email)
                .fetch_one(&self.pool).await.map_err(map_err)?;
            row.try_into()
        }
        async fn update_subscription(&self, upd: SubscriptionUpdate) -> RepoResult<User> {
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "UPDATE users SET is_subscribed=$2, customer_id=$3, subscription_id=$4, subscription_status=$5 \
                 WHERE id=$1 RETURNING {USER_COLUMNS}"
            ))
            .bind(upd.user_id)
            .bind(upd.is_subscribed)
            .bind(upd.customer_id)
            .bind(upd.subscription_id)
            .bind(upd.status)
            .fetch_one(&self.pool).await.map_err(map_err)?;
            row.try_into()
        }
    }

    #[async_trait]
    impl ArticleRepo for PgRepo {
        async fn list_published_articles(&self, offset: i64, limit: i64) -> RepoResult<(Vec<Article>, i64)> {
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE published")
                .fetch_one(&self.pool).await.map_err(map_err)?;
            let recs = sqlx::query_as::<_, Article>(&format!(
                "{ARTICLE_SELECT} WHERE a.published ORDER BY a.created_at DESC, a.id DESC LIMIT $1 OFFSET $2"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool).await.map_err(map_err)?;
            Ok((recs, total))
        }
        async fn list_all_articles(&self) -> RepoResult<Vec<Article>> {
            sqlx::query_as::<_, Article>(&format!("{ARTICLE_SELECT} ORDER BY a.created_at DESC, a.id DESC"))
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn get_article(&self, id: Id) -> RepoResult<Article> {
            sqlx::query_as::<_, Article>(&format!("{ARTICLE_SELECT} WHERE a.id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn create_article(&self, author_id: Id, new: NewArticle) -> RepoResult<Article> {
            let id: Id = sqlx::query_scalar(
                "INSERT INTO articles (title, content, excerpt, image_url, author_id, is_premium, published, category) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8) RETURNING id"
            )
            .bind(&new.title)
            .bind(&new.content)
            .bind(&new.excerpt)
            .bind(new.image_url.as_ref())
            .bind(author_id)
            .bind(new.is_premium)
            .bind(new.published)
            .bind(new.category.as_deref().unwrap_or(DEFAULT_CATEGORY))
            .fetch_one(&self.pool).await.map_err(map_err)?;
            self.get_article(id).await
        }
        async fn update_article(&self, id: Id, upd: UpdateArticle) -> RepoResult<Article> {
            let updated: Option<Id> = sqlx::query_scalar(
                "UPDATE articles SET \
                    title = COALESCE($2, title), content = COALESCE($3, content), \
                    excerpt = COALESCE($4, excerpt), image_url = CASE WHEN $9 THEN $5 ELSE image_url END, \
                    is_premium = COALESCE($6, is_premium), published = COALESCE($7, published), \
                    category = COALESCE($8, category), updated_at = now() \
                 WHERE id = $1 RETURNING id"
            )
            .bind(id)
            .bind(upd.title)
            .bind(upd.content)
            .bind(upd.excerpt)
            .bind(upd.image_url.clone().flatten())
            .bind(upd.is_premium)
            .bind(upd.published)
            .bind(upd.category)
            .bind(upd.image_url.is_some())
            .fetch_optional(&self.pool).await.map_err(map_err)?;
            let id = updated.ok_or(RepoError::NotFound)?;
            self.get_article(id).await
        }
        async fn delete_article(&self, id: Id) -> RepoResult<()> {
            // comments go with it via ON DELETE CASCADE
            let res = sqlx::query("DELETE FROM articles WHERE id=$1")
                .bind(id)
                .execute(&self.pool).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, article_id: Id) -> RepoResult<Vec<Comment>> {
            sqlx::query_as::<_, Comment>(&format!("{COMMENT_SELECT} WHERE c.article_id = $1"))
                .bind(article_id)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>(&format!("{COMMENT_SELECT} WHERE c.id = $1"))
                .bind(id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn create_comment(&self, article_id: Id, author_id: Id, new: NewComment) -> RepoResult<Comment> {
            let id: Id = sqlx::query_scalar(
                "INSERT INTO comments (content, article_id, author_id, parent_id) VALUES ($1,$2,$3,$4) RETURNING id"
            )
            .bind(&new.content)
            .bind(article_id)
            .bind(author_id)
            .bind(new.parent_id)
            .fetch_one(&self.pool).await.map_err(map_err)?;
            self.get_comment(id).await
        }
        async fn delete_comment(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM comments WHERE id=$1")
                .bind(id)
                .execute(&self.pool).await.map_err(map_err)?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }
}
