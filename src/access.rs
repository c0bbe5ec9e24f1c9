//! Content gating and authorization rules.
//!
//! Everything here is a pure function of the snapshots passed in. Handlers
//! resolve the [`Viewer`] from the store first and hand it over explicitly.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{Article, Comment, Id, Viewer};

/// Article as sent to a particular viewer. `content` is `None` when gated.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    pub id: Id,
    pub title: String,
    pub excerpt: String,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub category: String,
    pub is_premium: bool,
    pub published: bool,
    pub author_id: Id,
    pub author_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub needs_subscription: bool,
}

/// Full content is readable iff the article is free or the viewer is subscribed.
/// Role plays no part: an unsubscribed admin is gated like anyone else.
pub fn can_read_full(article: &Article, viewer: Option<&Viewer>) -> bool {
    !article.is_premium || viewer.is_some_and(|v| v.is_subscribed)
}

pub fn evaluate(article: &Article, viewer: Option<&Viewer>) -> ArticleView {
    let full = can_read_full(article, viewer);
    ArticleView {
        id: article.id,
        title: article.title.clone(),
        excerpt: article.excerpt.clone(),
        content: full.then(|| article.content.clone()),
        image_url: article.image_url.clone(),
        category: article.category.clone(),
        is_premium: article.is_premium,
        published: article.published,
        author_id: article.author_id,
        author_email: article.author_email.clone(),
        created_at: article.created_at,
        updated_at: article.updated_at,
        needs_subscription: !full,
    }
}

/// Drafts are only visible to admins.
pub fn can_see_article(article: &Article, viewer: Option<&Viewer>) -> bool {
    article.published || viewer.is_some_and(Viewer::is_admin)
}

/// Article create/update/delete.
pub fn can_manage_articles(viewer: &Viewer) -> bool {
    viewer.is_admin()
}

pub fn can_delete_comment(viewer: &Viewer, comment: &Comment) -> bool {
    viewer.is_admin() || viewer.id == comment.author_id
}
