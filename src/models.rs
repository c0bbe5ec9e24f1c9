use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::Role;

pub type Id = i64;

pub const DEFAULT_CATEGORY: &str = "Technology";
pub const DEFAULT_PAGE_SIZE: u32 = 5;
pub const MAX_PAGE_SIZE: u32 = 50;

/// Persisted account record. Never serialized to clients; see [`UserProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_subscribed: bool,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub subscription_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Identity and entitlement snapshot of whoever is making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub id: Id,
    pub role: Role,
    pub is_subscribed: bool,
}

impl Viewer {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Viewer {
    fn from(u: &User) -> Self {
        Self { id: u.id, role: u.role, is_subscribed: u.is_subscribed }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Id,
    pub email: String,
    pub role: Role,
    pub is_subscribed: bool,
    pub subscription_status: Option<String>,
}

impl From<&User> for UserProfile {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            role: u.role,
            is_subscribed: u.is_subscribed,
            subscription_status: u.subscription_status.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: Id,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub image_url: Option<String>,
    pub author_id: Id,
    pub author_email: Option<String>, // joined from users on read
    pub is_premium: bool,
    pub published: bool,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub excerpt: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateArticle {
    pub title: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    /// Absent keeps the image, `null` removes it.
    #[serde(default, deserialize_with = "present_or_null", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub image_url: Option<Option<String>>,
    pub is_premium: Option<bool>,
    pub published: Option<bool>,
    pub category: Option<String>,
}

/// Distinguishes an explicit `null` (`Some(None)`) from a missing field (`None`, via `default`).
fn present_or_null<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Id,
    pub content: String,
    pub article_id: Id,
    pub author_id: Id,
    pub author_email: Option<String>, // joined from users on read
    pub parent_id: Option<Id>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<Id>,
}

/// Subscription state delivered by the payment webhook; the only writer of `User::is_subscribed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub user_id: Id,
    pub is_subscribed: bool,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub status: Option<String>,
}

/// Paging parameters. Values that are missing, non-numeric or not positive fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct PageQuery {
    /// 1-based page number (default 1)
    #[param(value_type = Option<u32>)]
    pub page: Option<String>,
    /// Page size (default 5, max 50)
    #[param(value_type = Option<u32>)]
    pub limit: Option<String>,
}

fn positive(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|s| s.trim().parse::<u32>().ok()).filter(|n| *n > 0)
}

impl PageQuery {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page: Some(page.to_string()), limit: Some(limit.to_string()) }
    }

    /// Clamped `(page, limit)`.
    pub fn resolve(&self) -> (u32, u32) {
        let page = positive(self.page.as_deref()).unwrap_or(1);
        let limit = positive(self.limit.as_deref()).unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        (page, limit)
    }

    pub fn offset(&self) -> i64 {
        let (page, limit) = self.resolve();
        i64::from(page - 1) * i64::from(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_defaults_and_caps() {
        assert_eq!(PageQuery::default().resolve(), (1, DEFAULT_PAGE_SIZE));
        assert_eq!(PageQuery::new(0, 500).resolve(), (1, MAX_PAGE_SIZE));
        assert_eq!(PageQuery::new(3, 10).offset(), 20);
    }

    #[test]
    fn update_tells_null_image_from_missing() {
        let upd: UpdateArticle = serde_json::from_str(r#"{"imageUrl": null}"#).unwrap();
        assert_eq!(upd.image_url, Some(None));
        let upd: UpdateArticle = serde_json::from_str(r#"{"title": "x"}"#).unwrap();
        assert_eq!(upd.image_url, None);
        let upd: UpdateArticle = serde_json::from_str(r#"{"imageUrl": "https://img.example/2.png"}"#).unwrap();
        assert_eq!(upd.image_url, Some(Some("https://img.example/2.png".to_string())));
    }

    #[test]
    fn page_query_ignores_garbage() {
        let q = PageQuery { page: Some("abc".into()), limit: Some("-1".into()) };
        assert_eq!(q.resolve(), (1, DEFAULT_PAGE_SIZE));
        let q = PageQuery { page: Some(" 2 ".into()), limit: Some("1.5".into()) };
        assert_eq!(q.resolve(), (2, DEFAULT_PAGE_SIZE));
        assert_eq!(q.offset(), 5);
    }
}
