use std::collections::HashSet;
use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::access::{self, ArticleView};
use crate::auth::{create_jwt, Auth, Role};
use crate::comments::{self, MAX_COMMENT_LEN};
use crate::error::ApiError;
use crate::models::*;
use crate::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::payment::{self, CheckoutProvider, WebhookEvent};
use crate::rate_limit::RateLimiter;
use crate::repo::{Repo, RepoError};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .app_data(web::JsonConfig::default().error_handler(|err, _| bad_request(err)))
            .app_data(web::QueryConfig::default().error_handler(|err, _| bad_request(err)))
            .app_data(web::PathConfig::default().error_handler(|err, _| bad_request(err)))
            .service(web::resource("/auth/register").route(web::post().to(register)))
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(
                web::resource("/articles")
                    .route(web::get().to(list_articles))
                    .route(web::post().to(create_article)),
            )
            .service(
                web::resource("/articles/{id}")
                    .route(web::get().to(get_article))
                    .route(web::put().to(update_article))
                    .route(web::delete().to(delete_article)),
            )
            .service(
                web::resource("/articles/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(web::resource("/comments/{id}").route(web::delete().to(delete_comment)))
            .service(web::resource("/admin/articles").route(web::get().to(admin_list_articles)))
            .service(
                web::resource("/subscription/create-checkout")
                    .route(web::post().to(create_checkout)),
            )
            .service(
                web::resource("/webhooks/lemonsqueezy")
                    .route(web::post().to(lemonsqueezy_webhook)),
            ),
    );
}

/// Emails registered with the admin role; everyone else signs up as a plain user.
#[derive(Clone, Debug, Default)]
pub struct RegistrationPolicy {
    admin_emails: HashSet<String>,
}

impl RegistrationPolicy {
    /// Reads comma separated `BOOTSTRAP_ADMIN_EMAILS`.
    pub fn from_env() -> Self {
        Self::with_admins(std::env::var("BOOTSTRAP_ADMIN_EMAILS").unwrap_or_default().split(','))
    }

    pub fn with_admins<'a>(emails: impl IntoIterator<Item = &'a str>) -> Self {
        let admin_emails = emails
            .into_iter()
            .map(normalize_email)
            .filter(|e| !e.is_empty())
            .collect();
        Self { admin_emails }
    }

    pub fn role_for(&self, email: &str) -> Role {
        if self.admin_emails.contains(email) { Role::Admin } else { Role::User }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub checkout: Arc<dyn CheckoutProvider>,
    pub webhook_secret: Option<String>,
    pub rate_limiter: Option<RateLimiter>,
    pub registration: RegistrationPolicy,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, checkout: Arc<dyn CheckoutProvider>) -> Self {
        Self {
            repo,
            checkout,
            webhook_secret: None,
            rate_limiter: None,
            registration: RegistrationPolicy::default(),
        }
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_registration(mut self, policy: RegistrationPolicy) -> Self {
        self.registration = policy;
        self
    }
}

/// Extractor failures get the same JSON error body as handler errors.
fn bad_request(err: impl std::fmt::Display) -> actix_web::Error {
    ApiError::BadRequest(err.to_string()).into()
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Socket peer address. Forwarded headers are client controlled and only
/// consulted when the limiter is configured to sit behind a trusted proxy.
fn client_ip(req: &HttpRequest, trust_forwarded: bool) -> String {
    if trust_forwarded {
        if let Some(ip) = req.connection_info().realip_remote_addr() {
            return ip.to_string();
        }
    }
    req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}

/// The caller's user record, re-read so role and subscription are current.
async fn current_user(data: &AppState, auth: &Auth) -> Result<User, ApiError> {
    match data.repo.get_user(auth.user_id()?).await {
        Ok(u) => Ok(u),
        Err(RepoError::NotFound) => Err(ApiError::Unauthorized),
        Err(e) => Err(e.into()),
    }
}

/// Like [`current_user`] but an unknown user is just anonymous.
async fn optional_viewer(data: &AppState, auth: Option<&Auth>) -> Result<Option<Viewer>, ApiError> {
    let Some(auth) = auth else { return Ok(None) };
    let Ok(id) = auth.user_id() else { return Ok(None) };
    match data.repo.get_user(id).await {
        Ok(u) => Ok(Some(Viewer::from(&u))),
        Err(RepoError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn admin_viewer(data: &AppState, auth: &Auth) -> Result<Viewer, ApiError> {
    let viewer = Viewer::from(&current_user(data, auth).await?);
    if !access::can_manage_articles(&viewer) {
        return Err(ApiError::Forbidden);
    }
    Ok(viewer)
}

fn auth_response(user: &User) -> Result<AuthResponse, ApiError> {
    Ok(AuthResponse { token: create_jwt(user.id, user.role)?, user: UserProfile::from(user) })
}

// ---------------- Auth ----------------------------------------------

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = Credentials,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid email or password"),
        (status = 409, description = "User already exists"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn register(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<Credentials>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_auth(&client_ip(&req, rl.trusts_forwarded())) { return Err(ApiError::TooManyRequests); }
    }
    let creds = payload.into_inner();
    let email = normalize_email(&creds.email);
    if email.len() < 3 || !email.contains('@') {
        return Err(ApiError::BadRequest("invalid email".into()));
    }
    if creds.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!("password must be at least {MIN_PASSWORD_LEN} characters")));
    }
    let new = NewUser {
        role: data.registration.role_for(&email),
        password_hash: hash_password(&creds.password)?,
        email,
    };
    let user = match data.repo.create_user(new).await {
        Ok(u) => u,
        Err(RepoError::Conflict) => return Err(ApiError::Conflict("user already exists")),
        Err(e) => return Err(e.into()),
    };
    info!(user_id = user.id, role = user.role.as_str(), "registered user");
    Ok(HttpResponse::Created().json(auth_response(&user)?))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = Credentials,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn login(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<Credentials>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_auth(&client_ip(&req, rl.trusts_forwarded())) { return Err(ApiError::TooManyRequests); }
    }
    let user = match data.repo.get_user_by_email(&normalize_email(&payload.email)).await {
        Ok(u) => u,
        Err(RepoError::NotFound) => return Err(ApiError::InvalidCredentials),
        Err(e) => return Err(e.into()),
    };
    if !verify_password(&payload.password, &user.password_hash) {
        return Err(ApiError::InvalidCredentials);
    }
    Ok(HttpResponse::Ok().json(auth_response(&user)?))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = current_user(&data, &auth).await?;
    Ok(HttpResponse::Ok().json(UserProfile::from(&user)))
}

// ---------------- Articles ------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArticlePage {
    pub articles: Vec<ArticleView>,
    pub total: i64,
    pub has_more: bool,
    pub page: u32,
    pub limit: u32,
}

#[utoipa::path(
    get,
    path = "/api/articles",
    params(PageQuery),
    responses((status = 200, description = "Published articles, newest first", body = ArticlePage))
)]
pub async fn list_articles(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let viewer = optional_viewer(&data, auth.as_ref()).await?;
    let (page, limit) = query.resolve();
    let offset = query.offset();
    let (articles, total) = data.repo.list_published_articles(offset, i64::from(limit)).await?;
    let has_more = offset + (articles.len() as i64) < total;
    let articles = articles.iter().map(|a| access::evaluate(a, viewer.as_ref())).collect();
    Ok(HttpResponse::Ok().json(ArticlePage { articles, total, has_more, page, limit }))
}

#[utoipa::path(
    get,
    path = "/api/admin/articles",
    responses(
        (status = 200, description = "All articles including drafts", body = [Article]),
        (status = 403, description = "Admins only")
    )
)]
pub async fn admin_list_articles(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    admin_viewer(&data, &auth).await?;
    Ok(HttpResponse::Ok().json(data.repo.list_all_articles().await?))
}

#[utoipa::path(
    get,
    path = "/api/articles/{id}",
    params(("id" = i64, Path, description = "Article id")),
    responses(
        (status = 200, description = "Article; content is null when a subscription is required", body = ArticleView),
        (status = 404, description = "Article not found")
    )
)]
pub async fn get_article(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let viewer = optional_viewer(&data, auth.as_ref()).await?;
    let article = data.repo.get_article(path.into_inner()).await?;
    if !access::can_see_article(&article, viewer.as_ref()) {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::Ok().json(access::evaluate(&article, viewer.as_ref())))
}

fn require_text(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/articles",
    request_body = NewArticle,
    responses(
        (status = 201, description = "Article created", body = Article),
        (status = 400, description = "Invalid data"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn create_article(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewArticle>,
) -> Result<HttpResponse, ApiError> {
    let viewer = admin_viewer(&data, &auth).await?;
    let new = payload.into_inner();
    require_text("title", &new.title)?;
    require_text("excerpt", &new.excerpt)?;
    let article = data.repo.create_article(viewer.id, new).await?;
    info!(article_id = article.id, premium = article.is_premium, "article created");
    Ok(HttpResponse::Created().json(article))
}

#[utoipa::path(
    put,
    path = "/api/articles/{id}",
    request_body = UpdateArticle,
    params(("id" = i64, Path, description = "Article id")),
    responses(
        (status = 200, description = "Article updated", body = Article),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Article not found")
    )
)]
pub async fn update_article(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateArticle>,
) -> Result<HttpResponse, ApiError> {
    admin_viewer(&data, &auth).await?;
    let upd = payload.into_inner();
    if let Some(title) = &upd.title { require_text("title", title)?; }
    if let Some(excerpt) = &upd.excerpt { require_text("excerpt", excerpt)?; }
    let article = data.repo.update_article(path.into_inner(), upd).await?;
    Ok(HttpResponse::Ok().json(article))
}

#[utoipa::path(
    delete,
    path = "/api/articles/{id}",
    params(("id" = i64, Path, description = "Article id")),
    responses(
        (status = 204, description = "Article and its comments deleted"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Article not found")
    )
)]
pub async fn delete_article(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    admin_viewer(&data, &auth).await?;
    let id = path.into_inner();
    data.repo.delete_article(id).await?;
    info!(article_id = id, "article deleted");
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- Comments ------------------------------------------

#[utoipa::path(
    get,
    path = "/api/articles/{id}/comments",
    params(("id" = i64, Path, description = "Article id")),
    responses(
        (status = 200, description = "Threads newest first, replies oldest first", body = [comments::TopLevelComment]),
        (status = 404, description = "Article not found")
    )
)]
pub async fn list_comments(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let article_id = path.into_inner();
    let viewer = optional_viewer(&data, auth.as_ref()).await?;
    let article = data.repo.get_article(article_id).await?;
    if !access::can_see_article(&article, viewer.as_ref()) {
        return Err(ApiError::NotFound);
    }
    let flat = data.repo.list_comments(article_id).await?;
    Ok(HttpResponse::Ok().json(comments::assemble(flat, article_id)))
}

#[utoipa::path(
    post,
    path = "/api/articles/{id}/comments",
    request_body = NewComment,
    params(("id" = i64, Path, description = "Article id")),
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 400, description = "Empty content or invalid parent"),
        (status = 404, description = "Article not found"),
        (status = 429, description = "Commenting too fast")
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    let article_id = path.into_inner();
    let viewer = Viewer::from(&current_user(&data, &auth).await?);
    let article = data.repo.get_article(article_id).await?;
    if !access::can_see_article(&article, Some(&viewer)) {
        return Err(ApiError::NotFound);
    }
    let mut new = payload.into_inner();
    new.content = new.content.trim().to_string();
    require_text("content", &new.content)?;
    if new.content.chars().count() > MAX_COMMENT_LEN {
        return Err(ApiError::BadRequest(format!("content exceeds {MAX_COMMENT_LEN} characters")));
    }
    if let Some(parent_id) = new.parent_id {
        let parent = match data.repo.get_comment(parent_id).await {
            Ok(c) => Some(c),
            Err(RepoError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        comments::validate_parent(parent.as_ref(), article_id)?;
    }
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_comment(viewer.id) { return Err(ApiError::TooManyRequests); }
    }
    let comment = data.repo.create_comment(article_id, viewer.id, new).await?;
    Ok(HttpResponse::Created().json(comment))
}

#[utoipa::path(
    delete,
    path = "/api/comments/{id}",
    params(("id" = i64, Path, description = "Comment id")),
    responses(
        (status = 204, description = "Comment deleted; replies are kept"),
        (status = 403, description = "Only the author or an admin may delete"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn delete_comment(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let viewer = Viewer::from(&current_user(&data, &auth).await?);
    let comment = data.repo.get_comment(path.into_inner()).await?;
    if !access::can_delete_comment(&viewer, &comment) {
        return Err(ApiError::Forbidden);
    }
    data.repo.delete_comment(comment.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- Subscriptions -------------------------------------

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub checkout_url: String,
}

#[utoipa::path(
    post,
    path = "/api/subscription/create-checkout",
    responses(
        (status = 200, description = "Hosted checkout created", body = CheckoutResponse),
        (status = 409, description = "Already subscribed"),
        (status = 502, description = "Payment provider error"),
        (status = 503, description = "Payments not configured")
    )
)]
pub async fn create_checkout(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = current_user(&data, &auth).await?;
    if user.is_subscribed {
        return Err(ApiError::Conflict("already subscribed"));
    }
    let checkout_url = data.checkout.create_checkout(&user).await?;
    info!(user_id = user.id, "checkout session created");
    Ok(HttpResponse::Ok().json(CheckoutResponse { checkout_url }))
}

/// Subscription lifecycle callback. Body is taken raw so the signature can be checked.
#[utoipa::path(
    post,
    path = "/api/webhooks/lemonsqueezy",
    responses(
        (status = 200, description = "Event received"),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Bad or missing signature"),
        (status = 503, description = "Webhook secret not configured")
    )
)]
pub async fn lemonsqueezy_webhook(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let Some(secret) = data.webhook_secret.as_deref() else {
        warn!("webhook received but LEMONSQUEEZY_WEBHOOK_SECRET is not set");
        return Err(ApiError::Unavailable("webhook secret not configured"));
    };
    let signature = req
        .headers()
        .get(payment::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if let Err(e) = payment::verify_signature(secret, &body, signature) {
        warn!("webhook rejected: {e}");
        return Err(e.into());
    }
    let event = WebhookEvent::parse(&body)?;
    match event.subscription_update() {
        Some(upd) => {
            let user_id = upd.user_id;
            let subscribed = upd.is_subscribed;
            match data.repo.update_subscription(upd).await {
                Ok(_) => info!(user_id, subscribed, event = %event.meta.event_name, "subscription updated"),
                Err(RepoError::NotFound) => warn!(user_id, "subscription event for unknown user"),
                Err(e) => return Err(e.into()),
            }
        }
        None => info!(event = %event.meta.event_name, "webhook event ignored"),
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "received": true })))
}
