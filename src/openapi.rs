use crate::access::ArticleView;
use crate::auth::Role;
use crate::comments::{Reply, TopLevelComment};
use crate::models::{Article, AuthResponse, Comment, Credentials, NewArticle, NewComment, UpdateArticle, UserProfile};
use crate::routes::{ArticlePage, CheckoutResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::auth_me,
        crate::routes::list_articles,
        crate::routes::admin_list_articles,
        crate::routes::get_article,
        crate::routes::create_article,
        crate::routes::update_article,
        crate::routes::delete_article,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::delete_comment,
        crate::routes::create_checkout,
        crate::routes::lemonsqueezy_webhook,
    ),
    components(schemas(
        Role, Credentials, AuthResponse, UserProfile,
        Article, NewArticle, UpdateArticle, ArticleView, ArticlePage,
        Comment, NewComment, TopLevelComment, Reply,
        CheckoutResponse,
    )),
    tags(
        (name = "articles", description = "Articles with subscription gating"),
        (name = "comments", description = "Two-level comment threads"),
        (name = "subscription", description = "Checkout and payment webhooks"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_gated_article_route() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/articles/{id}"));
        assert!(doc.paths.paths.contains_key("/api/webhooks/lemonsqueezy"));
    }

    #[test]
    fn comment_tree_schema_is_published() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/articles/{id}/comments"));
        let schemas = &doc.components.as_ref().unwrap().schemas;
        assert!(schemas.contains_key("TopLevelComment"));
        assert!(schemas.contains_key("Reply"));
    }
}
