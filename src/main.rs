use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::{bail, Context};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use newsgate::openapi::ApiDoc;
use newsgate::payment::{LemonSqueezy, PaymentConfig};
use newsgate::rate_limit::{RateLimitConfig, RateLimiter};
use newsgate::repo::Repo;
use newsgate::{config, AppState, RegistrationPolicy, SecurityHeaders};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Environment comes from the process; .env is only a convenience for debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    validate_env_vars()?;
    info!("Bootstrapping newsgate");

    let repo = build_repo().await?;

    let payments = PaymentConfig::from_env();
    if payments.api_key.is_none() || payments.store_id.is_none() || payments.variant_id.is_none() {
        warn!("LemonSqueezy checkout not configured; /api/subscription/create-checkout will return 503");
    }
    let mut state = AppState::new(repo, Arc::new(LemonSqueezy::new(payments.clone())))
        .with_rate_limiter(RateLimiter::new(RateLimitConfig::from_env()))
        .with_registration(RegistrationPolicy::from_env());
    match payments.webhook_secret.clone() {
        Some(secret) => state = state.with_webhook_secret(secret),
        None => warn!("LEMONSQUEEZY_WEBHOOK_SECRET not set; subscription webhooks will be rejected"),
    }

    let frontend = std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());
    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    info!("Frontend URL: {frontend}");

    let openapi = ApiDoc::openapi();
    let security = SecurityHeaders::from_env();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend)
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(security.clone())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&bind)
    .with_context(|| format!("binding {bind}"))?;

    info!("Listening on http://{bind}");
    server.run().await?;
    Ok(())
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo() -> anyhow::Result<Arc<dyn Repo>> {
    info!("Using in-memory repository backend");
    Ok(Arc::new(newsgate::repo::inmem::InMemRepo::new()))
}

#[cfg(feature = "postgres-store")]
async fn build_repo() -> anyhow::Result<Arc<dyn Repo>> {
    use sqlx::postgres::PgPoolOptions;
    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .context("connecting to Postgres")?;
    sqlx::migrate!("./migrations").run(&pool).await.context("running migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(newsgate::repo::pg::PgRepo::new(pool)))
}

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
async fn build_repo() -> anyhow::Result<Arc<dyn Repo>> {
    bail!("no repository backend compiled in; enable `inmem-store` or `postgres-store`")
}

/// Validate that required environment variables are set
fn validate_env_vars() -> anyhow::Result<()> {
    let secret = std::env::var("JWT_SECRET")
        .context("JWT_SECRET must be set (copy .env.example to .env and configure it)")?;
    if secret.len() < 32 {
        bail!("JWT_SECRET must be at least 32 characters long");
    }
    if std::env::var("BOOTSTRAP_ADMIN_EMAILS").map(|v| v.trim().is_empty()).unwrap_or(true) {
        warn!("BOOTSTRAP_ADMIN_EMAILS empty; nobody can register as admin");
    }
    Ok(())
}
