#![allow(dead_code)]

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::{test, web, App};
use newsgate::models::{NewUser, User};
use newsgate::payment::{CheckoutProvider, PaymentError};
use newsgate::auth::{create_jwt, Role};
use newsgate::repo::inmem::InMemRepo;
use newsgate::repo::UserRepo;
use newsgate::{config, AppState, SecurityHeaders};
use std::sync::Arc;

pub const SECRET: &str = "test-secret-must-be-32-bytes-long!!";

pub fn ensure_secret() {
    std::env::set_var("JWT_SECRET", SECRET);
}

/// Checkout provider that never talks to the network.
pub struct FakeCheckout;

#[async_trait::async_trait]
impl CheckoutProvider for FakeCheckout {
    async fn create_checkout(&self, user: &User) -> Result<String, PaymentError> {
        Ok(format!("https://checkout.test/{}", user.id))
    }
}

pub fn state(repo: &InMemRepo) -> AppState {
    AppState::new(Arc::new(repo.clone()), Arc::new(FakeCheckout))
}

pub async fn app(
    state: AppState,
) -> impl Service<actix_http::Request, Response = ServiceResponse<impl MessageBody>, Error = actix_web::Error> {
    test::init_service(
        App::new()
            .wrap(SecurityHeaders::default())
            .app_data(web::Data::new(state))
            .configure(config),
    )
    .await
}

/// Inserts a user directly and returns it with a bearer token.
pub async fn user_with_token(repo: &InMemRepo, email: &str, role: Role) -> (User, String) {
    ensure_secret();
    let user = repo
        .create_user(NewUser { email: email.into(), password_hash: "unused".into(), role })
        .await
        .unwrap();
    let token = create_jwt(user.id, role).unwrap();
    (user, token)
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}
