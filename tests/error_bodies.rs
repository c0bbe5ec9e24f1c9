mod common;

use actix_web::http::header::CONTENT_TYPE;
use actix_web::test;
use common::*;
use newsgate::repo::inmem::InMemRepo;
use serde_json::Value;
use serial_test::serial;

async fn assert_json_error<B: actix_web::body::MessageBody>(resp: actix_web::dev::ServiceResponse<B>, status: u16) {
    assert_eq!(resp.status().as_u16(), status);
    let ct = resp.headers().get(CONTENT_TYPE).unwrap().to_str().unwrap().to_string();
    assert!(ct.starts_with("application/json"), "content-type was {ct}");
    let v: Value = test::read_body_json(resp).await;
    assert!(v["error"].as_str().is_some_and(|m| !m.is_empty()), "body was {v}");
}

#[actix_web::test]
#[serial]
async fn auth_failures_are_json() {
    ensure_secret();
    let repo = InMemRepo::ephemeral();
    let app = app(state(&repo)).await;

    let req = test::TestRequest::get().uri("/api/auth/me").to_request();
    assert_json_error(test::call_service(&app, req).await, 401).await;

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(bearer("not.a.jwt"))
        .to_request();
    assert_json_error(test::call_service(&app, req).await, 401).await;

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header(("Authorization", "Basic dXNlcjpwYXNz"))
        .to_request();
    assert_json_error(test::call_service(&app, req).await, 401).await;
}

#[actix_web::test]
#[serial]
async fn malformed_input_is_json_bad_request() {
    ensure_secret();
    let repo = InMemRepo::ephemeral();
    let app = app(state(&repo)).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .insert_header((CONTENT_TYPE, "application/json"))
        .set_payload("{")
        .to_request();
    assert_json_error(test::call_service(&app, req).await, 400).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .insert_header((CONTENT_TYPE, "application/json"))
        .set_payload(r#"{"email": 5}"#)
        .to_request();
    assert_json_error(test::call_service(&app, req).await, 400).await;

    let req = test::TestRequest::get().uri("/api/articles/abc").to_request();
    assert_json_error(test::call_service(&app, req).await, 400).await;

    let req = test::TestRequest::get().uri("/api/articles/abc/comments").to_request();
    assert_json_error(test::call_service(&app, req).await, 400).await;
}

#[actix_web::test]
#[serial]
async fn bad_paging_falls_back_to_defaults() {
    let repo = InMemRepo::ephemeral();
    let app = app(state(&repo)).await;

    for uri in ["/api/articles?page=abc&limit=-1", "/api/articles?page=0&limit=0", "/api/articles?page=&limit=1.5"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200, "{uri}");
        let v: Value = test::read_body_json(resp).await;
        assert_eq!(v["page"], 1, "{uri}");
        assert_eq!(v["limit"], 5, "{uri}");
    }

    let req = test::TestRequest::get().uri("/api/articles?limit=500").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v["limit"], 50);
}
