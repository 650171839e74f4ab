mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use serde_json::{Value, json};
use sqlx::MySqlPool;

use common::{access_token, bearer, peer, refresh_token};
use vems::rbac::{SystemRole, seed_system_roles};

#[actix_web::test]
async fn protected_routes_require_a_token() {
    let app = test_app!();

    let req = test::TestRequest::get()
        .uri("/api/v2/employees")
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "UNAUTHORIZED");
}

#[actix_web::test]
async fn malformed_and_foreign_tokens_are_rejected() {
    let app = test_app!();

    for header in ["Token abc", "Bearer not-a-jwt"] {
        let req = test::TestRequest::get()
            .uri("/api/v2/auth/me")
            .insert_header(("Authorization", header))
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{header}");
    }

    // Signed with another secret.
    let mut other = common::config();
    other.jwt_secret = "other-secret".into();
    let subject = vems::auth::jwt::TokenSubject {
        user_id: 1,
        username: "x".into(),
        organization_id: Some(1),
        role: "org_admin".into(),
        role_level: 80,
        permissions: SystemRole::OrgAdmin.default_permissions(),
        employee_id: None,
    };
    let forged = vems::auth::jwt::generate_access_token(&subject, &other.jwt_secret, 60).unwrap();
    let req = test::TestRequest::get()
        .uri("/api/v2/auth/me")
        .insert_header(bearer(&forged))
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn refresh_tokens_cannot_call_the_api() {
    let app = test_app!();

    let req = test::TestRequest::get()
        .uri("/api/v2/employees")
        .insert_header(bearer(&refresh_token(SystemRole::OrgAdmin, Some(1))))
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Access token required");
}

#[actix_web::test]
async fn access_tokens_cannot_refresh() {
    let app = test_app!();

    let req = test::TestRequest::post()
        .uri("/api/v2/auth/refresh")
        .insert_header(bearer(&access_token(SystemRole::OrgAdmin, Some(1), None)))
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/api/v2/auth/refresh")
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn logout_without_a_refresh_token_is_a_no_op() {
    let app = test_app!();

    let req = test::TestRequest::post()
        .uri("/api/v2/auth/logout")
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[actix_web::test]
async fn login_requires_both_fields() {
    let app = test_app!();

    let req = test::TestRequest::post()
        .uri("/api/v2/auth/login")
        .set_json(json!({ "username": "  ", "password": "" }))
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn register_validates_before_touching_the_database() {
    let app = test_app!();

    let cases = [
        json!({ "organization_name": "Acme", "organization_slug": "Not A Slug",
                "username": "acme.admin", "email": "a@acme.test", "password": "changeme123" }),
        json!({ "organization_name": "Acme", "organization_slug": "acme",
                "username": "a b", "email": "a@acme.test", "password": "changeme123" }),
        json!({ "organization_name": "Acme", "organization_slug": "acme",
                "username": "acme.admin", "email": "not-an-email", "password": "changeme123" }),
        json!({ "organization_name": "Acme", "organization_slug": "acme",
                "username": "acme.admin", "email": "a@acme.test", "password": "short" }),
        json!({ "organization_name": " ", "organization_slug": "acme",
                "username": "acme.admin", "email": "a@acme.test", "password": "changeme123" }),
    ];

    for body in cases {
        let req = test::TestRequest::post()
            .uri("/api/v2/auth/register")
            .set_json(&body)
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
    }
}

#[actix_web::test]
async fn login_is_rate_limited_per_peer() {
    let mut config = common::config();
    config.rate_login_per_min = 2;
    let app = test_app!(config);

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let req = test::TestRequest::post()
            .uri("/api/v2/auth/login")
            .set_json(json!({ "username": "", "password": "" }))
            .peer_addr(peer())
            .to_request();
        statuses.push(test::call_service(&app, req).await.status());
    }

    assert_eq!(
        statuses,
        vec![StatusCode::BAD_REQUEST, StatusCode::BAD_REQUEST, StatusCode::TOO_MANY_REQUESTS]
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn refresh_tokens_rotate_and_reuse_revokes_the_family(pool: MySqlPool) {
    seed_system_roles(&pool).await.unwrap();
    let app = test_app!(pool: pool.clone());

    let req = test::TestRequest::post()
        .uri("/api/v2/auth/register")
        .set_json(json!({
            "organization_name": "Rotation Corp",
            "organization_slug": "rotation-corp",
            "username": "rotation.admin",
            "email": "admin@rotation.test",
            "password": "changeme123"
        }))
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    let first = body["data"]["refresh_token"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/v2/auth/refresh")
        .insert_header(bearer(&first))
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let second = body["data"]["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(first, second);

    // The rotated token comes back: everything issued to the user dies.
    let req = test::TestRequest::post()
        .uri("/api/v2/auth/refresh")
        .insert_header(bearer(&first))
        .peer_addr(peer())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/api/v2/auth/refresh")
        .insert_header(bearer(&second))
        .peer_addr(peer())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let live: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM refresh_tokens WHERE revoked = FALSE")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(live, 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn logout_revokes_the_presented_refresh_token(pool: MySqlPool) {
    seed_system_roles(&pool).await.unwrap();
    let app = test_app!(pool: pool.clone());

    let req = test::TestRequest::post()
        .uri("/api/v2/auth/register")
        .set_json(json!({
            "organization_name": "Logout Corp",
            "organization_slug": "logout-corp",
            "username": "logout.admin",
            "email": "admin@logout.test",
            "password": "changeme123"
        }))
        .peer_addr(peer())
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let token = body["data"]["refresh_token"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/v2/auth/logout")
        .insert_header(bearer(&token))
        .peer_addr(peer())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::post()
        .uri("/api/v2/auth/refresh")
        .insert_header(bearer(&token))
        .peer_addr(peer())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
}
