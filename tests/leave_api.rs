mod common;

use actix_web::http::{Method, StatusCode};
use actix_web::test;
use serde_json::{Value, json};
use sqlx::MySqlPool;

use common::{access_token, authed, bearer, peer, seed_employee, seed_organization};
use vems::rbac::SystemRole;

#[actix_web::test]
async fn leave_ranges_must_be_ordered() {
    let app = test_app!();
    let employee = access_token(SystemRole::Employee, Some(1), Some(5));

    let req = test::TestRequest::post()
        .uri("/api/v2/leave-requests")
        .insert_header(bearer(&employee))
        .set_json(json!({
            "leave_type": "annual",
            "start_date": "2026-03-05",
            "end_date": "2026-03-01"
        }))
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn unknown_leave_types_are_rejected() {
    let app = test_app!();
    let employee = access_token(SystemRole::Employee, Some(1), Some(5));

    let req = test::TestRequest::post()
        .uri("/api/v2/leave-requests")
        .insert_header(bearer(&employee))
        .set_json(json!({
            "leave_type": "sabbatical",
            "start_date": "2026-03-01",
            "end_date": "2026-03-02"
        }))
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn security_staff_cannot_file_leave() {
    let app = test_app!();
    let security = access_token(SystemRole::Security, Some(1), Some(7));

    let req = test::TestRequest::post()
        .uri("/api/v2/leave-requests")
        .insert_header(bearer(&security))
        .set_json(json!({
            "leave_type": "sick",
            "start_date": "2026-03-01",
            "end_date": "2026-03-01"
        }))
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

fn leave(start: &str, end: &str) -> Value {
    json!({ "leave_type": "annual", "start_date": start, "end_date": end })
}

#[sqlx::test(migrations = "./migrations")]
async fn overlapping_open_leave_conflicts(pool: MySqlPool) {
    let org = seed_organization(&pool, "acme", "enterprise").await;
    let emp = seed_employee(&pool, org, "E-1").await;
    let app = test_app!(pool: pool.clone());
    let employee = access_token(SystemRole::Employee, Some(org), Some(emp));

    let req = authed(Method::POST, "/api/v2/leave-requests", &employee)
        .set_json(leave("2026-03-01", "2026-03-05"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    let first = body["data"]["id"].as_u64().unwrap();
    assert_eq!(body["data"]["total_days"], 5);

    // Shares 2026-03-05 with the first request.
    let req = authed(Method::POST, "/api/v2/leave-requests", &employee)
        .set_json(leave("2026-03-05", "2026-03-08"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // Adjacent ranges do not overlap.
    let req = authed(Method::POST, "/api/v2/leave-requests", &employee)
        .set_json(leave("2026-03-06", "2026-03-08"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    let second = body["data"]["id"].as_u64().unwrap();

    // Moving the second request onto the first conflicts; it never clashes
    // with itself.
    let req = authed(Method::PUT, &format!("/api/v2/leave-requests/{second}"), &employee)
        .set_json(json!({ "start_date": "2026-03-04" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
    let req = authed(Method::PUT, &format!("/api/v2/leave-requests/{second}"), &employee)
        .set_json(json!({ "end_date": "2026-03-09" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    // A cancelled request no longer blocks its dates.
    let req = authed(Method::PUT, &format!("/api/v2/leave-requests/{first}/cancel"), &employee)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    let req = authed(Method::POST, "/api/v2/leave-requests", &employee)
        .set_json(leave("2026-03-02", "2026-03-03"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
}
