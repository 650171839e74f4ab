mod common;

use actix_web::http::StatusCode;
use actix_web::http::header::ContentType;
use actix_web::test;
use serde_json::Value;

use common::{access_token, bearer, peer};
use vems::rbac::SystemRole;

#[actix_web::test]
async fn unknown_routes_use_the_error_envelope() {
    let app = test_app!();

    let req = test::TestRequest::get()
        .uri("/nowhere")
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[actix_web::test]
async fn non_numeric_ids_are_bad_requests() {
    let app = test_app!();
    let admin = access_token(SystemRole::OrgAdmin, Some(1), None);

    let req = test::TestRequest::get()
        .uri("/api/v2/employees/abc")
        .insert_header(bearer(&admin))
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn malformed_json_is_a_bad_request() {
    let app = test_app!();
    let admin = access_token(SystemRole::OrgAdmin, Some(1), None);

    let req = test::TestRequest::post()
        .uri("/api/v2/departments")
        .insert_header(bearer(&admin))
        .insert_header(ContentType::json())
        .set_payload("{\"name\": ")
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn report_dates_are_validated() {
    let app = test_app!();
    let root = access_token(SystemRole::SuperAdmin, None, None);

    for uri in [
        "/api/v2/reports/attendance/summary?start_date=yesterday&end_date=2026-01-01",
        "/api/v2/reports/attendance/summary?start_date=2026-02-01&end_date=2026-01-01",
        "/api/v2/reports/attendance/departments?start_date=2024-01-01&end_date=2026-01-01",
    ] {
        let req = test::TestRequest::get()
            .uri(uri)
            .insert_header(bearer(&root))
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}
