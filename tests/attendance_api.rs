mod common;

use actix_web::http::{Method, StatusCode};
use actix_web::test;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use sqlx::MySqlPool;

use common::{access_token, authed, seed_employee, seed_organization};
use vems::rbac::SystemRole;

#[sqlx::test(migrations = "./migrations")]
async fn second_check_in_on_the_same_day_conflicts(pool: MySqlPool) {
    let org = seed_organization(&pool, "acme", "enterprise").await;
    let emp = seed_employee(&pool, org, "E-1").await;
    let app = test_app!(pool: pool.clone());
    let employee = access_token(SystemRole::Employee, Some(org), Some(emp));

    let req = authed(Method::POST, "/api/v2/attendance/check-in", &employee).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["employee_id"], emp);
    assert_eq!(body["data"]["status"], "present");

    let req = authed(Method::POST, "/api/v2/attendance/check-in", &employee).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendance_records WHERE employee_id = ?")
        .bind(emp)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(records, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn approved_change_request_creates_the_missing_record(pool: MySqlPool) {
    let org = seed_organization(&pool, "acme", "enterprise").await;
    let emp = seed_employee(&pool, org, "E-1").await;
    let app = test_app!(pool: pool.clone());
    let employee = access_token(SystemRole::Employee, Some(org), Some(emp));
    let hr = access_token(SystemRole::HrManager, Some(org), None);

    let day = Utc::now().date_naive() - Duration::days(1);
    let req = authed(Method::POST, "/api/v2/attendance/change-requests", &employee)
        .set_json(json!({
            "date": day,
            "requested_changes": {
                "check_in_time": format!("{day}T09:00:00"),
                "check_out_time": format!("{day}T17:00:00")
            },
            "reason": "Forgot to badge in"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    let request_id = body["data"]["id"].as_u64().unwrap();
    assert!(body["data"]["attendance_id"].is_null());

    let req = authed(
        Method::PUT,
        &format!("/api/v2/attendance/change-requests/{request_id}/approve"),
        &hr,
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "approved");
    let attendance_id = body["data"]["attendance_id"].as_u64().unwrap();

    let req = authed(Method::GET, &format!("/api/v2/attendance/{attendance_id}"), &hr).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["employee_id"], emp);
    assert_eq!(body["data"]["date"], day.to_string());
    assert_eq!(body["data"]["work_hours"], 8.0);
    assert_eq!(body["data"]["check_in_method"], "manual");

    // Processed requests stay processed.
    let req = authed(
        Method::PUT,
        &format!("/api/v2/attendance/change-requests/{request_id}/approve"),
        &hr,
    )
    .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
}

#[sqlx::test(migrations = "./migrations")]
async fn approved_change_request_updates_the_existing_record(pool: MySqlPool) {
    let org = seed_organization(&pool, "acme", "enterprise").await;
    let emp = seed_employee(&pool, org, "E-1").await;
    let app = test_app!(pool: pool.clone());
    let employee = access_token(SystemRole::Employee, Some(org), Some(emp));
    let hr = access_token(SystemRole::HrManager, Some(org), None);

    let req = authed(Method::POST, "/api/v2/attendance/check-in", &employee).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let attendance_id = body["data"]["id"].as_u64().unwrap();

    let req = authed(Method::POST, "/api/v2/attendance/change-requests", &employee)
        .set_json(json!({
            "date": Utc::now().date_naive(),
            "requested_changes": { "status": "late", "notes": "Train delay" },
            "reason": "Marked present by mistake"
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["attendance_id"], attendance_id);
    let request_id = body["data"]["id"].as_u64().unwrap();

    let req = authed(
        Method::PUT,
        &format!("/api/v2/attendance/change-requests/{request_id}/approve"),
        &hr,
    )
    .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let rows: Vec<(u64, String, Option<String>)> =
        sqlx::query_as("SELECT id, status, notes FROM attendance_records WHERE employee_id = ?")
            .bind(emp)
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(
        rows,
        vec![(attendance_id, "late".to_string(), Some("Train delay".to_string()))]
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn reviewers_cannot_approve_their_own_change_requests(pool: MySqlPool) {
    let org = seed_organization(&pool, "acme", "enterprise").await;
    let emp = seed_employee(&pool, org, "E-1").await;
    let app = test_app!(pool: pool.clone());
    // A manager files a request for themself.
    let manager = access_token(SystemRole::Manager, Some(org), Some(emp));

    let day = Utc::now().date_naive() - Duration::days(2);
    let req = authed(Method::POST, "/api/v2/attendance/change-requests", &manager)
        .set_json(json!({
            "date": day,
            "requested_changes": { "status": "present" },
            "reason": "Was on site"
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let request_id = body["data"]["id"].as_u64().unwrap();

    let req = authed(
        Method::PUT,
        &format!("/api/v2/attendance/change-requests/{request_id}/approve"),
        &manager,
    )
    .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
}
