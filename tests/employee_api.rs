mod common;

use actix_web::http::{Method, StatusCode};
use actix_web::test;
use serde_json::{Value, json};
use sqlx::MySqlPool;

use common::{access_token, authed, seed_employee, seed_organization};
use vems::rbac::SystemRole;

fn new_employee(code: &str, email: &str) -> Value {
    json!({
        "employee_code": code,
        "first_name": "Ada",
        "last_name": "Lee",
        "email": email,
        "hire_date": "2026-01-01"
    })
}

#[sqlx::test(migrations = "./migrations")]
async fn employee_code_and_email_are_unique_per_organization(pool: MySqlPool) {
    let acme = seed_organization(&pool, "acme", "enterprise").await;
    let globex = seed_organization(&pool, "globex", "enterprise").await;
    let app = test_app!(pool: pool.clone());
    let acme_admin = access_token(SystemRole::OrgAdmin, Some(acme), None);
    let globex_admin = access_token(SystemRole::OrgAdmin, Some(globex), None);

    let req = authed(Method::POST, "/api/v2/employees", &acme_admin)
        .set_json(new_employee("E-1", "ada@acme.test"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = authed(Method::POST, "/api/v2/employees", &acme_admin)
        .set_json(new_employee("E-1", "other@acme.test"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "CONFLICT");

    // Emails compare case-insensitively.
    let req = authed(Method::POST, "/api/v2/employees", &acme_admin)
        .set_json(new_employee("E-2", "ADA@acme.test"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

    // Another tenant may reuse both.
    let req = authed(Method::POST, "/api/v2/employees", &globex_admin)
        .set_json(new_employee("E-1", "ada@acme.test"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
}

#[sqlx::test(migrations = "./migrations")]
async fn soft_deleted_employees_are_hidden_but_kept(pool: MySqlPool) {
    let org = seed_organization(&pool, "acme", "enterprise").await;
    let id = seed_employee(&pool, org, "E-1").await;
    let app = test_app!(pool: pool.clone());
    let admin = access_token(SystemRole::OrgAdmin, Some(org), None);

    let req = authed(Method::DELETE, &format!("/api/v2/employees/{id}"), &admin).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = authed(Method::GET, &format!("/api/v2/employees/{id}"), &admin).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = authed(Method::GET, "/api/v2/employees", &admin).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["pagination"]["total"], 0);
    assert_eq!(body["data"], json!([]));

    let retained: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM employees WHERE id = ? AND deleted_at IS NOT NULL",
    )
    .bind(id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(retained, 1);

    // The code is free again once the holder is deleted.
    let req = authed(Method::POST, "/api/v2/employees", &admin)
        .set_json(new_employee("E-1", "e-1@acme.test"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
}

#[sqlx::test(migrations = "./migrations")]
async fn hard_deleting_a_referenced_row_is_a_conflict(pool: MySqlPool) {
    let org = seed_organization(&pool, "acme", "enterprise").await;
    let department = sqlx::query("INSERT INTO departments (organization_id, name) VALUES (?, 'Ops')")
        .bind(org)
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_id();
    let employee = seed_employee(&pool, org, "E-1").await;
    sqlx::query("UPDATE employees SET department_id = ? WHERE id = ?")
        .bind(department)
        .bind(employee)
        .execute(&pool)
        .await
        .unwrap();

    let app = test_app!(pool: pool.clone());
    let root = access_token(SystemRole::SuperAdmin, None, None);

    let req = authed(
        Method::DELETE,
        &format!("/api/v2/departments/{department}?hard=true"),
        &root,
    )
    .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Record is still referenced by other records");

    // An unreferenced employee goes away for good.
    let req = authed(Method::DELETE, &format!("/api/v2/employees/{employee}?hard=true"), &root)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM employees WHERE id = ?")
        .bind(employee)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(left, 0);
}
