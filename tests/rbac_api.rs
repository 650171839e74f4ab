mod common;

use actix_web::http::{Method, StatusCode};
use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::test;
use serde_json::{Value, json};

use common::{access_token, bearer, peer};
use vems::rbac::SystemRole;

fn request(method: Method, uri: &str, token: &str, body: Option<Value>) -> test::TestRequest {
    let req = test::TestRequest::default()
        .method(method)
        .uri(uri)
        .insert_header(bearer(token))
        .peer_addr(peer());
    match body {
        Some(body) => req.set_json(body),
        None => req,
    }
}

async fn send<S, R, B>(app: &S, req: R) -> (StatusCode, Value)
where
    S: Service<R, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let resp = test::call_service(app, req).await;
    let status = resp.status();
    let body: Value = test::read_body_json(resp).await;
    (status, body)
}

macro_rules! call {
    ($app:expr, $($arg:expr),+ $(,)?) => {
        send($app, request($($arg),+).to_request())
    };
}

#[actix_web::test]
async fn missing_permission_is_forbidden_even_for_invalid_bodies() {
    let app = test_app!();
    let employee = access_token(SystemRole::Employee, Some(1), Some(5));

    // Well-formed JSON with semantically invalid values still gets 403.
    let (status, body) = call!(
        &app,
        Method::POST,
        "/api/v2/employees",
        &employee,
        Some(json!({
            "employee_code": "",
            "first_name": "",
            "last_name": "",
            "email": "nope",
            "hire_date": "2026-01-01"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "FORBIDDEN");
    assert_eq!(body["success"], false);
}

#[actix_web::test]
async fn employees_cannot_review_leave() {
    let app = test_app!();
    let employee = access_token(SystemRole::Employee, Some(1), Some(5));

    for action in ["approve", "reject"] {
        let (status, _) = call!(
            &app,
            Method::PUT,
            &format!("/api/v2/leave-requests/9/{action}"),
            &employee,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{action}");
    }
}

#[actix_web::test]
async fn only_super_admins_create_organizations() {
    let app = test_app!();
    let admin = access_token(SystemRole::OrgAdmin, Some(1), None);

    let (status, _) = call!(
        &app,
        Method::POST,
        "/api/v2/organizations",
        &admin,
        Some(json!({ "name": "Other", "slug": "other" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn roles_must_rank_below_their_creator() {
    let app = test_app!();
    let admin = access_token(SystemRole::OrgAdmin, Some(1), None);

    let (status, body) = call!(
        &app,
        Method::POST,
        "/api/v2/roles",
        &admin,
        Some(json!({
            "name": "deputy_admin",
            "display_name": "Deputy admin",
            "level": 80,
            "permissions": { "employees": ["read"] }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
}

#[actix_web::test]
async fn tenants_cannot_target_other_organizations() {
    let app = test_app!();
    let hr = access_token(SystemRole::HrManager, Some(1), None);

    let (status, _) = call!(
        &app,
        Method::POST,
        "/api/v2/employees",
        &hr,
        Some(json!({
            "organization_id": 2,
            "employee_code": "E-1",
            "first_name": "Ada",
            "last_name": "Lee",
            "email": "ada@acme.test",
            "hire_date": "2026-01-01"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn audit_logs_need_their_own_permission() {
    let app = test_app!();

    for role in [SystemRole::HrManager, SystemRole::Manager, SystemRole::Security, SystemRole::Employee] {
        let token = access_token(role, Some(1), Some(5));
        let (status, _) = call!(&app, Method::GET, "/api/v2/audit-logs", &token, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{role}");
    }
}

#[actix_web::test]
async fn self_service_users_cannot_act_for_others() {
    let app = test_app!();
    let employee = access_token(SystemRole::Employee, Some(1), Some(5));

    let (status, _) = call!(
        &app,
        Method::POST,
        "/api/v2/leave-requests",
        &employee,
        Some(json!({
            "employee_id": 6,
            "leave_type": "annual",
            "start_date": "2026-03-01",
            "end_date": "2026-03-02"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
