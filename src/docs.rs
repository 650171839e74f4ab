use crate::api::{
    attendance::{CheckIn, CheckOut, CreateAttendance, UpdateAttendance},
    camera::{CreateCamera, Heartbeat, UpdateCamera},
    change_request::{CreateChangeRequest, ReviewChangeRequest},
    department::{CreateDepartment, UpdateDepartment},
    employee::{CreateEmployee, UpdateEmployee},
    leave_request::{CreateLeave, ReviewLeave, UpdateLeave},
    location::{CreateLocation, UpdateLocation},
    lpr::{CreateVehicle, IngestPlate, UpdateVehicle},
    organization::{ChangeSubscription, CreateOrganization, UpdateOrganization},
    role::{CreateRole, UpdateRole},
    shift::{CreateShift, UpdateShift},
    user::{CreateUser, UpdateUser},
    visitor::{Blacklist, CreateVisit, CreateVisitor, UpdateVisitor, VisitCheckIn},
};
use crate::model::{
    attendance::{AttendanceRecord, AttendanceStatus, CheckInMethod},
    audit_log::AuditLog,
    camera::{Camera, CameraStatus, CameraType},
    change_request::{ChangeRequest, ChangeRequestStatus, ProposedChanges},
    department::Department,
    employee::{Employee, EmployeeStatus},
    leave_request::{LeaveRequest, LeaveStatus, LeaveType},
    location::Location,
    lpr::{AccessDecision, Direction, LprLog, LprVehicle, OwnerType},
    organization::Organization,
    report::{AttendanceSummary, DepartmentSummary, EmployeeSummary, SummaryReport},
    role::Role,
    shift::Shift,
    user::User,
    visitor::{VisitStatus, Visitor, VisitorVisit},
};
use crate::models::{ChangePasswordReq, LoginReqDto, RegisterReq, TokenPair};
use crate::response::{PageQuery, Pagination};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Visitor & Employee Management API",
        version = "2.0.0",
        description = r#"
## Multi-tenant visitor, employee and attendance management

### Key Features
- **Organizations** on subscription tiers (free, basic, professional, enterprise)
- **Roles & RBAC** with `resource:action` permissions and role levels
- **Employees, departments, shifts, locations and cameras**
- **Attendance** check-in/out, manual records and change requests
- **Leave** requests with approval workflow
- **Visitors** with badges and blacklist, **LPR** vehicle access logs
- **Reports** and an **audit trail**

### Security
All endpoints except `/auth/login`, `/auth/register`, `/auth/refresh` and
`/auth/logout` require an access token: `Authorization: Bearer <token>`.

### Response Format
`{success, message, data, pagination}`; errors carry `error` with a stable
code (`VALIDATION_ERROR`, `UNAUTHORIZED`, `FORBIDDEN`, `NOT_FOUND`,
`CONFLICT`, `INTERNAL_SERVER_ERROR`).
"#,
    ),
    paths(
        crate::auth::handlers::register,
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,
        crate::auth::handlers::me,
        crate::auth::handlers::change_password,

        crate::api::organization::list_organizations,
        crate::api::organization::get_organization,
        crate::api::organization::create_organization,
        crate::api::organization::update_organization,
        crate::api::organization::change_subscription,
        crate::api::organization::delete_organization,

        crate::api::role::list_roles,
        crate::api::role::get_role,
        crate::api::role::create_role,
        crate::api::role::update_role,
        crate::api::role::delete_role,

        crate::api::user::list_users,
        crate::api::user::get_user,
        crate::api::user::create_user,
        crate::api::user::update_user,
        crate::api::user::delete_user,

        crate::api::department::list_departments,
        crate::api::department::get_department,
        crate::api::department::create_department,
        crate::api::department::update_department,
        crate::api::department::delete_department,

        crate::api::employee::create_employee,
        crate::api::employee::get_employee,
        crate::api::employee::list_employees,
        crate::api::employee::update_employee,
        crate::api::employee::delete_employee,

        crate::api::shift::list_shifts,
        crate::api::shift::get_shift,
        crate::api::shift::create_shift,
        crate::api::shift::update_shift,
        crate::api::shift::delete_shift,

        crate::api::location::list_locations,
        crate::api::location::get_location,
        crate::api::location::create_location,
        crate::api::location::update_location,
        crate::api::location::delete_location,

        crate::api::camera::list_cameras,
        crate::api::camera::get_camera,
        crate::api::camera::create_camera,
        crate::api::camera::update_camera,
        crate::api::camera::heartbeat,
        crate::api::camera::delete_camera,

        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::list_attendance,
        crate::api::attendance::get_attendance,
        crate::api::attendance::create_attendance,
        crate::api::attendance::update_attendance,
        crate::api::attendance::delete_attendance,

        crate::api::change_request::create_change_request,
        crate::api::change_request::list_change_requests,
        crate::api::change_request::get_change_request,
        crate::api::change_request::approve_change_request,
        crate::api::change_request::reject_change_request,

        crate::api::leave_request::list_leaves,
        crate::api::leave_request::get_leave,
        crate::api::leave_request::create_leave,
        crate::api::leave_request::update_leave,
        crate::api::leave_request::approve_leave,
        crate::api::leave_request::reject_leave,
        crate::api::leave_request::cancel_leave,
        crate::api::leave_request::delete_leave,

        crate::api::audit_log::list_audit_logs,
        crate::api::audit_log::get_audit_log,

        crate::api::visitor::list_visitors,
        crate::api::visitor::get_visitor,
        crate::api::visitor::create_visitor,
        crate::api::visitor::update_visitor,
        crate::api::visitor::blacklist_visitor,
        crate::api::visitor::unblacklist_visitor,
        crate::api::visitor::delete_visitor,
        crate::api::visitor::list_visits,
        crate::api::visitor::get_visit,
        crate::api::visitor::create_visit,
        crate::api::visitor::check_in_visit,
        crate::api::visitor::check_out_visit,
        crate::api::visitor::cancel_visit,

        crate::api::lpr::list_vehicles,
        crate::api::lpr::get_vehicle,
        crate::api::lpr::create_vehicle,
        crate::api::lpr::update_vehicle,
        crate::api::lpr::delete_vehicle,
        crate::api::lpr::ingest_plate,
        crate::api::lpr::list_logs,
        crate::api::lpr::get_log,

        crate::api::report::attendance_summary,
        crate::api::report::department_breakdown,
        crate::api::report::employee_breakdown
    ),
    components(
        schemas(
            RegisterReq, LoginReqDto, ChangePasswordReq, TokenPair,
            PageQuery, Pagination,
            Organization, CreateOrganization, UpdateOrganization, ChangeSubscription,
            Role, CreateRole, UpdateRole,
            User, CreateUser, UpdateUser,
            Department, CreateDepartment, UpdateDepartment,
            Employee, EmployeeStatus, CreateEmployee, UpdateEmployee,
            Shift, CreateShift, UpdateShift,
            Location, CreateLocation, UpdateLocation,
            Camera, CameraType, CameraStatus, CreateCamera, UpdateCamera, Heartbeat,
            AttendanceRecord, AttendanceStatus, CheckInMethod,
            CheckIn, CheckOut, CreateAttendance, UpdateAttendance,
            ChangeRequest, ChangeRequestStatus, ProposedChanges,
            CreateChangeRequest, ReviewChangeRequest,
            LeaveRequest, LeaveType, LeaveStatus, CreateLeave, UpdateLeave, ReviewLeave,
            AuditLog,
            Visitor, VisitorVisit, VisitStatus,
            CreateVisitor, UpdateVisitor, Blacklist, CreateVisit, VisitCheckIn,
            LprVehicle, LprLog, OwnerType, Direction, AccessDecision,
            CreateVehicle, UpdateVehicle, IngestPlate,
            AttendanceSummary, SummaryReport, DepartmentSummary, EmployeeSummary
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Signup, login, token rotation"),
        (name = "Organizations", description = "Tenants and subscription tiers"),
        (name = "Roles", description = "System and custom roles"),
        (name = "Users", description = "Login accounts"),
        (name = "Departments", description = "Department management APIs"),
        (name = "Employees", description = "Employee management APIs"),
        (name = "Shifts", description = "Shift schedules"),
        (name = "Locations", description = "Sites and buildings"),
        (name = "Cameras", description = "Camera registry and heartbeats"),
        (name = "Attendance", description = "Attendance management APIs"),
        (name = "Attendance change requests", description = "Attendance correction workflow"),
        (name = "Leave", description = "Leave management APIs"),
        (name = "Audit logs", description = "Append-only audit trail"),
        (name = "Visitors", description = "Visitors, visits and badges"),
        (name = "LPR", description = "Registered vehicles and plate logs"),
        (name = "Reports", description = "Attendance reports"),
    )
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
