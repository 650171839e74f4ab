pub mod attendance;
pub mod audit_log;
pub mod camera;
pub mod change_request;
pub mod department;
pub mod employee;
pub mod leave_request;
pub mod location;
pub mod lpr;
pub mod organization;
pub mod report;
pub mod role;
pub mod shift;
pub mod user;
pub mod visitor;
