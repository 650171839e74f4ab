//! Role-based access control policy.
//!
//! A role carries a permission map of `resource -> [actions]`. A request for
//! `resource:action` is allowed when the map has an entry for the resource
//! (or for `"*"`) that lists the action (or `"*"`). Roles also carry a
//! numeric level used for hierarchy gates such as role assignment.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use std::collections::{BTreeMap, BTreeSet};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

pub const WILDCARD: &str = "*";

/// Resource names used in permission maps.
pub mod resource {
    pub const ORGANIZATIONS: &str = "organizations";
    pub const DEPARTMENTS: &str = "departments";
    pub const EMPLOYEES: &str = "employees";
    pub const USERS: &str = "users";
    pub const ROLES: &str = "roles";
    pub const SHIFTS: &str = "shifts";
    pub const LOCATIONS: &str = "locations";
    pub const CAMERAS: &str = "cameras";
    pub const ATTENDANCE: &str = "attendance";
    pub const LEAVE: &str = "leave";
    pub const CHANGE_REQUESTS: &str = "change_requests";
    pub const AUDIT_LOGS: &str = "audit_logs";
    pub const VISITORS: &str = "visitors";
    pub const LPR: &str = "lpr";
    pub const REPORTS: &str = "reports";
}

pub mod action {
    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const APPROVE: &str = "approve";
}

/// Permission map stored in `roles.permissions` and carried in access tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeMap<String, BTreeSet<String>>);

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, resource: &str, actions: &[&str]) -> Self {
        let entry = self.0.entry(resource.to_string()).or_default();
        entry.extend(actions.iter().map(|a| a.to_string()));
        self
    }

    pub fn allows(&self, resource: &str, action: &str) -> bool {
        [resource, WILDCARD].iter().any(|key| {
            self.0
                .get(*key)
                .is_some_and(|actions| actions.contains(action) || actions.contains(WILDCARD))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rejects unknown resource names and empty action lists.
    pub fn validate(&self) -> Result<(), String> {
        for (res, actions) in &self.0 {
            if res != WILDCARD && !ALL_RESOURCES.contains(&res.as_str()) {
                return Err(format!("Unknown permission resource '{res}'"));
            }
            if actions.is_empty() {
                return Err(format!("Permission '{res}' has no actions"));
            }
        }
        Ok(())
    }
}

pub const ALL_RESOURCES: &[&str] = &[
    resource::ORGANIZATIONS,
    resource::DEPARTMENTS,
    resource::EMPLOYEES,
    resource::USERS,
    resource::ROLES,
    resource::SHIFTS,
    resource::LOCATIONS,
    resource::CAMERAS,
    resource::ATTENDANCE,
    resource::LEAVE,
    resource::CHANGE_REQUESTS,
    resource::AUDIT_LOGS,
    resource::VISITORS,
    resource::LPR,
    resource::REPORTS,
];

/// Built-in roles, seeded at startup with `organization_id = NULL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SystemRole {
    SuperAdmin,
    OrgAdmin,
    HrManager,
    Manager,
    Security,
    Employee,
}

impl SystemRole {
    pub fn level(self) -> i32 {
        match self {
            SystemRole::SuperAdmin => 100,
            SystemRole::OrgAdmin => 80,
            SystemRole::HrManager => 60,
            SystemRole::Manager => 40,
            SystemRole::Security => 30,
            SystemRole::Employee => 10,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SystemRole::SuperAdmin => "Super Administrator",
            SystemRole::OrgAdmin => "Organization Administrator",
            SystemRole::HrManager => "HR Manager",
            SystemRole::Manager => "Manager",
            SystemRole::Security => "Security Staff",
            SystemRole::Employee => "Employee",
        }
    }

    pub fn default_permissions(self) -> Permissions {
        use action::*;
        use resource::*;

        const CRUD: &[&str] = &[CREATE, READ, UPDATE, DELETE];

        match self {
            SystemRole::SuperAdmin => Permissions::new().grant(WILDCARD, &[WILDCARD]),
            SystemRole::OrgAdmin => ALL_RESOURCES
                .iter()
                .filter(|r| **r != ORGANIZATIONS)
                .fold(Permissions::new(), |p, r| p.grant(r, &[WILDCARD]))
                .grant(ORGANIZATIONS, &[READ, UPDATE]),
            SystemRole::HrManager => Permissions::new()
                .grant(ORGANIZATIONS, &[READ])
                .grant(DEPARTMENTS, CRUD)
                .grant(EMPLOYEES, CRUD)
                .grant(USERS, &[CREATE, READ, UPDATE])
                .grant(ROLES, &[READ])
                .grant(SHIFTS, CRUD)
                .grant(LOCATIONS, &[READ])
                .grant(ATTENDANCE, &[WILDCARD])
                .grant(LEAVE, &[WILDCARD])
                .grant(CHANGE_REQUESTS, &[WILDCARD])
                .grant(REPORTS, &[READ]),
            SystemRole::Manager => Permissions::new()
                .grant(DEPARTMENTS, &[READ])
                .grant(EMPLOYEES, &[READ])
                .grant(SHIFTS, &[READ])
                .grant(LOCATIONS, &[READ])
                .grant(ATTENDANCE, &[CREATE, READ, UPDATE])
                .grant(LEAVE, &[CREATE, READ, UPDATE, APPROVE])
                .grant(CHANGE_REQUESTS, &[CREATE, READ, APPROVE])
                .grant(VISITORS, &[CREATE, READ, UPDATE])
                .grant(REPORTS, &[READ]),
            SystemRole::Security => Permissions::new()
                .grant(EMPLOYEES, &[READ])
                .grant(LOCATIONS, &[READ])
                .grant(CAMERAS, &[READ, UPDATE])
                .grant(VISITORS, CRUD)
                .grant(LPR, &[CREATE, READ, UPDATE])
                .grant(ATTENDANCE, &[CREATE, READ]),
            SystemRole::Employee => Permissions::new()
                .grant(ATTENDANCE, &[CREATE, READ])
                .grant(LEAVE, &[CREATE, READ, UPDATE])
                .grant(CHANGE_REQUESTS, &[CREATE, READ])
                .grant(SHIFTS, &[READ])
                .grant(DEPARTMENTS, &[READ]),
        }
    }
}

/// Levels below this only see and act on their own employee record for
/// attendance, leave and change requests.
pub const SELF_SERVICE_BELOW: i32 = 40;

/// A caller may only hand out roles strictly below their own level.
pub fn can_assign_level(actor_level: i32, target_level: i32, actor_is_super: bool) -> bool {
    actor_is_super || target_level < actor_level
}

/// Which organizations a query may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantScope {
    All,
    Organization(u64),
}

impl TenantScope {
    pub fn allows(&self, organization_id: u64) -> bool {
        match self {
            TenantScope::All => true,
            TenantScope::Organization(own) => *own == organization_id,
        }
    }

    pub fn organization_id(&self) -> Option<u64> {
        match self {
            TenantScope::All => None,
            TenantScope::Organization(id) => Some(*id),
        }
    }
}

/// Inserts any missing system role. Existing rows are left untouched so
/// operators can tune system permissions in place.
pub async fn seed_system_roles(pool: &MySqlPool) -> Result<(), sqlx::Error> {
    for role in SystemRole::iter() {
        let permissions = serde_json::to_value(role.default_permissions())
            .unwrap_or_else(|_| json!({}));

        let result = sqlx::query(
            r#"
            INSERT INTO roles (organization_id, name, display_name, level, permissions, is_system)
            SELECT NULL, ?, ?, ?, ?, TRUE
            FROM DUAL
            WHERE NOT EXISTS (
                SELECT 1 FROM roles WHERE organization_id IS NULL AND name = ? AND deleted_at IS NULL
            )
            "#,
        )
        .bind(role.as_ref())
        .bind(role.display_name())
        .bind(role.level())
        .bind(sqlx::types::Json(permissions))
        .bind(role.as_ref())
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(role = %role, "Seeded system role");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_action_is_allowed() {
        let p = Permissions::new().grant("leave", &["read", "create"]);
        assert!(p.allows("leave", "read"));
        assert!(!p.allows("leave", "approve"));
        assert!(!p.allows("attendance", "read"));
    }

    #[test]
    fn wildcard_action_and_resource() {
        let p = Permissions::new().grant("visitors", &["*"]);
        assert!(p.allows("visitors", "delete"));
        assert!(!p.allows("lpr", "read"));

        let all = Permissions::new().grant("*", &["*"]);
        assert!(all.allows("lpr", "create"));
    }

    #[test]
    fn wildcard_resource_with_limited_actions() {
        let p = Permissions::new().grant("*", &["read"]);
        assert!(p.allows("employees", "read"));
        assert!(!p.allows("employees", "delete"));
    }

    #[test]
    fn permissions_round_trip_as_plain_json_map() {
        let p: Permissions = serde_json::from_value(json!({"leave": ["read", "approve"]})).unwrap();
        assert!(p.allows("leave", "approve"));
        assert_eq!(
            serde_json::to_value(&p).unwrap(),
            json!({"leave": ["approve", "read"]})
        );
    }

    #[test]
    fn validate_rejects_unknown_resource_and_empty_actions() {
        let unknown: Permissions = serde_json::from_value(json!({"payroll": ["read"]})).unwrap();
        assert!(unknown.validate().is_err());

        let empty: Permissions = serde_json::from_value(json!({"leave": []})).unwrap();
        assert!(empty.validate().is_err());

        assert!(SystemRole::HrManager.default_permissions().validate().is_ok());
    }

    #[test]
    fn org_admin_cannot_create_organizations() {
        let p = SystemRole::OrgAdmin.default_permissions();
        assert!(p.allows("employees", "delete"));
        assert!(p.allows("organizations", "update"));
        assert!(!p.allows("organizations", "create"));
    }

    #[test]
    fn employee_role_cannot_approve_leave() {
        let p = SystemRole::Employee.default_permissions();
        assert!(p.allows("leave", "create"));
        assert!(!p.allows("leave", "approve"));
        assert!(SystemRole::Employee.level() < SELF_SERVICE_BELOW);
        assert!(SystemRole::Manager.level() >= SELF_SERVICE_BELOW);
    }

    #[test]
    fn role_names_are_snake_case() {
        assert_eq!(SystemRole::SuperAdmin.as_ref(), "super_admin");
        assert_eq!("hr_manager".parse::<SystemRole>().unwrap(), SystemRole::HrManager);
    }

    #[test]
    fn assignment_requires_lower_level() {
        assert!(can_assign_level(80, 60, false));
        assert!(!can_assign_level(60, 60, false));
        assert!(!can_assign_level(60, 80, false));
        assert!(can_assign_level(100, 100, true));
    }

    #[test]
    fn tenant_scope_filters_other_organizations() {
        assert!(TenantScope::All.allows(7));
        assert!(TenantScope::Organization(7).allows(7));
        assert!(!TenantScope::Organization(7).allows(8));
        assert_eq!(TenantScope::All.organization_id(), None);
    }
}
