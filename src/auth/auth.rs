use crate::error::ApiError;
use crate::rbac::{Permissions, SELF_SERVICE_BELOW, SystemRole, TenantScope};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload};
use futures::future::{Ready, ready};

/// Where the request came from; recorded in audit rows.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_request(req: &HttpRequest) -> Self {
        Self {
            ip_address: req
                .connection_info()
                .realip_remote_addr()
                .map(|s| s.to_string()),
            user_agent: req
                .headers()
                .get("User-Agent")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.chars().take(500).collect()),
        }
    }
}

/// Authenticated caller, placed in request extensions by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub organization_id: Option<u64>,
    pub role: String,
    pub role_level: i32,
    pub permissions: Permissions,

    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,
    pub client: ClientInfo,
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| ApiError::Unauthorized("Authentication required".into())),
        )
    }
}

impl AuthUser {
    pub fn is_super_admin(&self) -> bool {
        self.role == SystemRole::SuperAdmin.as_ref()
    }

    pub fn can(&self, resource: &str, action: &str) -> bool {
        self.is_super_admin() || self.permissions.allows(resource, action)
    }

    pub fn require(&self, resource: &str, action: &str) -> Result<(), ApiError> {
        if self.can(resource, action) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Missing permission {resource}:{action}"
            )))
        }
    }

    pub fn require_super_admin(&self) -> Result<(), ApiError> {
        if self.is_super_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Super admin only"))
        }
    }

    pub fn require_level(&self, level: i32) -> Result<(), ApiError> {
        if self.is_super_admin() || self.role_level >= level {
            Ok(())
        } else {
            Err(ApiError::forbidden("Insufficient role level"))
        }
    }

    /// Organizations this caller may read and write.
    pub fn scope(&self) -> TenantScope {
        match (self.is_super_admin(), self.organization_id) {
            (true, _) => TenantScope::All,
            (false, Some(org)) => TenantScope::Organization(org),
            // A tenant user without an organization sees nothing.
            (false, None) => TenantScope::Organization(0),
        }
    }

    /// Organization a newly created row belongs to. Super admins must name
    /// one; everybody else gets their own and may not name another.
    pub fn target_org(&self, requested: Option<u64>) -> Result<u64, ApiError> {
        if self.is_super_admin() {
            return requested.ok_or_else(|| {
                ApiError::validation("organization_id is required for platform administrators")
            });
        }

        let own = self
            .organization_id
            .ok_or_else(|| ApiError::forbidden("User is not attached to an organization"))?;

        match requested {
            Some(other) if other != own => Err(ApiError::forbidden(
                "Cannot act on another organization",
            )),
            _ => Ok(own),
        }
    }

    /// Below manager level users only act on their own employee record.
    pub fn is_self_service(&self) -> bool {
        !self.is_super_admin() && self.role_level < SELF_SERVICE_BELOW
    }

    pub fn own_employee_id(&self) -> Result<u64, ApiError> {
        self.employee_id
            .ok_or_else(|| ApiError::forbidden("No employee profile linked to this user"))
    }

    /// Resolves which employee a self-service style operation targets.
    /// Self-service users are pinned to themselves.
    pub fn employee_target(&self, requested: Option<u64>) -> Result<u64, ApiError> {
        if self.is_self_service() {
            let own = self.own_employee_id()?;
            return match requested {
                Some(other) if other != own => Err(ApiError::forbidden(
                    "You can only act on your own records",
                )),
                _ => Ok(own),
            };
        }

        match requested {
            Some(id) => Ok(id),
            None => self.own_employee_id(),
        }
    }

    /// Employee filter for list endpoints: forced for self-service users.
    pub fn employee_filter(&self, requested: Option<u64>) -> Result<Option<u64>, ApiError> {
        if self.is_self_service() {
            self.employee_target(requested).map(Some)
        } else {
            Ok(requested)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn user(role: SystemRole, org: Option<u64>, employee: Option<u64>) -> AuthUser {
        AuthUser {
            user_id: 1,
            username: "tester".into(),
            organization_id: org,
            role: role.as_ref().to_string(),
            role_level: role.level(),
            permissions: role.default_permissions(),
            employee_id: employee,
            client: ClientInfo::default(),
        }
    }

    #[test]
    fn super_admin_bypasses_permissions_and_tenancy() {
        let u = user(SystemRole::SuperAdmin, None, None);
        assert!(u.require("lpr", "delete").is_ok());
        assert_eq!(u.scope(), TenantScope::All);
    }

    #[test]
    fn missing_permission_is_forbidden() {
        let u = user(SystemRole::Employee, Some(1), Some(5));
        let err = u.require("employees", "delete").unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn target_org_rules() {
        let admin = user(SystemRole::OrgAdmin, Some(4), None);
        assert_eq!(admin.target_org(None).unwrap(), 4);
        assert_eq!(admin.target_org(Some(4)).unwrap(), 4);
        assert!(matches!(admin.target_org(Some(5)), Err(ApiError::Forbidden(_))));

        let root = user(SystemRole::SuperAdmin, None, None);
        assert!(matches!(root.target_org(None), Err(ApiError::Validation(_))));
        assert_eq!(root.target_org(Some(9)).unwrap(), 9);
    }

    #[test]
    fn self_service_users_are_pinned_to_their_employee() {
        let e = user(SystemRole::Employee, Some(1), Some(5));
        assert_eq!(e.employee_target(None).unwrap(), 5);
        assert!(e.employee_target(Some(6)).is_err());
        assert_eq!(e.employee_filter(None).unwrap(), Some(5));

        let m = user(SystemRole::Manager, Some(1), Some(2));
        assert_eq!(m.employee_target(Some(6)).unwrap(), 6);
        assert_eq!(m.employee_filter(None).unwrap(), None);
    }

    #[test]
    fn employee_without_profile_cannot_self_serve() {
        let e = user(SystemRole::Employee, Some(1), None);
        assert!(matches!(e.employee_target(None), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn orphan_tenant_user_sees_nothing() {
        let u = user(SystemRole::Manager, None, None);
        assert_eq!(u.scope(), TenantScope::Organization(0));
    }
}
