use crate::{
    api::{
        attendance, audit_log, camera, change_request, department, employee, leave_request,
        location, lpr, organization, report, role, shift, user, visitor,
    },
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::{Result, anyhow};
use std::sync::Arc;

type Limiter = Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>;

/// Per-route limiters, built once so every worker shares the same buckets.
#[derive(Clone)]
pub struct RateLimits {
    login: Limiter,
    register: Limiter,
    refresh: Limiter,
    protected: Limiter,
}

fn build_limiter(requests_per_min: u32) -> Result<Limiter> {
    let burst = requests_per_min.max(1);
    let per_ms = (60_000 / burst as u64).max(1);

    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(burst)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow!("invalid rate limit: {requests_per_min} requests per minute"))?;

    Ok(Arc::new(Governor::new(&cfg)))
}

impl RateLimits {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            login: build_limiter(config.rate_login_per_min)?,
            register: build_limiter(config.rate_register_per_min)?,
            refresh: build_limiter(config.rate_refresh_per_min)?,
            protected: build_limiter(config.rate_protected_per_min)?,
        })
    }
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limits: &RateLimits) {
    let prefix = config.api_prefix.trim_end_matches('/');

    // Public routes. Registered before the protected scope so they are
    // matched first.
    cfg.service(
        web::resource(format!("{prefix}/auth/login"))
            .wrap(limits.login.clone())
            .route(web::post().to(handlers::login)),
    )
    .service(
        web::resource(format!("{prefix}/auth/register"))
            .wrap(limits.register.clone())
            .route(web::post().to(handlers::register)),
    )
    .service(
        web::resource(format!("{prefix}/auth/refresh"))
            .wrap(limits.refresh.clone())
            .route(web::post().to(handlers::refresh_token)),
    )
    .service(
        web::resource(format!("{prefix}/auth/logout"))
            .wrap(limits.login.clone())
            .route(web::post().to(handlers::logout)),
    );

    // Protected routes
    cfg.service(
        web::scope(prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(limits.protected.clone()) // rate limiting
            .service(
                web::scope("/auth")
                    .service(web::resource("/me").route(web::get().to(handlers::me)))
                    .service(
                        web::resource("/password").route(web::put().to(handlers::change_password)),
                    ),
            )
            .service(
                web::scope("/organizations")
                    .service(
                        web::resource("")
                            .route(web::get().to(organization::list_organizations))
                            .route(web::post().to(organization::create_organization)),
                    )
                    .service(
                        web::resource("/{id}/subscription")
                            .route(web::put().to(organization::change_subscription)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(organization::get_organization))
                            .route(web::put().to(organization::update_organization))
                            .route(web::delete().to(organization::delete_organization)),
                    ),
            )
            .service(
                web::scope("/roles")
                    .service(
                        web::resource("")
                            .route(web::get().to(role::list_roles))
                            .route(web::post().to(role::create_role)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(role::get_role))
                            .route(web::put().to(role::update_role))
                            .route(web::delete().to(role::delete_role)),
                    ),
            )
            .service(
                web::scope("/users")
                    .service(
                        web::resource("")
                            .route(web::get().to(user::list_users))
                            .route(web::post().to(user::create_user)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(user::get_user))
                            .route(web::put().to(user::update_user))
                            .route(web::delete().to(user::delete_user)),
                    ),
            )
            .service(
                web::scope("/departments")
                    .service(
                        web::resource("")
                            .route(web::get().to(department::list_departments))
                            .route(web::post().to(department::create_department)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(department::get_department))
                            .route(web::put().to(department::update_department))
                            .route(web::delete().to(department::delete_department)),
                    ),
            )
            .service(
                web::scope("/employees")
                    .service(
                        web::resource("")
                            .route(web::get().to(employee::list_employees))
                            .route(web::post().to(employee::create_employee)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(employee::get_employee))
                            .route(web::put().to(employee::update_employee))
                            .route(web::delete().to(employee::delete_employee)),
                    ),
            )
            .service(
                web::scope("/shifts")
                    .service(
                        web::resource("")
                            .route(web::get().to(shift::list_shifts))
                            .route(web::post().to(shift::create_shift)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(shift::get_shift))
                            .route(web::put().to(shift::update_shift))
                            .route(web::delete().to(shift::delete_shift)),
                    ),
            )
            .service(
                web::scope("/locations")
                    .service(
                        web::resource("")
                            .route(web::get().to(location::list_locations))
                            .route(web::post().to(location::create_location)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(location::get_location))
                            .route(web::put().to(location::update_location))
                            .route(web::delete().to(location::delete_location)),
                    ),
            )
            .service(
                web::scope("/cameras")
                    .service(
                        web::resource("")
                            .route(web::get().to(camera::list_cameras))
                            .route(web::post().to(camera::create_camera)),
                    )
                    .service(
                        web::resource("/{id}/heartbeat").route(web::post().to(camera::heartbeat)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(camera::get_camera))
                            .route(web::put().to(camera::update_camera))
                            .route(web::delete().to(camera::delete_camera)),
                    ),
            )
            .service(
                web::scope("/attendance")
                    // /attendance/change-requests
                    .service(
                        web::scope("/change-requests")
                            .service(
                                web::resource("")
                                    .route(web::get().to(change_request::list_change_requests))
                                    .route(web::post().to(change_request::create_change_request)),
                            )
                            .service(
                                web::resource("/{id}/approve")
                                    .route(web::put().to(change_request::approve_change_request)),
                            )
                            .service(
                                web::resource("/{id}/reject")
                                    .route(web::put().to(change_request::reject_change_request)),
                            )
                            .service(
                                web::resource("/{id}")
                                    .route(web::get().to(change_request::get_change_request)),
                            ),
                    )
                    .service(web::resource("/check-in").route(web::post().to(attendance::check_in)))
                    .service(
                        web::resource("/check-out").route(web::post().to(attendance::check_out)),
                    )
                    .service(
                        web::resource("")
                            .route(web::get().to(attendance::list_attendance))
                            .route(web::post().to(attendance::create_attendance)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(attendance::get_attendance))
                            .route(web::put().to(attendance::update_attendance))
                            .route(web::delete().to(attendance::delete_attendance)),
                    ),
            )
            .service(
                web::scope("/leave-requests")
                    .service(
                        web::resource("")
                            .route(web::get().to(leave_request::list_leaves))
                            .route(web::post().to(leave_request::create_leave)),
                    )
                    .service(
                        web::resource("/{id}/approve")
                            .route(web::put().to(leave_request::approve_leave)),
                    )
                    .service(
                        web::resource("/{id}/reject")
                            .route(web::put().to(leave_request::reject_leave)),
                    )
                    .service(
                        web::resource("/{id}/cancel")
                            .route(web::put().to(leave_request::cancel_leave)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(leave_request::get_leave))
                            .route(web::put().to(leave_request::update_leave))
                            .route(web::delete().to(leave_request::delete_leave)),
                    ),
            )
            .service(
                web::scope("/audit-logs")
                    .service(web::resource("").route(web::get().to(audit_log::list_audit_logs)))
                    .service(web::resource("/{id}").route(web::get().to(audit_log::get_audit_log))),
            )
            .service(
                web::scope("/visitors")
                    // /visitors/visits
                    .service(
                        web::scope("/visits")
                            .service(
                                web::resource("")
                                    .route(web::get().to(visitor::list_visits))
                                    .route(web::post().to(visitor::create_visit)),
                            )
                            .service(
                                web::resource("/{id}/check-in")
                                    .route(web::put().to(visitor::check_in_visit)),
                            )
                            .service(
                                web::resource("/{id}/check-out")
                                    .route(web::put().to(visitor::check_out_visit)),
                            )
                            .service(
                                web::resource("/{id}/cancel")
                                    .route(web::put().to(visitor::cancel_visit)),
                            )
                            .service(
                                web::resource("/{id}").route(web::get().to(visitor::get_visit)),
                            ),
                    )
                    .service(
                        web::resource("")
                            .route(web::get().to(visitor::list_visitors))
                            .route(web::post().to(visitor::create_visitor)),
                    )
                    .service(
                        web::resource("/{id}/blacklist")
                            .route(web::put().to(visitor::blacklist_visitor)),
                    )
                    .service(
                        web::resource("/{id}/unblacklist")
                            .route(web::put().to(visitor::unblacklist_visitor)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(visitor::get_visitor))
                            .route(web::put().to(visitor::update_visitor))
                            .route(web::delete().to(visitor::delete_visitor)),
                    ),
            )
            .service(
                web::scope("/lpr")
                    .service(
                        web::resource("/vehicles")
                            .route(web::get().to(lpr::list_vehicles))
                            .route(web::post().to(lpr::create_vehicle)),
                    )
                    .service(
                        web::resource("/vehicles/{id}")
                            .route(web::get().to(lpr::get_vehicle))
                            .route(web::put().to(lpr::update_vehicle))
                            .route(web::delete().to(lpr::delete_vehicle)),
                    )
                    .service(
                        web::resource("/logs")
                            .route(web::get().to(lpr::list_logs))
                            .route(web::post().to(lpr::ingest_plate)),
                    )
                    .service(web::resource("/logs/{id}").route(web::get().to(lpr::get_log))),
            )
            .service(
                web::scope("/reports/attendance")
                    .service(
                        web::resource("/summary").route(web::get().to(report::attendance_summary)),
                    )
                    .service(
                        web::resource("/departments")
                            .route(web::get().to(report::department_breakdown)),
                    )
                    .service(
                        web::resource("/employees").route(web::get().to(report::employee_breakdown)),
                    ),
            ),
    );
}

// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with Authorization: Bearer refresh_token
//       └─ returns a new pair, old refresh token revoked
