use actix_web::middleware::{Logger, NormalizePath};
use actix_web::web::{self, Data};
use actix_web::{App, HttpServer};
use anyhow::Context;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use vems::auth::username_index;
use vems::config::Config;
use vems::db::{bootstrap_super_admin, init_db, run_migrations};
use vems::docs::ApiDoc;
use vems::rbac::seed_system_roles;
use vems::routes::RateLimits;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    info!(addr = %config.server_addr, "Server starting...");

    let pool = init_db(&config.database_url, config.db_max_connections).await?;

    if config.run_migrations {
        run_migrations(&pool).await?;
        info!("Migrations applied");
    }

    seed_system_roles(&pool)
        .await
        .context("Failed to seed system roles")?;

    if let Some((username, password)) = &config.bootstrap_admin {
        if bootstrap_super_admin(&pool, username, password).await? {
            warn!(username = %username, "Bootstrap super admin created; change its password");
        }
    }

    let warmup_pool = pool.clone();
    actix_web::rt::spawn(async move {
        // Every username into the filter, last 30 days of logins into the cache.
        if let Err(e) = username_index::warmup(&warmup_pool, 500, 30).await {
            error!(error = %e, "Failed to warm up username index");
        }
    });

    let limits = RateLimits::from_config(&config)?;
    let server_addr = config.server_addr.clone();

    HttpServer::new(move || {
        let config = config.clone();
        let limits = limits.clone();
        App::new()
            .wrap(Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                // wildcard {_:.*} to match JS/CSS files
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .configure(|cfg| vems::configure_app(cfg, &config, &limits))
            .default_service(web::to(vems::not_found))
    })
    .bind(&server_addr)
    .with_context(|| format!("Failed to bind {server_addr}"))?
    .run()
    .await?;

    Ok(())
}
