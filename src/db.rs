use anyhow::{Context, Result, anyhow};
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

use crate::auth::{password::hash_password, username_index};
use crate::rbac::SystemRole;

pub async fn init_db(database_url: &str, max_connections: u32) -> Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to database")
}

pub async fn run_migrations(pool: &MySqlPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")
}

/// Creates the first platform administrator when the users table is
/// empty. Returns whether an account was created.
pub async fn bootstrap_super_admin(pool: &MySqlPool, username: &str, password: &str) -> Result<bool> {
    let users = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;
    if users > 0 {
        return Ok(false);
    }

    let role_id = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM roles WHERE organization_id IS NULL AND name = ? AND deleted_at IS NULL",
    )
    .bind(SystemRole::SuperAdmin.as_ref())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| anyhow!("super_admin role is missing; seed system roles first"))?;

    let username = username_index::normalize(username);
    let hashed = hash_password(password).map_err(|e| anyhow!("Failed to hash password: {e}"))?;

    sqlx::query(
        r#"
        INSERT INTO users (organization_id, role_id, username, email, password)
        VALUES (NULL, ?, ?, ?, ?)
        "#,
    )
    .bind(role_id)
    .bind(&username)
    .bind(format!("{username}@localhost"))
    .bind(&hashed)
    .execute(pool)
    .await
    .context("Failed to create bootstrap administrator")?;

    username_index::remember(&username).await;
    Ok(true)
}
