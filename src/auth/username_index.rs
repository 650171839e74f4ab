//! In-memory answer to "is this username taken?".
//!
//! The cuckoo filter gives fast negatives (never seen => available), the moka
//! cache gives fast positives for recently active accounts, and the database
//! is the fallback for everything in between.

use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::sync::RwLock;
use std::time::Duration;

/// Expected capacity and false-positive rate.
const FILTER_CAPACITY: usize = 100_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

static USERNAME_FILTER: Lazy<RwLock<CuckooFilter<String>>> =
    Lazy::new(|| RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)));

/// Holds only taken usernames.
static TAKEN_CACHE: Lazy<Cache<String, ()>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(500_000)
        .time_to_live(Duration::from_secs(86_400))
        .build()
});

#[inline]
pub fn normalize(username: &str) -> String {
    username.trim().to_lowercase()
}

fn filter_might_contain(key: &String) -> bool {
    match USERNAME_FILTER.read() {
        Ok(filter) => filter.contains(key),
        // A poisoned lock only loses the fast path; the database decides.
        Err(_) => true,
    }
}

fn filter_add(keys: &[String]) {
    if let Ok(mut filter) = USERNAME_FILTER.write() {
        for key in keys {
            filter.add(key);
        }
    }
}

/// Records a newly created account.
pub async fn remember(username: &str) {
    let key = normalize(username);
    filter_add(std::slice::from_ref(&key));
    TAKEN_CACHE.insert(key, ()).await;
}

/// Drops an account that was hard-deleted or renamed from the cache. The
/// filter keeps its fingerprint: removing it could evict a colliding name,
/// while a stale entry only costs a database lookup.
pub async fn forget(username: &str) {
    TAKEN_CACHE.invalidate(&normalize(username)).await;
}

/// true  => username AVAILABLE
/// false => username TAKEN
pub async fn is_available(pool: &MySqlPool, username: &str) -> Result<bool, sqlx::Error> {
    let key = normalize(username);

    if !filter_might_contain(&key) {
        return Ok(true);
    }

    if TAKEN_CACHE.contains_key(&key) {
        return Ok(false);
    }

    // Soft-deleted accounts keep their username reserved.
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE LOWER(username) = ?")
        .bind(&key)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        TAKEN_CACHE.insert(key, ()).await;
        return Ok(false);
    }

    Ok(true)
}

/// Loads every username into the filter and recently active ones into the
/// cache, streaming in batches.
pub async fn warmup(pool: &MySqlPool, batch_size: usize, recent_days: u32) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT username,
               CAST(last_login_at IS NOT NULL AND last_login_at >= NOW() - INTERVAL ? DAY AS SIGNED) AS recent
        FROM users
        "#,
    )
    .bind(recent_days)
    .fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut recent = Vec::new();
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let (username, is_recent) = row.map_err(|e| anyhow!("DB row fetch failed: {e}"))?;
        let key = normalize(&username);
        if is_recent != 0 {
            recent.push(key.clone());
        }
        batch.push(key);
        total += 1;

        if batch.len() >= batch_size {
            filter_add(&batch);
            batch.clear();
        }
    }

    if !batch.is_empty() {
        filter_add(&batch);
    }

    let recent_count = recent.len();
    futures::future::join_all(recent.into_iter().map(|k| TAKEN_CACHE.insert(k, ()))).await;

    tracing::info!(total, recent = recent_count, "Username index warmup complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_case_and_space_insensitive() {
        assert_eq!(normalize("  Alice.Admin "), "alice.admin");
    }

    #[actix_web::test]
    async fn remembered_names_hit_the_filter_and_cache() {
        remember("Index-Test-User").await;
        let key = normalize("index-test-user");
        assert!(filter_might_contain(&key));
        assert!(TAKEN_CACHE.contains_key(&key));

        forget("INDEX-TEST-USER").await;
        assert!(!TAKEN_CACHE.contains_key(&key));
    }

    #[actix_web::test]
    async fn forgetting_a_name_keeps_the_filter_entries() {
        remember("forget-keeps-a").await;
        remember("forget-keeps-b").await;

        forget("forget-keeps-a").await;

        // Both still route to the database instead of a false "available".
        assert!(filter_might_contain(&normalize("forget-keeps-a")));
        assert!(filter_might_contain(&normalize("forget-keeps-b")));
        assert!(!TAKEN_CACHE.contains_key(&normalize("forget-keeps-a")));
        assert!(TAKEN_CACHE.contains_key(&normalize("forget-keeps-b")));
    }
}
