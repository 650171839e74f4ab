use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::query::{Query, QueryAs, QueryScalar};
use sqlx::types::Json;

use crate::error::ApiError;
use crate::rbac::TenantScope;

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Json(Value),
    Null,
}

macro_rules! sql_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for SqlValue {
            fn from(v: $ty) -> Self {
                SqlValue::$variant(v)
            }
        })*
    };
}

sql_value_from! {
    String => String,
    u64 => U64,
    i64 => I64,
    f64 => F64,
    bool => Bool,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    Value => Json,
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I64(v as i64)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Binds [`SqlValue`]s onto any of the sqlx query builders.
pub trait BindValues: Sized {
    fn bind_value(self, value: SqlValue) -> Self;

    fn bind_values(self, values: Vec<SqlValue>) -> Self {
        values.into_iter().fold(self, |q, v| q.bind_value(v))
    }
}

macro_rules! impl_bind_values {
    ($q:ident, $value:ident) => {
        match $value {
            SqlValue::String(v) => $q.bind(v),
            SqlValue::U64(v) => $q.bind(v),
            SqlValue::I64(v) => $q.bind(v),
            SqlValue::F64(v) => $q.bind(v),
            SqlValue::Bool(v) => $q.bind(v),
            SqlValue::Date(v) => $q.bind(v),
            SqlValue::Time(v) => $q.bind(v),
            SqlValue::DateTime(v) => $q.bind(v),
            SqlValue::Json(v) => $q.bind(Json(v)),
            SqlValue::Null => $q.bind(None::<String>),
        }
    };
}

impl<'q> BindValues for Query<'q, MySql, MySqlArguments> {
    fn bind_value(self, value: SqlValue) -> Self {
        impl_bind_values!(self, value)
    }
}

impl<'q, O> BindValues for QueryAs<'q, MySql, O, MySqlArguments> {
    fn bind_value(self, value: SqlValue) -> Self {
        impl_bind_values!(self, value)
    }
}

impl<'q, O> BindValues for QueryScalar<'q, MySql, O, MySqlArguments> {
    fn bind_value(self, value: SqlValue) -> Self {
        impl_bind_values!(self, value)
    }
}

/// ===============================
/// WHERE clause builder
/// ===============================
///
/// Column names are always string literals from the calling code; only
/// values travel as bind parameters.
#[derive(Debug, Default)]
pub struct Filter {
    clauses: Vec<String>,
    values: Vec<SqlValue>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live rows of a tenant-owned table: `deleted_at IS NULL` plus the
    /// organization filter unless the scope is global.
    pub fn tenant(scope: TenantScope, alias: &str) -> Self {
        let col = |c: &str| {
            if alias.is_empty() {
                c.to_string()
            } else {
                format!("{alias}.{c}")
            }
        };

        let mut f = Self::new().raw(&format!("{} IS NULL", col("deleted_at")));
        if let Some(org) = scope.organization_id() {
            f = f.eq(&col("organization_id"), org);
        }
        f
    }

    pub fn raw(mut self, clause: &str) -> Self {
        self.clauses.push(clause.to_string());
        self
    }

    /// A clause with its own placeholders, bound in order.
    pub fn clause(mut self, clause: &str, values: Vec<SqlValue>) -> Self {
        self.clauses.push(clause.to_string());
        self.values.extend(values);
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.clauses.push(format!("{column} = ?"));
        self.values.push(value.into());
        self
    }

    pub fn eq_opt<T: Into<SqlValue>>(self, column: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.eq(column, v),
            None => self,
        }
    }

    pub fn cmp_opt<T: Into<SqlValue>>(mut self, column: &str, op: &str, value: Option<T>) -> Self {
        if let Some(v) = value {
            self.clauses.push(format!("{column} {op} ?"));
            self.values.push(v.into());
        }
        self
    }

    /// `(a LIKE ? OR b LIKE ?)` over the given columns.
    pub fn search(mut self, columns: &[&str], term: Option<&str>) -> Self {
        let term = match term.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return self,
        };

        let like = format!("%{}%", term.replace('%', "\\%").replace('_', "\\_"));
        let ors: Vec<String> = columns.iter().map(|c| format!("{c} LIKE ?")).collect();
        self.clauses.push(format!("({})", ors.join(" OR ")));
        for _ in columns {
            self.values.push(SqlValue::String(like.clone()));
        }
        self
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn values(&self) -> Vec<SqlValue> {
        self.values.clone()
    }
}

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Collects `column = ?` assignments from the `Option` fields of an update
/// payload; absent fields are left untouched.
#[derive(Debug, Default)]
pub struct UpdateSet {
    assignments: Vec<(&'static str, SqlValue)>,
}

impl UpdateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.assignments.push((column, value.into()));
        self
    }

    pub fn set_opt<T: Into<SqlValue>>(self, column: &'static str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.assignments.iter().any(|(c, _)| *c == column)
    }
}

/// ===============================
/// Build dynamic UPDATE SQL
/// ===============================
///
/// Targets one live row by id, restricted to the caller's tenant.
pub fn build_update_sql(
    table: &str,
    set: UpdateSet,
    id: u64,
    scope: TenantScope,
) -> Result<SqlUpdate, ApiError> {
    if set.is_empty() {
        return Err(ApiError::validation("No fields provided for update"));
    }

    let set_clause = set
        .assignments
        .iter()
        .map(|(k, _)| format!("{k} = ?"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut values: Vec<SqlValue> = set.assignments.into_iter().map(|(_, v)| v).collect();

    let mut sql = format!("UPDATE {table} SET {set_clause} WHERE id = ? AND deleted_at IS NULL");
    values.push(SqlValue::U64(id));

    if let Some(org) = scope.organization_id() {
        sql.push_str(" AND organization_id = ?");
        values.push(SqlValue::U64(org));
    }

    Ok(SqlUpdate { sql, values })
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update<'e, E>(executor: E, update: SqlUpdate) -> Result<u64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = MySql>,
{
    let result = sqlx::query(&update.sql)
        .bind_values(update.values)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Soft delete (`deleted_at = NOW()`) or hard delete of one tenant row.
pub async fn delete_row<'e, E>(
    executor: E,
    table: &str,
    id: u64,
    scope: TenantScope,
    hard: bool,
) -> Result<u64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = MySql>,
{
    let mut sql = if hard {
        format!("DELETE FROM {table} WHERE id = ?")
    } else {
        format!("UPDATE {table} SET deleted_at = NOW() WHERE id = ? AND deleted_at IS NULL")
    };
    let mut values = vec![SqlValue::U64(id)];

    if let Some(org) = scope.organization_id() {
        sql.push_str(" AND organization_id = ?");
        values.push(SqlValue::U64(org));
    }

    let result = sqlx::query(&sql).bind_values(values).execute(executor).await?;
    Ok(result.rows_affected())
}

/// True when a live row with this id exists in the caller's tenant.
pub async fn exists_in_scope(
    pool: &sqlx::MySqlPool,
    table: &str,
    id: u64,
    scope: TenantScope,
) -> Result<bool, sqlx::Error> {
    let filter = Filter::tenant(scope, "").eq("id", id);
    let sql = format!("SELECT COUNT(*) FROM {table}{}", filter.where_sql());

    let count = sqlx::query_scalar::<_, i64>(&sql)
        .bind_values(filter.values())
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_filter_adds_soft_delete_and_org() {
        let f = Filter::tenant(TenantScope::Organization(4), "e").eq("e.status", "active");
        assert_eq!(
            f.where_sql(),
            " WHERE e.deleted_at IS NULL AND e.organization_id = ? AND e.status = ?"
        );
        assert_eq!(
            f.values(),
            vec![SqlValue::U64(4), SqlValue::String("active".into())]
        );
    }

    #[test]
    fn global_scope_only_hides_deleted_rows() {
        let f = Filter::tenant(TenantScope::All, "");
        assert_eq!(f.where_sql(), " WHERE deleted_at IS NULL");
        assert!(f.values().is_empty());
    }

    #[test]
    fn optional_filters_are_skipped_when_absent() {
        let f = Filter::new()
            .eq_opt::<u64>("department_id", None)
            .cmp_opt("date", ">=", Some(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()))
            .search(&["first_name", "email"], Some("  "));
        assert_eq!(f.where_sql(), " WHERE date >= ?");
    }

    #[test]
    fn search_escapes_wildcards_and_binds_each_column() {
        let f = Filter::new().search(&["a", "b"], Some("50%_off"));
        assert_eq!(f.where_sql(), " WHERE (a LIKE ? OR b LIKE ?)");
        assert_eq!(f.values().len(), 2);
        assert_eq!(f.values()[0], SqlValue::String("%50\\%\\_off%".into()));
    }

    #[test]
    fn update_sql_is_scoped_to_tenant_and_live_rows() {
        let set = UpdateSet::new()
            .set_opt("name", Some("Night"))
            .set_opt::<i64>("grace_minutes", None)
            .set("is_active", false);

        let upd = build_update_sql("shifts", set, 9, TenantScope::Organization(2)).unwrap();
        assert_eq!(
            upd.sql,
            "UPDATE shifts SET name = ?, is_active = ? WHERE id = ? AND deleted_at IS NULL AND organization_id = ?"
        );
        assert_eq!(
            upd.values,
            vec![
                SqlValue::String("Night".into()),
                SqlValue::Bool(false),
                SqlValue::U64(9),
                SqlValue::U64(2)
            ]
        );
    }

    #[test]
    fn empty_update_is_rejected() {
        let err = build_update_sql("shifts", UpdateSet::new(), 1, TenantScope::All).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn option_maps_to_null() {
        assert_eq!(SqlValue::from(None::<u64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(3u64)), SqlValue::U64(3));
    }
}
