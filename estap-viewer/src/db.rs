//! Queries behind the dashboard

use serde::Serialize;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub table_schema: String,
    pub table_name: String,
}

/// Schemas hidden unless the caller asks for system tables
pub const SYSTEM_SCHEMAS: [&str; 2] = ["pg_catalog", "information_schema"];

const TABLES_QUERY: &str = r"
    select table_schema::text as table_schema, table_name::text as table_name
    from information_schema.tables
    where $1
       or (table_schema::text <> all($2::text[]) and table_schema::text not like 'pg\_toast%')
    order by table_schema, table_name
";

pub async fn list_tables(pool: &PgPool, include_system: bool) -> Result<Vec<TableRow>, sqlx::Error> {
    let rows = sqlx::query(TABLES_QUERY)
        .bind(include_system)
        .bind(&SYSTEM_SCHEMAS[..])
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(TableRow {
                table_schema: row.try_get("table_schema")?,
                table_name: row.try_get("table_name")?,
            })
        })
        .collect()
}

pub async fn server_version(pool: &PgPool) -> Result<String, sqlx::Error> {
    sqlx::query_scalar("select current_setting('server_version')").fetch_one(pool).await
}
