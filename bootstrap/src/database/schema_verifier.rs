// Schema verification
// Lists the tables a provider currently has and computes which required ones are missing.

use anyhow::{Context, Result};
use futures::TryStreamExt;
use log::{debug, info};
use std::collections::HashSet;
use tiberius::{Query, QueryItem};

use crate::database::connection::DatabaseConnection;

const POSTGRES_TABLES: &str = r#"
    SELECT tablename::text
    FROM pg_tables
    WHERE schemaname = current_schema()
"#;

const MYSQL_TABLES: &str = r#"
    SELECT CAST(table_name AS CHAR)
    FROM information_schema.tables
    WHERE table_schema = DATABASE()
"#;

const SQL_SERVER_TABLES: &str = r#"
    SELECT TABLE_NAME
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_TYPE = 'BASE TABLE'
"#;

/// Required tables absent from `existing`, compared case-insensitively, in `required` order.
pub fn missing_tables(required: &[&str], existing: &[String]) -> Vec<String> {
    let existing: HashSet<String> = existing.iter().map(|t| t.to_ascii_lowercase()).collect();
    required
        .iter()
        .filter(|t| !existing.contains(&t.to_ascii_lowercase()))
        .map(|t| t.to_string())
        .collect()
}

pub struct SchemaVerifier {
    connection: DatabaseConnection,
}

impl SchemaVerifier {
    pub fn new(connection: DatabaseConnection) -> Self {
        SchemaVerifier { connection }
    }

    pub fn into_connection(self) -> DatabaseConnection {
        self.connection
    }

    /// Table names in the connection's default schema (document sections for local storage).
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = match &self.connection {
            DatabaseConnection::Local(path) => Self::list_local_sections(path).await?,
            DatabaseConnection::Postgres(pool) => sqlx::query_scalar::<_, String>(POSTGRES_TABLES)
                .fetch_all(pool)
                .await
                .context("Failed to query tables from PostgreSQL")?,
            DatabaseConnection::MySql(pool) => sqlx::query_scalar::<_, String>(MYSQL_TABLES)
                .fetch_all(pool)
                .await
                .context("Failed to query tables from MySQL")?,
            DatabaseConnection::SqlServer(_) => self.list_sql_server_tables().await?,
        };
        info!(
            "[PHASE: database] [STEP: list_tables] Found {} table(s)",
            tables.len()
        );
        Ok(tables)
    }

    async fn list_local_sections(path: &std::path::Path) -> Result<Vec<String>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "[PHASE: database] [STEP: list_tables] {:?} does not exist yet",
                    path
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
        };
        let doc: serde_json::Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("{:?} is not a valid storage document", path))?;
        Ok(doc
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_sql_server_tables(&self) -> Result<Vec<String>> {
        let DatabaseConnection::SqlServer(conn) = &self.connection else {
            anyhow::bail!("Not a SQL Server connection");
        };
        let client = conn.client();
        let mut client = client.lock().await;

        let mut stream = Query::new(SQL_SERVER_TABLES)
            .query(&mut *client)
            .await
            .context("Failed to query tables from SQL Server")?;

        let mut tables = Vec::new();
        while let Some(item) = stream
            .try_next()
            .await
            .context("Failed to read from query result")?
        {
            if let QueryItem::Row(row) = item {
                let name = row
                    .get::<&str, _>(0)
                    .ok_or_else(|| anyhow::anyhow!("TABLE_NAME is null"))?;
                tables.push(name.to_string());
            }
        }
        Ok(tables)
    }
}
