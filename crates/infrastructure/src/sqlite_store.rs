use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use shopfloor_core::errors::SchedulingResult;
use shopfloor_core::traits::{DocKey, DocumentStore, DocumentTxn, TxnFunc};

/// SQLite 文档存储
///
/// 所有实体以 JSON 文档存入单张 documents 表；事务用
/// BEGIN IMMEDIATE 提前拿写锁，配合 WAL 模式保证读改写串行化。
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 连接（必要时创建）数据库并初始化表结构
    pub async fn connect(url: &str, max_connections: u32) -> SchedulingResult<Self> {
        debug!("连接SQLite文档存储: {url}");
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Self::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn ensure_schema(pool: &SqlitePool) -> SchedulingResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                doc TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

async fn fetch_doc(
    conn: &mut SqliteConnection,
    key: &DocKey,
) -> SchedulingResult<Option<Value>> {
    let row: Option<String> =
        sqlx::query_scalar("SELECT doc FROM documents WHERE id = ?1")
            .bind(key.as_str())
            .fetch_optional(&mut *conn)
            .await?;
    match row {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

async fn upsert_doc(
    conn: &mut SqliteConnection,
    key: &DocKey,
    value: &Value,
) -> SchedulingResult<()> {
    sqlx::query(
        "INSERT INTO documents (id, doc) VALUES (?1, ?2) \
         ON CONFLICT(id) DO UPDATE SET doc = excluded.doc",
    )
    .bind(key.as_str())
    .bind(serde_json::to_string(value)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// 事务句柄：借用一条已执行 BEGIN IMMEDIATE 的连接
struct SqliteTxn<'a> {
    conn: &'a mut SqliteConnection,
}

#[async_trait]
impl DocumentTxn for SqliteTxn<'_> {
    async fn get(&mut self, key: &DocKey) -> SchedulingResult<Option<Value>> {
        fetch_doc(self.conn, key).await
    }

    async fn set(&mut self, key: &DocKey, value: Value) -> SchedulingResult<()> {
        upsert_doc(self.conn, key, &value).await
    }

    async fn delete(&mut self, key: &DocKey) -> SchedulingResult<()> {
        sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(key.as_str())
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, key: &DocKey) -> SchedulingResult<Option<Value>> {
        let mut conn = self.pool.acquire().await?;
        fetch_doc(&mut conn, key).await
    }

    async fn set(&self, key: &DocKey, value: Value) -> SchedulingResult<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_doc(&mut conn, key, &value).await
    }

    async fn list_prefix(&self, prefix: &str) -> SchedulingResult<Vec<(String, Value)>> {
        // substr 比较避免 LIKE 对下划线等通配符的解释
        let rows = sqlx::query(
            "SELECT id, doc FROM documents \
             WHERE substr(id, 1, length(?1)) = ?1 ORDER BY id",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let text: String = row.try_get("doc")?;
            entries.push((id, serde_json::from_str(&text)?));
        }
        Ok(entries)
    }

    async fn transaction(&self, func: TxnFunc) -> SchedulingResult<Value> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let mut txn = SqliteTxn { conn: &mut conn };
        let result = func(&mut txn).await;
        drop(txn);

        match result {
            Ok(value) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!("事务回滚失败: {rollback_err}");
                }
                Err(e)
            }
        }
    }
}
