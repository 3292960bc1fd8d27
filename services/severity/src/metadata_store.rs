use crate::config::MetadataStoreConfig;
use crate::error::{Result, SeverityError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// A single attribute of a stored item. Nested structures are stored as
/// embedded JSON strings rather than native nested attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(i64),
    String(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            AttributeValue::Number(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            AttributeValue::String(_) => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Number(value)
    }
}

/// Flat string/number map addressed by a single string key
pub type Item = BTreeMap<String, AttributeValue>;

/// Key-value item table backing the analysis and job services
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ItemBackend: Send + Sync {
    /// Verify the backend is reachable and provisioned
    async fn ensure_ready(&self) -> Result<()>;

    /// Insert or replace the item under `key`
    async fn put(&self, key: &str, item: Item) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Item>>;

    /// Up to `limit` items, in whatever order the backend yields them
    async fn scan(&self, limit: usize) -> Result<Vec<Item>>;

    /// Overwrite only the given attributes of an existing item.
    ///
    /// Returns false when no item exists under `key`.
    async fn update(&self, key: &str, fields: Item) -> Result<bool>;
}

/// Open a PostgreSQL pool for the item tables
pub async fn connect_pool(config: &MetadataStoreConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .connect(&config.url)
        .await
        .map_err(|e| SeverityError::BackendUnavailable {
            backend: "metadata store",
            reason: e.to_string(),
        })?;

    info!("Connected to PostgreSQL metadata store");

    Ok(pool)
}

/// Item table stored in PostgreSQL as `(key TEXT PRIMARY KEY, item JSONB)`
#[derive(Clone)]
pub struct PgItemTable {
    pool: PgPool,
    table: String,
}

impl PgItemTable {
    /// Bind to `table` on an existing pool. The name must be a plain identifier.
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { pool, table })
    }

    /// Create the table if it does not exist yet
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn create_if_missing(&self) -> Result<()> {
        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.pool)
            .await
            .map_err(|e| SeverityError::BackendUnavailable {
                backend: "metadata store",
                reason: format!("creating table {} failed: {e}", self.table),
            })?;

        info!("Item table provisioned");
        Ok(())
    }
}

fn create_table_sql(table: &str) -> String {
    format!("CREATE TABLE IF NOT EXISTS {table} (key TEXT PRIMARY KEY, item JSONB NOT NULL)")
}

pub(crate) fn validate_table_name(table: &str) -> Result<()> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(SeverityError::Config(format!(
            "table name '{table}' must be a lower-case SQL identifier"
        )))
    }
}

#[async_trait]
impl ItemBackend for PgItemTable {
    async fn ensure_ready(&self) -> Result<()> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(&self.table)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SeverityError::BackendUnavailable {
                backend: "metadata store",
                reason: e.to_string(),
            })?;

        if !exists {
            return Err(SeverityError::BackendUnavailable {
                backend: "metadata store",
                reason: format!("table '{}' not found", self.table),
            });
        }

        Ok(())
    }

    #[instrument(skip(self, item), fields(table = %self.table))]
    async fn put(&self, key: &str, item: Item) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (key, item) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET item = EXCLUDED.item",
            self.table
        );

        sqlx::query(&sql)
            .bind(key)
            .bind(Json(&item))
            .execute(&self.pool)
            .await?;

        debug!(key = %key, "Item stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Item>> {
        let sql = format!("SELECT item FROM {} WHERE key = $1", self.table);

        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let Json(item): Json<Item> = row.try_get("item")?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    async fn scan(&self, limit: usize) -> Result<Vec<Item>> {
        let sql = format!("SELECT item FROM {} LIMIT $1", self.table);

        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let Json(item): Json<Item> = row.try_get("item")?;
                Ok(item)
            })
            .collect()
    }

    // JSONB `||` merges the given attributes server-side, so concurrent writers
    // of other attributes are never overwritten with stale values.
    #[instrument(skip(self, fields), fields(table = %self.table))]
    async fn update(&self, key: &str, fields: Item) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET item = item || $2 WHERE key = $1",
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(key)
            .bind(Json(&fields))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// In-process item table for tests and dry runs
#[derive(Default)]
pub struct MemoryItemTable {
    items: RwLock<BTreeMap<String, Item>>,
}

impl MemoryItemTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl ItemBackend for MemoryItemTable {
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn put(&self, key: &str, item: Item) -> Result<()> {
        self.items.write().insert(key.to_string(), item);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Item>> {
        Ok(self.items.read().get(key).cloned())
    }

    async fn scan(&self, limit: usize) -> Result<Vec<Item>> {
        Ok(self.items.read().values().take(limit).cloned().collect())
    }

    async fn update(&self, key: &str, fields: Item) -> Result<bool> {
        let mut items = self.items.write();
        match items.get_mut(key) {
            Some(item) => {
                item.extend(fields);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Helpers for reading typed attributes out of an item
pub(crate) trait ItemExt {
    fn required_str(&self, name: &str) -> Result<&str>;
    fn optional_str(&self, name: &str) -> Option<&str>;
}

impl ItemExt for Item {
    fn required_str(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(AttributeValue::as_str)
            .ok_or_else(|| SeverityError::MalformedRecord(format!("missing string attribute '{name}'")))
    }

    fn optional_str(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(AttributeValue::as_str)
            .filter(|v| !v.is_empty())
    }
}
