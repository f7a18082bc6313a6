use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use tracing::{debug, info};
use tunnel_core::repository::Result;
use tunnel_core::{
    AggregateRepository, ClickAggregate, MappingId, MappingReader, MappingRecord,
    MappingRepository, ShortCode, StorageError,
};

/// Table definitions, in creation order.
const SCHEMA: [(&str, &str); 3] = [
    ("mapping_ids", include_str!("../ddl/mysql/mapping_ids.sql")),
    ("mappings", include_str!("../ddl/mysql/mappings.sql")),
    (
        "click_aggregates",
        include_str!("../ddl/mysql/click_aggregates.sql"),
    ),
];

/// MySQL implementation of the repository contracts.
///
/// Identifiers come from the `AUTO_INCREMENT` column of `mapping_ids`, so an
/// identifier is drawn before its mapping row exists and the row is written
/// once, with its final code. Codes are compared with `ascii_bin`, i.e.
/// case-sensitively. Timestamps are stored as Unix milliseconds.
#[derive(Debug, Clone)]
pub struct MySqlRepository {
    pool: MySqlPool,
}

impl MySqlRepository {
    /// Creates a repository from an existing MySQL connection pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Creates a repository by opening a new MySQL connection pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = MySqlPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Creates the tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        for (table, ddl) in SCHEMA {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            debug!(table, "Ensured table exists");
        }
        info!("MySQL schema ready");
        Ok(())
    }

    async fn mapping_exists(&self, id: MappingId) -> Result<bool> {
        let exists = sqlx::query("SELECT 1 FROM mappings WHERE mapping_id = ? LIMIT 1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .is_some();
        Ok(exists)
    }
}

fn parse_millis(column: &str, millis: i64) -> Result<Timestamp> {
    Timestamp::from_millisecond(millis).map_err(|e| {
        StorageError::InvalidData(format!("invalid {column} timestamp '{millis}': {e}"))
    })
}

fn row_to_record(row: &MySqlRow) -> Result<MappingRecord> {
    let mapping_id: u64 = row.try_get("mapping_id").map_err(map_sqlx_error)?;
    let code: String = row.try_get("code").map_err(map_sqlx_error)?;
    let destination_url: String = row.try_get("destination_url").map_err(map_sqlx_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(map_sqlx_error)?;
    let expires_at: Option<i64> = row.try_get("expires_at").map_err(map_sqlx_error)?;
    let active: bool = row.try_get("active").map_err(map_sqlx_error)?;

    Ok(MappingRecord {
        mapping_id: MappingId::new(mapping_id),
        code: ShortCode::new_unchecked(code),
        destination_url,
        created_at: parse_millis("created_at", created_at)?,
        expires_at: expires_at
            .map(|millis| parse_millis("expires_at", millis))
            .transpose()?,
        active,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

const SELECT_MAPPING: &str = r#"
    SELECT mapping_id, code, destination_url, created_at, expires_at, active
    FROM mappings
"#;

#[async_trait]
impl MappingReader for MySqlRepository {
    async fn find_by_code(&self, code: &ShortCode) -> Result<Option<MappingRecord>> {
        let row = sqlx::query(&format!("{SELECT_MAPPING} WHERE code = ? LIMIT 1"))
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_by_id(&self, id: MappingId) -> Result<Option<MappingRecord>> {
        let row = sqlx::query(&format!("{SELECT_MAPPING} WHERE mapping_id = ? LIMIT 1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn exists_by_code(&self, code: &ShortCode) -> Result<bool> {
        let exists = sqlx::query("SELECT 1 FROM mappings WHERE code = ? LIMIT 1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .is_some();

        Ok(exists)
    }
}

#[async_trait]
impl MappingRepository for MySqlRepository {
    async fn reserve_id(&self) -> Result<MappingId> {
        let result = sqlx::query("INSERT INTO mapping_ids () VALUES ()")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let id = MappingId::new(result.last_insert_id());
        debug!(mapping_id = %id, "Reserved mapping id");
        Ok(id)
    }

    async fn insert(&self, record: MappingRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO mappings
                (mapping_id, code, destination_url, created_at, expires_at, active)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.mapping_id.get())
        .bind(record.code.as_str())
        .bind(&record.destination_url)
        .bind(record.created_at.as_millisecond())
        .bind(record.expires_at.map(|ts| ts.as_millisecond()))
        .bind(record.active)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::Conflict(record.code.to_string()))
            }
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    async fn set_active(&self, id: MappingId, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE mappings SET active = ? WHERE mapping_id = ?")
            .bind(active)
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        // MySQL reports unchanged rows as unaffected
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.mapping_exists(id).await
    }

    async fn set_expires_at(&self, id: MappingId, expires_at: Option<Timestamp>) -> Result<bool> {
        let result = sqlx::query("UPDATE mappings SET expires_at = ? WHERE mapping_id = ?")
            .bind(expires_at.map(|ts| ts.as_millisecond()))
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.mapping_exists(id).await
    }
}

#[async_trait]
impl AggregateRepository for MySqlRepository {
    async fn upsert_aggregate(&self, id: MappingId, delta: u64, now: Timestamp) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO click_aggregates (mapping_id, total_clicks, last_flushed_at)
            VALUES (?, ?, ?) AS new
            ON DUPLICATE KEY UPDATE
                total_clicks = click_aggregates.total_clicks + new.total_clicks,
                last_flushed_at = new.last_flushed_at
            "#,
        )
        .bind(id.get())
        .bind(delta)
        .bind(now.as_millisecond())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn get_aggregate(&self, id: MappingId) -> Result<Option<ClickAggregate>> {
        let row = sqlx::query(
            r#"
            SELECT total_clicks, last_flushed_at
            FROM click_aggregates
            WHERE mapping_id = ?
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let total_clicks: u64 = row.try_get("total_clicks").map_err(map_sqlx_error)?;
        let last_flushed_at: i64 = row.try_get("last_flushed_at").map_err(map_sqlx_error)?;

        Ok(Some(ClickAggregate {
            mapping_id: id,
            total_clicks,
            last_flushed_at: parse_millis("last_flushed_at", last_flushed_at)?,
        }))
    }
}
