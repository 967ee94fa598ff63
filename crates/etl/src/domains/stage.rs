use async_trait::async_trait;
use meteo_etl_core::ensure_parent_dir;
use serde::{Deserialize, Serialize};
use slog::{debug, info, Logger};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Connection,
};
use std::path::PathBuf;
use time::{format_description::BorrowedFormatItem, macros::format_description};

use crate::HourlyRecord;

/// Text layout used for both timestamp columns
pub const STAGED_TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]");

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("invalid staging table name: {0}")]
    InvalidTableName(String),
    #[error("failed to create directory for {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open staging database {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
    #[error("staging query failed: {0}")]
    Query(#[source] sqlx::Error),
    #[error("failed to format timestamp: {0}")]
    TimestampFormat(#[from] time::error::Format),
}

/// A row read back from the staging table, keyed by column name when serialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StagedRow {
    pub city_name: String,
    pub collection_timestamp: String,
    pub measure_datetime: String,
    pub temperature_celsius: f64,
    pub temperature_fahrenheit: f64,
    pub temperature_kelvin: f64,
    pub humidity: f64,
    pub wind_speed_m_s: f64,
}

#[async_trait]
pub trait Staging: Send + Sync {
    /// Replace the staging table contents with `records`, returning rows written.
    /// An empty batch leaves the table alone.
    async fn stage(&self, records: &[HourlyRecord]) -> Result<usize, StorageError>;
    async fn export_all(&self) -> Result<Vec<StagedRow>, StorageError>;
}

pub struct SqliteStager {
    logger: Logger,
    path: PathBuf,
    table: String,
}

impl SqliteStager {
    pub fn new(logger: Logger, path: impl Into<PathBuf>, table: &str) -> Result<Self, StorageError> {
        if !is_identifier(table) {
            return Err(StorageError::InvalidTableName(table.to_owned()));
        }
        Ok(Self {
            logger,
            path: path.into(),
            table: table.to_owned(),
        })
    }

    async fn open_connection(&self) -> Result<SqliteConnection, StorageError> {
        ensure_parent_dir(&self.path).map_err(|source| StorageError::CreateDir {
            path: self.path.clone(),
            source,
        })?;
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .connect()
            .await
            .map_err(|source| StorageError::Connect {
                path: self.path.clone(),
                source,
            })
    }

    async fn recreate_table(&self, conn: &mut SqliteConnection) -> Result<(), StorageError> {
        let drop = format!("DROP TABLE IF EXISTS {}", self.table);
        sqlx::query(&drop)
            .execute(&mut *conn)
            .await
            .map_err(StorageError::Query)?;

        let create = format!(
            "CREATE TABLE {} (
                city_name TEXT,
                collection_timestamp TIMESTAMP,
                measure_datetime TIMESTAMP,
                temperature_celsius REAL,
                temperature_fahrenheit REAL,
                temperature_kelvin REAL,
                humidity REAL,
                wind_speed_m_s REAL
            )",
            self.table
        );
        sqlx::query(&create)
            .execute(&mut *conn)
            .await
            .map_err(StorageError::Query)?;
        Ok(())
    }

    async fn insert_records(
        &self,
        conn: &mut SqliteConnection,
        records: &[HourlyRecord],
    ) -> Result<usize, StorageError> {
        let insert = format!(
            "INSERT INTO {} VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );
        for record in records {
            sqlx::query(&insert)
                .bind(&record.city_name)
                .bind(record.collection_timestamp.format(STAGED_TIMESTAMP_FORMAT)?)
                .bind(record.measure_datetime.format(STAGED_TIMESTAMP_FORMAT)?)
                .bind(record.temperature_celsius)
                .bind(record.temperature_fahrenheit)
                .bind(record.temperature_kelvin)
                .bind(record.humidity)
                .bind(record.wind_speed_m_s)
                .execute(&mut *conn)
                .await
                .map_err(StorageError::Query)?;
        }
        Ok(records.len())
    }
}

#[async_trait]
impl Staging for SqliteStager {
    async fn stage(&self, records: &[HourlyRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            debug!(self.logger, "no records to stage, leaving {} untouched", self.table);
            return Ok(0);
        }

        let mut conn = self.open_connection().await?;
        self.recreate_table(&mut conn).await?;
        let written = self.insert_records(&mut conn, records).await?;
        conn.close().await.map_err(StorageError::Query)?;

        info!(
            self.logger,
            "staged {} rows into {} at {}",
            written,
            self.table,
            self.path.display()
        );
        Ok(written)
    }

    async fn export_all(&self) -> Result<Vec<StagedRow>, StorageError> {
        let mut conn = self.open_connection().await?;
        let select = format!(
            "SELECT city_name, collection_timestamp, measure_datetime, temperature_celsius,
                    temperature_fahrenheit, temperature_kelvin, humidity, wind_speed_m_s
             FROM {} ORDER BY rowid",
            self.table
        );
        let rows = sqlx::query_as::<_, StagedRow>(&select)
            .fetch_all(&mut conn)
            .await
            .map_err(StorageError::Query)?;
        conn.close().await.map_err(StorageError::Query)?;

        debug!(self.logger, "read back {} rows from {}", rows.len(), self.table);
        Ok(rows)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
