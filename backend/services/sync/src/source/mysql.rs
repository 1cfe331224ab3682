use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, MySqlPool, Row, TypeInfo, ValueRef};

use rowsync_common::{SyncError, SyncResult};
use rowsync_config::{MySqlSettings, QueryTemplate};
use rowsync_transform::{SourceRecord, SourceValue};

use super::{RecordSource, RecordStream};

/// How a MySQL column is decoded, keyed by the server-reported type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Signed,
    Unsigned,
    Float,
    Double,
    Decimal,
    Date,
    DateTime,
    Timestamp,
    Time,
    Json,
    Binary,
    Text,
}

impl ColumnKind {
    fn from_type_name(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        let unsigned = upper.contains("UNSIGNED");
        let base = upper.split_whitespace().next().unwrap_or("");

        match base {
            "BOOLEAN" | "BOOL" => Self::Bool,
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" if unsigned => {
                Self::Unsigned
            }
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" => Self::Signed,
            "YEAR" => Self::Unsigned,
            "FLOAT" => Self::Float,
            "DOUBLE" | "REAL" => Self::Double,
            "DECIMAL" | "NUMERIC" => Self::Decimal,
            "DATE" => Self::Date,
            "DATETIME" => Self::DateTime,
            "TIMESTAMP" => Self::Timestamp,
            "TIME" => Self::Time,
            "JSON" => Self::Json,
            "BIT" | "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB"
            | "GEOMETRY" => Self::Binary,
            _ => Self::Text,
        }
    }
}

/// Source rows from a MySQL database.
#[derive(Clone)]
pub struct MySqlSource {
    pool: MySqlPool,
}

impl MySqlSource {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &MySqlSettings) -> SyncResult<Self> {
        let options = match settings {
            MySqlSettings::Url(url) => MySqlConnectOptions::from_str(url)
                .map_err(|e| SyncError::Config(format!("invalid MYSQL_URL: {e}")))?,
            MySqlSettings::Parts {
                host,
                port,
                user,
                password,
                database,
            } => MySqlConnectOptions::new()
                .host(host)
                .port(*port)
                .username(user)
                .password(password)
                .database(database),
        };

        tracing::info!(target_db = %settings.redacted(), "connecting to source database");
        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| SyncError::Source(e.to_string()))?;

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RecordSource for MySqlSource {
    fn fetch<'a>(&'a self, query: &'a str, since: Option<DateTime<Utc>>) -> RecordStream<'a> {
        Box::pin(async_stream::try_stream! {
            let template = QueryTemplate::parse(query);
            if let Some(name) = template.unsupported_params().first() {
                Err::<(), _>(SyncError::Config(format!("unsupported query parameter :{name}")))?;
            }

            let bound: Option<NaiveDateTime> = since.map(|ts| ts.naive_utc());
            tracing::debug!(params = template.params.len(), since = ?bound, "executing source query");

            let mut statement = sqlx::query(&template.sql);
            for _ in &template.params {
                statement = statement.bind(bound);
            }

            let mut rows = statement.fetch(&self.pool);
            while let Some(row) = rows
                .try_next()
                .await
                .map_err(|e| SyncError::Source(e.to_string()))?
            {
                yield decode_row(&row)?;
            }
        })
    }

    async fn ping(&self) -> SyncResult<()> {
        sqlx::query("select 1")
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Source(e.to_string()))?;
        Ok(())
    }
}

fn decode_row(row: &MySqlRow) -> SyncResult<SourceRecord> {
    let mut record = SourceRecord::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, index, column.type_info().name())
            .map_err(|e| SyncError::Source(format!("column {}: {e}", column.name())))?;
        record.insert(column.name(), value);
    }
    Ok(record)
}

fn decode_value(row: &MySqlRow, index: usize, type_name: &str) -> Result<SourceValue, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(SourceValue::Null);
    }

    Ok(match ColumnKind::from_type_name(type_name) {
        ColumnKind::Bool => SourceValue::Bool(row.try_get::<bool, _>(index)?),
        ColumnKind::Signed => SourceValue::Int(row.try_get::<i64, _>(index)?),
        ColumnKind::Unsigned => SourceValue::UInt(row.try_get_unchecked::<u64, _>(index)?),
        ColumnKind::Float => SourceValue::Float(f64::from(row.try_get::<f32, _>(index)?)),
        ColumnKind::Double => SourceValue::Float(row.try_get::<f64, _>(index)?),
        ColumnKind::Decimal => SourceValue::Decimal(row.try_get::<Decimal, _>(index)?),
        ColumnKind::Date => SourceValue::Date(row.try_get::<NaiveDate, _>(index)?),
        ColumnKind::DateTime => SourceValue::DateTime(row.try_get::<NaiveDateTime, _>(index)?),
        ColumnKind::Timestamp => SourceValue::Timestamp(row.try_get::<DateTime<Utc>, _>(index)?),
        ColumnKind::Time => {
            SourceValue::Text(row.try_get::<NaiveTime, _>(index)?.format("%H:%M:%S").to_string())
        }
        ColumnKind::Json => SourceValue::Json(row.try_get::<serde_json::Value, _>(index)?),
        ColumnKind::Binary => SourceValue::Bytes(row.try_get_unchecked::<Vec<u8>, _>(index)?),
        ColumnKind::Text => match row.try_get::<String, _>(index) {
            Ok(text) => SourceValue::Text(text),
            Err(_) => SourceValue::Bytes(row.try_get_unchecked::<Vec<u8>, _>(index)?),
        },
    })
}
