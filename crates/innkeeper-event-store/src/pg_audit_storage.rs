//! `PostgreSQL` implementation of the audit storage traits.
//!
//! Events live in a natively range-partitioned `audit_events` table. Each
//! partition is a child table named after its range; the catalog of
//! partitions and their lifecycle state is kept in `audit_partitions`.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use innkeeper_core::error::StorageError;
use innkeeper_core::event::{Actor, ActorKind, AggregateKey, EventId, RecordedEvent};
use innkeeper_core::partition::{PartitionRange, PartitionRecord, PartitionState};
use innkeeper_core::storage::{
    EventLog, PartitionCatalog, RetentionScan, Snapshot, SnapshotStore, SnapshotWrite, StreamHead,
};

const EVENT_COLUMNS: &str = "event_id, event_type, aggregate_type, aggregate_id, \
    sequence_number, event_data, event_version, correlation_id, causation_id, occurred_at, \
    recorded_at, actor_kind, actor_id, ip_address, user_agent, retention_until, is_sensitive, \
    redacted_at";

const UNDEFINED_TABLE: &str = "42P01";
const DUPLICATE_TABLE: &str = "42P07";
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";
const INVALID_OBJECT_DEFINITION: &str = "42P17";

/// PostgreSQL-backed audit storage.
#[derive(Debug, Clone)]
pub struct PgAuditStorage {
    pool: PgPool,
}

impl PgAuditStorage {
    /// Creates a new `PgAuditStorage`. The schema must already be installed,
    /// see [`install_schema`](crate::schema::install_schema).
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn unavailable(error: &sqlx::Error) -> StorageError {
    StorageError::Unavailable(error.to_string())
}

fn sql_state(error: &sqlx::Error) -> Option<String> {
    error
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

fn to_i64(value: u64, what: &str) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::Serialization(format!("{what} {value} overflows")))
}

fn to_u64(value: i64, what: &str) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::Serialization(format!("negative {what} {value}")))
}

/// Partition names are interpolated into DDL, so they are restricted to the
/// characters the naming scheme produces.
fn checked_name(name: &str) -> Result<&str, StorageError> {
    let valid = name.starts_with("audit_events_p")
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StorageError::PartitionMissing(name.to_owned()))
    }
}

fn partition_error(name: &str, error: &sqlx::Error) -> StorageError {
    match sql_state(error).as_deref() {
        Some(UNDEFINED_TABLE | CHECK_VIOLATION) => StorageError::PartitionMissing(name.to_owned()),
        _ => unavailable(error),
    }
}

fn decode<T>(row: &PgRow, column: &str) -> Result<T, StorageError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StorageError::Serialization(format!("{column}: {e}")))
}

fn event_from_row(row: &PgRow) -> Result<RecordedEvent, StorageError> {
    let actor_kind: String = decode(row, "actor_kind")?;
    let kind = ActorKind::parse(&actor_kind)
        .ok_or_else(|| StorageError::Serialization(format!("unknown actor kind {actor_kind:?}")))?;
    let ip_address = decode::<Option<String>>(row, "ip_address")?
        .map(|ip| {
            ip.parse::<IpAddr>()
                .map_err(|e| StorageError::Serialization(format!("ip_address {ip:?}: {e}")))
        })
        .transpose()?;
    let event_version: i32 = decode(row, "event_version")?;

    Ok(RecordedEvent {
        event_id: EventId::from_uuid(decode(row, "event_id")?),
        event_type: decode(row, "event_type")?,
        key: AggregateKey::new(
            decode::<String>(row, "aggregate_type")?,
            decode::<String>(row, "aggregate_id")?,
        ),
        event_data: decode(row, "event_data")?,
        event_version: u32::try_from(event_version).map_err(|_| {
            StorageError::Serialization(format!("negative event_version {event_version}"))
        })?,
        correlation_id: decode(row, "correlation_id")?,
        causation_id: decode::<Option<Uuid>>(row, "causation_id")?.map(EventId::from_uuid),
        occurred_at: decode(row, "occurred_at")?,
        recorded_at: decode(row, "recorded_at")?,
        sequence: to_u64(decode(row, "sequence_number")?, "sequence_number")?,
        actor: Actor {
            kind,
            id: decode(row, "actor_id")?,
            ip_address,
            user_agent: decode(row, "user_agent")?,
        },
        retention_until: decode(row, "retention_until")?,
        is_sensitive: decode(row, "is_sensitive")?,
        redacted_at: decode(row, "redacted_at")?,
    })
}

fn partition_from_row(row: &PgRow) -> Result<PartitionRecord, StorageError> {
    let start: DateTime<Utc> = decode(row, "range_start")?;
    let end: DateTime<Utc> = decode(row, "range_end")?;
    let state: String = decode(row, "state")?;
    Ok(PartitionRecord {
        name: decode(row, "name")?,
        range: PartitionRange::new(start, end).ok_or_else(|| {
            StorageError::Serialization(format!("empty partition range {start}..{end}"))
        })?,
        state: PartitionState::parse(&state)
            .ok_or_else(|| StorageError::Serialization(format!("unknown partition state {state:?}")))?,
        created_at: decode(row, "created_at")?,
    })
}

fn literal(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl PgAuditStorage {
    async fn catalog_overlapping(
        &self,
        range: PartitionRange,
    ) -> Result<Option<PartitionRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT name, range_start, range_end, state, created_at FROM audit_partitions \
             WHERE range_start < $2 AND $1 < range_end ORDER BY range_start LIMIT 1",
        )
        .bind(range.start())
        .bind(range.end())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable(&e))?;
        row.as_ref().map(partition_from_row).transpose()
    }

    async fn head_sequence(&self, key: &AggregateKey) -> Result<u64, StorageError> {
        let head: Option<i64> = sqlx::query_scalar(
            "SELECT head_sequence FROM audit_streams WHERE aggregate_type = $1 AND aggregate_id = $2",
        )
        .bind(&key.aggregate_type)
        .bind(&key.aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable(&e))?;
        head.map_or(Ok(0), |h| to_u64(h, "head_sequence"))
    }
}

#[async_trait]
impl EventLog for PgAuditStorage {
    async fn append_event(
        &self,
        partition: &str,
        event: &RecordedEvent,
        expected_sequence: u64,
    ) -> Result<(), StorageError> {
        let partition = checked_name(partition)?;
        let sequence = to_i64(event.sequence, "sequence")?;
        let expected = to_i64(expected_sequence, "expected sequence")?;
        let mut tx = self.pool.begin().await.map_err(|e| unavailable(&e))?;

        let claimed = sqlx::query(
            "INSERT INTO audit_event_ids (event_id, recorded_at) VALUES ($1, $2) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event.event_id.as_uuid())
        .bind(event.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| unavailable(&e))?;
        if claimed.rows_affected() == 0 {
            return Err(StorageError::DuplicateEvent(event.event_id));
        }

        let advanced = if expected_sequence == 0 {
            sqlx::query(
                "INSERT INTO audit_streams (aggregate_type, aggregate_id, head_sequence, head_recorded) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (aggregate_type, aggregate_id) DO NOTHING",
            )
            .bind(&event.key.aggregate_type)
            .bind(&event.key.aggregate_id)
            .bind(sequence)
            .bind(event.recorded_at)
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(
                "UPDATE audit_streams SET head_sequence = $3, head_recorded = $4 \
                 WHERE aggregate_type = $1 AND aggregate_id = $2 AND head_sequence = $5",
            )
            .bind(&event.key.aggregate_type)
            .bind(&event.key.aggregate_id)
            .bind(sequence)
            .bind(event.recorded_at)
            .bind(expected)
            .execute(&mut *tx)
            .await
        }
        .map_err(|e| unavailable(&e))?;
        if advanced.rows_affected() == 0 {
            drop(tx);
            return Err(StorageError::SequenceConflict {
                key: event.key.clone(),
                expected: expected_sequence,
                actual: self.head_sequence(&event.key).await?,
            });
        }

        let ip_address = event.actor.ip_address.map(|ip| ip.to_string());
        sqlx::query(&format!(
            "INSERT INTO {partition} ({EVENT_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        ))
        .bind(event.event_id.as_uuid())
        .bind(&event.event_type)
        .bind(&event.key.aggregate_type)
        .bind(&event.key.aggregate_id)
        .bind(sequence)
        .bind(&event.event_data)
        .bind(i32::try_from(event.event_version).map_err(|_| {
            StorageError::Serialization(format!("event_version {} overflows", event.event_version))
        })?)
        .bind(event.correlation_id)
        .bind(event.causation_id.map(|id| id.as_uuid()))
        .bind(event.occurred_at)
        .bind(event.recorded_at)
        .bind(event.actor.kind.as_str())
        .bind(&event.actor.id)
        .bind(ip_address)
        .bind(&event.actor.user_agent)
        .bind(event.retention_until)
        .bind(event.is_sensitive)
        .bind(event.redacted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| partition_error(partition, &e))?;

        tx.commit().await.map_err(|e| unavailable(&e))?;
        debug!(event_id = %event.event_id, partition, "event row committed");
        Ok(())
    }

    async fn event_exists(&self, event_id: EventId) -> Result<bool, StorageError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM audit_event_ids WHERE event_id = $1)")
            .bind(event_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| unavailable(&e))
    }

    async fn stream_head(&self, key: &AggregateKey) -> Result<Option<StreamHead>, StorageError> {
        let row = sqlx::query(
            "SELECT head_sequence, head_recorded FROM audit_streams \
             WHERE aggregate_type = $1 AND aggregate_id = $2",
        )
        .bind(&key.aggregate_type)
        .bind(&key.aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable(&e))?;
        row.map(|row| {
            Ok(StreamHead {
                sequence: to_u64(decode(&row, "head_sequence")?, "head_sequence")?,
                recorded_at: decode(&row, "head_recorded")?,
            })
        })
        .transpose()
    }

    async fn load_stream(
        &self,
        key: &AggregateKey,
        after_sequence: u64,
    ) -> Result<Vec<RecordedEvent>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM audit_events \
             WHERE aggregate_type = $1 AND aggregate_id = $2 AND sequence_number > $3 \
             ORDER BY recorded_at, sequence_number, event_id"
        ))
        .bind(&key.aggregate_type)
        .bind(&key.aggregate_id)
        .bind(to_i64(after_sequence, "sequence")?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable(&e))?;
        rows.iter().map(event_from_row).collect()
    }

    async fn retention_scan(
        &self,
        partition: &str,
        now: DateTime<Utc>,
    ) -> Result<RetentionScan, StorageError> {
        let partition = checked_name(partition)?;
        let counts = sqlx::query(&format!(
            "SELECT COUNT(*) AS total, \
             COUNT(*) FILTER (WHERE retention_until IS NULL OR retention_until > $1) AS live \
             FROM {partition}"
        ))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| partition_error(partition, &e))?;
        let redactable: Vec<Uuid> = sqlx::query_scalar(&format!(
            "SELECT event_id FROM {partition} \
             WHERE is_sensitive AND redacted_at IS NULL AND retention_until <= $1 \
             ORDER BY event_id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| partition_error(partition, &e))?;

        Ok(RetentionScan {
            total: to_u64(decode(&counts, "total")?, "total")?,
            live: to_u64(decode(&counts, "live")?, "live")?,
            redactable: redactable.into_iter().map(EventId::from_uuid).collect(),
        })
    }

    async fn redact_events(
        &self,
        partition: &str,
        event_ids: &[EventId],
        redacted_at: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let partition = checked_name(partition)?;
        let ids: Vec<Uuid> = event_ids.iter().map(EventId::as_uuid).collect();
        let result = sqlx::query(&format!(
            "UPDATE {partition} SET event_data = 'null'::jsonb, redacted_at = $2 \
             WHERE event_id = ANY($1) AND redacted_at IS NULL"
        ))
        .bind(ids)
        .bind(redacted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| partition_error(partition, &e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PartitionCatalog for PgAuditStorage {
    async fn create_partition(
        &self,
        range: PartitionRange,
        created_at: DateTime<Utc>,
    ) -> Result<PartitionRecord, StorageError> {
        if let Some(existing) = self.catalog_overlapping(range).await? {
            if existing.range == range {
                return Ok(existing);
            }
            return Err(StorageError::PartitionOverlap {
                requested: range.to_string(),
                existing: existing.name,
            });
        }

        let name = range.name();
        checked_name(&name)?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {name} PARTITION OF audit_events \
             FOR VALUES FROM ('{}') TO ('{}')",
            literal(range.start()),
            literal(range.end()),
        );
        match sqlx::raw_sql(&ddl).execute(&self.pool).await {
            Ok(_) => {}
            // A concurrent creator won the race for the same table.
            Err(e) if matches!(sql_state(&e).as_deref(), Some(DUPLICATE_TABLE | UNIQUE_VIOLATION)) => {}
            Err(e) if sql_state(&e).as_deref() == Some(INVALID_OBJECT_DEFINITION) => {
                return Err(StorageError::PartitionOverlap {
                    requested: range.to_string(),
                    existing: "an uncatalogued partition".to_owned(),
                });
            }
            Err(e) => return Err(unavailable(&e)),
        }

        sqlx::query(
            "INSERT INTO audit_partitions (name, range_start, range_end, state, created_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING",
        )
        .bind(&name)
        .bind(range.start())
        .bind(range.end())
        .bind(PartitionState::Open.as_str())
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable(&e))?;

        match self.catalog_overlapping(range).await? {
            Some(record) if record.range == range => Ok(record),
            Some(other) => Err(StorageError::PartitionOverlap {
                requested: range.to_string(),
                existing: other.name,
            }),
            None => Err(StorageError::PartitionMissing(name)),
        }
    }

    async fn list_partitions(&self) -> Result<Vec<PartitionRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT name, range_start, range_end, state, created_at FROM audit_partitions \
             ORDER BY range_start",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable(&e))?;
        rows.iter().map(partition_from_row).collect()
    }

    async fn mark_read_only(&self, name: &str) -> Result<bool, StorageError> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM audit_partitions WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| unavailable(&e))?;
        if state.is_none() {
            return Err(StorageError::PartitionMissing(name.to_owned()));
        }
        let changed = sqlx::query("UPDATE audit_partitions SET state = $2 WHERE name = $1 AND state = $3")
            .bind(name)
            .bind(PartitionState::ReadOnly.as_str())
            .bind(PartitionState::Open.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(changed.rows_affected() > 0)
    }

    async fn drop_partition(&self, name: &str) -> Result<bool, StorageError> {
        let name = checked_name(name)?;
        let mut tx = self.pool.begin().await.map_err(|e| unavailable(&e))?;
        let catalogued = sqlx::query("DELETE FROM audit_partitions WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable(&e))?;
        if catalogued.rows_affected() == 0 {
            return Ok(false);
        }
        // Ids stay in audit_event_ids so retries of purged events remain duplicates.
        sqlx::query(&format!("DROP TABLE IF EXISTS {name}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable(&e))?;
        tx.commit().await.map_err(|e| unavailable(&e))?;
        Ok(true)
    }
}

#[async_trait]
impl SnapshotStore for PgAuditStorage {
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<SnapshotWrite, StorageError> {
        let result = sqlx::query(
            "INSERT INTO audit_snapshots \
             (aggregate_type, aggregate_id, snapshot_data, through_sequence, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (aggregate_type, aggregate_id) DO UPDATE SET \
             snapshot_data = EXCLUDED.snapshot_data, \
             through_sequence = EXCLUDED.through_sequence, \
             created_at = EXCLUDED.created_at \
             WHERE audit_snapshots.through_sequence < EXCLUDED.through_sequence",
        )
        .bind(&snapshot.key.aggregate_type)
        .bind(&snapshot.key.aggregate_id)
        .bind(&snapshot.snapshot_data)
        .bind(to_i64(snapshot.through_sequence, "through_sequence")?)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable(&e))?;
        Ok(if result.rows_affected() == 0 {
            SnapshotWrite::Superseded
        } else {
            SnapshotWrite::Written
        })
    }

    async fn load_snapshot(&self, key: &AggregateKey) -> Result<Option<Snapshot>, StorageError> {
        let row = sqlx::query(
            "SELECT snapshot_data, through_sequence, created_at FROM audit_snapshots \
             WHERE aggregate_type = $1 AND aggregate_id = $2",
        )
        .bind(&key.aggregate_type)
        .bind(&key.aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable(&e))?;
        row.map(|row| {
            Ok(Snapshot {
                key: key.clone(),
                snapshot_data: decode(&row, "snapshot_data")?,
                through_sequence: to_u64(decode(&row, "through_sequence")?, "through_sequence")?,
                created_at: decode(&row, "created_at")?,
            })
        })
        .transpose()
    }
}
