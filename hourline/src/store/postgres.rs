use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::{
    start_store_query_timer, track_result, EntityEnumerator, ProgressStore, RawSampleReader, RollupWriter,
    StoreError,
};
use crate::model::{EntityPair, HostId, HourWindow, MeasureStats, MetricId, MetricKind, RollupRow, RollupShape};
use crate::settings::DatabaseSettings;

const ACTIVE_HOSTS_SQL: &str = "SELECT ID_DEVICE FROM DEVICES WHERE ACTIVE = TRUE";
const ACTIVE_METRICS_SQL: &str = "SELECT ID_PARAMETER FROM PARAMETERS WHERE HAS_THRESHOLD = TRUE";

const GET_POINTER_SQL: &str = r##"
    SELECT LAST_PROCESSED_AT
    FROM PROCESSING_POINTERS_HOURLY
    WHERE ID_DEVICE = $1 AND ID_PARAMETER = $2
"##;

const ADVANCE_POINTER_SQL: &str = r##"
    INSERT INTO PROCESSING_POINTERS_HOURLY (ID_DEVICE, ID_PARAMETER, LAST_PROCESSED_AT)
    VALUES ($1, $2, $3)
    ON CONFLICT (ID_DEVICE, ID_PARAMETER)
    DO UPDATE SET LAST_PROCESSED_AT = EXCLUDED.LAST_PROCESSED_AT
"##;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool_size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds a lazily connected pool; connections are established on first use.
    #[tracing::instrument(level = "info", skip(settings), fields(host=%settings.host, database=%settings.database_name))]
    pub fn connect(settings: &DatabaseSettings) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_lazy_with(settings.connect_options());
        Self::new(pool)
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EntityEnumerator for PostgresStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn active_hosts(&self) -> Result<HashSet<HostId>, StoreError> {
        let _timer = start_store_query_timer("active_hosts");
        let result = sqlx::query_scalar::<_, String>(ACTIVE_HOSTS_SQL)
            .fetch_all(&self.pool)
            .await
            .map(|ids| ids.into_iter().map(HostId::from).collect())
            .map_err(|err| err.into());
        track_result("active_hosts", result)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn active_metrics(&self) -> Result<HashSet<MetricId>, StoreError> {
        let _timer = start_store_query_timer("active_metrics");
        let result = sqlx::query_scalar::<_, String>(ACTIVE_METRICS_SQL)
            .fetch_all(&self.pool)
            .await
            .map(|ids| ids.into_iter().map(MetricId::from).collect())
            .map_err(|err| err.into());
        track_result("active_metrics", result)
    }
}

#[async_trait]
impl ProgressStore for PostgresStore {
    #[tracing::instrument(level = "debug", skip(self), fields(%pair))]
    async fn get(&self, pair: &EntityPair) -> Result<Option<DateTime<Utc>>, StoreError> {
        let _timer = start_store_query_timer("get_pointer");
        let result = sqlx::query_scalar::<_, DateTime<Utc>>(GET_POINTER_SQL)
            .bind(pair.host.as_str())
            .bind(pair.metric.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| err.into());
        track_result("get_pointer", result)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(%pair))]
    async fn advance(&self, pair: &EntityPair, next_hour: DateTime<Utc>) -> Result<(), StoreError> {
        let _timer = start_store_query_timer("advance_pointer");
        let result = sqlx::query(ADVANCE_POINTER_SQL)
            .bind(pair.host.as_str())
            .bind(pair.metric.as_str())
            .bind(next_hour)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| err.into());
        track_result("advance_pointer", result)
    }
}

#[async_trait]
impl RawSampleReader for PostgresStore {
    #[tracing::instrument(level = "debug", skip(self), fields(%pair))]
    async fn earliest_since(
        &self, pair: &EntityPair, kind: MetricKind, since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let _timer = start_store_query_timer("earliest_since");
        let sql = earliest_sql(kind.shape());
        let result = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(&sql)
            .bind(pair.host.as_str())
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| err.into());
        track_result("earliest_since", result)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(%pair, %window))]
    async fn aggregate_window(
        &self, pair: &EntityPair, kind: MetricKind, window: &HourWindow,
    ) -> Result<Vec<RollupRow>, StoreError> {
        let _timer = start_store_query_timer("aggregate_window");
        let shape = kind.shape();
        let sql = aggregate_sql(shape);
        let result = match sqlx::query(&sql)
            .bind(pair.host.as_str())
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows.iter().map(|row| decode_rollup_row(shape, row)).collect(),
            Err(err) => Err(err.into()),
        };
        track_result("aggregate_window", result)
    }
}

#[async_trait]
impl RollupWriter for PostgresStore {
    #[tracing::instrument(level = "debug", skip(self, rows), fields(%pair, %window, nr_rows=rows.len()))]
    async fn commit(
        &self, pair: &EntityPair, kind: MetricKind, window: &HourWindow, rows: &[RollupRow],
    ) -> Result<(), StoreError> {
        let _timer = start_store_query_timer("commit");
        let result = self.do_commit(pair, kind, window, rows).await;
        track_result("commit", result)
    }
}

impl PostgresStore {
    async fn do_commit(
        &self, pair: &EntityPair, kind: MetricKind, window: &HourWindow, rows: &[RollupRow],
    ) -> Result<(), StoreError> {
        let shape = kind.shape();
        let upsert = upsert_sql(shape);

        let mut tx = self.pool.begin().await?;
        for row in rows {
            let query = upsert_binds(shape, pair, window, row)
                .into_iter()
                .fold(sqlx::query(&upsert), |query, value| match value {
                    UpsertBind::Text(v) => query.bind(v),
                    UpsertBind::Time(v) => query.bind(v),
                    UpsertBind::Float(v) => query.bind(v),
                    UpsertBind::Int(v) => query.bind(v),
                });
            query.execute(&mut tx).await?;
        }

        sqlx::query(ADVANCE_POINTER_SQL)
            .bind(pair.host.as_str())
            .bind(pair.metric.as_str())
            .bind(window.next_start())
            .execute(&mut tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

/// One positional value bound into the rollup upsert, in `upsert_sql` placeholder order.
#[derive(Debug, Clone, PartialEq)]
enum UpsertBind {
    Text(String),
    Time(DateTime<Utc>),
    Float(f64),
    Int(i64),
}

fn upsert_binds(shape: &RollupShape, pair: &EntityPair, window: &HourWindow, row: &RollupRow) -> Vec<UpsertBind> {
    let mut binds = vec![UpsertBind::Text(pair.host.as_str().to_string())];
    if shape.sub_key.is_some() {
        binds.push(UpsertBind::Text(row.sub_key.clone().unwrap_or_default()));
    }
    binds.push(UpsertBind::Time(window.start));
    for m in row.measures.iter() {
        binds.extend([UpsertBind::Float(m.avg), UpsertBind::Float(m.min), UpsertBind::Float(m.max)]);
    }
    binds.extend(row.totals.iter().map(|t| UpsertBind::Int(*t)));
    binds.push(UpsertBind::Int(row.row_count));
    binds
}

/// Positional access to one row returned by `aggregate_sql`.
trait AggregateColumns {
    fn text(&self, idx: usize) -> Result<String, StoreError>;
    fn int(&self, idx: usize) -> Result<i64, StoreError>;
    fn float(&self, idx: usize) -> Result<Option<f64>, StoreError>;
}

impl AggregateColumns for PgRow {
    fn text(&self, idx: usize) -> Result<String, StoreError> {
        Ok(self.try_get(idx)?)
    }

    fn int(&self, idx: usize) -> Result<i64, StoreError> {
        Ok(self.try_get(idx)?)
    }

    fn float(&self, idx: usize) -> Result<Option<f64>, StoreError> {
        Ok(self.try_get(idx)?)
    }
}

fn decode_rollup_row<R: AggregateColumns>(shape: &RollupShape, row: &R) -> Result<RollupRow, StoreError> {
    let mut idx = 0;
    let sub_key = match shape.sub_key {
        Some(_) => {
            let key = row.text(idx)?;
            idx += 1;
            Some(key)
        },
        None => None,
    };

    let row_count = row.int(idx)?;
    idx += 1;

    let mut measures = Vec::with_capacity(shape.measures.len());
    for m in shape.measures {
        let stat = |prefix: &str, idx: usize| -> Result<f64, StoreError> {
            row.float(idx)?.ok_or_else(|| StoreError::UnexpectedValue {
                column: format!("{prefix}_{}", m.rollup),
                reason: "aggregate over only NULL values".to_string(),
            })
        };
        let avg = stat("AVG", idx)?;
        let min = stat("MIN", idx + 1)?;
        let max = stat("MAX", idx + 2)?;
        idx += 3;
        measures.push(MeasureStats { avg, min, max });
    }

    let mut totals = Vec::with_capacity(shape.totals.len());
    for _ in shape.totals {
        totals.push(row.int(idx)?);
        idx += 1;
    }

    Ok(RollupRow { sub_key, row_count, measures, totals })
}

pub(crate) fn earliest_sql(shape: &RollupShape) -> String {
    format!(
        "SELECT MIN(COLLECTED_AT_UTC) FROM {} WHERE ID_DEVICE = $1 AND COLLECTED_AT_UTC >= $2",
        shape.raw_table
    )
}

pub(crate) fn aggregate_sql(shape: &RollupShape) -> String {
    let mut columns = Vec::new();
    if let Some(sub_key) = shape.sub_key {
        columns.push(sub_key.to_string());
    }
    columns.push("COUNT(*) AS ROW_COUNT".to_string());
    for m in shape.measures {
        columns.push(format!("AVG({0})::DOUBLE PRECISION AS AVG_{1}", m.raw, m.rollup));
        columns.push(format!("MIN({0})::DOUBLE PRECISION AS MIN_{1}", m.raw, m.rollup));
        columns.push(format!("MAX({0})::DOUBLE PRECISION AS MAX_{1}", m.raw, m.rollup));
    }
    for t in shape.totals {
        columns.push(format!("COALESCE(SUM({0}), 0)::BIGINT AS {1}", t.raw, t.rollup));
    }

    let (group_by, order_by) = match shape.sub_key {
        Some(sub_key) => (format!("ID_DEVICE, {sub_key}"), format!(" ORDER BY {sub_key}")),
        None => ("ID_DEVICE".to_string(), String::new()),
    };

    format!(
        "SELECT {} FROM {} WHERE ID_DEVICE = $1 AND COLLECTED_AT_UTC BETWEEN $2 AND $3 GROUP BY {}{}",
        columns.join(", "),
        shape.raw_table,
        group_by,
        order_by,
    )
}

pub(crate) fn upsert_sql(shape: &RollupShape) -> String {
    let mut key_columns = vec!["ID_DEVICE".to_string()];
    if let Some(sub_key) = shape.sub_key {
        key_columns.push(sub_key.to_string());
    }
    key_columns.push("START_TIME".to_string());

    let mut value_columns = Vec::new();
    for m in shape.measures {
        value_columns.push(format!("AVG_{}", m.rollup));
        value_columns.push(format!("MIN_{}", m.rollup));
        value_columns.push(format!("MAX_{}", m.rollup));
    }
    for t in shape.totals {
        value_columns.push(t.rollup.to_string());
    }
    value_columns.push("ROW_COUNT".to_string());

    let nr_bound = key_columns.len() + value_columns.len();
    let placeholders = (1..=nr_bound).map(|i| format!("${i}")).join(", ");

    let updates = value_columns
        .iter()
        .chain(std::iter::once(&"INSERTED_AT_UTC".to_string()))
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .join(", ");

    format!(
        "INSERT INTO {} ({}, {}, INSERTED_AT_UTC) VALUES ({}, CURRENT_TIMESTAMP) ON CONFLICT ({}) DO UPDATE SET {}",
        shape.rollup_table,
        key_columns.join(", "),
        value_columns.join(", "),
        placeholders,
        key_columns.join(", "),
        updates,
    )
}
