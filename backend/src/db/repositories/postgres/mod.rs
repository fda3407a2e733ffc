//! Postgres repository implementation using Diesel.
//!
//! Samples live in `heart_rate_samples`. Row triggers append every insert,
//! update and delete to the `heart_rate_changes` outbox, tagged with the
//! writing transaction's id. The change feed tails the outbox in
//! `(txid, change_seq)` order and only consumes rows from transactions that
//! have finished (see [`OutboxCursor`]). Rows older than the retention window
//! are deleted while the feed runs.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL` or `PG_DATABASE_URL`: Connection string (required)
//! - `PG_POOL_MAX`: Maximum pool size (default: 10)
//! - `PG_POOL_MIN`: Minimum pool size (default: 1)
//! - `PG_CONN_TIMEOUT_SEC`: Connection timeout in seconds (default: 30)
//! - `PG_IDLE_TIMEOUT_SEC`: Idle connection timeout in seconds (default: 600)
//! - `PG_MAX_RETRIES`: Maximum retry attempts for transient failures (default: 3)
//! - `PG_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 100)
//! - `HEARTIFY_FEED_POLL_MS`: Outbox poll interval in milliseconds (default: 500)
//! - `HEARTIFY_FEED_RETENTION_SECS`: Age after which outbox rows are deleted (default: 3600)

use async_trait::async_trait;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_query;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::task;

use crate::db::repositories::outbox::OutboxCursor;
use crate::db::repository::{
    ChangeFeed, ChangeStream, ErrorContext, RepositoryError, RepositoryResult, SampleRepository,
};
use crate::models::{HeartRate, NewSample, RawChange, Sample, SampleId, Scope, TimeWindow};

mod models;
mod schema;

use models::*;
use schema::*;

type PgPool = Pool<ConnectionManager<PgConnection>>;

const MAX_RETENTION_SECS: u64 = 365 * 24 * 3600;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/db/repositories/postgres/migrations");

/// Configuration for connecting to Postgres.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_pool_size: u32,
    /// Minimum number of connections in the pool
    pub min_pool_size: u32,
    /// Connection timeout in seconds
    pub connection_timeout_sec: u64,
    /// Idle connection timeout in seconds
    pub idle_timeout_sec: u64,
    /// Maximum number of retry attempts for transient failures
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles with each retry)
    pub retry_delay_ms: u64,
    /// How often the change feed polls the outbox
    pub feed_poll_interval_ms: u64,
    /// Maximum outbox rows read per poll
    pub feed_batch_size: i64,
    /// Outbox rows older than this many seconds are deleted
    pub feed_retention_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_pool_size: 10,
            min_pool_size: 1,
            connection_timeout_sec: 30,
            idle_timeout_sec: 600,
            max_retries: 3,
            retry_delay_ms: 100,
            feed_poll_interval_ms: 500,
            feed_batch_size: 500,
            feed_retention_secs: 3600,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Create configuration from environment variables.
    ///
    /// See the module docs for the variables read and their defaults.
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("PG_DATABASE_URL"))
            .map_err(|_| "DATABASE_URL or PG_DATABASE_URL must be set".to_string())?;

        let defaults = Self::default();
        Ok(Self {
            database_url,
            max_pool_size: env_or("PG_POOL_MAX", defaults.max_pool_size),
            min_pool_size: env_or("PG_POOL_MIN", defaults.min_pool_size),
            connection_timeout_sec: env_or("PG_CONN_TIMEOUT_SEC", defaults.connection_timeout_sec),
            idle_timeout_sec: env_or("PG_IDLE_TIMEOUT_SEC", defaults.idle_timeout_sec),
            max_retries: env_or("PG_MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_or("PG_RETRY_DELAY_MS", defaults.retry_delay_ms),
            feed_poll_interval_ms: env_or("HEARTIFY_FEED_POLL_MS", defaults.feed_poll_interval_ms),
            feed_batch_size: defaults.feed_batch_size,
            feed_retention_secs: env_or(
                "HEARTIFY_FEED_RETENTION_SECS",
                defaults.feed_retention_secs,
            ),
        })
    }

    fn prune_interval(&self) -> Duration {
        Duration::from_secs((self.feed_retention_secs / 4).clamp(1, 300))
    }
}

/// Rows fetched by one outbox poll.
struct OutboxBatch {
    horizon: i64,
    rows: Vec<ChangeRow>,
    documents: HashMap<i64, Sample>,
}

/// Diesel-backed repository for Postgres.
#[derive(Clone, Debug)]
pub struct PostgresRepository {
    pool: PgPool,
    config: PostgresConfig,
}

impl PostgresRepository {
    /// Create a new repository and run pending migrations.
    pub fn new(config: PostgresConfig) -> RepositoryResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(config.min_pool_size))
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_sec)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_pool")
                        .with_details(format!("max_size={}", config.max_pool_size)),
                )
            })?;

        {
            let mut conn = pool.get().map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_connection_for_migrations"),
                )
            })?;
            Self::run_migrations(&mut conn)?;
        }

        Ok(Self { pool, config })
    }

    fn run_migrations(conn: &mut PgConnection) -> RepositoryResult<()> {
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Migration failed: {}", e),
                ErrorContext::new("run_migrations"),
            )
        })?;

        Ok(())
    }

    /// Execute a database operation with automatic retry for transient failures.
    async fn with_conn<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> RepositoryResult<T> + Send + 'static + Clone,
    {
        let pool = self.pool.clone();
        let max_retries = self.config.max_retries;
        let retry_delay_ms = self.config.retry_delay_ms;

        task::spawn_blocking(move || {
            let mut last_error = None;
            let mut retry_delay = Duration::from_millis(retry_delay_ms);

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    std::thread::sleep(retry_delay);
                    retry_delay *= 2;
                }

                let mut conn = match pool.get() {
                    Ok(c) => c,
                    Err(e) => {
                        let err = RepositoryError::connection_with_context(
                            e.to_string(),
                            ErrorContext::new("get_connection")
                                .with_details(format!("attempt={}", attempt + 1)),
                        );
                        if attempt < max_retries {
                            last_error = Some(err);
                            continue;
                        }
                        return Err(err);
                    }
                };

                match f.clone()(&mut conn) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.is_retryable() && attempt < max_retries => {
                        log::debug!("Retrying after transient error: {}", e);
                        last_error = Some(e);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            Err(last_error.unwrap_or_else(|| {
                RepositoryError::internal("Max retries exceeded with no error captured")
            }))
        })
        .await
        .map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Task join error: {}", e),
                ErrorContext::new("spawn_blocking"),
            )
        })?
    }

    /// Cursor positioned at the current snapshot horizon, so the feed
    /// starts with transactions that have not finished yet.
    async fn feed_start(&self) -> RepositoryResult<OutboxCursor> {
        self.with_conn(|conn| snapshot_horizon(conn).map(OutboxCursor::at_horizon))
            .await
            .map_err(|e| e.with_operation("feed_start"))
    }

    /// Outbox rows after `cursor`, plus the horizon read before them and the
    /// current documents for inserts and updates.
    async fn poll_changes(&self, cursor: OutboxCursor) -> RepositoryResult<OutboxBatch> {
        let batch_size = self.config.feed_batch_size;
        self.with_conn(move |conn| {
            // The horizon must be read first: any transaction below it has
            // finished and is visible to the next statement.
            let horizon = snapshot_horizon(conn)?;
            let rows = heart_rate_changes::table
                .filter(
                    heart_rate_changes::txid.gt(cursor.txid).or(heart_rate_changes::txid
                        .eq(cursor.txid)
                        .and(heart_rate_changes::change_seq.gt(cursor.change_seq))),
                )
                .filter(heart_rate_changes::txid.lt(horizon))
                .order((
                    heart_rate_changes::txid.asc(),
                    heart_rate_changes::change_seq.asc(),
                ))
                .limit(batch_size)
                .select(ChangeRow::as_select())
                .load::<ChangeRow>(conn)
                .map_err(map_diesel_error)?;

            let lookup_ids: Vec<i64> = rows
                .iter()
                .filter(|r| r.operation_type != RawChange::DELETE)
                .map(|r| r.sample_id)
                .collect();

            let mut documents: HashMap<i64, Sample> = HashMap::new();
            if !lookup_ids.is_empty() {
                let found = heart_rate_samples::table
                    .filter(heart_rate_samples::sample_id.eq_any(&lookup_ids))
                    .select(SampleRow::as_select())
                    .load::<SampleRow>(conn)
                    .map_err(map_diesel_error)?;
                for row in found {
                    let sample = row.into_sample()?;
                    documents.insert(sample.id.value(), sample);
                }
            }

            Ok(OutboxBatch {
                horizon,
                rows,
                documents,
            })
        })
        .await
        .map_err(|e| e.with_operation("poll_changes"))
    }

    /// Delete outbox rows older than the retention window.
    async fn prune_outbox(&self) -> RepositoryResult<usize> {
        let retention_secs = self.config.feed_retention_secs.min(MAX_RETENTION_SECS) as i64;
        let retention = chrono::Duration::seconds(retention_secs);
        self.with_conn(move |conn| {
            let cutoff = Utc::now() - retention;
            diesel::delete(
                heart_rate_changes::table.filter(heart_rate_changes::recorded_at.lt(cutoff)),
            )
            .execute(conn)
            .map_err(map_diesel_error)
        })
        .await
        .map_err(|e| e.with_operation("prune_outbox"))
    }
}

fn snapshot_horizon(conn: &mut PgConnection) -> RepositoryResult<i64> {
    sql_query("SELECT pg_snapshot_xmin(pg_current_snapshot())::text::bigint AS xmin")
        .get_result::<SnapshotHorizon>(conn)
        .map(|h| h.xmin)
        .map_err(map_diesel_error)
}

fn map_diesel_error(err: diesel::result::Error) -> RepositoryError {
    RepositoryError::from(err)
}

fn owner_column_value(owner: Option<&Scope>) -> Option<String> {
    owner.map(|o| o.as_str().to_string())
}

#[async_trait]
impl SampleRepository for PostgresRepository {
    async fn insert_sample(&self, sample: &NewSample) -> RepositoryResult<Sample> {
        let row = NewSampleRow::from_sample(sample)?;
        self.with_conn(move |conn| {
            diesel::insert_into(heart_rate_samples::table)
                .values(&row)
                .returning(SampleRow::as_returning())
                .get_result::<SampleRow>(conn)
                .map_err(map_diesel_error)?
                .into_sample()
        })
        .await
    }

    async fn update_sample(
        &self,
        id: SampleId,
        heart_rate: HeartRate,
    ) -> RepositoryResult<Option<Sample>> {
        let (max_bpm, avg_bpm, min_bpm) = heart_rate_to_row(&heart_rate)?;
        self.with_conn(move |conn| {
            let updated = diesel::update(
                heart_rate_samples::table.filter(heart_rate_samples::sample_id.eq(id.value())),
            )
            .set((
                heart_rate_samples::max_bpm.eq(max_bpm),
                heart_rate_samples::avg_bpm.eq(avg_bpm),
                heart_rate_samples::min_bpm.eq(min_bpm),
            ))
            .returning(SampleRow::as_returning())
            .get_result::<SampleRow>(conn)
            .optional()
            .map_err(map_diesel_error)?;

            updated.map(SampleRow::into_sample).transpose()
        })
        .await
    }

    async fn delete_sample(&self, id: SampleId) -> RepositoryResult<bool> {
        self.with_conn(move |conn| {
            let deleted = diesel::delete(
                heart_rate_samples::table.filter(heart_rate_samples::sample_id.eq(id.value())),
            )
            .execute(conn)
            .map_err(map_diesel_error)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn get_sample(&self, id: SampleId) -> RepositoryResult<Option<Sample>> {
        self.with_conn(move |conn| {
            heart_rate_samples::table
                .filter(heart_rate_samples::sample_id.eq(id.value()))
                .select(SampleRow::as_select())
                .first::<SampleRow>(conn)
                .optional()
                .map_err(map_diesel_error)?
                .map(SampleRow::into_sample)
                .transpose()
        })
        .await
    }

    async fn find_latest(&self, owner: Option<&Scope>) -> RepositoryResult<Option<Sample>> {
        let owner = owner_column_value(owner);
        self.with_conn(move |conn| {
            let mut query = heart_rate_samples::table
                .select(SampleRow::as_select())
                .order((
                    heart_rate_samples::created_at.desc(),
                    heart_rate_samples::sample_id.desc(),
                ))
                .into_boxed();
            if let Some(ref owner) = owner {
                query = query.filter(heart_rate_samples::heartify_id.eq(owner));
            }
            query
                .first::<SampleRow>(conn)
                .optional()
                .map_err(map_diesel_error)?
                .map(SampleRow::into_sample)
                .transpose()
        })
        .await
    }

    async fn query_samples(
        &self,
        owner: Option<&Scope>,
        window: &TimeWindow,
    ) -> RepositoryResult<Vec<Sample>> {
        let owner = owner_column_value(owner);
        let window = *window;
        self.with_conn(move |conn| {
            let mut query = heart_rate_samples::table
                .select(SampleRow::as_select())
                .filter(heart_rate_samples::created_at.ge(window.start))
                .order((
                    heart_rate_samples::created_at.asc(),
                    heart_rate_samples::sample_id.asc(),
                ))
                .into_boxed();
            query = if window.end_inclusive {
                query.filter(heart_rate_samples::created_at.le(window.end))
            } else {
                query.filter(heart_rate_samples::created_at.lt(window.end))
            };
            if let Some(ref owner) = owner {
                query = query.filter(heart_rate_samples::heartify_id.eq(owner));
            }
            query
                .load::<SampleRow>(conn)
                .map_err(map_diesel_error)?
                .into_iter()
                .map(SampleRow::into_sample)
                .collect()
        })
        .await
    }

    async fn health_check(&self) -> RepositoryResult<bool> {
        self.with_conn(|conn| {
            sql_query("SELECT 1")
                .execute(conn)
                .map(|_| true)
                .map_err(map_diesel_error)
        })
        .await
    }
}

#[async_trait]
impl ChangeFeed for PostgresRepository {
    async fn subscribe(&self) -> RepositoryResult<ChangeStream> {
        let mut cursor = self.feed_start().await?;
        let repo = self.clone();
        let poll_interval = Duration::from_millis(self.config.feed_poll_interval_ms.max(1));
        let prune_interval = self.config.prune_interval();
        log::debug!("Change feed tailing outbox from {:?}", cursor);

        let stream = async_stream::stream! {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_prune = Instant::now();
            loop {
                ticker.tick().await;
                match repo.poll_changes(cursor).await {
                    Ok(OutboxBatch { horizon, rows, documents }) => {
                        for row in cursor.take_settled(rows, horizon, ChangeRow::outbox_key) {
                            let document = if row.operation_type == RawChange::DELETE {
                                None
                            } else {
                                documents.get(&row.sample_id).cloned()
                            };
                            yield Ok(row.into_raw_change(document));
                        }
                    }
                    Err(e) => {
                        yield Err(RepositoryError::feed_lost(
                            e.to_string(),
                            ErrorContext::new("poll_changes")
                                .with_details(format!("cursor={:?}", cursor)),
                        ));
                        break;
                    }
                }

                if last_prune.elapsed() >= prune_interval {
                    last_prune = Instant::now();
                    match repo.prune_outbox().await {
                        Ok(0) => {}
                        Ok(n) => log::debug!("Pruned {} outbox rows", n),
                        Err(e) => log::warn!("Outbox pruning failed: {}", e),
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
