use crate::config::DatabaseConfig;
use crate::error::ReelError;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Display format of `created_at` in listings, e.g. `07:45 PM 19-10-2026`
pub const CREATED_AT_FORMAT: &str = "%I:%M %p %d-%m-%Y";

/// Listings are rendered in India Standard Time (UTC+05:30)
const DISPLAY_OFFSET_SECS: i64 = 5 * 3600 + 30 * 60;

/// Default retention for [`Ledger::prune`]
pub const DEFAULT_RETENTION_DAYS: u32 = 6;

/// Processing state of a reel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReelStatus {
    /// Accepted, upload still running
    Pending,
    /// Stored and retrievable through `video_url`
    Complete,
    /// Upload or persistence failed; see `error`
    Failed,
}

impl ReelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReelStatus::Pending => "pending",
            ReelStatus::Complete => "complete",
            ReelStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ReelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReelStatus {
    type Err = ReelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReelStatus::Pending),
            "complete" => Ok(ReelStatus::Complete),
            "failed" => Ok(ReelStatus::Failed),
            other => Err(ReelError::PersistenceFailed(format!(
                "unknown reel status '{other}'"
            ))),
        }
    }
}

/// Persisted reel record
#[derive(Debug, Clone, PartialEq)]
pub struct ReelRecord {
    pub id: Uuid,
    pub shortcode: String,
    /// Signed retrieval URL; the natural uniqueness key. `None` while pending.
    pub video_url: Option<String>,
    pub status: ReelStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Record as returned by `GET /reels`
#[derive(Debug, Clone, Serialize)]
pub struct ReelListing {
    #[serde(rename = "_id")]
    pub id: String,
    pub shortcode: String,
    pub url: Option<String>,
    pub status: ReelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
}

impl From<ReelRecord> for ReelListing {
    fn from(r: ReelRecord) -> Self {
        Self {
            id: r.id.to_string(),
            shortcode: r.shortcode,
            url: r.video_url,
            status: r.status,
            error: r.error,
            created_at: format_created_at(r.created_at),
        }
    }
}

/// Render a creation instant the way listings show it
pub fn format_created_at(at: DateTime<Utc>) -> String {
    let local = at.naive_utc() + ChronoDuration::seconds(DISPLAY_OFFSET_SECS);
    local.format(CREATED_AT_FORMAT).to_string()
}

/// Instant before which records are considered expired
pub fn retention_cutoff(now: DateTime<Utc>, max_age_days: u32) -> DateTime<Utc> {
    now - ChronoDuration::days(i64::from(max_age_days))
}

/// Persistent collection of reel records.
///
/// Uniqueness of `video_url` is a read-then-write check, not an index, so two
/// concurrent saves of the same URL can both insert.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert a completed record unless one with the same URL exists.
    /// Returns whether a record was inserted.
    async fn save(&self, shortcode: &str, url: &str) -> Result<bool, ReelError>;

    /// Insert a pending record for a reel whose upload has not finished
    async fn open(&self, shortcode: &str) -> Result<Uuid, ReelError>;

    /// Settle a pending record with its URL. If another record already holds
    /// the URL the pending record is dropped and `false` is returned.
    async fn complete(&self, id: Uuid, url: &str) -> Result<bool, ReelError>;

    /// Settle a pending record as failed
    async fn fail(&self, id: Uuid, reason: &str) -> Result<(), ReelError>;

    /// All records, oldest first
    async fn list(&self) -> Result<Vec<ReelRecord>, ReelError>;

    /// Remove every record created strictly before `cutoff`
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ReelError>;

    /// Cheap reachability probe
    async fn ping(&self) -> Result<(), ReelError>;

    /// Remove records older than `max_age_days`; returns how many were removed
    async fn prune(&self, max_age_days: u32) -> Result<u64, ReelError> {
        self.prune_before(retention_cutoff(Utc::now(), max_age_days))
            .await
    }
}

#[derive(Debug, FromRow)]
struct ReelRow {
    id: Uuid,
    shortcode: String,
    video_url: Option<String>,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReelRow> for ReelRecord {
    type Error = ReelError;

    fn try_from(row: ReelRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            shortcode: row.shortcode,
            video_url: row.video_url,
            status: row.status.parse()?,
            error: row.error,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL-backed ledger
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Create a new ledger with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    async fn url_taken(&self, url: &str, except: Option<Uuid>) -> Result<bool, ReelError> {
        let existing: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM reels
            WHERE video_url = $1
              AND ($2::uuid IS NULL OR id <> $2)
            LIMIT 1
            "#,
        )
        .bind(url)
        .bind(except)
        .fetch_optional(&self.pool)
        .await?;

        Ok(existing.is_some())
    }
}

#[async_trait]
impl Ledger for PgLedger {
    #[instrument(skip(self, url))]
    async fn save(&self, shortcode: &str, url: &str) -> Result<bool, ReelError> {
        if self.url_taken(url, None).await? {
            info!(shortcode = %shortcode, "URL already recorded, skipping insert");
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO reels (id, shortcode, video_url, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(shortcode)
        .bind(url)
        .bind(ReelStatus::Complete.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!(shortcode = %shortcode, "Reel record saved");
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn open(&self, shortcode: &str) -> Result<Uuid, ReelError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO reels (id, shortcode, status, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(shortcode)
        .bind(ReelStatus::Pending.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(id = %id, "Pending reel record opened");
        Ok(id)
    }

    #[instrument(skip(self, url))]
    async fn complete(&self, id: Uuid, url: &str) -> Result<bool, ReelError> {
        if self.url_taken(url, Some(id)).await? {
            sqlx::query("DELETE FROM reels WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            info!(id = %id, "URL already recorded, dropping pending record");
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE reels
            SET video_url = $2, status = $3, error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(url)
        .bind(ReelStatus::Complete.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ReelError::PersistenceFailed(format!(
                "reel record {id} no longer exists"
            )));
        }

        Ok(true)
    }

    #[instrument(skip(self))]
    async fn fail(&self, id: Uuid, reason: &str) -> Result<(), ReelError> {
        sqlx::query("UPDATE reels SET status = $2, error = $3 WHERE id = $1")
            .bind(id)
            .bind(ReelStatus::Failed.as_str())
            .bind(reason)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ReelRecord>, ReelError> {
        let rows = sqlx::query_as::<_, ReelRow>(
            r#"
            SELECT id, shortcode, video_url, status, error, created_at
            FROM reels
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ReelRecord::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ReelError> {
        let result = sqlx::query("DELETE FROM reels WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let count = result.rows_affected();
        info!(deleted_count = count, cutoff = %cutoff, "Pruned old reels");
        Ok(count)
    }

    async fn ping(&self) -> Result<(), ReelError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-process ledger, for local runs without a database
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<ReelRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn insert_record(&self, record: ReelRecord) {
        self.records.lock().push(record);
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn save(&self, shortcode: &str, url: &str) -> Result<bool, ReelError> {
        let mut records = self.records.lock();
        if records
            .iter()
            .any(|r| r.video_url.as_deref() == Some(url))
        {
            info!(shortcode = %shortcode, "URL already recorded, skipping insert");
            return Ok(false);
        }

        records.push(ReelRecord {
            id: Uuid::new_v4(),
            shortcode: shortcode.to_string(),
            video_url: Some(url.to_string()),
            status: ReelStatus::Complete,
            error: None,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn open(&self, shortcode: &str) -> Result<Uuid, ReelError> {
        let id = Uuid::new_v4();
        self.records.lock().push(ReelRecord {
            id,
            shortcode: shortcode.to_string(),
            video_url: None,
            status: ReelStatus::Pending,
            error: None,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn complete(&self, id: Uuid, url: &str) -> Result<bool, ReelError> {
        let mut records = self.records.lock();
        if records
            .iter()
            .any(|r| r.id != id && r.video_url.as_deref() == Some(url))
        {
            records.retain(|r| r.id != id);
            return Ok(false);
        }

        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| {
                ReelError::PersistenceFailed(format!("reel record {id} no longer exists"))
            })?;
        record.video_url = Some(url.to_string());
        record.status = ReelStatus::Complete;
        record.error = None;
        Ok(true)
    }

    async fn fail(&self, id: Uuid, reason: &str) -> Result<(), ReelError> {
        if let Some(record) = self.records.lock().iter_mut().find(|r| r.id == id) {
            record.status = ReelStatus::Failed;
            record.error = Some(reason.to_string());
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ReelRecord>, ReelError> {
        let mut records = self.records.lock().clone();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, ReelError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn ping(&self) -> Result<(), ReelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record_at(shortcode: &str, created_at: DateTime<Utc>) -> ReelRecord {
        ReelRecord {
            id: Uuid::new_v4(),
            shortcode: shortcode.to_string(),
            video_url: Some(format!("https://store.example/{shortcode}.mp4")),
            status: ReelStatus::Complete,
            error: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_save_is_idempotent_per_url() {
        let ledger = MemoryLedger::new();
        let url = "https://store.example/ABC123.mp4?sig=1";

        assert!(ledger.save("ABC123", url).await.unwrap());
        assert!(!ledger.save("ABC123", url).await.unwrap());

        let records = ledger.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ReelStatus::Complete);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_share_one_ledger() {
        let ledger = std::sync::Arc::new(MemoryLedger::new());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    let url = format!("https://store.example/R{}.mp4", i % 8);
                    ledger.save(&format!("R{}", i % 8), &url).await.unwrap()
                })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }

        // The lock is held across check and insert, so each URL lands once
        assert_eq!(inserted, 8);
        assert_eq!(ledger.list().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_listing_renames_url_field() {
        let ledger = MemoryLedger::new();
        let url = "https://store.example/ABC123.mp4?sig=1";
        ledger.save("ABC123", url).await.unwrap();

        let listing: Vec<ReelListing> = ledger
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(ReelListing::from)
            .collect();
        let json = serde_json::to_value(&listing).unwrap();
        let entry = json[0].as_object().unwrap();

        assert_eq!(entry["url"], url);
        assert!(entry.contains_key("_id"));
        assert!(entry.contains_key("created_at"));
        for internal in ["video_url", "r2_url", "retrievalUrl", "error"] {
            assert!(!entry.contains_key(internal), "{internal} leaked");
        }
    }

    #[tokio::test]
    async fn test_pending_then_complete() {
        let ledger = MemoryLedger::new();
        let id = ledger.open("ABC123").await.unwrap();

        let pending = ledger.list().await.unwrap();
        assert_eq!(pending[0].status, ReelStatus::Pending);
        assert_eq!(pending[0].video_url, None);

        assert!(ledger.complete(id, "https://store.example/a").await.unwrap());
        let done = ledger.list().await.unwrap();
        assert_eq!(done[0].status, ReelStatus::Complete);
        assert_eq!(done[0].video_url.as_deref(), Some("https://store.example/a"));
    }

    #[tokio::test]
    async fn test_complete_with_taken_url_drops_pending_record() {
        let ledger = MemoryLedger::new();
        ledger.save("ABC123", "https://store.example/a").await.unwrap();
        let id = ledger.open("ABC123").await.unwrap();

        assert!(!ledger.complete(id, "https://store.example/a").await.unwrap());
        assert_eq!(ledger.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_records_reason() {
        let ledger = MemoryLedger::new();
        let id = ledger.open("ABC123").await.unwrap();
        ledger.fail(id, "Upload failed: denied").await.unwrap();

        let record = &ledger.list().await.unwrap()[0];
        assert_eq!(record.status, ReelStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Upload failed: denied"));
    }

    #[tokio::test]
    async fn test_prune_is_chronological() {
        let ledger = MemoryLedger::new();
        let now = Utc.with_ymd_and_hms(2025, 1, 3, 1, 0, 0).unwrap();

        // Across a year boundary and with PM/AM mixes that sort wrongly as
        // "%I:%M %p %d-%m-%Y" strings.
        let at = |y, m, d, h| Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap();
        ledger.insert_record(record_at("old_pm", at(2024, 12, 27, 23)));
        ledger.insert_record(record_at("old_am", at(2024, 12, 20, 1)));
        ledger.insert_record(record_at("fresh_pm", at(2024, 12, 31, 23)));
        ledger.insert_record(record_at("fresh_am", at(2025, 1, 2, 1)));
        ledger.insert_record(record_at("edge", retention_cutoff(now, 6)));

        let removed = ledger.prune_before(retention_cutoff(now, 6)).await.unwrap();
        assert_eq!(removed, 2);

        let mut left: Vec<String> = ledger
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.shortcode)
            .collect();
        left.sort();
        assert_eq!(left, vec!["edge", "fresh_am", "fresh_pm"]);
    }

    #[tokio::test]
    async fn test_prune_with_default_retention() {
        let ledger = MemoryLedger::new();
        ledger.insert_record(record_at("stale", Utc::now() - ChronoDuration::days(7)));
        ledger.insert_record(record_at("recent", Utc::now() - ChronoDuration::days(5)));

        assert_eq!(ledger.prune(DEFAULT_RETENTION_DAYS).await.unwrap(), 1);
        assert_eq!(ledger.list().await.unwrap()[0].shortcode, "recent");
    }

    #[test]
    fn test_format_created_at_uses_ist() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap();
        assert_eq!(format_created_at(at), "07:30 PM 05-03-2024");
    }

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [ReelStatus::Pending, ReelStatus::Complete, ReelStatus::Failed] {
            assert_eq!(status.as_str().parse::<ReelStatus>().unwrap(), status);
        }
        assert!("archived".parse::<ReelStatus>().is_err());
    }
}
