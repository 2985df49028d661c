use crate::error::ReelError;
use crate::ledger::Ledger;
use crate::object_store::{ObjectStore, Payload};
use crate::resolver::{ResolvedReel, Resolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

/// Knobs for the store-and-record steps
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Records older than this many days are pruned after each insert
    pub retention_days: u32,
    /// Where synchronous downloads are staged before upload
    pub temp_dir: PathBuf,
}

/// Result of storing one reel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReel {
    /// Signed retrieval URL
    pub url: String,
    /// False when the ledger already held this URL
    pub inserted: bool,
}

/// Resolve → download → upload → record
pub struct ReelPipeline {
    resolver: Resolver,
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn Ledger>,
    settings: PipelineSettings,
}

impl ReelPipeline {
    pub fn new(
        resolver: Resolver,
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn Ledger>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            resolver,
            store,
            ledger,
            settings,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Validate the URL and find the reel's video
    pub async fn resolve(&self, reel_url: &str) -> Result<ResolvedReel, ReelError> {
        self.resolver.resolve(reel_url).await
    }

    /// Store a reel while the caller waits.
    ///
    /// The video is staged in `temp_dir`, uploaded from disk and the staged
    /// file removed before the record is written.
    #[instrument(skip(self, reel), fields(shortcode = %reel.shortcode))]
    pub async fn store_now(&self, reel: &ResolvedReel) -> Result<StoredReel, ReelError> {
        let bytes = self.resolver.download(reel).await?;

        tokio::fs::create_dir_all(&self.settings.temp_dir).await?;
        // Unique per request; the same reel may be submitted concurrently
        let path = self
            .settings
            .temp_dir
            .join(format!("{}-{}", Uuid::new_v4(), reel.object_key()));
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            remove_staged(&path).await;
            return Err(e.into());
        }

        let uploaded = self.upload(Payload::File(path.clone()), reel).await;
        remove_staged(&path).await;
        let url = uploaded?;

        let inserted = self.ledger.save(&reel.shortcode, &url).await?;
        self.after_record(inserted).await;

        Ok(StoredReel { url, inserted })
    }

    /// Store a reel for a pending ledger record and settle the record.
    ///
    /// Failures are written to the record as well as returned.
    #[instrument(skip(self, reel), fields(shortcode = %reel.shortcode))]
    pub async fn store_tracked(
        &self,
        id: Uuid,
        reel: &ResolvedReel,
    ) -> Result<StoredReel, ReelError> {
        let result = async {
            let bytes = self.resolver.download(reel).await?;
            let url = self.upload(Payload::Bytes(bytes), reel).await?;
            let inserted = self.ledger.complete(id, &url).await?;
            Ok::<_, ReelError>(StoredReel { url, inserted })
        }
        .await;

        match &result {
            Ok(stored) => self.after_record(stored.inserted).await,
            Err(e) => {
                metrics::counter!("webhook.reels.failed", "kind" => e.kind()).increment(1);
                if let Err(mark_err) = self.ledger.fail(id, &e.to_string()).await {
                    warn!(error = %mark_err, id = %id, "Failed to mark reel as failed");
                }
            }
        }

        result
    }

    async fn upload(&self, payload: Payload, reel: &ResolvedReel) -> Result<String, ReelError> {
        let started = Instant::now();
        let url = self.store.upload(payload, &reel.object_key()).await?;
        metrics::histogram!("webhook.upload.duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(url)
    }

    /// Bookkeeping after a ledger write; pruning problems never fail the request
    async fn after_record(&self, inserted: bool) {
        if !inserted {
            metrics::counter!("webhook.reels.duplicate").increment(1);
            return;
        }

        metrics::counter!("webhook.reels.saved").increment(1);

        match self.ledger.prune(self.settings.retention_days).await {
            Ok(removed) => {
                metrics::counter!("webhook.reels.pruned").increment(removed);
            }
            Err(e) => warn!(error = %e, "Failed to prune old reels"),
        }
    }
}

async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, path = %path.display(), "Failed to remove staged file"),
    }
}

/// Background upload pool with a fixed number of concurrent workers
pub struct UploadQueue {
    pipeline: Arc<ReelPipeline>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl UploadQueue {
    pub fn new(pipeline: Arc<ReelPipeline>, workers: usize) -> Self {
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(workers)),
            tracker: TaskTracker::new(),
        }
    }

    /// Open a pending record and schedule the upload. Returns the record id.
    pub async fn submit(&self, reel: ResolvedReel) -> Result<Uuid, ReelError> {
        let id = self.pipeline.ledger().open(&reel.shortcode).await?;

        let pipeline = self.pipeline.clone();
        let permits = self.permits.clone();
        let span = info_span!("upload", shortcode = %reel.shortcode, id = %id);

        self.tracker.spawn(
            async move {
                // Acquire semaphore permit to limit concurrency
                let Ok(_permit) = permits.acquire_owned().await else {
                    warn!("Upload pool closed, dropping job");
                    return;
                };

                match pipeline.store_tracked(id, &reel).await {
                    Ok(stored) => info!(inserted = stored.inserted, "Reel stored"),
                    Err(e) => error!(error = %e, kind = e.kind(), "Background upload failed"),
                }
            }
            .instrument(span),
        );

        Ok(id)
    }

    /// Number of uploads queued or running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait for every queued upload to finish
    pub async fn drain(&self) {
        self.tracker.close();
        info!(in_flight = self.tracker.len(), "Draining upload queue");
        self.tracker.wait().await;
    }
}
