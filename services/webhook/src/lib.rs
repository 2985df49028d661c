//! Reel Webhook Service
//!
//! HTTP webhook that takes an Instagram Reel URL, finds the reel's video,
//! copies it into S3-compatible object storage (Cloudflare R2) and records a
//! signed retrieval URL in a PostgreSQL ledger.
//!
//! ## Features
//!
//! - **Reel Resolution**: Shortcode extraction and a GraphQL lookup of the
//!   direct video URL
//! - **Object Storage**: Uploads keyed `{shortcode}.mp4`, handed back as
//!   presigned GET URLs
//! - **Reel Ledger**: One record per signed URL, idempotent saves and
//!   age-based pruning after each insert
//! - **Sync or Async Uploads**: Answer after the upload, or acknowledge at
//!   once and upload on a bounded worker pool
//!
//! ## Architecture
//!
//! ```text
//!  POST / {reel_url}                                    GET /reels
//!        │                                                  ▲
//!        ▼                                                  │
//! ┌──────────────┐   shortcode   ┌──────────────┐           │
//! │ Resolver     │──────────────▶│ Instagram    │           │
//! │              │◀──────────────│ GraphQL      │           │
//! └──────────────┘   video URL   └──────────────┘           │
//!        │                                                  │
//!        ▼                                                  │
//! ┌──────────────┐               ┌──────────────┐    ┌──────────────┐
//! │ Reel         │──────────────▶│ R2 Bucket    │    │ PostgreSQL   │
//! │ Pipeline     │  {code}.mp4   │              │    │ reels        │
//! └──────────────┘               └──────────────┘    └──────────────┘
//!        │             signed URL                           ▲
//!        └──────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod instagram;
pub mod ledger;
pub mod object_store;
pub mod pipeline;
pub mod resolver;

pub use api::{AppState, WebhookResponse};
pub use config::{Config, PipelineMode};
pub use error::ReelError;
pub use instagram::InstagramClient;
pub use ledger::{Ledger, MemoryLedger, PgLedger, ReelListing, ReelRecord, ReelStatus};
pub use object_store::{ObjectStore, Payload, R2Store};
pub use pipeline::{PipelineSettings, ReelPipeline, StoredReel, UploadQueue};
pub use resolver::{extract_shortcode, ReelSource, ResolvedReel, Resolver};
