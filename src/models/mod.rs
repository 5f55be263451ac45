//! Data models for audiocrawl.

mod batch;
mod placement;
mod record;
mod resource;
mod run_log;

pub use batch::RecordBatch;
pub use placement::{RagContent, RagDocument, RagFile, RagSearch, RagSource, StoragePlacement};
pub use record::{ContentMetadata, ContentRecord, RetrievedAsset};
pub use resource::ResourceRef;
pub use run_log::{RunLog, RunSummary, UploadLogEntry};
