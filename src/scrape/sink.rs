//! Destinations for merged records.
//!
//! The batch coordinator hands every successfully merged record to a
//! [`RecordSink`] once the item's result has been delivered. The NFO writer
//! of a media library plugs in here; this crate ships a JSON directory sink
//! and an in-memory sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use reelscrape_common::MergedRecord;
use tracing::debug;

use super::item::MediaItem;

/// Receives merged records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist the record of `item`.
    async fn write(&self, item: &MediaItem, record: &MergedRecord) -> reelscrape_common::Result<()>;
}

/// Writes one pretty-printed JSON file per item into a directory.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    /// A sink writing into `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file written for `item`.
    pub fn path_for(&self, item: &MediaItem) -> PathBuf {
        self.dir.join(format!("{}-{}.json", item.kind, item.id))
    }
}

#[async_trait]
impl RecordSink for JsonDirSink {
    async fn write(&self, item: &MediaItem, record: &MergedRecord) -> reelscrape_common::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(item);
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, json).await?;
        debug!(item_id = %item.id, path = %path.display(), "Wrote record");
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<MergedRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every record received so far.
    pub fn records(&self) -> Vec<MergedRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write(&self, _item: &MediaItem, record: &MergedRecord) -> reelscrape_common::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
