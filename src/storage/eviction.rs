use super::filesystem::FilesystemStorage;
use crate::cache::{CacheKey, TierCache};
use crate::config::EvictionConfig;
use crate::error::StationResult;

use std::sync::Arc;
use std::time::Duration;

/// Temp downloads older than this are assumed abandoned.
pub const ORPHAN_MAX_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    pub used_bytes: u64,
    pub freed_bytes: u64,
    pub evicted_blobs: usize,
    pub orphans_removed: usize,
}

/// Keeps disk usage under `threshold_percent` of the configured capacity by
/// deleting the least recently read blobs.
pub struct EvictionSweeper {
    storage: Arc<FilesystemStorage>,
    cache: Option<Arc<TierCache>>,
    capacity_bytes: u64,
    threshold_percent: u8,
}

impl EvictionSweeper {
    pub fn new(storage: Arc<FilesystemStorage>, config: &EvictionConfig) -> Self {
        Self {
            storage,
            cache: None,
            capacity_bytes: config.capacity_bytes,
            threshold_percent: config.threshold_percent,
        }
    }

    /// Evicted blobs are also dropped from the tier cache.
    pub fn with_cache(mut self, cache: Arc<TierCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn threshold_bytes(&self) -> u64 {
        (self.capacity_bytes as u128 * self.threshold_percent as u128 / 100) as u64
    }

    pub async fn sweep(&self) -> StationResult<EvictionReport> {
        let mut report = EvictionReport {
            orphans_removed: self.storage.remove_stale_temp_files(ORPHAN_MAX_AGE).await?,
            ..Default::default()
        };
        if report.orphans_removed > 0 {
            tracing::info!("Removed {} orphaned temp files", report.orphans_removed);
        }

        let mut blobs = self.storage.list_blobs().await?;
        report.used_bytes = blobs.iter().map(|b| b.size).sum();

        let threshold = self.threshold_bytes();
        tracing::debug!(
            "Storage usage {} / {} bytes (threshold {})",
            report.used_bytes,
            self.capacity_bytes,
            threshold
        );
        if report.used_bytes <= threshold {
            return Ok(report);
        }

        let to_free = report.used_bytes - threshold;
        tracing::warn!(
            "Storage usage {} bytes exceeds threshold {} bytes, evicting",
            report.used_bytes,
            threshold
        );

        blobs.sort_by_key(|b| b.last_accessed);
        for blob in blobs {
            if report.freed_bytes >= to_free {
                break;
            }
            match tokio::fs::remove_file(&blob.path).await {
                Ok(()) => {
                    report.freed_bytes += blob.size;
                    report.evicted_blobs += 1;
                    tracing::debug!("Evicted blob {} ({} bytes)", blob.digest, blob.size);
                    if let Some(cache) = &self.cache {
                        cache.evict(&CacheKey::blob(&blob.digest)).await;
                    }
                }
                Err(e) => tracing::warn!("Failed to evict blob {}: {}", blob.digest, e),
            }
        }

        tracing::info!(
            "Eviction completed: freed {} bytes by evicting {} blobs",
            report.freed_bytes,
            report.evicted_blobs
        );
        Ok(report)
    }
}
