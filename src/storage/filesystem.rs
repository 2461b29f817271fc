use super::types::{
    BlobMetadata, BlobStorage, ByteRange, ByteStream, DEFAULT_MANIFEST_CONTENT_TYPE,
    ManifestData, ManifestStorage,
};
use super::compute_digest;
use crate::error::{StationError, StationResult};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

const META_SUFFIX: &str = ".meta.json";

/// Sidecar stored next to each manifest body.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestMeta {
    digest: String,
    content_type: String,
    size: u64,
    created_at: DateTime<Utc>,
}

/// A blob file as seen by the eviction sweep.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub digest: String,
    pub path: PathBuf,
    pub size: u64,
    pub last_accessed: SystemTime,
}

/// Durable storage on the local filesystem.
///
/// ```text
/// <base>/blobs/sha256/<first 2 hex>/<hex>
/// <base>/manifests/<repository>/<reference>.json      (+ .meta.json)
/// <base>/temp/downloads/<uuid>                        (in-flight writes)
/// ```
///
/// Writes land in the temp directory first and are renamed into place, so a
/// reader never observes a partial blob.
pub struct FilesystemStorage {
    base: PathBuf,
    chunk_size: usize,
}

impl FilesystemStorage {
    pub async fn open(base: impl Into<PathBuf>, chunk_size: usize) -> StationResult<Self> {
        let storage = Self {
            base: base.into(),
            chunk_size: chunk_size.max(1),
        };

        for dir in [
            storage.blobs_root(),
            storage.manifests_root(),
            storage.temp_root(),
        ] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| StationError::storage(format!("creating {}", dir.display()), e))?;
        }

        tracing::info!("Initialized storage at {}", storage.base.display());
        Ok(storage)
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    fn blobs_root(&self) -> PathBuf {
        self.base.join("blobs")
    }

    fn manifests_root(&self) -> PathBuf {
        self.base.join("manifests")
    }

    pub(crate) fn temp_root(&self) -> PathBuf {
        self.base.join("temp").join("downloads")
    }

    fn blob_path(&self, digest: &str) -> StationResult<PathBuf> {
        let (algorithm, hash) = digest
            .split_once(':')
            .ok_or_else(|| StationError::InvalidReference(format!("digest {}", digest)))?;

        let valid = !algorithm.is_empty()
            && algorithm.chars().all(|c| c.is_ascii_alphanumeric())
            && hash.len() >= 2
            && hash.chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(StationError::InvalidReference(format!("digest {}", digest)));
        }

        Ok(self
            .blobs_root()
            .join(algorithm)
            .join(&hash[..2])
            .join(hash))
    }

    fn manifest_path(&self, repository: &str, reference: &str) -> StationResult<PathBuf> {
        let mut path = self.manifests_root();
        for segment in repository.split('/') {
            let valid = !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
            if !valid {
                return Err(StationError::InvalidReference(format!(
                    "repository {}",
                    repository
                )));
            }
            path.push(segment);
        }

        if reference.is_empty() {
            return Err(StationError::InvalidReference("empty reference".into()));
        }
        path.push(format!("{}.json", sanitize(reference)));
        Ok(path)
    }

    fn temp_path(&self) -> PathBuf {
        self.temp_root().join(uuid::Uuid::new_v4().to_string())
    }

    async fn ensure_parent(path: &Path) -> StationResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StationError::storage(format!("creating {}", parent.display()), e))?;
        }
        Ok(())
    }

    /// Streams `data` into a temp file, returning the file path, byte count
    /// and computed digest.
    async fn write_temp(&self, mut data: ByteStream) -> StationResult<(PathBuf, u64, String)> {
        let temp = self.temp_path();
        let mut file = fs::File::create(&temp)
            .await
            .map_err(|e| StationError::storage("creating temp file", e))?;

        let mut hasher = Sha256::new();
        let mut written = 0u64;

        let result: StationResult<()> = async {
            while let Some(chunk) = data.next().await {
                let chunk = chunk.map_err(|e| StationError::storage("receiving blob data", e))?;
                hasher.update(&chunk);
                file.write_all(&chunk)
                    .await
                    .map_err(|e| StationError::storage("writing temp file", e))?;
                written += chunk.len() as u64;
            }
            file.flush()
                .await
                .map_err(|e| StationError::storage("flushing temp file", e))?;
            file.sync_all()
                .await
                .map_err(|e| StationError::storage("syncing temp file", e))
        }
        .await;

        drop(file);

        if let Err(e) = result {
            remove_quietly(&temp).await;
            return Err(e);
        }

        Ok((temp, written, format!("sha256:{}", hex::encode(hasher.finalize()))))
    }

    async fn commit(temp: &Path, target: &Path) -> StationResult<()> {
        if let Err(e) = Self::ensure_parent(target).await {
            remove_quietly(temp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(temp, target).await {
            remove_quietly(temp).await;
            return Err(StationError::storage(
                format!("moving into {}", target.display()),
                e,
            ));
        }
        Ok(())
    }

    /// Every stored blob with its size and last access time.
    pub async fn list_blobs(&self) -> StationResult<Vec<StoredBlob>> {
        let root = self.blobs_root();
        let files = tokio::task::spawn_blocking(move || walk_files(&root))
            .await
            .map_err(|e| StationError::storage("listing blobs", std::io::Error::other(e)))?
            .map_err(|e| StationError::storage("listing blobs", e))?;

        Ok(files
            .into_iter()
            .filter_map(|(path, meta)| {
                let hash = path.file_name()?.to_str()?.to_string();
                let algorithm = path.parent()?.parent()?.file_name()?.to_str()?.to_string();
                let last_accessed = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                Some(StoredBlob {
                    digest: format!("{}:{}", algorithm, hash),
                    path,
                    size: meta.len(),
                    last_accessed,
                })
            })
            .collect())
    }

    /// Removes in-flight download files untouched for longer than `max_age`.
    pub async fn remove_stale_temp_files(&self, max_age: Duration) -> StationResult<usize> {
        let root = self.temp_root();
        let files = tokio::task::spawn_blocking(move || walk_files(&root))
            .await
            .map_err(|e| StationError::storage("listing temp files", std::io::Error::other(e)))?
            .map_err(|e| StationError::storage("listing temp files", e))?;

        let now = SystemTime::now();
        let mut removed = 0;
        for (path, meta) in files {
            let stale = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > max_age);
            if !stale {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::debug!("Deleted orphaned temp file {}", path.display());
                    removed += 1;
                }
                Err(e) => tracing::warn!("Failed to delete temp file {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl BlobStorage for FilesystemStorage {
    async fn save_blob(&self, digest: &str, data: ByteStream) -> StationResult<BlobMetadata> {
        let target = self.blob_path(digest)?;
        // Only sha256 content can be verified before it is committed.
        if !digest.starts_with("sha256:") {
            return Err(StationError::InvalidReference(format!(
                "unsupported digest algorithm: {}",
                digest
            )));
        }
        let (temp, size, actual) = self.write_temp(data).await?;

        if actual != digest {
            remove_quietly(&temp).await;
            return Err(StationError::DigestMismatch {
                expected: digest.to_string(),
                actual,
            });
        }

        Self::commit(&temp, &target).await?;
        tracing::info!("Saved blob {} ({} bytes)", digest, size);

        let now = Utc::now();
        Ok(BlobMetadata {
            digest: digest.to_string(),
            size,
            created_at: now,
            last_accessed_at: now,
        })
    }

    async fn get_blob(&self, digest: &str, range: Option<ByteRange>) -> StationResult<ByteStream> {
        let path = self.blob_path(digest)?;
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StationError::NotFound(format!("blob {}", digest)));
            }
            Err(e) => return Err(StationError::storage(format!("opening blob {}", digest), e)),
        };

        let size = file
            .metadata()
            .await
            .map_err(|e| StationError::storage(format!("stat blob {}", digest), e))?
            .len();

        let range = range.unwrap_or_default();
        let offset = range.offset.min(size);
        let remaining = range
            .length
            .map_or(size - offset, |length| length.min(size - offset));

        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| StationError::storage(format!("seeking blob {}", digest), e))?;
        }

        touch(path);
        tracing::debug!(
            "Reading blob {} (offset={}, length={})",
            digest,
            offset,
            remaining
        );

        let chunk_size = self.chunk_size;
        let stream = futures::stream::try_unfold((file, remaining), move |(file, remaining)| {
            read_chunk(file, remaining, chunk_size)
        });

        Ok(stream.boxed())
    }

    async fn blob_exists(&self, digest: &str) -> StationResult<bool> {
        let path = self.blob_path(digest)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| StationError::storage(format!("checking blob {}", digest), e))
    }

    async fn blob_metadata(&self, digest: &str) -> StationResult<BlobMetadata> {
        let path = self.blob_path(digest)?;
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StationError::NotFound(format!("blob {}", digest)));
            }
            Err(e) => return Err(StationError::storage(format!("stat blob {}", digest), e)),
        };

        let created_at: DateTime<Utc> = meta.modified().map(Into::into).unwrap_or_else(|_| Utc::now());
        let last_accessed_at: DateTime<Utc> =
            meta.accessed().map(Into::into).unwrap_or(created_at);

        Ok(BlobMetadata {
            digest: digest.to_string(),
            size: meta.len(),
            created_at,
            last_accessed_at,
        })
    }

    async fn delete_blob(&self, digest: &str) -> StationResult<bool> {
        let path = self.blob_path(digest)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Deleted blob {}", digest);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StationError::storage(format!("deleting blob {}", digest), e)),
        }
    }

    async fn total_size(&self) -> StationResult<u64> {
        Ok(self.list_blobs().await?.iter().map(|b| b.size).sum())
    }
}

#[async_trait]
impl ManifestStorage for FilesystemStorage {
    async fn save_manifest(&self, manifest: &ManifestData) -> StationResult<()> {
        let target = self.manifest_path(&manifest.repository, &manifest.reference)?;
        let sidecar = sidecar_path(&target);

        let body = manifest.content.clone();
        let (temp, size, _) = self
            .write_temp(futures::stream::once(async move { Ok::<_, std::io::Error>(body) }).boxed())
            .await?;
        Self::commit(&temp, &target).await?;

        let meta = ManifestMeta {
            digest: manifest.digest.clone(),
            content_type: manifest.content_type.clone(),
            size,
            created_at: Utc::now(),
        };
        fs::write(&sidecar, serde_json::to_vec(&meta)?)
            .await
            .map_err(|e| StationError::storage(format!("writing {}", sidecar.display()), e))?;

        tracing::info!(
            "Saved manifest {}:{} ({} bytes)",
            manifest.repository,
            manifest.reference,
            size
        );
        Ok(())
    }

    async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> StationResult<Option<ManifestData>> {
        let path = self.manifest_path(repository, reference)?;
        let content = match fs::read(&path).await {
            Ok(content) => Bytes::from(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("Manifest not found on disk: {}:{}", repository, reference);
                return Ok(None);
            }
            Err(e) => {
                return Err(StationError::storage(
                    format!("reading manifest {}:{}", repository, reference),
                    e,
                ));
            }
        };

        let meta = match fs::read(sidecar_path(&path)).await {
            Ok(raw) => serde_json::from_slice::<ManifestMeta>(&raw).ok(),
            Err(_) => None,
        };
        let (digest, content_type) = match meta {
            Some(meta) => (meta.digest, meta.content_type),
            None => (
                compute_digest(&content),
                DEFAULT_MANIFEST_CONTENT_TYPE.to_string(),
            ),
        };

        Ok(Some(ManifestData {
            repository: repository.to_string(),
            reference: reference.to_string(),
            digest,
            content_type,
            content,
        }))
    }

    async fn manifest_exists(&self, repository: &str, reference: &str) -> StationResult<bool> {
        let path = self.manifest_path(repository, reference)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| StationError::storage("checking manifest", e))
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> StationResult<bool> {
        let path = self.manifest_path(repository, reference)?;
        remove_quietly(&sidecar_path(&path)).await;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Deleted manifest {}:{}", repository, reference);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StationError::storage("deleting manifest", e)),
        }
    }

    async fn manifest_count(&self) -> StationResult<u64> {
        let root = self.manifests_root();
        let files = tokio::task::spawn_blocking(move || walk_files(&root))
            .await
            .map_err(|e| StationError::storage("counting manifests", std::io::Error::other(e)))?
            .map_err(|e| StationError::storage("counting manifests", e))?;

        Ok(files
            .iter()
            .filter_map(|(path, _)| path.file_name()?.to_str())
            .filter(|name| name.ends_with(".json") && !name.ends_with(META_SUFFIX))
            .count() as u64)
    }
}

fn sanitize(reference: &str) -> String {
    reference
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn sidecar_path(manifest: &Path) -> PathBuf {
    let mut name = manifest
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    name.push(META_SUFFIX);
    manifest.with_file_name(name)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!("Failed to clean up {}: {}", path.display(), e);
        }
    }
}

async fn read_chunk(
    mut file: fs::File,
    remaining: u64,
    chunk_size: usize,
) -> std::io::Result<Option<(Bytes, (fs::File, u64))>> {
    if remaining == 0 {
        return Ok(None);
    }
    let want = remaining.min(chunk_size as u64) as usize;
    let mut buf = vec![0u8; want];
    let n = file.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some((Bytes::from(buf), (file, remaining - n as u64))))
}

/// Records a read so the eviction sweep sees the blob as recently used.
fn touch(path: PathBuf) {
    tokio::task::spawn_blocking(move || {
        let times = std::fs::FileTimes::new().set_accessed(SystemTime::now());
        if let Err(e) = std::fs::File::options()
            .write(true)
            .open(&path)
            .and_then(|f| f.set_times(times))
        {
            tracing::debug!("Could not update access time of {}: {}", path.display(), e);
        }
    });
}

fn walk_files(root: &Path) -> std::io::Result<Vec<(PathBuf, std::fs::Metadata)>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                files.push((entry.path(), meta));
            }
        }
    }

    Ok(files)
}
