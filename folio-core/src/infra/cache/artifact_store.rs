use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::eviction::{
    CacheBudget, CandidateEntry, EvictionReason, plan_evictions,
};
use crate::error::StoreError;
use crate::fingerprint::{Fingerprint, VersionSnapshot};

/// Root directory for the artifact store.
///
/// `cacache` manages the layout below it (index buckets + content blobs).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ArtifactCacheRoot(PathBuf);

impl ArtifactCacheRoot {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Debug for ArtifactCacheRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ArtifactCacheRoot").field(&self.0).finish()
    }
}

/// A rendered artifact together with the versions it was rendered from.
#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub fingerprint: Fingerprint,
    pub bytes: Vec<u8>,
    pub snapshot: VersionSnapshot,
    pub created_at: SystemTime,
}

/// JSON stored as the `cacache` entry metadata.
#[derive(Debug, Serialize, Deserialize)]
struct StoredArtifactMeta {
    created_at_ms: u64,
    snapshot: VersionSnapshot,
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed_expired: usize,
    pub removed_over_budget: usize,
    pub failed: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.removed_expired + self.removed_over_budget
    }
}

/// Integrity-checked, on-disk store of rendered artifacts keyed by
/// [`Fingerprint`].
///
/// Reads go straight to `cacache` and take no lock; at worst an entry is
/// evicted right after a read, which surfaces as a miss on the next lookup.
/// Index mutations (put, delete and sweep) are serialized so a sweep never
/// removes an entry written after it scanned the index.
#[derive(Debug)]
pub struct ArtifactStore {
    root: ArtifactCacheRoot,
    /// Unix millis of the last read or write per cache key. Entries not
    /// touched by this process fall back to their creation time.
    last_access: DashMap<String, u64>,
    write_lock: Mutex<()>,
}

impl ArtifactStore {
    pub async fn open(root: ArtifactCacheRoot) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(root.as_path())
            .await
            .map_err(|err| {
                StoreError::Io(format!(
                    "failed to create artifact cache dir {:?}: {err}",
                    root.as_path()
                ))
            })?;

        Ok(Self {
            root,
            last_access: DashMap::new(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &ArtifactCacheRoot {
        &self.root
    }

    pub async fn get(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<ArtifactEntry>, StoreError> {
        let key = fingerprint.cache_key();
        let Some(meta) = cacache::metadata(self.root.as_path(), &key)
            .await
            .map_err(|e| StoreError::from_cacache(&key, e))?
        else {
            return Ok(None);
        };

        let stored: StoredArtifactMeta =
            serde_json::from_value(meta.metadata).map_err(|source| {
                StoreError::Metadata {
                    key: key.clone(),
                    source,
                }
            })?;

        let bytes = match cacache::read_hash(self.root.as_path(), &meta.integrity)
            .await
        {
            Ok(bytes) => bytes,
            // Content went away between the index lookup and the read.
            Err(cacache::Error::EntryNotFound(_, _)) => return Ok(None),
            Err(cacache::Error::IoError(err, _))
                if err.kind() == std::io::ErrorKind::NotFound =>
            {
                return Ok(None);
            }
            Err(e) => return Err(StoreError::from_cacache(&key, e)),
        };

        self.last_access.insert(key, unix_ms_now());

        Ok(Some(ArtifactEntry {
            fingerprint: fingerprint.clone(),
            bytes,
            snapshot: stored.snapshot,
            created_at: UNIX_EPOCH + Duration::from_millis(stored.created_at_ms),
        }))
    }

    /// Store `bytes` under `fingerprint`, replacing any previous entry.
    pub async fn put(
        &self,
        fingerprint: &Fingerprint,
        bytes: &[u8],
        snapshot: &VersionSnapshot,
    ) -> Result<(), StoreError> {
        let key = fingerprint.cache_key();
        let now_ms = unix_ms_now();
        let metadata = serde_json::to_value(StoredArtifactMeta {
            created_at_ms: now_ms,
            snapshot: snapshot.clone(),
        })
        .map_err(|source| StoreError::Metadata {
            key: key.clone(),
            source,
        })?;

        let integrity = cacache::Integrity::from(bytes);
        let _guard = self.write_lock.lock().await;

        // Drop the superseded entry first so its blob never outlives the key.
        if let Err(err) = self.remove_key(&key, Some(&integrity)).await {
            warn!(key = %key, "failed to remove superseded artifact before overwrite: {err}");
        }

        let mut writer = cacache::WriteOpts::new()
            .size(bytes.len())
            .metadata(metadata)
            .open(self.root.as_path(), &key)
            .await
            .map_err(|e| StoreError::from_cacache(&key, e))?;
        writer.write_all(bytes).await.map_err(|err| {
            StoreError::Io(format!("failed to write artifact {key}: {err}"))
        })?;
        writer
            .commit()
            .await
            .map_err(|e| StoreError::from_cacache(&key, e))?;

        debug!(key = %key, byte_len = bytes.len(), "artifact stored");
        self.last_access.insert(key, now_ms);
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub async fn delete(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.remove_key(&fingerprint.cache_key(), None).await
    }

    pub async fn sweep(
        &self,
        budget: &CacheBudget,
    ) -> Result<SweepReport, StoreError> {
        self.sweep_at(budget, SystemTime::now()).await
    }

    /// Evict entries older than the budget's age, then least recently
    /// accessed entries until the store fits the byte budget. Failures on
    /// individual entries are logged and counted, never fatal.
    pub async fn sweep_at(
        &self,
        budget: &CacheBudget,
        now: SystemTime,
    ) -> Result<SweepReport, StoreError> {
        let _guard = self.write_lock.lock().await;
        let started = Instant::now();
        let now_ms = system_time_ms(now);

        let entries = self.scan_index().await?;
        let candidates: Vec<CandidateEntry> = entries
            .iter()
            .map(|m| {
                let created_ms = m
                    .metadata
                    .get("created_at_ms")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or_else(|| u128_to_u64(m.time));
                let last_access_ms = self
                    .last_access
                    .get(&m.key)
                    .map(|v| *v)
                    .unwrap_or(created_ms);
                CandidateEntry {
                    key: m.key.clone(),
                    size_bytes: m.size as u64,
                    created_ms,
                    last_access_ms,
                }
            })
            .collect();

        let plan = plan_evictions(candidates, now_ms, budget);
        let mut report = SweepReport {
            scanned: entries.len(),
            bytes_before: plan.total_bytes_before,
            bytes_after: plan.total_bytes_before,
            ..SweepReport::default()
        };

        let mut refs: HashMap<String, usize> = HashMap::new();
        for m in &entries {
            *refs.entry(m.integrity.to_string()).or_default() += 1;
        }
        let integrity_of: HashMap<&str, &cacache::Integrity> = entries
            .iter()
            .map(|m| (m.key.as_str(), &m.integrity))
            .collect();

        for eviction in plan.planned {
            if let Err(err) = self.remove_index_entry(&eviction.key).await {
                report.failed += 1;
                warn!(key = %eviction.key, "failed to evict artifact: {err}");
                continue;
            }

            report.bytes_after =
                report.bytes_after.saturating_sub(eviction.size_bytes);
            match eviction.reason {
                EvictionReason::Expired => report.removed_expired += 1,
                EvictionReason::OverBudget => report.removed_over_budget += 1,
            }

            let Some(integrity) = integrity_of.get(eviction.key.as_str()).copied() else {
                continue;
            };
            let remaining = refs.get_mut(&integrity.to_string()).map(|n| {
                *n = n.saturating_sub(1);
                *n
            });
            if remaining == Some(0)
                && let Err(err) = self.remove_content(&eviction.key, integrity).await
            {
                report.failed += 1;
                warn!(key = %eviction.key, "evicted artifact content not removed: {err}");
            }
        }

        let elapsed_ms = started.elapsed().as_millis();
        if report.removed() + report.failed > 0 {
            info!(
                scanned = report.scanned,
                removed_expired = report.removed_expired,
                removed_over_budget = report.removed_over_budget,
                failed = report.failed,
                bytes_after = report.bytes_after,
                elapsed_ms,
                "artifact sweep finished"
            );
        } else {
            debug!(scanned = report.scanned, elapsed_ms, "artifact sweep found nothing to evict");
        }

        Ok(report)
    }

    /// Total indexed size of all artifacts.
    pub async fn usage_bytes(&self) -> Result<u64, StoreError> {
        let entries = self.scan_index().await?;
        Ok(entries.iter().map(|m| m.size as u64).sum())
    }

    pub async fn fingerprints(&self) -> Result<Vec<Fingerprint>, StoreError> {
        let entries = self.scan_index().await?;
        Ok(entries
            .iter()
            .filter_map(|m| Fingerprint::from_cache_key(&m.key))
            .collect())
    }

    /// Caller holds `write_lock`. Content equal to `replacement` is kept
    /// since the next index line for `key` points at the same blob.
    async fn remove_key(
        &self,
        key: &str,
        replacement: Option<&cacache::Integrity>,
    ) -> Result<bool, StoreError> {
        let Some(meta) = cacache::metadata(self.root.as_path(), key)
            .await
            .map_err(|e| StoreError::from_cacache(key, e))?
        else {
            self.last_access.remove(key);
            return Ok(false);
        };
        if replacement == Some(&meta.integrity) {
            return Ok(true);
        }

        self.remove_index_entry(key).await?;
        let shared = self
            .scan_index()
            .await?
            .iter()
            .any(|m| m.integrity == meta.integrity);
        if !shared {
            self.remove_content(key, &meta.integrity).await?;
        }
        Ok(true)
    }

    async fn remove_index_entry(&self, key: &str) -> Result<(), StoreError> {
        cacache::index::RemoveOpts::new()
            .remove_fully(false)
            .remove(self.root.as_path(), key)
            .await
            .map_err(|e| StoreError::from_cacache(key, e))?;
        self.last_access.remove(key);
        Ok(())
    }

    /// Content is addressed by hash, so byte-identical artifacts under
    /// different keys share one blob. Callers only drop it once no key
    /// references it.
    async fn remove_content(
        &self,
        key: &str,
        integrity: &cacache::Integrity,
    ) -> Result<(), StoreError> {
        match cacache::remove_hash(self.root.as_path(), integrity).await {
            Ok(()) => Ok(()),
            Err(cacache::Error::IoError(err, _))
                if err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(e) => Err(StoreError::from_cacache(key, e)),
        }
    }

    async fn scan_index(&self) -> Result<Vec<cacache::Metadata>, StoreError> {
        let root = self.root.as_path().to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in cacache::index::ls(&root) {
                match entry {
                    Ok(m) if Fingerprint::from_cache_key(&m.key).is_some() => {
                        out.push(m)
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("artifact index entry unreadable; skipping: {e}")
                    }
                }
            }
            out
        })
        .await
        .map_err(|e| StoreError::Scan(e.to_string()))
    }
}

fn unix_ms_now() -> u64 {
    system_time_ms(SystemTime::now())
}

fn system_time_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
        .min(u128::from(u64::MAX)) as u64
}

fn u128_to_u64(v: u128) -> u64 {
    v.min(u128::from(u64::MAX)) as u64
}
