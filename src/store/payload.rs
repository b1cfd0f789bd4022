//! Payload store implementations.

use super::PayloadStore;
use crate::capture::{CaptureRequest, PayloadLocation};
use crate::error::WebclipError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

fn store_error(location: &PayloadLocation, detail: impl ToString) -> WebclipError {
    WebclipError::PayloadStore {
        key: location.to_string(),
        detail: detail.to_string(),
    }
}

fn encode(location: &PayloadLocation, request: &CaptureRequest) -> Result<String, WebclipError> {
    serde_json::to_string(request).map_err(|e| store_error(location, e))
}

fn decode(location: &PayloadLocation, json: &str) -> Result<CaptureRequest, WebclipError> {
    serde_json::from_str(json).map_err(|e| store_error(location, e))
}

// ── In-memory ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct StoredPayload {
    json: String,
    written: usize,
    settled: bool,
}

/// Payloads kept in a map, serialised as JSON like the durable stores.
#[derive(Debug, Default)]
pub struct MemoryPayloadStore {
    objects: Mutex<HashMap<PayloadLocation, StoredPayload>>,
    puts: AtomicUsize,
}

impl MemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PayloadStore for MemoryPayloadStore {
    async fn put(
        &self,
        location: &PayloadLocation,
        request: &CaptureRequest,
    ) -> Result<(), WebclipError> {
        let json = encode(location, request)?;
        let mut objects = self.objects.lock().map_err(|e| store_error(location, e))?;
        let written = self.puts.fetch_add(1, Ordering::SeqCst);
        objects.insert(
            location.clone(),
            StoredPayload {
                json,
                written,
                settled: false,
            },
        );
        Ok(())
    }

    async fn get(&self, location: &PayloadLocation) -> Result<CaptureRequest, WebclipError> {
        let json = self
            .objects
            .lock()
            .map_err(|e| store_error(location, e))?
            .get(location)
            .map(|stored| stored.json.clone())
            .ok_or_else(|| WebclipError::PayloadNotFound {
                key: location.to_string(),
            })?;
        decode(location, &json)
    }

    async fn mark_settled(
        &self,
        location: &PayloadLocation,
        request: &CaptureRequest,
    ) -> Result<(), WebclipError> {
        let json = encode(location, request)?;
        let mut objects = self.objects.lock().map_err(|e| store_error(location, e))?;
        if let Some(stored) = objects.get_mut(location) {
            if stored.json == json {
                stored.settled = true;
            }
        }
        Ok(())
    }

    async fn unsettled(&self, namespace: &str) -> Result<Vec<PayloadLocation>, WebclipError> {
        let objects = self.objects.lock().map_err(|e| WebclipError::PayloadStore {
            key: namespace.to_string(),
            detail: e.to_string(),
        })?;
        let mut pending: Vec<(usize, PayloadLocation)> = objects
            .iter()
            .filter(|(location, stored)| location.namespace == namespace && !stored.settled)
            .map(|(location, stored)| (stored.written, location.clone()))
            .collect();
        pending.sort();
        Ok(pending.into_iter().map(|(_, location)| location).collect())
    }
}

// ── Filesystem ───────────────────────────────────────────────────────────────

/// Payloads stored as `<root>/<namespace>/<sha256>.json`.
///
/// Writes are atomic (temp file + rename) so a concurrent reader never
/// sees a partial payload.
#[derive(Debug, Clone)]
pub struct FsPayloadStore {
    root: PathBuf,
}

impl FsPayloadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, location: &PayloadLocation) -> Result<PathBuf, WebclipError> {
        if !is_safe_component(&location.namespace) || !is_safe_component(&location.key) {
            return Err(store_error(location, "unsafe path component"));
        }
        Ok(self.root.join(&location.namespace).join(&location.key))
    }

    fn io_error(&self, e: std::io::Error) -> WebclipError {
        WebclipError::PayloadStore {
            key: self.root.display().to_string(),
            detail: e.to_string(),
        }
    }

    /// Delete payloads last written more than `retention` ago.
    ///
    /// Returns the number of payloads removed. Unreadable entries are
    /// skipped with a warning.
    pub async fn purge_expired(&self, retention: Duration) -> Result<usize, WebclipError> {
        let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
            return Ok(0);
        };
        let io_error = |e| self.io_error(e);

        let mut removed = 0;
        let mut namespaces = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(e)),
        };
        while let Some(ns) = namespaces.next_entry().await.map_err(io_error)? {
            if !ns.file_type().await.map_err(io_error)?.is_dir() {
                continue;
            }
            let mut objects = tokio::fs::read_dir(ns.path()).await.map_err(io_error)?;
            while let Some(obj) = objects.next_entry().await.map_err(io_error)? {
                let path = obj.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let modified = match obj.metadata().await.and_then(|m| m.modified()) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(path = %path.display(), "cannot stat payload: {e}");
                        continue;
                    }
                };
                if modified < cutoff {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => {
                            removed += 1;
                            let _ = tokio::fs::remove_file(settled_marker(&path)).await;
                        }
                        Err(e) => warn!(path = %path.display(), "cannot remove payload: {e}"),
                    }
                }
            }
        }
        if removed > 0 {
            info!(removed, "purged expired payloads");
        }
        Ok(removed)
    }
}

#[async_trait]
impl PayloadStore for FsPayloadStore {
    async fn put(
        &self,
        location: &PayloadLocation,
        request: &CaptureRequest,
    ) -> Result<(), WebclipError> {
        let path = self.path_for(location)?;
        let json = encode(location, request)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| store_error(location, e))?;
        }
        // A rewritten payload is new work, even if an older one settled.
        match tokio::fs::remove_file(settled_marker(&path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(store_error(location, e)),
        }

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| store_error(location, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| store_error(location, e))?;

        debug!(%location, "payload written");
        Ok(())
    }

    async fn get(&self, location: &PayloadLocation) -> Result<CaptureRequest, WebclipError> {
        let path = self.path_for(location)?;
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WebclipError::PayloadNotFound {
                    key: location.to_string(),
                })
            }
            Err(e) => return Err(store_error(location, e)),
        };
        decode(location, &json)
    }

    /// Writes an empty `<sha256>.done` marker next to the payload.
    async fn mark_settled(
        &self,
        location: &PayloadLocation,
        request: &CaptureRequest,
    ) -> Result<(), WebclipError> {
        let path = self.path_for(location)?;
        if self.get(location).await? != *request {
            debug!(%location, "payload rewritten since it was read; left unsettled");
            return Ok(());
        }
        tokio::fs::write(settled_marker(&path), b"")
            .await
            .map_err(|e| store_error(location, e))?;
        debug!(%location, "payload settled");
        Ok(())
    }

    async fn unsettled(&self, namespace: &str) -> Result<Vec<PayloadLocation>, WebclipError> {
        if !is_safe_component(namespace) {
            return Err(WebclipError::PayloadStore {
                key: namespace.to_string(),
                detail: "unsafe path component".into(),
            });
        }
        let mut objects = match tokio::fs::read_dir(self.root.join(namespace)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut pending = Vec::new();
        while let Some(obj) = objects.next_entry().await.map_err(|e| self.io_error(e))? {
            let path = obj.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let settled = tokio::fs::try_exists(settled_marker(&path))
                .await
                .map_err(|e| self.io_error(e))?;
            if settled {
                continue;
            }
            let modified = obj
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            pending.push((
                modified,
                PayloadLocation {
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                },
            ));
        }
        pending.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.key.cmp(&b.1.key)));
        Ok(pending.into_iter().map(|(_, location)| location).collect())
    }
}

fn is_safe_component(part: &str) -> bool {
    !part.is_empty() && !part.contains(['/', '\\']) && part != "." && part != ".."
}

fn settled_marker(payload: &Path) -> PathBuf {
    payload.with_extension("done")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RequestIdentity;

    fn location(url: &str) -> PayloadLocation {
        PayloadLocation::new("captures", &RequestIdentity::from_url(url))
    }

    #[tokio::test]
    async fn memory_round_trip_and_overwrite() {
        let store = MemoryPayloadStore::new();
        let loc = location("https://ex.com/");
        store
            .put(&loc, &CaptureRequest::new("https://ex.com/", "Ex"))
            .await
            .unwrap();
        store
            .put(
                &loc,
                &CaptureRequest::new("https://ex.com/", "Ex").with_html("<p>x</p>"),
            )
            .await
            .unwrap();
        let got = store.get(&loc).await.unwrap();
        assert!(got.has_html());
        assert_eq!(store.put_count(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_missing_payload() {
        let store = MemoryPayloadStore::new();
        let err = store.get(&location("https://ex.com/")).await.unwrap_err();
        assert!(matches!(err, WebclipError::PayloadNotFound { .. }));
    }

    #[tokio::test]
    async fn fs_writes_json_named_by_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPayloadStore::new(dir.path());
        let loc = location("https://ex.com/a");
        let req = CaptureRequest::new("https://ex.com/a", "A").with_html("<p>a</p>");
        store.put(&loc, &req).await.unwrap();

        let path = dir.path().join("captures").join(&loc.key);
        assert!(path.exists());
        assert!(loc.key.ends_with(".json"));
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(store.get(&loc).await.unwrap(), req);
    }

    #[tokio::test]
    async fn fs_missing_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPayloadStore::new(dir.path());
        let err = store.get(&location("https://ex.com/")).await.unwrap_err();
        assert!(matches!(err, WebclipError::PayloadNotFound { .. }));
    }

    #[tokio::test]
    async fn fs_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPayloadStore::new(dir.path());
        let loc = PayloadLocation {
            namespace: "..".into(),
            key: "x.json".into(),
        };
        let err = store
            .put(&loc, &CaptureRequest::new("https://ex.com/", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, WebclipError::PayloadStore { .. }));
    }

    #[tokio::test]
    async fn purge_respects_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPayloadStore::new(dir.path());
        let loc = location("https://ex.com/");
        store
            .put(&loc, &CaptureRequest::new("https://ex.com/", "x"))
            .await
            .unwrap();

        assert_eq!(store.purge_expired(Duration::from_secs(3600)).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.purge_expired(Duration::from_millis(1)).await.unwrap(), 1);
        assert!(store.get(&loc).await.is_err());
    }

    #[tokio::test]
    async fn memory_settles_only_the_payload_it_read() {
        let store = MemoryPayloadStore::new();
        let a = location("https://ex.com/a");
        let b = location("https://ex.com/b");
        let first = CaptureRequest::new("https://ex.com/a", "A");
        store.put(&a, &first).await.unwrap();
        store.put(&b, &CaptureRequest::new("https://ex.com/b", "B")).await.unwrap();
        assert_eq!(store.unsettled("captures").await.unwrap(), vec![a.clone(), b.clone()]);

        store.mark_settled(&a, &first).await.unwrap();
        assert_eq!(store.unsettled("captures").await.unwrap(), vec![b.clone()]);

        let recapture = first.clone().with_html("<p>new</p>");
        store.put(&a, &recapture).await.unwrap();
        store.mark_settled(&a, &first).await.unwrap();
        assert_eq!(store.unsettled("captures").await.unwrap(), vec![b, a]);
        assert!(store.unsettled("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fs_settled_marker_hides_payload_until_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPayloadStore::new(dir.path());
        let loc = location("https://ex.com/a");
        let req = CaptureRequest::new("https://ex.com/a", "A").with_html("<p>a</p>");
        store.put(&loc, &req).await.unwrap();
        assert_eq!(store.unsettled("captures").await.unwrap(), vec![loc.clone()]);

        store.mark_settled(&loc, &req).await.unwrap();
        let marker = dir.path().join("captures").join(&loc.key).with_extension("done");
        assert!(marker.exists());
        assert!(store.unsettled("captures").await.unwrap().is_empty());

        store.put(&loc, &req).await.unwrap();
        assert!(!marker.exists());
        assert_eq!(store.unsettled("captures").await.unwrap(), vec![loc.clone()]);

        let stale = CaptureRequest::new("https://ex.com/a", "old");
        store.mark_settled(&loc, &stale).await.unwrap();
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn fs_unsettled_on_missing_namespace_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPayloadStore::new(dir.path());
        assert!(store.unsettled("captures").await.unwrap().is_empty());
        assert!(store.unsettled("..").await.is_err());
    }

    #[tokio::test]
    async fn purge_on_missing_root_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsPayloadStore::new(dir.path().join("absent"));
        assert_eq!(store.purge_expired(Duration::ZERO).await.unwrap(), 0);
    }
}
