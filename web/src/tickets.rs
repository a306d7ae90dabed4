/// One-shot tickets for files fetched through the progress stream.
///
/// The browser watches `/download/events`, gets a ticket in the final event,
/// then collects the file from `/download/file/:ticket`. Unclaimed files are
/// dropped (and their temp dirs removed) after the TTL.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use vidfetch_shared::fetcher::FetchedVideo;

struct ReadyFile {
    video: FetchedVideo,
    created_at: Instant,
}

#[derive(Clone, Default)]
pub struct TicketStore {
    inner: Arc<Mutex<HashMap<String, ReadyFile>>>,
}

impl TicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a finished download and return its ticket.
    pub async fn store(&self, video: FetchedVideo) -> String {
        let ticket = uuid::Uuid::new_v4().simple().to_string();
        let mut map = self.inner.lock().await;
        map.insert(
            ticket.clone(),
            ReadyFile {
                video,
                created_at: Instant::now(),
            },
        );
        ticket
    }

    /// Claim a download. A ticket works once.
    pub async fn take(&self, ticket: &str) -> Option<FetchedVideo> {
        let mut map = self.inner.lock().await;
        map.remove(ticket).map(|ready| ready.video)
    }

    /// Drop files older than `ttl`. Returns how many were removed.
    pub async fn cleanup_expired(&self, ttl: Duration) -> usize {
        let expired: Vec<ReadyFile> = {
            let mut map = self.inner.lock().await;
            let stale: Vec<String> = map
                .iter()
                .filter(|(_, ready)| ready.created_at.elapsed() >= ttl)
                .map(|(ticket, _)| ticket.clone())
                .collect();
            stale.iter().filter_map(|t| map.remove(t)).collect()
        };

        // Temp dirs are removed outside the lock, on the blocking pool.
        let count = expired.len();
        for ready in expired {
            debug!("Expiring unclaimed file {}", ready.video.path().display());
            if let Some(removal) = ready.video.release() {
                if let Err(e) = removal.await {
                    warn!("Removing expired download failed: {}", e);
                }
            }
        }
        count
    }

    pub async fn pending(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_video(root: &std::path::Path) -> FetchedVideo {
        let dir = tempfile::tempdir_in(root).unwrap();
        let path = dir.path().join("abc.mp4");
        std::fs::write(&path, b"data").unwrap();
        FetchedVideo::new(dir, path, "Clip.mp4".to_string(), 4)
    }

    #[tokio::test]
    async fn test_ticket_is_single_use() {
        let root = tempfile::tempdir().unwrap();
        let store = TicketStore::new();

        let ticket = store.store(ready_video(root.path())).await;
        assert_eq!(store.pending().await, 1);

        let video = store.take(&ticket).await.unwrap();
        assert_eq!(video.filename(), "Clip.mp4");
        assert!(store.take(&ticket).await.is_none());
        assert!(store.take("unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_files() {
        let root = tempfile::tempdir().unwrap();
        let store = TicketStore::new();

        let ticket = store.store(ready_video(root.path())).await;
        assert_eq!(store.cleanup_expired(Duration::from_secs(3600)).await, 0);

        assert_eq!(store.cleanup_expired(Duration::ZERO).await, 1);
        assert!(store.take(&ticket).await.is_none());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
