//! Single-writer, multi-reader holder of the published regime snapshot.
//!
//! The refit task is the only writer. Readers clone the snapshot out, so no
//! lock is ever held across I/O or model fitting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::RegimeSnapshot;

/// Snapshot plus publication bookkeeping
#[derive(Debug, Clone, Serialize)]
pub struct PublishedSnapshot {
    pub snapshot: RegimeSnapshot,
    /// Starts at 1 and increments on every publish
    pub version: u64,
    pub published_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RegimeStateStore {
    current: RwLock<Option<PublishedSnapshot>>,
}

impl RegimeStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an initial snapshot
    pub fn with_snapshot(snapshot: RegimeSnapshot) -> Self {
        Self {
            current: RwLock::new(Some(PublishedSnapshot {
                snapshot,
                version: 1,
                published_at: Utc::now(),
            })),
        }
    }

    /// Copy of the current snapshot, if one has been published
    pub async fn current(&self) -> Option<RegimeSnapshot> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|published| published.snapshot.clone())
    }

    pub async fn published(&self) -> Option<PublishedSnapshot> {
        self.current.read().await.clone()
    }

    /// Replace the snapshot. The new value must be fully built before calling.
    pub async fn publish(&self, snapshot: RegimeSnapshot) -> u64 {
        let version = {
            let mut guard = self.current.write().await;
            let version = guard.as_ref().map(|p| p.version + 1).unwrap_or(1);
            *guard = Some(PublishedSnapshot {
                snapshot: snapshot.clone(),
                version,
                published_at: Utc::now(),
            });
            version
        };

        info!(
            "Published regime snapshot v{}: P(positive)={:.6} as of {} (threshold {})",
            version, snapshot.probability_positive, snapshot.as_of, snapshot.entry_threshold
        );
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn snap(p: f64) -> RegimeSnapshot {
        RegimeSnapshot {
            probability_positive: p,
            as_of: Utc::now(),
            entry_threshold: 0.55,
        }
    }

    #[tokio::test]
    async fn empty_store_has_no_snapshot() {
        let store = RegimeStateStore::new();
        assert!(store.current().await.is_none());
        assert!(store.published().await.is_none());
    }

    #[tokio::test]
    async fn publish_replaces_and_bumps_version() {
        let store = RegimeStateStore::with_snapshot(snap(0.2));
        assert_eq!(store.publish(snap(0.7)).await, 2);
        assert_eq!(store.publish(snap(0.9)).await, 3);

        let current = store.current().await.unwrap();
        assert_eq!(current.probability_positive, 0.9);
    }

    #[tokio::test]
    async fn readers_only_see_whole_snapshots() {
        let store = Arc::new(RegimeStateStore::new());
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 1..=200 {
                    let p = i as f64 / 1000.0;
                    store
                        .publish(RegimeSnapshot {
                            probability_positive: p,
                            as_of: Utc::now(),
                            // threshold tracks probability so a torn read is detectable
                            entry_threshold: p,
                        })
                        .await;
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..500 {
            if let Some(s) = store.current().await {
                assert_eq!(s.probability_positive, s.entry_threshold);
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert_eq!(store.published().await.unwrap().version, 200);
    }
}
