//! Object Catalog and Lineage Resolver (SPEC_FULL.md §4.4, §4.6, C4, C6)
//!
//! Grounded on `original_source/zfs3backup/snap.py` (`S3Snapshot`,
//! `S3SnapshotManager`, `S3Snapshot._is_healthy`) for the catalog/lineage
//! algorithms, and on `src/storage/s3.rs::list_objects_with_prefix`'s
//! continuation-token pagination loop for the idiomatic listing shape.

use crate::error::SnapshotError;
use crate::store::ObjectStore;
use std::cell::RefCell;
use std::collections::HashMap;

/// A snapshot discovered in the object store, keyed by its stripped object name (§3).
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    pub name: String,
    pub size_bytes: i64,
    pub metadata: HashMap<String, String>,
}

impl RemoteSnapshot {
    /// `true` if either `isfull` or the legacy `is_full` key is the literal `"true"` (§4.4).
    pub fn is_full(&self) -> bool {
        self.metadata.get("isfull").map(String::as_str) == Some("true")
            || self.metadata.get("is_full").map(String::as_str) == Some("true")
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.metadata.get("parent").map(String::as_str)
    }

    pub fn compressor(&self) -> Option<&str> {
        self.metadata.get("compressor").map(String::as_str)
    }

    pub fn uncompressed_size(&self) -> Option<&str> {
        self.metadata.get("size").map(String::as_str)
    }
}

/// Lineage classification for a `RemoteSnapshot` (§3 "Lineage health", §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineageHealth {
    Healthy,
    MissingParent,
    ParentBroken,
    Cycle,
}

impl LineageHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, LineageHealth::Healthy)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            LineageHealth::Healthy => "ok",
            LineageHealth::MissingParent => "missing parent",
            LineageHealth::ParentBroken => "parent broken",
            LineageHealth::Cycle => "cycle detected",
        }
    }
}

/// Lists remote snapshots under a prefix and resolves their lineage health (C4 + C6).
///
/// Loaded once per invocation and cached; stale reads within a run are
/// accepted since nothing else writes to the bucket concurrently (§4.4,
/// §9 "stale catalog reads").
pub struct ObjectCatalog {
    store: ObjectStore,
    prefix: String,
    snapshots: HashMap<String, RemoteSnapshot>,
    health_cache: RefCell<HashMap<String, LineageHealth>>,
}

impl ObjectCatalog {
    /// Lists objects under `<s3_prefix><snapshot_prefix>` and fetches each
    /// one's user metadata, keyed by the name with `s3_prefix` stripped.
    pub async fn load(
        store: ObjectStore,
        s3_prefix: &str,
        snapshot_prefix: &str,
    ) -> Result<Self, SnapshotError> {
        let list_prefix = format!("{s3_prefix}{snapshot_prefix}");
        let mut snapshots = HashMap::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = store
                .client
                .list_objects_v2()
                .bucket(&store.bucket)
                .prefix(&list_prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                let head = store
                    .client
                    .head_object()
                    .bucket(&store.bucket)
                    .key(key)
                    .send()
                    .await?;

                let name = key
                    .strip_prefix(s3_prefix)
                    .unwrap_or(key)
                    .to_string();
                let metadata = head.metadata().cloned().unwrap_or_default();
                snapshots.insert(
                    name.clone(),
                    RemoteSnapshot {
                        name,
                        size_bytes: head.content_length().unwrap_or(0),
                        metadata,
                    },
                );
            }

            continuation_token = response.next_continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(Self {
            store,
            prefix: s3_prefix.to_string(),
            snapshots,
            health_cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn get(&self, name: &str) -> Option<&RemoteSnapshot> {
        self.snapshots.get(name)
    }

    /// Returns snapshots sorted by name, matching `S3SnapshotManager.list()`.
    pub fn list(&self) -> Vec<&RemoteSnapshot> {
        let mut snaps: Vec<&RemoteSnapshot> = self.snapshots.values().collect();
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        snaps
    }

    pub fn bucket(&self) -> &str {
        &self.store.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Depth-first lineage classification (C6), memoized per node.
    pub fn health(&self, name: &str) -> LineageHealth {
        if let Some(health) = self.health_cache.borrow().get(name) {
            return *health;
        }
        let mut visited = std::collections::HashSet::new();
        let health = self.resolve_health(name, &mut visited);
        self.health_cache
            .borrow_mut()
            .insert(name.to_string(), health);
        health
    }

    fn resolve_health(
        &self,
        name: &str,
        visited: &mut std::collections::HashSet<String>,
    ) -> LineageHealth {
        let Some(snap) = self.snapshots.get(name) else {
            return LineageHealth::MissingParent;
        };
        if snap.is_full() {
            return LineageHealth::Healthy;
        }
        if visited.contains(name) {
            return LineageHealth::Cycle;
        }
        let Some(parent_name) = snap.parent_name() else {
            return LineageHealth::MissingParent;
        };
        if !self.snapshots.contains_key(parent_name) {
            return LineageHealth::MissingParent;
        }
        visited.insert(name.to_string());
        let parent_health = self.resolve_health(parent_name, visited);
        match parent_health {
            LineageHealth::Healthy => LineageHealth::Healthy,
            LineageHealth::Cycle => LineageHealth::Cycle,
            _ => LineageHealth::ParentBroken,
        }
    }
}

/// Builds an `ObjectCatalog` from in-memory snapshots, skipping `load`'s S3
/// calls entirely. Used by this module's own tests and by `pair`'s.
#[cfg(test)]
pub(crate) fn catalog_from(snapshots: Vec<RemoteSnapshot>) -> ObjectCatalog {
    ObjectCatalog {
        store: ObjectStore {
            client: aws_sdk_s3::Client::from_conf(
                aws_sdk_s3::Config::builder()
                    .region(aws_sdk_s3::config::Region::new("us-east-1"))
                    .credentials_provider(aws_credential_types::Credentials::new(
                        "test", "test", None, None, "test",
                    ))
                    .behavior_version(aws_config::BehaviorVersion::latest())
                    .build(),
            ),
            bucket: "test".to_string(),
        },
        prefix: "zfs3backup/".to_string(),
        snapshots: snapshots.into_iter().map(|s| (s.name.clone(), s)).collect(),
        health_cache: RefCell::new(HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(name: &str, metadata: &[(&str, &str)]) -> RemoteSnapshot {
        RemoteSnapshot {
            name: name.to_string(),
            size_bytes: 1024,
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_full_snapshot_is_healthy() {
        let catalog = catalog_from(vec![snap("D@a", &[("isfull", "true")])]);
        assert_eq!(catalog.health("D@a"), LineageHealth::Healthy);
    }

    #[test]
    fn test_legacy_is_full_alias() {
        let catalog = catalog_from(vec![snap("D@a", &[("is_full", "true")])]);
        assert!(catalog.get("D@a").unwrap().is_full());
    }

    #[test]
    fn test_missing_parent() {
        let catalog = catalog_from(vec![snap("D@b", &[("parent", "D@a")])]);
        assert_eq!(catalog.health("D@b"), LineageHealth::MissingParent);
    }

    #[test]
    fn test_parent_broken_propagates() {
        let catalog = catalog_from(vec![
            snap("D@c", &[("parent", "D@b")]),
            snap("D@b", &[("parent", "D@a")]),
        ]);
        assert_eq!(catalog.health("D@b"), LineageHealth::MissingParent);
        assert_eq!(catalog.health("D@c"), LineageHealth::ParentBroken);
    }

    #[test]
    fn test_cycle_detected() {
        let catalog = catalog_from(vec![
            snap("D@a", &[("parent", "D@b")]),
            snap("D@b", &[("parent", "D@a")]),
        ]);
        assert_eq!(catalog.health("D@a"), LineageHealth::Cycle);
        assert_eq!(catalog.health("D@b"), LineageHealth::Cycle);
    }

    #[test]
    fn test_healthy_chain() {
        let catalog = catalog_from(vec![
            snap("D@a", &[("isfull", "true")]),
            snap("D@b", &[("parent", "D@a")]),
            snap("D@c", &[("parent", "D@b")]),
        ]);
        assert_eq!(catalog.health("D@c"), LineageHealth::Healthy);
    }
}
