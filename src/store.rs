//! Cache persistence: an object-store abstraction plus the typed layer on
//! top of it.
//!
//! Everything the engine persists is a JSON record under a flat string key:
//!
//! | Key                                   | Record               |
//! |---------------------------------------|----------------------|
//! | `resource/{realm}/{subrealm}/{path}`  | [`ResourceHistory`]  |
//! | `observed/{flat uri}/{affordance}`    | [`Bundle`]           |
//! | `alias/{hash}`                        | [`AliasRecord`]      |
//! | `relation/defs/{id}`                  | [`Relation`]         |
//! | `relation/refs/{flat uri}/{id}`       | relation id (marker) |
//!
//! [`KnowledgeStore`] owns the key layout; callers stage writes in a
//! [`CommitSet`] so the resource history lands after the records it points
//! at.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::bundle::Bundle;
use crate::error::{KnowledgeError, Result};
use crate::metadata::ResourceHistory;
use crate::relation::{Relation, RelationId};
use crate::uri::{Affordance, ResourceUri, WebUrl};

/// Salt mixed into alias hashes so they never collide with other sha256 uses.
const ALIAS_SALT: &str = "knowledge-alias";
/// Hex characters kept of an alias hash.
const ALIAS_CHARS: usize = 40;

///
/// Object store
///

/// Minimal key/value surface the cache is written against. Keys are
/// slash-separated paths; `list` returns every key under a prefix.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory store, used by tests and the `none`-storage configuration.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

///
/// Key layout
///

/// A resource URI with its slashes folded away, usable as one key segment.
fn flatten(uri: &ResourceUri) -> String {
    format!("{}+{}+{}", uri.realm, uri.subrealm, uri.path.join("+"))
}

pub fn resource_key(uri: &ResourceUri) -> String {
    format!(
        "resource/{}/{}/{}",
        uri.realm,
        uri.subrealm,
        uri.path.join("/")
    )
}

pub fn bundle_key(uri: &ResourceUri, affordance: Affordance) -> String {
    format!("observed/{}/{}", flatten(uri), affordance.kind())
}

pub fn alias_key(url: &WebUrl) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ALIAS_SALT.as_bytes());
    hasher.update(url.clean().to_string().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("alias/{}", &hex[..ALIAS_CHARS])
}

pub fn relation_def_key(id: &RelationId) -> String {
    format!("relation/defs/{}", id.as_str())
}

pub fn relation_ref_key(uri: &ResourceUri, id: &RelationId) -> String {
    format!("relation/refs/{}/{}", flatten(uri), id.as_str())
}

///
/// Records
///

/// What an alias key resolves to. The cleaned URL is stored alongside the
/// target so a truncated-hash collision reads as a miss, not a wrong hit.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AliasRecord {
    pub url: WebUrl,
    pub resource: ResourceUri,
}

///
/// Commit sets
///

/// Writes staged for one resource refresh. `commit` applies deletes, then
/// content puts, then the resource history, so a reader never sees a
/// history that points at records not yet written.
#[derive(Default)]
pub struct CommitSet {
    deletes: Vec<String>,
    puts: Vec<(String, Vec<u8>)>,
    history: Option<(String, Vec<u8>)>,
}

impl CommitSet {
    pub fn new() -> CommitSet {
        CommitSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.puts.is_empty() && self.history.is_none()
    }

    pub fn put_bundle(&mut self, bundle: &Bundle) -> Result<()> {
        let key = bundle_key(bundle.resource_uri(), bundle.affordance());
        self.puts.push((key, serde_json::to_vec(bundle)?));
        Ok(())
    }

    pub fn put_alias(&mut self, url: &WebUrl, resource: &ResourceUri) -> Result<()> {
        let record = AliasRecord {
            url: url.clean(),
            resource: resource.clone(),
        };
        self.puts
            .push((alias_key(url), serde_json::to_vec(&record)?));
        Ok(())
    }

    pub fn delete_alias(&mut self, url: &WebUrl) {
        self.deletes.push(alias_key(url));
    }

    pub fn put_relation(&mut self, relation: &Relation) -> Result<()> {
        let id = relation.unique_id();
        self.puts
            .push((relation_def_key(&id), serde_json::to_vec(relation)?));
        for node in relation.nodes() {
            self.puts
                .push((relation_ref_key(&node, &id), id.as_str().as_bytes().to_vec()));
        }
        Ok(())
    }

    pub fn delete_relation(&mut self, relation: &Relation) {
        let id = relation.unique_id();
        for node in relation.nodes() {
            self.deletes.push(relation_ref_key(&node, &id));
        }
        self.deletes.push(relation_def_key(&id));
    }

    pub fn set_history(&mut self, uri: &ResourceUri, history: &ResourceHistory) -> Result<()> {
        self.history = Some((resource_key(uri), serde_json::to_vec(history)?));
        Ok(())
    }
}

///
/// Typed store
///

/// The typed cache surface the engine reads and commits through.
#[derive(Clone)]
pub struct KnowledgeStore {
    store: Arc<dyn ObjectStore>,
}

impl KnowledgeStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> KnowledgeStore {
        KnowledgeStore { store }
    }

    pub async fn read_resource(&self, uri: &ResourceUri) -> Result<Option<ResourceHistory>> {
        let key = resource_key(uri);
        match self.store.get(&key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// A missing or undecodable bundle both read as `None`: a corrupt record
    /// is treated as evicted and re-observed on the next refresh.
    pub async fn read_bundle(
        &self,
        uri: &ResourceUri,
        affordance: Affordance,
    ) -> Result<Option<Bundle>> {
        let key = bundle_key(uri, affordance);
        let Some(data) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&data) {
            Ok(bundle) => Ok(Some(bundle)),
            Err(err) => {
                tracing::warn!(key, error = %err, "dropping undecodable bundle record");
                Ok(None)
            }
        }
    }

    pub async fn read_alias(&self, url: &WebUrl) -> Result<Option<ResourceUri>> {
        let key = alias_key(url);
        let Some(data) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let record: AliasRecord = serde_json::from_slice(&data)?;
        if record.url != url.clean() {
            return Ok(None);
        }
        Ok(Some(record.resource))
    }

    pub async fn list_aliases(&self) -> Result<Vec<AliasRecord>> {
        let mut records = Vec::new();
        for key in self.store.list("alias/").await? {
            if let Some(data) = self.store.get(&key).await? {
                records.push(serde_json::from_slice(&data)?);
            }
        }
        records.sort_by_key(|record: &AliasRecord| record.url.to_string());
        Ok(records)
    }

    /// Every stored relation that touches `uri`, from either side.
    pub async fn relations_of(&self, uri: &ResourceUri) -> Result<Vec<Relation>> {
        let prefix = format!("relation/refs/{}/", flatten(uri));
        let mut relations = Vec::new();
        for key in self.store.list(&prefix).await? {
            let id = key
                .strip_prefix(&prefix)
                .ok_or_else(|| KnowledgeError::corrupt(format!("bad relation ref key '{key}'")))?;
            let id: RelationId = id.parse()?;
            if let Some(data) = self.store.get(&relation_def_key(&id)).await? {
                relations.push(serde_json::from_slice(&data)?);
            } else {
                tracing::warn!(id = id.as_str(), "relation ref without definition");
            }
        }
        relations.sort_by_key(Relation::unique_id);
        Ok(relations)
    }

    pub async fn commit(&self, commit: CommitSet) -> Result<()> {
        for key in &commit.deletes {
            self.store.delete(key).await?;
        }
        for (key, data) in commit.puts {
            self.store.put(&key, data).await?;
        }
        if let Some((key, data)) = commit.history {
            self.store.put(&key, data).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Locator, ResourceDelta};

    fn uri(s: &str) -> ResourceUri {
        s.parse().unwrap()
    }

    fn history_for(uri: &ResourceUri) -> ResourceHistory {
        let mut delta = ResourceDelta::at(chrono::Utc::now());
        delta.locator = Some(Locator::new(uri.clone()));
        ResourceHistory::initialize(delta).unwrap()
    }

    #[test]
    fn test_key_layout() {
        let uri = uri("ndk://wiki/eng/guides/setup.md");
        assert_eq!(resource_key(&uri), "resource/wiki/eng/guides/setup.md");
        assert_eq!(
            bundle_key(&uri, Affordance::Body),
            "observed/wiki+eng+guides+setup.md/body"
        );
    }

    #[test]
    fn test_alias_key_is_stable_and_cleaned() {
        let a: WebUrl = "https://example.com/page?b=2&a=1".parse().unwrap();
        let b: WebUrl = "https://example.com/page?a=1&b=2".parse().unwrap();
        assert_eq!(alias_key(&a), alias_key(&b));
        let key = alias_key(&a);
        assert_eq!(key.len(), "alias/".len() + ALIAS_CHARS);
    }

    #[tokio::test]
    async fn test_resource_round_trip() {
        let store = KnowledgeStore::new(Arc::new(MemoryStore::new()));
        let uri = uri("ndk://wiki/eng/page");
        assert!(store.read_resource(&uri).await.unwrap().is_none());

        let history = history_for(&uri);
        let mut commit = CommitSet::new();
        commit.set_history(&uri, &history).unwrap();
        store.commit(commit).await.unwrap();

        let read = store.read_resource(&uri).await.unwrap().unwrap();
        assert_eq!(
            read.merged().unwrap().locator.uri,
            history.merged().unwrap().locator.uri
        );
    }

    #[tokio::test]
    async fn test_alias_round_trip_and_delete() {
        let store = KnowledgeStore::new(Arc::new(MemoryStore::new()));
        let url: WebUrl = "https://example.com/page".parse().unwrap();
        let target = uri("ndk://wiki/eng/page");

        let mut commit = CommitSet::new();
        commit.put_alias(&url, &target).unwrap();
        store.commit(commit).await.unwrap();
        assert_eq!(store.read_alias(&url).await.unwrap(), Some(target));

        let mut commit = CommitSet::new();
        commit.delete_alias(&url);
        store.commit(commit).await.unwrap();
        assert!(store.read_alias(&url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relations_visible_from_both_sides() {
        let store = KnowledgeStore::new(Arc::new(MemoryStore::new()));
        let relation = Relation::Parent {
            parent: uri("ndk://wiki/eng/guides"),
            child: uri("ndk://wiki/eng/guides/setup.md"),
        };

        let mut commit = CommitSet::new();
        commit.put_relation(&relation).unwrap();
        store.commit(commit).await.unwrap();

        for side in ["ndk://wiki/eng/guides", "ndk://wiki/eng/guides/setup.md"] {
            let found = store.relations_of(&uri(side)).await.unwrap();
            assert_eq!(found, vec![relation.clone()]);
        }

        let mut commit = CommitSet::new();
        commit.delete_relation(&relation);
        store.commit(commit).await.unwrap();
        assert!(store
            .relations_of(&uri("ndk://wiki/eng/guides"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_bundle_reads_as_missing() {
        let objects = Arc::new(MemoryStore::new());
        let store = KnowledgeStore::new(objects.clone());
        let uri = uri("ndk://wiki/eng/page");
        objects
            .put(&bundle_key(&uri, Affordance::Body), b"not json".to_vec())
            .await
            .unwrap();
        assert!(store
            .read_bundle(&uri, Affordance::Body)
            .await
            .unwrap()
            .is_none());
    }
}
