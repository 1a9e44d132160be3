//! Keyed state storage behind the indexer.
//!
//! The trait models synchronous snapshot reads and whole-collection writes at
//! stage boundaries; the sync stages own the only writer during a run. Two
//! engines are provided: an in-memory store for tests and embedding, and a
//! fjall-backed store with one partition per collection. Engine-internal
//! failures are logged rather than propagated — a missing or corrupt record
//! degrades to "not yet synchronized" and the next run repairs it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::model::{DaoIndex, HolderSet, ProposalMap, ProposalRecord, Registry};

pub trait StateStore: Send + Sync + 'static {
    fn registry(&self) -> Option<Registry>;
    fn set_registry(&self, registry: &Registry);

    fn dao_index(&self) -> DaoIndex;
    fn set_dao_index(&self, index: &DaoIndex);

    fn proposals(&self) -> ProposalMap;
    fn set_proposals(&self, proposals: &ProposalMap);
    /// Single-record write used by the voting-data stage.
    fn set_proposal(&self, record: &ProposalRecord);

    fn nft_holders(&self, proposal: &str) -> Option<HolderSet>;
    fn set_nft_holders(&self, proposal: &str, holders: &HolderSet);

    /// Proposal addresses still awaiting holder-set resolution.
    fn holder_backlog(&self) -> BTreeSet<String>;
    fn push_holder_backlog(&self, proposal: &str);
    fn clear_holder_backlog(&self, proposal: &str);

    /// Unix millis of the last fully successful run.
    fn last_update(&self) -> Option<u64>;
    fn set_last_update(&self, unix_ms: u64);
}

#[derive(Default)]
struct MemoryInner {
    registry: Option<Registry>,
    daos: DaoIndex,
    proposals: ProposalMap,
    holders: BTreeMap<String, HolderSet>,
    backlog: BTreeSet<String>,
    last_update: Option<u64>,
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn registry(&self) -> Option<Registry> {
        self.inner.read().ok()?.registry.clone()
    }

    fn set_registry(&self, registry: &Registry) {
        if let Ok(mut guard) = self.inner.write() {
            guard.registry = Some(registry.clone());
        }
    }

    fn dao_index(&self) -> DaoIndex {
        self.inner
            .read()
            .map(|g| g.daos.clone())
            .unwrap_or_default()
    }

    fn set_dao_index(&self, index: &DaoIndex) {
        if let Ok(mut guard) = self.inner.write() {
            guard.daos = index.clone();
        }
    }

    fn proposals(&self) -> ProposalMap {
        self.inner
            .read()
            .map(|g| g.proposals.clone())
            .unwrap_or_default()
    }

    fn set_proposals(&self, proposals: &ProposalMap) {
        if let Ok(mut guard) = self.inner.write() {
            guard.proposals = proposals.clone();
        }
    }

    fn set_proposal(&self, record: &ProposalRecord) {
        if let Ok(mut guard) = self.inner.write() {
            guard
                .proposals
                .insert(record.address.clone(), record.clone());
        }
    }

    fn nft_holders(&self, proposal: &str) -> Option<HolderSet> {
        self.inner.read().ok()?.holders.get(proposal).cloned()
    }

    fn set_nft_holders(&self, proposal: &str, holders: &HolderSet) {
        if let Ok(mut guard) = self.inner.write() {
            guard.holders.insert(proposal.to_string(), holders.clone());
        }
    }

    fn holder_backlog(&self) -> BTreeSet<String> {
        self.inner
            .read()
            .map(|g| g.backlog.clone())
            .unwrap_or_default()
    }

    fn push_holder_backlog(&self, proposal: &str) {
        if let Ok(mut guard) = self.inner.write() {
            guard.backlog.insert(proposal.to_string());
        }
    }

    fn clear_holder_backlog(&self, proposal: &str) {
        if let Ok(mut guard) = self.inner.write() {
            guard.backlog.remove(proposal);
        }
    }

    fn last_update(&self) -> Option<u64> {
        self.inner.read().ok()?.last_update
    }

    fn set_last_update(&self, unix_ms: u64) {
        if let Ok(mut guard) = self.inner.write() {
            guard.last_update = Some(unix_ms);
        }
    }
}

/// Durable store backed by a fjall keyspace, one partition per collection.
pub struct FjallStore {
    keyspace: Arc<Keyspace>,
    meta: PartitionHandle,
    daos: PartitionHandle,
    proposals: PartitionHandle,
    holders: PartitionHandle,
    backlog: PartitionHandle,
}

const META_REGISTRY: &str = "registry";
const META_LAST_UPDATE: &str = "last_update";
const DAO_INDEX_KEY: &str = "index";

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let keyspace = Arc::new(fjall::Config::new(path.as_ref()).open()?);
        let meta = keyspace.open_partition("meta", PartitionCreateOptions::default())?;
        let daos = keyspace.open_partition("daos", PartitionCreateOptions::default())?;
        let proposals = keyspace.open_partition("proposals", PartitionCreateOptions::default())?;
        let holders = keyspace.open_partition("holders", PartitionCreateOptions::default())?;
        let backlog = keyspace.open_partition("holder_backlog", PartitionCreateOptions::default())?;
        Ok(Self {
            keyspace,
            meta,
            daos,
            proposals,
            holders,
            backlog,
        })
    }

    /// Force buffered writes down to disk so a reopen observes them.
    pub fn persist(&self) -> anyhow::Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, partition: &PartitionHandle, key: &str) -> Option<T> {
        let bytes = match partition.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, error = ?err, "store read failed");
                return None;
            }
        };
        decode(&bytes, key)
    }

    fn write<T: Serialize>(&self, partition: &PartitionHandle, key: &str, value: &T) {
        let Some(bytes) = encode(value, key) else {
            return;
        };
        if let Err(err) = partition.insert(key, bytes) {
            warn!(key, error = ?err, "store write failed");
        }
    }
}

impl StateStore for FjallStore {
    fn registry(&self) -> Option<Registry> {
        self.read(&self.meta, META_REGISTRY)
    }

    fn set_registry(&self, registry: &Registry) {
        self.write(&self.meta, META_REGISTRY, registry);
    }

    fn dao_index(&self) -> DaoIndex {
        self.read(&self.daos, DAO_INDEX_KEY).unwrap_or_default()
    }

    fn set_dao_index(&self, index: &DaoIndex) {
        self.write(&self.daos, DAO_INDEX_KEY, index);
    }

    fn proposals(&self) -> ProposalMap {
        let mut out = ProposalMap::new();
        for entry in self.proposals.iter() {
            let (key, value) = match entry {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = ?err, "proposal scan failed");
                    break;
                }
            };
            let address = String::from_utf8_lossy(&key).to_string();
            if let Some(record) = decode::<ProposalRecord>(&value, &address) {
                out.insert(address, record);
            }
        }
        out
    }

    fn set_proposals(&self, proposals: &ProposalMap) {
        let mut batch = self.keyspace.batch();
        for (address, record) in proposals {
            let Some(bytes) = encode(record, address) else {
                continue;
            };
            batch.insert(&self.proposals, address.as_str(), bytes);
        }
        if let Err(err) = batch.commit() {
            warn!(error = ?err, "proposal batch write failed");
        }
    }

    fn set_proposal(&self, record: &ProposalRecord) {
        self.write(&self.proposals, &record.address, record);
    }

    fn nft_holders(&self, proposal: &str) -> Option<HolderSet> {
        self.read(&self.holders, proposal)
    }

    fn set_nft_holders(&self, proposal: &str, holders: &HolderSet) {
        self.write(&self.holders, proposal, holders);
    }

    fn holder_backlog(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for entry in self.backlog.iter() {
            match entry {
                Ok((key, _)) => {
                    out.insert(String::from_utf8_lossy(&key).to_string());
                }
                Err(err) => {
                    warn!(error = ?err, "holder backlog scan failed");
                    break;
                }
            }
        }
        out
    }

    fn push_holder_backlog(&self, proposal: &str) {
        if let Err(err) = self.backlog.insert(proposal, "") {
            warn!(proposal, error = ?err, "holder backlog insert failed");
        }
    }

    fn clear_holder_backlog(&self, proposal: &str) {
        if let Err(err) = self.backlog.remove(proposal) {
            warn!(proposal, error = ?err, "holder backlog remove failed");
        }
    }

    fn last_update(&self) -> Option<u64> {
        self.read(&self.meta, META_LAST_UPDATE)
    }

    fn set_last_update(&self, unix_ms: u64) {
        self.write(&self.meta, META_LAST_UPDATE, &unix_ms);
    }
}

fn encode<T: Serialize>(value: &T, key: &str) -> Option<Vec<u8>> {
    match serde_json::to_vec(value) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            warn!(key, error = ?err, "store record encode failed");
            None
        }
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8], key: &str) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, error = ?err, "store record decode failed");
            None
        }
    }
}
