//! Shared helpers for integration tests: a scripted source client plus
//! fetcher/store builders.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use quorum_index::model::{
    AggregateResult, DaoMetadata, DaoRoles, HolderSet, PowerMap, PowerStrategy, ProposalMetadata,
    Registry, Transaction, Vote, VoteChoice, VoteMap,
};
use quorum_index::source::{DaoPage, Order, ProposalPage, SourceClient, TxPage};
use quorum_index::store::MemoryStore;
use quorum_index::{Fetcher, FetcherConfig};

/// Per-operation invocation counters for memoization assertions.
#[derive(Default)]
pub struct Calls {
    pub list_daos: AtomicUsize,
    pub dao_metadata: AtomicUsize,
    pub list_proposals: AtomicUsize,
    pub proposal_metadata: AtomicUsize,
    pub nft_holders: AtomicUsize,
    pub transactions: AtomicUsize,
    pub voting_power: AtomicUsize,
}

pub struct MockProposal {
    pub address: String,
    pub metadata: ProposalMetadata,
    pub tx_log: Vec<Transaction>,
    pub holders: HolderSet,
}

pub struct MockDao {
    pub address: String,
    pub ordinal: u64,
    pub proposals: Vec<MockProposal>,
}

#[derive(Default)]
struct MockData {
    daos: Vec<MockDao>,
    fail_dao_metadata: bool,
    fail_proposal_metadata: bool,
    fail_transactions: bool,
    fail_holders: bool,
}

/// Scripted in-memory data source. DAO and proposal cursors are plain
/// indexes into the scripted vectors, so `end_cursor` is always
/// `since + returned`.
#[derive(Default)]
pub struct MockSource {
    data: Mutex<MockData>,
    pub calls: Calls,
    dao_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_dao(&self, address: &str, ordinal: u64) {
        self.data.lock().expect("mock data").daos.push(MockDao {
            address: address.to_string(),
            ordinal,
            proposals: Vec::new(),
        });
    }

    pub fn push_proposal(&self, dao_address: &str, proposal: MockProposal) {
        let mut data = self.data.lock().expect("mock data");
        let dao = data
            .daos
            .iter_mut()
            .find(|d| d.address == dao_address)
            .expect("unknown mock dao");
        dao.proposals.push(proposal);
    }

    pub fn push_transaction(&self, proposal_address: &str, tx: Transaction) {
        let mut data = self.data.lock().expect("mock data");
        for dao in &mut data.daos {
            if let Some(proposal) = dao
                .proposals
                .iter_mut()
                .find(|p| p.address == proposal_address)
            {
                proposal.tx_log.push(tx);
                return;
            }
        }
        panic!("unknown mock proposal {proposal_address}");
    }

    pub fn set_fail_dao_metadata(&self, fail: bool) {
        self.data.lock().expect("mock data").fail_dao_metadata = fail;
    }

    pub fn set_fail_proposal_metadata(&self, fail: bool) {
        self.data.lock().expect("mock data").fail_proposal_metadata = fail;
    }

    pub fn set_fail_transactions(&self, fail: bool) {
        self.data.lock().expect("mock data").fail_transactions = fail;
    }

    pub fn set_fail_holders(&self, fail: bool) {
        self.data.lock().expect("mock data").fail_holders = fail;
    }

    /// Make `list_daos` block until a permit is added to the returned
    /// semaphore.
    pub fn install_dao_gate(&self) -> Arc<Semaphore> {
        let sem = Arc::new(Semaphore::new(0));
        *self.dao_gate.lock().expect("dao gate") = Some(sem.clone());
        sem
    }

    fn find_proposal<T>(
        &self,
        pick: impl Fn(&MockProposal) -> bool,
        map: impl Fn(&MockProposal) -> T,
    ) -> Option<T> {
        let data = self.data.lock().expect("mock data");
        data.daos
            .iter()
            .flat_map(|d| d.proposals.iter())
            .find(|p| pick(p))
            .map(map)
    }
}

#[async_trait]
impl SourceClient for MockSource {
    async fn registry(&self) -> anyhow::Result<Registry> {
        Ok(Registry {
            address: "registry".to_string(),
            id: 1,
        })
    }

    async fn list_daos(
        &self,
        since_cursor: u64,
        limit: usize,
        _order: Order,
    ) -> anyhow::Result<DaoPage> {
        self.calls.list_daos.fetch_add(1, Ordering::SeqCst);
        let gate = self.dao_gate.lock().expect("dao gate").clone();
        if let Some(sem) = gate {
            let _permit = sem.acquire().await.expect("dao gate closed");
        }

        let data = self.data.lock().expect("mock data");
        let since = since_cursor as usize;
        let addresses: Vec<String> = data
            .daos
            .iter()
            .skip(since)
            .take(limit)
            .map(|d| d.address.clone())
            .collect();
        let end_cursor = since_cursor + addresses.len() as u64;
        Ok(DaoPage {
            addresses,
            end_cursor,
        })
    }

    async fn dao_metadata(&self, address: &str) -> anyhow::Result<DaoMetadata> {
        self.calls.dao_metadata.fetch_add(1, Ordering::SeqCst);
        let data = self.data.lock().expect("mock data");
        anyhow::ensure!(!data.fail_dao_metadata, "dao metadata unavailable");
        anyhow::ensure!(
            data.daos.iter().any(|d| d.address == address),
            "unknown dao {address}"
        );
        Ok(DaoMetadata {
            name: format!("{address} dao"),
            about: String::new(),
            avatar: None,
            website: None,
        })
    }

    async fn dao_roles(&self, address: &str) -> anyhow::Result<DaoRoles> {
        Ok(DaoRoles {
            owner: format!("owner-{address}"),
            proposal_owner: format!("proposer-{address}"),
        })
    }

    async fn dao_ordinal(&self, address: &str) -> anyhow::Result<u64> {
        let data = self.data.lock().expect("mock data");
        data.daos
            .iter()
            .find(|d| d.address == address)
            .map(|d| d.ordinal)
            .ok_or_else(|| anyhow::anyhow!("unknown dao {address}"))
    }

    async fn list_proposals(
        &self,
        dao_address: &str,
        since_cursor: u64,
        limit: usize,
        _order: Order,
    ) -> anyhow::Result<ProposalPage> {
        self.calls.list_proposals.fetch_add(1, Ordering::SeqCst);
        let data = self.data.lock().expect("mock data");
        let dao = data
            .daos
            .iter()
            .find(|d| d.address == dao_address)
            .ok_or_else(|| anyhow::anyhow!("unknown dao {dao_address}"))?;
        let since = since_cursor as usize;
        let addresses: Vec<String> = dao
            .proposals
            .iter()
            .skip(since)
            .take(limit)
            .map(|p| p.address.clone())
            .collect();
        let end_cursor = since_cursor + addresses.len() as u64;
        Ok(ProposalPage {
            addresses,
            end_cursor,
        })
    }

    async fn proposal_metadata(&self, address: &str) -> anyhow::Result<ProposalMetadata> {
        self.calls.proposal_metadata.fetch_add(1, Ordering::SeqCst);
        {
            let data = self.data.lock().expect("mock data");
            anyhow::ensure!(!data.fail_proposal_metadata, "proposal metadata unavailable");
        }
        self.find_proposal(|p| p.address == address, |p| p.metadata.clone())
            .ok_or_else(|| anyhow::anyhow!("unknown proposal {address}"))
    }

    async fn nft_holders(&self, metadata: &ProposalMetadata) -> anyhow::Result<HolderSet> {
        self.calls.nft_holders.fetch_add(1, Ordering::SeqCst);
        {
            let data = self.data.lock().expect("mock data");
            anyhow::ensure!(!data.fail_holders, "holder lookup unavailable");
        }
        self.find_proposal(|p| p.metadata == *metadata, |p| p.holders.clone())
            .ok_or_else(|| anyhow::anyhow!("no proposal for holder lookup"))
    }

    async fn transactions_since(
        &self,
        proposal_address: &str,
        max_lt: Option<u64>,
    ) -> anyhow::Result<TxPage> {
        self.calls.transactions.fetch_add(1, Ordering::SeqCst);
        {
            let data = self.data.lock().expect("mock data");
            anyhow::ensure!(!data.fail_transactions, "transaction fetch unavailable");
        }
        let log = self
            .find_proposal(|p| p.address == proposal_address, |p| p.tx_log.clone())
            .ok_or_else(|| anyhow::anyhow!("unknown proposal {proposal_address}"))?;

        let floor = max_lt.unwrap_or(0);
        let mut transactions: Vec<Transaction> = log
            .into_iter()
            .filter(|tx| max_lt.is_none() || tx.lt > floor)
            .collect();
        transactions.sort_by(|a, b| b.lt.cmp(&a.lt));

        let log_max = transactions.first().map(|tx| tx.lt);
        let page_max = match (log_max, max_lt) {
            (Some(m), Some(prior)) => Some(m.max(prior)),
            (Some(m), None) => Some(m),
            (None, prior) => prior,
        };
        Ok(TxPage {
            transactions,
            max_lt: page_max,
        })
    }

    fn votes(
        &self,
        transactions: &[Transaction],
        _metadata: &ProposalMetadata,
    ) -> anyhow::Result<VoteMap> {
        Ok(votes_from(transactions))
    }

    async fn voting_power(
        &self,
        _metadata: &ProposalMetadata,
        transactions: &[Transaction],
        prior: &PowerMap,
        strategy: PowerStrategy,
        holders: Option<&HolderSet>,
    ) -> anyhow::Result<PowerMap> {
        self.calls.voting_power.fetch_add(1, Ordering::SeqCst);
        let mut power = prior.clone();
        for tx in transactions {
            let weight = match strategy {
                PowerStrategy::NftCollection => holders
                    .map(|h| u128::from(h.contains(&tx.source)))
                    .unwrap_or(0),
                _ => 1,
            };
            power.insert(tx.source.clone(), weight);
        }
        Ok(power)
    }

    fn aggregate(
        &self,
        transactions: &[Transaction],
        power: &PowerMap,
        _metadata: &ProposalMetadata,
    ) -> anyhow::Result<AggregateResult> {
        let mut result = AggregateResult::default();
        for (voter, vote) in votes_from(transactions) {
            let weight = power.get(&voter).copied().unwrap_or(0);
            match vote.choice {
                VoteChoice::Yes => result.yes += weight,
                VoteChoice::No => result.no += weight,
                VoteChoice::Abstain => result.abstain += weight,
            }
            result.total_weight += weight;
        }
        Ok(result)
    }
}

/// Ballot parsing shared by the mock's `votes` and `aggregate`: first
/// occurrence wins, and merged logs put newest transactions first, so a
/// voter's latest ballot counts.
pub fn votes_from(transactions: &[Transaction]) -> VoteMap {
    let mut votes = VoteMap::new();
    for tx in transactions {
        let choice = match tx.message.trim().to_ascii_lowercase().as_str() {
            "yes" => VoteChoice::Yes,
            "no" => VoteChoice::No,
            "abstain" => VoteChoice::Abstain,
            _ => continue,
        };
        votes.entry(tx.source.clone()).or_insert(Vote {
            utime: tx.utime,
            choice,
        });
    }
    votes
}

pub fn proposal_meta(id: u64, start: u64, end: u64) -> ProposalMetadata {
    ProposalMetadata {
        id,
        start_time: start,
        end_time: end,
        strategy: PowerStrategy::TokenBalance,
        asset: None,
    }
}

pub fn nft_proposal_meta(id: u64, start: u64, end: u64, asset: &str) -> ProposalMetadata {
    ProposalMetadata {
        id,
        start_time: start,
        end_time: end,
        strategy: PowerStrategy::NftCollection,
        asset: Some(asset.to_string()),
    }
}

pub fn mock_proposal(address: &str, metadata: ProposalMetadata) -> MockProposal {
    MockProposal {
        address: address.to_string(),
        metadata,
        tx_log: Vec::new(),
        holders: HolderSet::new(),
    }
}

pub fn tx(hash: &str, lt: u64, source: &str, message: &str) -> Transaction {
    Transaction {
        hash: hash.to_string(),
        lt,
        utime: lt / 1_000,
        source: source.to_string(),
        message: message.to_string(),
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs()
}

pub fn build_fetcher(client: Arc<MockSource>) -> (Fetcher, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Fetcher::new(client, store.clone());
    (fetcher, store)
}

pub fn build_fetcher_with_config(
    client: Arc<MockSource>,
    config: FetcherConfig,
) -> (Fetcher, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Fetcher::with_config(client, store.clone(), config);
    (fetcher, store)
}
