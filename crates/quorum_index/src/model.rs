//! Records synchronized from the data source.
//!
//! Everything here is plain serde data: the store persists these records as
//! JSON payloads and the sync stages mutate in-memory working copies of them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Holder addresses backing an NFT-collection voting-power strategy.
pub type HolderSet = BTreeSet<String>;
/// Voting power per voter address.
pub type PowerMap = BTreeMap<String, u128>;
/// Resolved vote per voter address.
pub type VoteMap = BTreeMap<String, Vote>;
/// All known proposals keyed by proposal address.
pub type ProposalMap = BTreeMap<String, ProposalRecord>;

/// Root registry record of the data source, fetched once at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub address: String,
    pub id: u64,
}

/// Descriptive DAO metadata as reported by the source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaoMetadata {
    pub name: String,
    pub about: String,
    pub avatar: Option<String>,
    pub website: Option<String>,
}

/// Administrative role descriptors for a DAO.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaoRoles {
    pub owner: String,
    pub proposal_owner: String,
}

/// How a voter's weight is derived for a proposal.
///
/// Only `NftCollection` needs the lazily resolved holder set; additional
/// strategies must not change the voting-data sync control flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerStrategy {
    TokenBalance,
    JettonBalance,
    NftCollection,
}

impl PowerStrategy {
    /// Whether tallying under this strategy requires the cached holder set.
    pub fn needs_holder_index(self) -> bool {
        matches!(self, PowerStrategy::NftCollection)
    }
}

/// Immutable proposal metadata fetched at discovery time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalMetadata {
    /// Source-assigned numeric id, ascending within a DAO.
    pub id: u64,
    /// Voting window open, unix seconds.
    pub start_time: u64,
    /// Voting window close, unix seconds.
    pub end_time: u64,
    pub strategy: PowerStrategy,
    /// Governed asset (jetton master or NFT collection) when the strategy
    /// needs one.
    pub asset: Option<String>,
}

/// One on-chain transaction sent to a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    /// Source-assigned logical time; strictly increasing per proposal.
    pub lt: u64,
    pub utime: u64,
    pub source: String,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}

/// A voter's resolved ballot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub utime: u64,
    pub choice: VoteChoice,
}

/// Aggregate tally over a proposal's merged transaction log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub yes: u128,
    pub no: u128,
    pub abstain: u128,
    pub total_weight: u128,
}

/// Cumulative voting state for one proposal.
///
/// `transactions` is the union of every log page ever fetched, never
/// truncated; `max_lt` is monotonically non-decreasing across updates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingData {
    pub transactions: Vec<Transaction>,
    pub max_lt: Option<u64>,
    pub voting_power: PowerMap,
    pub votes: VoteMap,
    pub result: AggregateResult,
}

/// One proposal as tracked by the indexer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub address: String,
    pub dao_address: String,
    pub metadata: ProposalMetadata,
    /// Absent until the first voting-data reconciliation.
    pub voting_data: Option<VotingData>,
}

/// One DAO as tracked by the indexer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaoRecord {
    pub address: String,
    /// Source-assigned monotonic ordinal; iteration order key.
    pub ordinal: u64,
    pub metadata: DaoMetadata,
    pub roles: DaoRoles,
    /// Next unseen proposal ordinal for this DAO.
    pub next_proposal_cursor: u64,
    /// Known proposal addresses, ascending by proposal numeric id.
    pub proposals: Vec<String>,
}

/// The full DAO collection plus its discovery cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaoIndex {
    /// Next unseen DAO ordinal.
    pub next_cursor: u64,
    /// DAO records, kept sorted ascending by ordinal after each sync.
    pub daos: Vec<DaoRecord>,
}

impl DaoIndex {
    pub fn get(&self, address: &str) -> Option<&DaoRecord> {
        self.daos.iter().find(|d| d.address == address)
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut DaoRecord> {
        self.daos.iter_mut().find(|d| d.address == address)
    }

    /// Insert a freshly hydrated record, or refresh the source-owned fields
    /// of an existing one. The per-DAO proposal cursor and proposal list are
    /// never reset by re-discovery.
    pub fn upsert(&mut self, record: DaoRecord) {
        match self.get_mut(&record.address) {
            Some(existing) => {
                existing.ordinal = record.ordinal;
                existing.metadata = record.metadata;
                existing.roles = record.roles;
            }
            None => self.daos.push(record),
        }
    }

    /// Stable ascending sort by ordinal, keeping downstream iteration order
    /// deterministic.
    pub fn sort_by_ordinal(&mut self) {
        self.daos.sort_by_key(|d| d.ordinal);
    }
}
