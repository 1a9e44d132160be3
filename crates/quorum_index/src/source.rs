//! Data-source client contract.
//!
//! The indexer only ever talks to the chain through this trait: paged,
//! cursor-based discovery reads plus the black-box tally computations. Every
//! operation is idempotent, so a failed run can simply be retried from the
//! last persisted cursors.

use async_trait::async_trait;

use crate::model::{
    AggregateResult, DaoMetadata, DaoRoles, HolderSet, PowerMap, PowerStrategy, ProposalMetadata,
    Registry, Transaction, VoteMap,
};

/// Page iteration direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// One page of newly discovered DAO addresses.
#[derive(Clone, Debug)]
pub struct DaoPage {
    pub addresses: Vec<String>,
    /// Cursor marking the end of this page; pass back to resume.
    pub end_cursor: u64,
}

/// One page of newly discovered proposal addresses for a DAO.
#[derive(Clone, Debug)]
pub struct ProposalPage {
    pub addresses: Vec<String>,
    pub end_cursor: u64,
}

/// Transactions newer than a requested logical time.
#[derive(Clone, Debug)]
pub struct TxPage {
    pub transactions: Vec<Transaction>,
    /// Highest logical time covered by the source's log for this proposal.
    /// Equal to the requested value when nothing new exists.
    pub max_lt: Option<u64>,
}

#[async_trait]
pub trait SourceClient: Send + Sync + 'static {
    /// Root registry record; fetched once at startup.
    async fn registry(&self) -> anyhow::Result<Registry>;

    async fn list_daos(
        &self,
        since_cursor: u64,
        limit: usize,
        order: Order,
    ) -> anyhow::Result<DaoPage>;

    async fn dao_metadata(&self, address: &str) -> anyhow::Result<DaoMetadata>;

    async fn dao_roles(&self, address: &str) -> anyhow::Result<DaoRoles>;

    async fn dao_ordinal(&self, address: &str) -> anyhow::Result<u64>;

    async fn list_proposals(
        &self,
        dao_address: &str,
        since_cursor: u64,
        limit: usize,
        order: Order,
    ) -> anyhow::Result<ProposalPage>;

    async fn proposal_metadata(&self, address: &str) -> anyhow::Result<ProposalMetadata>;

    /// Resolve the holder set for an NFT-collection strategy proposal.
    async fn nft_holders(&self, metadata: &ProposalMetadata) -> anyhow::Result<HolderSet>;

    /// Transactions with logical time above `max_lt`, or the whole log when
    /// `None`.
    async fn transactions_since(
        &self,
        proposal_address: &str,
        max_lt: Option<u64>,
    ) -> anyhow::Result<TxPage>;

    /// Resolve per-voter ballots from a merged transaction log.
    fn votes(
        &self,
        transactions: &[Transaction],
        metadata: &ProposalMetadata,
    ) -> anyhow::Result<VoteMap>;

    /// Recompute per-voter weight from the merged log. Async because some
    /// strategies consult cumulative remote state.
    async fn voting_power(
        &self,
        metadata: &ProposalMetadata,
        transactions: &[Transaction],
        prior: &PowerMap,
        strategy: PowerStrategy,
        holders: Option<&HolderSet>,
    ) -> anyhow::Result<PowerMap>;

    /// Fold ballots and weights into the aggregate tally.
    fn aggregate(
        &self,
        transactions: &[Transaction],
        power: &PowerMap,
        metadata: &ProposalMetadata,
    ) -> anyhow::Result<AggregateResult>;
}
