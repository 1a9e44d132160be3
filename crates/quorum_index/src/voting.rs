//! Voting-data reconciliation for active and ended proposals.
//!
//! Incremental fetch, cumulative recompute: only transactions above the
//! stored `max_lt` are requested, but votes, voting power, and the aggregate
//! result are always recomputed from the full merged log, because voting
//! power can depend on cumulative holder/stake state rather than the delta.
//!
//! An ended proposal whose log was once confirmed non-growing is skipped
//! forever via the in-memory last-fetch map.

use std::collections::HashMap;

use anyhow::Context;
use futures_util::future::try_join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::fetcher::unix_time_ms;
use crate::lifecycle::ProposalsByState;
use crate::model::{ProposalMap, VotingData};
use crate::source::SourceClient;
use crate::store::StateStore;

pub(crate) async fn sync_voting_data(
    client: &dyn SourceClient,
    store: &dyn StateStore,
    states: &ProposalsByState,
    last_fetch: &Mutex<HashMap<String, u64>>,
) -> anyhow::Result<()> {
    let targets: Vec<String> = states
        .active
        .iter()
        .chain(states.ended.iter())
        .cloned()
        .collect();
    if targets.is_empty() {
        return Ok(());
    }
    let proposals = store.proposals();

    try_join_all(
        targets
            .iter()
            .map(|address| reconcile_one(client, store, &proposals, states, last_fetch, address)),
    )
    .await?;
    Ok(())
}

async fn reconcile_one(
    client: &dyn SourceClient,
    store: &dyn StateStore,
    proposals: &ProposalMap,
    states: &ProposalsByState,
    last_fetch: &Mutex<HashMap<String, u64>>,
    address: &str,
) -> anyhow::Result<()> {
    // Terminal memoization: an ended proposal already probed once after its
    // log stopped growing is never fetched again.
    if states.ended.contains(address) && last_fetch.lock().await.contains_key(address) {
        return Ok(());
    }

    let Some(record) = proposals.get(address) else {
        warn!(proposal = %address, "tracked proposal has no record, skipping");
        return Ok(());
    };
    let voting = record.voting_data.clone().unwrap_or_default();

    let page = client
        .transactions_since(address, voting.max_lt)
        .await
        .with_context(|| format!("fetching transactions for proposal {address}"))?;

    if page.max_lt == voting.max_lt {
        debug!(proposal = %address, max_lt = ?voting.max_lt, "no new transactions");
        last_fetch
            .lock()
            .await
            .insert(address.to_string(), unix_time_ms());
        return Ok(());
    }

    // New transactions come first; the stored tail is the union of every
    // earlier fetch and is never truncated.
    let mut transactions = page.transactions;
    transactions.extend(voting.transactions.iter().cloned());

    let votes = client.votes(&transactions, &record.metadata)?;
    let holders = store.nft_holders(address);
    let voting_power = client
        .voting_power(
            &record.metadata,
            &transactions,
            &voting.voting_power,
            record.metadata.strategy,
            holders.as_ref(),
        )
        .await
        .with_context(|| format!("recomputing voting power for proposal {address}"))?;
    let result = client.aggregate(&transactions, &voting_power, &record.metadata)?;

    let mut updated = record.clone();
    updated.voting_data = Some(VotingData {
        transactions,
        max_lt: page.max_lt,
        voting_power,
        votes,
        result,
    });
    info!(proposal = %address, max_lt = ?page.max_lt, "voting data updated");
    store.set_proposal(&updated);

    last_fetch
        .lock()
        .await
        .insert(address.to_string(), unix_time_ms());
    Ok(())
}
