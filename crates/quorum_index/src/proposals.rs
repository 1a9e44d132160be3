//! Per-DAO proposal discovery and hydration stage.
//!
//! All DAOs are polled concurrently; within one DAO, newly discovered
//! proposal addresses are hydrated in fixed-size chunks (sequential across
//! chunks, concurrent within). Results are aggregated only after every DAO's
//! fan-out has resolved, and nothing is persisted when any DAO failed, so the
//! per-DAO cursors stay put for the next run to retry from.

use anyhow::Context;
use futures_util::future::{join_all, try_join_all};
use tracing::{debug, info, warn};

use crate::fetcher::FetcherConfig;
use crate::lifecycle::ProposalsByState;
use crate::model::{DaoRecord, ProposalRecord};
use crate::source::{Order, SourceClient};
use crate::store::StateStore;

struct DaoDelta {
    dao_address: String,
    end_cursor: u64,
    records: Vec<ProposalRecord>,
}

pub(crate) async fn sync_proposals(
    client: &dyn SourceClient,
    store: &dyn StateStore,
    config: &FetcherConfig,
    states: &mut ProposalsByState,
) -> anyhow::Result<()> {
    let mut index = store.dao_index();
    let mut proposals = store.proposals();

    // Let every DAO finish discovering before surfacing the first failure;
    // one DAO's outage must not cancel the fetch work of the others.
    let results = join_all(
        index
            .daos
            .iter()
            .map(|dao| fetch_dao_proposals(client, config, dao)),
    )
    .await;

    let mut deltas = Vec::new();
    let mut first_err = None;
    for result in results {
        match result {
            Ok(Some(delta)) => deltas.push(delta),
            Ok(None) => {}
            Err(err) if first_err.is_none() => first_err = Some(err),
            Err(_) => {}
        }
    }
    if let Some(err) = first_err {
        return Err(err);
    }

    for delta in deltas {
        let Some(dao) = index.get_mut(&delta.dao_address) else {
            warn!(dao = %delta.dao_address, "dao record missing while applying proposals, skipping");
            continue;
        };

        let mut fresh: Vec<(u64, String)> = Vec::with_capacity(delta.records.len());
        for record in delta.records {
            if !states.is_tracked(&record.address) {
                states.track(&record.address);
            }
            if record.metadata.strategy.needs_holder_index() {
                store.push_holder_backlog(&record.address);
            }
            fresh.push((record.metadata.id, record.address.clone()));
            proposals.insert(record.address.clone(), record);
        }

        fresh.sort_by_key(|(id, _)| *id);
        dao.proposals.extend(fresh.into_iter().map(|(_, addr)| addr));
        dao.next_proposal_cursor = delta.end_cursor;
    }

    store.set_proposals(&proposals);
    store.set_dao_index(&index);
    Ok(())
}

async fn fetch_dao_proposals(
    client: &dyn SourceClient,
    config: &FetcherConfig,
    dao: &DaoRecord,
) -> anyhow::Result<Option<DaoDelta>> {
    let page = client
        .list_proposals(
            &dao.address,
            dao.next_proposal_cursor,
            config.proposal_page_limit,
            Order::Asc,
        )
        .await
        .with_context(|| format!("listing proposals for dao {}", dao.address))?;

    if page.addresses.is_empty() {
        debug!(dao = %dao.address, "no new proposals");
        return Ok(None);
    }
    info!(
        dao = %dao.address,
        count = page.addresses.len(),
        "hydrating newly discovered proposals"
    );

    let mut records = Vec::with_capacity(page.addresses.len());
    for chunk in page.addresses.chunks(config.proposal_chunk_size.max(1)) {
        let hydrated = try_join_all(chunk.iter().map(|address| async move {
            let metadata = client
                .proposal_metadata(address)
                .await
                .with_context(|| format!("hydrating proposal {address}"))?;
            Ok::<_, anyhow::Error>(ProposalRecord {
                address: address.clone(),
                dao_address: dao.address.clone(),
                metadata,
                voting_data: None,
            })
        }))
        .await?;
        records.extend(hydrated);
    }

    Ok(Some(DaoDelta {
        dao_address: dao.address.clone(),
        end_cursor: page.end_cursor,
        records,
    }))
}
