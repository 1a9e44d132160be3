//! DAO discovery and hydration stage.
//!
//! One cursor page of new DAO addresses per run, hydrated in fixed-size
//! chunks: chunks run sequentially, addresses within a chunk concurrently,
//! and the three per-address reads in parallel. The cursor only advances
//! after every chunk resolved, and the store write happens once at stage end,
//! so a failed fetch leaves the persisted cursor untouched.

use anyhow::Context;
use futures_util::future::try_join_all;
use tracing::{debug, info};

use crate::fetcher::FetcherConfig;
use crate::model::DaoRecord;
use crate::source::{Order, SourceClient};
use crate::store::StateStore;

pub(crate) async fn sync_daos(
    client: &dyn SourceClient,
    store: &dyn StateStore,
    config: &FetcherConfig,
) -> anyhow::Result<()> {
    let mut index = store.dao_index();
    let page = client
        .list_daos(index.next_cursor, config.dao_page_limit, Order::Asc)
        .await
        .context("listing daos")?;

    if page.addresses.is_empty() {
        debug!(cursor = index.next_cursor, "no new daos");
        return Ok(());
    }
    info!(
        count = page.addresses.len(),
        cursor = index.next_cursor,
        "hydrating newly discovered daos"
    );

    for chunk in page.addresses.chunks(config.dao_chunk_size.max(1)) {
        let records = try_join_all(chunk.iter().map(|address| hydrate_dao(client, address))).await?;
        for record in records {
            index.upsert(record);
        }
    }

    index.next_cursor = page.end_cursor;
    index.sort_by_ordinal();
    store.set_dao_index(&index);
    Ok(())
}

async fn hydrate_dao(client: &dyn SourceClient, address: &str) -> anyhow::Result<DaoRecord> {
    let (metadata, roles, ordinal) = tokio::try_join!(
        client.dao_metadata(address),
        client.dao_roles(address),
        client.dao_ordinal(address),
    )
    .with_context(|| format!("hydrating dao {address}"))?;

    Ok(DaoRecord {
        address: address.to_string(),
        ordinal,
        metadata,
        roles,
        next_proposal_cursor: 0,
        proposals: Vec::new(),
    })
}
