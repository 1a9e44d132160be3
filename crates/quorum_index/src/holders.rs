//! Lazy holder-set resolution for NFT-collection strategy proposals.
//!
//! The backlog is small and memoized, so fan-out is unbounded. A cached
//! address skips the external call but still clears its backlog entry; a
//! failed resolution aborts the run and the surviving entry retries on the
//! next one.

use anyhow::Context;
use futures_util::future::try_join_all;
use tracing::{debug, info, warn};

use crate::model::ProposalMap;
use crate::source::SourceClient;
use crate::store::StateStore;

pub(crate) async fn resolve_missing_holders(
    client: &dyn SourceClient,
    store: &dyn StateStore,
) -> anyhow::Result<()> {
    let backlog = store.holder_backlog();
    if backlog.is_empty() {
        return Ok(());
    }
    let proposals = store.proposals();

    try_join_all(
        backlog
            .iter()
            .map(|address| resolve_one(client, store, &proposals, address)),
    )
    .await?;
    Ok(())
}

async fn resolve_one(
    client: &dyn SourceClient,
    store: &dyn StateStore,
    proposals: &ProposalMap,
    address: &str,
) -> anyhow::Result<()> {
    if store.nft_holders(address).is_some() {
        debug!(proposal = %address, "holder set already cached, skipping fetch");
    } else {
        let Some(record) = proposals.get(address) else {
            // Leave the backlog entry; the record may appear on a later run.
            warn!(proposal = %address, "backlog entry without proposal record, skipping");
            return Ok(());
        };
        let holders = client
            .nft_holders(&record.metadata)
            .await
            .with_context(|| format!("resolving holder set for proposal {address}"))?;
        info!(proposal = %address, holders = holders.len(), "holder set cached");
        store.set_nft_holders(address, &holders);
    }

    store.clear_holder_backlog(address);
    Ok(())
}
