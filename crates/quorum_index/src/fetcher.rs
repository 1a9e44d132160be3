//! Run orchestration for the sync pipeline.
//!
//! A `Fetcher` owns the process-wide run state: the single-flight latch, the
//! in-memory lifecycle sets, and the per-proposal last-fetch map. Stages run
//! strictly in order inside one run; any stage failure aborts the remainder
//! of the run, and the next scheduled invocation retries from the cursors the
//! store last persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::lifecycle::{self, ProposalsByState};
use crate::source::SourceClient;
use crate::store::StateStore;
use crate::{daos, holders, proposals, voting};

/// Batching knobs for the discovery and hydration stages.
///
/// Page limits bound a single discovery request; chunk sizes bound the number
/// of concurrently in-flight metadata requests against the rate-limited
/// source. Chunks execute sequentially relative to each other.
#[derive(Clone, Copy, Debug)]
pub struct FetcherConfig {
    /// Max DAO addresses requested per discovery page.
    pub dao_page_limit: usize,
    /// Max proposal addresses requested per per-DAO discovery page.
    pub proposal_page_limit: usize,
    /// Concurrent DAO hydrations per chunk.
    pub dao_chunk_size: usize,
    /// Concurrent proposal-metadata hydrations per chunk.
    pub proposal_chunk_size: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            dao_page_limit: 100,
            proposal_page_limit: 100,
            dao_chunk_size: 35,
            proposal_chunk_size: 35,
        }
    }
}

/// Drives the sync pipeline against one source and one store.
pub struct Fetcher {
    client: Arc<dyn SourceClient>,
    store: Arc<dyn StateStore>,
    config: FetcherConfig,
    /// Single-flight latch; `true` means no run is in progress.
    finished: AtomicBool,
    states: Mutex<ProposalsByState>,
    /// Unix millis of the last *attempted* voting-data fetch per proposal.
    last_fetch: Mutex<HashMap<String, u64>>,
}

impl Fetcher {
    pub fn new(client: Arc<dyn SourceClient>, store: Arc<dyn StateStore>) -> Self {
        Self::with_config(client, store, FetcherConfig::default())
    }

    pub fn with_config(
        client: Arc<dyn SourceClient>,
        store: Arc<dyn StateStore>,
        config: FetcherConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
            finished: AtomicBool::new(true),
            states: Mutex::new(ProposalsByState::default()),
            last_fetch: Mutex::new(HashMap::new()),
        }
    }

    /// One-time startup: record the source registry and rebuild lifecycle
    /// tracking for proposals persisted by an earlier process, so voting-data
    /// reconciliation resumes after a restart.
    pub async fn init(&self) -> anyhow::Result<()> {
        let registry = self
            .client
            .registry()
            .await
            .context("fetching source registry")?;
        info!(address = %registry.address, id = registry.id, "starting with registry");
        self.store.set_registry(&registry);

        let proposals = self.store.proposals();
        if !proposals.is_empty() {
            let mut states = self.states.lock().await;
            for address in proposals.keys() {
                states.track(address);
            }
            lifecycle::reclassify(&mut states, &proposals, unix_time_secs());
            info!(
                pending = states.pending.len(),
                active = states.active.len(),
                ended = states.ended.len(),
                "lifecycle tracking rebuilt from store"
            );
        }
        Ok(())
    }

    /// Execute one full pipeline run. No-op if a run is already in flight;
    /// errors never escape — they are logged and the latch resets, leaving
    /// retry to the next scheduled invocation.
    pub async fn run(&self) {
        if self
            .finished
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("skipping run, previous fetch still in progress");
            return;
        }

        let started = Instant::now();
        match self.run_once().await {
            Ok(()) => {
                self.store.set_last_update(unix_time_ms());
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "fetch run complete"
                );
            }
            Err(err) => warn!(error = ?err, "fetch run failed"),
        }
        self.finished.store(true, Ordering::SeqCst);
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let mut states = self.states.lock().await;

        daos::sync_daos(self.client.as_ref(), self.store.as_ref(), &self.config).await?;
        proposals::sync_proposals(
            self.client.as_ref(),
            self.store.as_ref(),
            &self.config,
            &mut states,
        )
        .await?;
        lifecycle::reclassify(&mut states, &self.store.proposals(), unix_time_secs());
        holders::resolve_missing_holders(self.client.as_ref(), self.store.as_ref()).await?;
        voting::sync_voting_data(
            self.client.as_ref(),
            self.store.as_ref(),
            &states,
            &self.last_fetch,
        )
        .await?;
        Ok(())
    }

    /// Unix millis of the most recent attempted voting-data fetch for a
    /// proposal, whether or not it found new data.
    pub async fn last_fetch_time(&self, proposal: &str) -> Option<u64> {
        self.last_fetch.lock().await.get(proposal).copied()
    }

    /// Snapshot of the lifecycle sets.
    pub async fn lifecycle(&self) -> ProposalsByState {
        self.states.lock().await.clone()
    }

    /// Whether no run is currently in flight.
    pub fn is_idle(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

pub(crate) fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

pub(crate) fn unix_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
