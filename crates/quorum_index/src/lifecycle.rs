//! Proposal lifecycle classification.
//!
//! Pure and synchronous: given the wall clock and the proposal metadata view,
//! move addresses between the three disjoint sets. Transitions only ever go
//! Pending→Active, Pending→Ended, or Active→Ended; Ended is terminal.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::model::ProposalMap;

/// The three disjoint lifecycle sets. A tracked proposal is in exactly one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProposalsByState {
    pub pending: BTreeSet<String>,
    pub active: BTreeSet<String>,
    pub ended: BTreeSet<String>,
}

impl ProposalsByState {
    /// Start tracking a newly discovered proposal.
    pub fn track(&mut self, address: &str) {
        self.pending.insert(address.to_string());
    }

    pub fn is_tracked(&self, address: &str) -> bool {
        self.pending.contains(address)
            || self.active.contains(address)
            || self.ended.contains(address)
    }
}

/// Reclassify every tracked proposal against `now` (unix seconds).
///
/// The Pending pass runs first; the Active pass then evaluates only addresses
/// that were already Active before this invocation, so an address promoted in
/// the Pending pass is not re-evaluated until the next run. A proposal whose
/// whole window has already elapsed when first evaluated goes straight to
/// Ended without passing Active.
pub fn reclassify(states: &mut ProposalsByState, proposals: &ProposalMap, now: u64) {
    let was_active: Vec<String> = states.active.iter().cloned().collect();

    let pending: Vec<String> = states.pending.iter().cloned().collect();
    for address in pending {
        let Some(metadata) = proposals.get(&address).map(|p| &p.metadata) else {
            warn!(proposal = %address, "pending proposal has no metadata, skipping");
            continue;
        };
        if metadata.start_time <= now && now < metadata.end_time {
            states.pending.remove(&address);
            states.active.insert(address.clone());
            info!(proposal = %address, "proposal moved to active");
        } else if metadata.start_time <= now && metadata.end_time <= now {
            states.pending.remove(&address);
            states.ended.insert(address.clone());
            info!(proposal = %address, "proposal moved to ended");
        }
    }

    for address in was_active {
        let Some(metadata) = proposals.get(&address).map(|p| &p.metadata) else {
            warn!(proposal = %address, "active proposal has no metadata, skipping");
            continue;
        };
        if metadata.end_time <= now {
            states.active.remove(&address);
            states.ended.insert(address.clone());
            info!(proposal = %address, "proposal moved to ended");
        }
    }
}
