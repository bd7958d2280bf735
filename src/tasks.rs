//! Background tasks
//!
//! Periodic vote counting and broker process polling on tokio intervals.

use crate::config::TaskConfig;
use crate::governance::Governance;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Spawn every periodic task
pub fn spawn(governance: Governance, config: &TaskConfig) -> Vec<JoinHandle<()>> {
    let counting = governance.clone();
    let count_every = Duration::from_secs(config.count_votes_interval_secs.max(1));
    let poll_every = Duration::from_secs(config.poll_processes_interval_secs.max(1));

    vec![
        tokio::spawn(async move {
            let mut ticker = interval(count_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                count_votes(&counting).await;
            }
        }),
        tokio::spawn(async move {
            let mut ticker = interval(poll_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                poll_processes(&governance).await;
            }
        }),
    ]
}

/// Log the total number of votes cast
pub async fn count_votes(governance: &Governance) -> usize {
    let total = governance.proposals.count_votes().await;
    info!("Total votes cast: {}", total);
    total
}

/// Refresh every proposal still waiting on a broker process. Returns how
/// many were decided.
pub async fn poll_processes(governance: &Governance) -> usize {
    let pending = governance.proposals.with_pending_process().await;
    if pending.is_empty() {
        return 0;
    }
    debug!("Polling {} pending governance processes", pending.len());

    let mut decided = 0;
    for proposal in pending {
        match governance.refresh_process(proposal.id).await {
            Ok(updated) if !updated.has_pending_process() => decided += 1,
            Ok(_) => {}
            Err(e) => warn!("Failed to refresh process for proposal {}: {}", proposal.id, e),
        }
    }
    if decided > 0 {
        info!("{} proposals decided by polling", decided);
    }
    decided
}
