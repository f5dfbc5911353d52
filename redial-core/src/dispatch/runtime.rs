//! Dialer runtime: the long-running tasks around the dispatch pass.
//!
//! Owns the worker pool, the provider completion consumer and the lease
//! housekeeper, all tied to one cancellation token so shutdown is a single
//! cancel-and-join. Campaigns are sharded across workers by index so two
//! workers never run passes for the same campaign concurrently.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::claims::{ClaimStore, ClaimStoreSnapshot};
use crate::dispatch::config::DispatcherConfig;
use crate::dispatch::dispatcher::CampaignDispatcher;
use crate::dispatch::reconciler::OutcomeReconciler;
use crate::error::Result;
use crate::providers::CallStatusChanged;
use crate::store::CampaignRepository;

pub struct DialerRuntime {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    claims: Arc<dyn ClaimStore>,
}

impl fmt::Debug for DialerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialerRuntime")
            .field("tasks", &self.handles.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl DialerRuntime {
    /// Spawn the worker pool, completion consumer and lease housekeeper.
    pub fn start(
        config: &DispatcherConfig,
        campaigns: Arc<dyn CampaignRepository>,
        claims: Arc<dyn ClaimStore>,
        dispatcher: Arc<CampaignDispatcher>,
        reconciler: Arc<OutcomeReconciler>,
        completions: mpsc::Receiver<CallStatusChanged>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        let workers = config.workers.workers.max(1);
        for worker_idx in 0..workers {
            handles.push(tokio::spawn(worker_loop(
                worker_idx,
                workers,
                config.workers.tick_interval_ms,
                Arc::clone(&campaigns),
                Arc::clone(&dispatcher),
                cancel.clone(),
            )));
        }
        handles.push(tokio::spawn(completion_loop(
            completions,
            Arc::clone(&reconciler),
            cancel.clone(),
        )));
        handles.push(tokio::spawn(housekeeper_loop(
            config.lease.housekeeper_interval_ms,
            Arc::clone(&claims),
            reconciler,
            cancel.clone(),
        )));

        info!(
            target: "dial::runtime",
            workers,
            tick_interval_ms = config.workers.tick_interval_ms,
            housekeeper_interval_ms = config.lease.housekeeper_interval_ms,
            "dialer runtime started"
        );
        Self {
            cancel,
            handles,
            claims,
        }
    }

    /// Point-in-time view of the claim store for operator tooling.
    pub async fn snapshot(&self) -> Result<ClaimStoreSnapshot> {
        self.claims.snapshot().await
    }

    /// Cancel every task and wait for them to drain.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(
                    target: "dial::runtime",
                    error = %err,
                    "runtime task ended abnormally"
                );
            }
        }
        info!(target: "dial::runtime", "dialer runtime stopped");
    }
}

/// One worker: tick, list active campaigns, run a pass for this worker's
/// shard of them.
async fn worker_loop(
    worker_idx: usize,
    workers: usize,
    tick_interval_ms: u64,
    campaigns: Arc<dyn CampaignRepository>,
    dispatcher: Arc<CampaignDispatcher>,
    cancel: CancellationToken,
) {
    let owner = format!("worker-{worker_idx}");
    let mut tick = tokio::time::interval(StdDuration::from_millis(
        tick_interval_ms.max(1),
    ));
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(target: "dial::runtime", owner, "worker stopping");
                return;
            }
            _ = tick.tick() => {}
        }

        let active = match campaigns.list_active().await {
            Ok(active) => active,
            Err(err) => {
                warn!(
                    target: "dial::runtime",
                    owner,
                    error = %err,
                    "failed to list active campaigns"
                );
                continue;
            }
        };
        for campaign in active
            .iter()
            .enumerate()
            .filter(|(i, _)| i % workers == worker_idx)
            .map(|(_, c)| c)
        {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(err) = dispatcher
                .run_pass(campaign.id, &owner, Utc::now())
                .await
            {
                warn!(
                    target: "dial::runtime",
                    owner,
                    campaign_id = %campaign.id,
                    error = %err,
                    "dispatch pass failed"
                );
            }
        }
    }
}

/// Drain provider status notifications into the reconciler.
async fn completion_loop(
    mut completions: mpsc::Receiver<CallStatusChanged>,
    reconciler: Arc<OutcomeReconciler>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => {
                debug!(
                    target: "dial::runtime",
                    "completion consumer stopping"
                );
                return;
            }
            event = completions.recv() => match event {
                Some(event) => event,
                None => {
                    debug!(
                        target: "dial::runtime",
                        "completion channel closed"
                    );
                    return;
                }
            },
        };
        if let Err(err) =
            reconciler.on_status_changed(event, Utc::now()).await
        {
            warn!(
                target: "dial::runtime",
                error = %err,
                "failed to reconcile completion"
            );
        }
    }
}

/// Periodically resolve claims whose lease ran out.
async fn housekeeper_loop(
    interval_ms: u64,
    claims: Arc<dyn ClaimStore>,
    reconciler: Arc<OutcomeReconciler>,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(StdDuration::from_millis(
        interval_ms.max(1),
    ));
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(target: "dial::runtime", "housekeeper stopping");
                return;
            }
            _ = tick.tick() => {}
        }

        let now = Utc::now();
        let expired = match claims.scan_expired(now).await {
            Ok(expired) => expired,
            Err(err) => {
                warn!(
                    target: "dial::runtime",
                    error = %err,
                    "expired lease scan failed"
                );
                continue;
            }
        };
        for token in expired {
            if let Err(err) =
                reconciler.on_lease_expired(&token, now).await
            {
                warn!(
                    target: "dial::runtime",
                    campaign_lead_id = %token.campaign_lead_id,
                    error = %err,
                    "lease recovery failed"
                );
            }
        }
    }
}
