//! Periodic fleet sweep.
//!
//! One sweep:
//!
//! 1. expires orphaned records (pending longer than the TTL),
//! 2. retries restarts for pending instances that are already stopped,
//! 3. lists the in-scope running fleet page by page,
//! 4. classifies every instance with bounded parallelism,
//! 5. calls `try_remediate` for each unhealthy instance, stopping at the
//!    first concurrency-cap suppression.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use fleetmend_core::config::SweepConfig;
use fleetmend_core::{epoch_secs, ComputeControlPlane, HealthStatus, InstanceFilter, InstanceId, ProviderError};
use fleetmend_health::HealthEvaluator;
use fleetmend_state::RemediationTrigger;

use crate::controller::{RemediationController, RemediationOutcome};

/// Sweep scope and fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSettings {
    pub filter: InstanceFilter,
    pub concurrency: usize,
}

impl SweepSettings {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            filter: InstanceFilter {
                tag_key: config.tag_key.clone(),
                tag_value: config.tag_value.clone(),
                page_size: config.page_size,
            },
            concurrency: config.concurrency,
        }
    }
}

/// Counters for one sweep, logged when it finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub initiated: usize,
    pub already_pending: usize,
    pub failed: usize,
    pub expired: usize,
    pub restarted: usize,
    /// The sweep stopped early because the concurrency cap was hit.
    pub cap_reached: bool,
}

pub struct Sweeper {
    controller: Arc<RemediationController>,
    evaluator: Arc<HealthEvaluator>,
    compute: Arc<dyn ComputeControlPlane>,
    settings: SweepSettings,
}

impl Sweeper {
    pub fn new(
        controller: Arc<RemediationController>,
        evaluator: Arc<HealthEvaluator>,
        compute: Arc<dyn ComputeControlPlane>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            controller,
            evaluator,
            compute,
            settings,
        }
    }

    /// Run one sweep. Fails only if the fleet could not be listed.
    pub async fn sweep_once(&self) -> anyhow::Result<SweepReport> {
        let mut report = SweepReport::default();

        match self.controller.expire_orphans(epoch_secs()) {
            Ok(expired) => report.expired = expired.len(),
            Err(e) => warn!(error = %e, "orphan cleanup failed"),
        }
        match self.controller.retry_pending_restarts().await {
            Ok(restarted) => report.restarted = restarted,
            Err(e) => warn!(error = %e, "pending restart retry failed"),
        }

        let fleet = self.list_in_scope().await?;
        report.scanned = fleet.len();

        let verdicts = self
            .evaluator
            .classify_all(&fleet, self.settings.concurrency)
            .await;

        for (instance_id, status) in verdicts {
            match status {
                HealthStatus::Healthy => continue,
                HealthStatus::Unknown => {
                    report.unknown += 1;
                    continue;
                }
                HealthStatus::Unhealthy => report.unhealthy += 1,
            }

            match self
                .controller
                .try_remediate(&instance_id, RemediationTrigger::Sweep)
                .await
            {
                Ok(RemediationOutcome::Initiated) => report.initiated += 1,
                Ok(RemediationOutcome::AlreadyPending) => report.already_pending += 1,
                Ok(RemediationOutcome::Suppressed(reason)) => {
                    debug!(%instance_id, ?reason, "cap reached, ending sweep");
                    report.cap_reached = true;
                    break;
                }
                Err(e) => {
                    warn!(%instance_id, error = %e, "remediation failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Every running instance matching the filter, across all pages.
    ///
    /// Listing ends early if the control plane hands back a token it
    /// already returned. Ids are de-duplicated, keeping first-seen order.
    async fn list_in_scope(&self) -> Result<Vec<InstanceId>, ProviderError> {
        let mut ids = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut seen_tokens = HashSet::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .compute
                .describe_running_instances(&self.settings.filter, next_token.as_deref())
                .await?;
            for summary in page.instances {
                if seen_ids.insert(summary.id.clone()) {
                    ids.push(summary.id);
                }
            }
            match page.next_token {
                Some(token) if !seen_tokens.insert(token.clone()) => {
                    warn!(%token, listed = ids.len(), "pagination token repeated, ending listing");
                    break;
                }
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(ids)
    }

    /// Run the sweep loop until `shutdown` flips.
    ///
    /// The first sweep starts immediately. Shutdown is observed both while
    /// sleeping and mid-sweep; an interrupted sweep is dropped where it
    /// stands and the next process start picks the fleet up again.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            max_pending = self.controller.settings().max_pending,
            "sweeper started"
        );

        loop {
            tokio::select! {
                result = self.sweep_once() => match result {
                    Ok(report) => info!(
                        scanned = report.scanned,
                        unhealthy = report.unhealthy,
                        unknown = report.unknown,
                        initiated = report.initiated,
                        already_pending = report.already_pending,
                        failed = report.failed,
                        expired = report.expired,
                        restarted = report.restarted,
                        cap_reached = report.cap_reached,
                        "sweep complete"
                    ),
                    Err(e) => tracing::error!(error = %e, "sweep failed"),
                },
                _ = shutdown.changed() => {
                    info!("sweeper shutting down mid-sweep");
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("sweeper shutting down");
                    break;
                }
            }
        }
    }
}
