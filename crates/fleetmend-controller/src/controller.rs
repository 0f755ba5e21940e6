//! Remediation controller — drives the stop/restart state machine.
//!
//! ```text
//!            try_remediate (cap checked)
//!            force_stop_and_start (cap ignored)
//!   None ──────────────────────────────────────▶ PendingRestart
//!    ▲                                                │
//!    └────────────── confirm_restart (start ok) ──────┘
//!                    expire_orphans (ttl)
//! ```
//!
//! The in-flight count is always read from the record store; there is no
//! counter to drift. The cap is advisory: two callers racing between the
//! count and the write can both pass. An instance is claimed in memory from
//! the pending check until its record is written, so overlapping triggers
//! for the same instance issue one stop.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use fleetmend_core::config::{ConfigError, ControllerConfig};
use fleetmend_core::{epoch_secs, ComputeControlPlane, InstanceId, InstanceState};
use fleetmend_state::{RecordStore, RemediationRecord, RemediationState, RemediationTrigger};

use crate::error::{ControllerError, ControllerResult};

/// Why an automatic remediation was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SuppressReason {
    /// Too many instances are already pending restart.
    ConcurrencyCap { pending: usize, max: usize },
}

/// Result of [`RemediationController::try_remediate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemediationOutcome {
    /// A stop was issued and the instance is now pending restart.
    Initiated,
    Suppressed(SuppressReason),
    /// A remediation was already in flight; nothing was issued.
    AlreadyPending,
}

/// Result of [`RemediationController::confirm_restart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartOutcome {
    Restarted,
    /// The stop was not issued by FleetMend; the instance stays stopped.
    NotSystemInitiated,
}

/// Why one instance in a manual request was not remediated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualFailure {
    StopFailed,
    RecordWriteFailed,
}

/// Per-instance results of a manual force stop-and-start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManualReport {
    pub stopped: Vec<InstanceId>,
    pub failed: Vec<(InstanceId, ManualFailure)>,
}

/// Limits applied by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// `MAX_REBOOT_INSTANCE_NUM`.
    pub max_pending: usize,
    pub pending_ttl: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &ControllerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            max_pending: config.max_reboot_instance_num,
            pending_ttl: config.pending_ttl()?,
        })
    }
}

/// The remediation state machine.
///
/// All entry points take `&self`; share it as `Arc<RemediationController>`.
pub struct RemediationController {
    compute: Arc<dyn ComputeControlPlane>,
    records: Arc<dyn RecordStore>,
    settings: ControllerSettings,
    /// Instances with a stop in flight whose record is not yet written.
    in_flight: Mutex<HashSet<InstanceId>>,
}

/// Releases an in-flight claim on drop, including when the stop fails or
/// the caller's future is cancelled.
struct InFlightClaim<'a> {
    set: &'a Mutex<HashSet<InstanceId>>,
    instance_id: InstanceId,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.instance_id);
    }
}

fn lock(set: &Mutex<HashSet<InstanceId>>) -> MutexGuard<'_, HashSet<InstanceId>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RemediationController {
    pub fn new(
        compute: Arc<dyn ComputeControlPlane>,
        records: Arc<dyn RecordStore>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            compute,
            records,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Claim `instance_id` for one stop-and-track sequence. `None` if
    /// another caller holds it.
    fn claim(&self, instance_id: &str) -> Option<InFlightClaim<'_>> {
        lock(&self.in_flight)
            .insert(instance_id.to_string())
            .then(|| InFlightClaim {
                set: &self.in_flight,
                instance_id: instance_id.to_string(),
            })
    }

    pub fn settings(&self) -> ControllerSettings {
        self.settings
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Start a remediation for `instance_id` unless the cap is reached or
    /// one is already in flight.
    pub async fn try_remediate(
        &self,
        instance_id: &str,
        trigger: RemediationTrigger,
    ) -> ControllerResult<RemediationOutcome> {
        let pending = self.records.count_pending()?;
        if pending >= self.settings.max_pending {
            warn!(
                %instance_id,
                pending,
                max = self.settings.max_pending,
                ?trigger,
                "remediation suppressed, concurrency cap reached"
            );
            return Ok(RemediationOutcome::Suppressed(SuppressReason::ConcurrencyCap {
                pending,
                max: self.settings.max_pending,
            }));
        }

        let Some(_claim) = self.claim(instance_id) else {
            debug!(%instance_id, ?trigger, "stop already in flight");
            return Ok(RemediationOutcome::AlreadyPending);
        };

        let existing = self.records.get_record(instance_id)?;
        if existing.as_ref().is_some_and(RemediationRecord::is_pending) {
            debug!(%instance_id, ?trigger, "remediation already pending");
            return Ok(RemediationOutcome::AlreadyPending);
        }

        self.stop_and_track(instance_id, existing, trigger).await?;
        info!(%instance_id, ?trigger, pending = pending + 1, "remediation initiated");
        Ok(RemediationOutcome::Initiated)
    }

    /// Handle a stop-completion notification for `instance_id`.
    ///
    /// Only instances FleetMend stopped are started again. If the start
    /// fails the record stays pending so a later sweep can retry.
    pub async fn confirm_restart(&self, instance_id: &str) -> ControllerResult<RestartOutcome> {
        let record = self.records.get_record(instance_id)?;
        if !record.as_ref().is_some_and(RemediationRecord::is_pending) {
            debug!(%instance_id, "stop was not initiated by fleetmend, ignoring");
            return Ok(RestartOutcome::NotSystemInitiated);
        }

        let ids = [instance_id.to_string()];
        if let Err(e) = self.compute.start(&ids).await {
            warn!(%instance_id, error = %e, "restart failed, record left pending");
            return Err(e.into());
        }
        info!(%instance_id, "instance restarted");

        self.records.delete_record(instance_id)?;
        Ok(RestartOutcome::Restarted)
    }

    /// Record an anomaly alarm and remediate without consulting metrics.
    pub async fn handle_alarm(&self, instance_id: &str) -> ControllerResult<RemediationOutcome> {
        // The timestamp is informational; failing to store it must not
        // block the remediation itself.
        if let Err(e) = self.records.record_alarm(instance_id, epoch_secs()) {
            warn!(%instance_id, error = %e, "failed to record alarm timestamp");
        }
        info!(%instance_id, "anomaly alarm received");
        self.try_remediate(instance_id, RemediationTrigger::Alarm).await
    }

    /// Operator-initiated stop-and-start. Marks every named instance
    /// pending restart without checking the cap.
    pub async fn force_stop_and_start(&self, instance_ids: &[InstanceId]) -> ControllerResult<ManualReport> {
        let ids = validate_ids(instance_ids)?;
        let mut report = ManualReport::default();

        for id in ids {
            // Manual stops go ahead even when an automatic stop holds the
            // claim; holding it when free keeps automatic triggers out.
            let _claim = self.claim(&id);
            let existing = match self.records.get_record(&id) {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(instance_id = %id, error = %e, "record lookup failed, proceeding without it");
                    None
                }
            };
            match self.stop_and_track(&id, existing, RemediationTrigger::Manual).await {
                Ok(()) => {
                    info!(instance_id = %id, "manual stop issued, pending restart");
                    report.stopped.push(id);
                }
                Err(ControllerError::UntrackedStop { .. }) => {
                    report.failed.push((id, ManualFailure::RecordWriteFailed));
                }
                Err(e) => {
                    warn!(instance_id = %id, error = %e, "manual stop failed");
                    report.failed.push((id, ManualFailure::StopFailed));
                }
            }
        }

        Ok(report)
    }

    /// Plain reboot. Does not touch the state machine.
    pub async fn reboot(&self, instance_ids: &[InstanceId]) -> ControllerResult<()> {
        let ids = validate_ids(instance_ids)?;
        self.compute.reboot(&ids).await?;
        info!(count = ids.len(), instances = ?ids, "reboot issued");
        Ok(())
    }

    /// Every record with a remediation in flight.
    pub fn list_abnormal(&self) -> ControllerResult<Vec<RemediationRecord>> {
        Ok(self
            .records
            .list_records()?
            .into_iter()
            .filter(|r| r.remediation_state != RemediationState::None)
            .collect())
    }

    /// Drop records older than the pending TTL, freeing their cap slots.
    pub fn expire_orphans(&self, now: u64) -> ControllerResult<Vec<RemediationRecord>> {
        let cutoff = now.saturating_sub(self.settings.pending_ttl.as_secs());
        let expired = self.records.expire_stale(cutoff)?;
        for record in expired.iter().filter(|r| r.is_pending()) {
            warn!(
                instance_id = %record.instance_id,
                started_at = ?record.remediation_started_at,
                "pending restart expired without confirmation"
            );
        }
        Ok(expired)
    }

    /// Restart pending instances the control plane already reports stopped.
    ///
    /// Covers lost stop notifications and earlier failed starts. Returns
    /// the number restarted; per-instance failures are logged.
    pub async fn retry_pending_restarts(&self) -> ControllerResult<usize> {
        let pending: Vec<InstanceId> = self
            .records
            .list_pending()?
            .into_iter()
            .map(|r| r.instance_id)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let described = self.compute.describe_instances(&pending).await?;
        let mut restarted = 0;
        for summary in described.iter().filter(|s| s.state == InstanceState::Stopped) {
            match self.confirm_restart(&summary.id).await {
                Ok(RestartOutcome::Restarted) => restarted += 1,
                Ok(RestartOutcome::NotSystemInitiated) => {}
                Err(e) => warn!(instance_id = %summary.id, error = %e, "restart retry failed"),
            }
        }
        Ok(restarted)
    }

    async fn stop_and_track(
        &self,
        instance_id: &str,
        existing: Option<RemediationRecord>,
        trigger: RemediationTrigger,
    ) -> ControllerResult<()> {
        let ids = [instance_id.to_string()];
        self.compute.force_stop(&ids).await?;

        let mut record = RemediationRecord::pending(instance_id, epoch_secs(), trigger);
        record.last_alarm_at = existing.and_then(|r| r.last_alarm_at);

        if let Err(source) = self.records.put_record(&record) {
            error!(
                %instance_id,
                error = %source,
                "instance stopped but pending record not written; it will not restart automatically"
            );
            return Err(ControllerError::UntrackedStop {
                instance_id: instance_id.to_string(),
                source,
            });
        }
        Ok(())
    }
}

/// Reject an empty list or blank ids; drop duplicates, keeping order.
fn validate_ids(instance_ids: &[InstanceId]) -> ControllerResult<Vec<InstanceId>> {
    if instance_ids.is_empty() {
        return Err(ControllerError::InvalidParameter("no instance ids given".to_string()));
    }
    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(instance_ids.len());
    for id in instance_ids {
        let id = id.trim();
        if id.is_empty() {
            return Err(ControllerError::InvalidParameter("blank instance id".to_string()));
        }
        if seen.insert(id.to_string()) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}
