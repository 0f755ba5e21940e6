//! Persisted remediation records.

use serde::{Deserialize, Serialize};

use fleetmend_core::InstanceId;

/// Where an instance is in the stop/restart cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemediationState {
    /// No remediation in flight.
    #[default]
    None,
    /// Stopped by FleetMend, waiting for the stop to complete so it can be started.
    PendingRestart,
}

/// Source that put an instance into `PendingRestart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationTrigger {
    Sweep,
    Alarm,
    Manual,
}

/// Per-instance remediation state. One record per instance id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemediationRecord {
    pub instance_id: InstanceId,
    pub remediation_state: RemediationState,
    /// Unix seconds when `PendingRestart` was entered.
    pub remediation_started_at: Option<u64>,
    /// Unix seconds of the most recent anomaly alarm. Informational only.
    pub last_alarm_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<RemediationTrigger>,
}

impl RemediationRecord {
    /// A fresh pending-restart record.
    pub fn pending(instance_id: &str, started_at: u64, trigger: RemediationTrigger) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            remediation_state: RemediationState::PendingRestart,
            remediation_started_at: Some(started_at),
            last_alarm_at: None,
            trigger: Some(trigger),
        }
    }

    /// An informational record carrying only an alarm timestamp.
    pub fn alarm_only(instance_id: &str, alarm_at: u64) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            remediation_state: RemediationState::None,
            remediation_started_at: None,
            last_alarm_at: Some(alarm_at),
            trigger: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.remediation_state == RemediationState::PendingRestart
    }

    /// Whether this record has outlived `cutoff` (Unix seconds).
    ///
    /// Pending records age from `remediation_started_at`; idle records age
    /// from their last alarm.
    pub fn is_stale(&self, cutoff: u64) -> bool {
        let since = match self.remediation_state {
            RemediationState::PendingRestart => self.remediation_started_at,
            RemediationState::None => self.last_alarm_at,
        };
        since.is_none_or(|at| at < cutoff)
    }
}
