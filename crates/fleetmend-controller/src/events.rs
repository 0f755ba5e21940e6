//! Inbound trigger messages: anomaly alarms and instance state changes.
//!
//! Alarms arrive wrapped in a notification envelope
//! (`Records[0].Sns.Message` holds the alarm JSON as a string) or as a bare
//! alarm object. State changes arrive as control-plane events whose
//! `detail` names one instance and its new state.

use serde::Deserialize;
use tracing::debug;

use fleetmend_core::{InstanceId, InstanceState};

use crate::controller::{RemediationController, RemediationOutcome, RestartOutcome};
use crate::error::{ControllerError, ControllerResult};

/// Dimension name carrying the instance id in alarm payloads.
const INSTANCE_DIMENSION: &str = "InstanceId";

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Records")]
    records: Vec<EnvelopeRecord>,
}

#[derive(Deserialize)]
struct EnvelopeRecord {
    #[serde(rename = "Sns")]
    sns: EnvelopeMessage,
}

#[derive(Deserialize)]
struct EnvelopeMessage {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Deserialize)]
struct AlarmBody {
    #[serde(rename = "AlarmName", default)]
    alarm_name: Option<String>,
    #[serde(rename = "Trigger")]
    trigger: AlarmTrigger,
}

#[derive(Deserialize)]
struct AlarmTrigger {
    #[serde(rename = "Dimensions", default)]
    dimensions: Vec<Dimension>,
}

#[derive(Deserialize)]
struct Dimension {
    name: String,
    value: String,
}

/// An anomaly alarm naming one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmNotification {
    pub instance_id: InstanceId,
    pub alarm_name: Option<String>,
}

impl AlarmNotification {
    /// Parse an enveloped or bare alarm message.
    pub fn parse(body: &[u8]) -> ControllerResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(body).map_err(malformed)?;

        let alarm: AlarmBody = if value.get("Records").is_some() {
            let envelope: Envelope = serde_json::from_value(value).map_err(malformed)?;
            let record = envelope
                .records
                .into_iter()
                .next()
                .ok_or_else(|| ControllerError::MalformedEvent("envelope has no records".to_string()))?;
            serde_json::from_str(&record.sns.message).map_err(malformed)?
        } else {
            serde_json::from_value(value).map_err(malformed)?
        };

        let mut dimensions = alarm.trigger.dimensions;
        let index = dimensions
            .iter()
            .position(|d| d.name == INSTANCE_DIMENSION)
            .unwrap_or(0);
        if index >= dimensions.len() {
            return Err(ControllerError::MalformedEvent("alarm has no dimensions".to_string()));
        }
        let instance_id = dimensions.swap_remove(index).value;
        if instance_id.trim().is_empty() {
            return Err(ControllerError::MalformedEvent("alarm names a blank instance".to_string()));
        }

        Ok(Self {
            instance_id,
            alarm_name: alarm.alarm_name,
        })
    }
}

/// A control-plane notification that an instance changed state.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StateChangeEvent {
    #[serde(rename = "detail-type", default)]
    pub detail_type: Option<String>,
    pub detail: StateChangeDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StateChangeDetail {
    #[serde(rename = "instance-id")]
    pub instance_id: InstanceId,
    pub state: InstanceState,
}

impl StateChangeEvent {
    pub fn parse(body: &[u8]) -> ControllerResult<Self> {
        let event: Self = serde_json::from_slice(body).map_err(malformed)?;
        if event.detail.instance_id.trim().is_empty() {
            return Err(ControllerError::MalformedEvent("event names a blank instance".to_string()));
        }
        Ok(event)
    }
}

fn malformed(e: serde_json::Error) -> ControllerError {
    ControllerError::MalformedEvent(e.to_string())
}

impl RemediationController {
    /// Route a parsed alarm to the remediation path.
    pub async fn on_alarm(&self, alarm: &AlarmNotification) -> ControllerResult<RemediationOutcome> {
        debug!(instance_id = %alarm.instance_id, alarm = ?alarm.alarm_name, "dispatching alarm");
        self.handle_alarm(&alarm.instance_id).await
    }

    /// Route a state change. Only `stopped` reaches the restart path;
    /// every other state returns `None`.
    pub async fn on_state_change(&self, event: &StateChangeEvent) -> ControllerResult<Option<RestartOutcome>> {
        let detail = &event.detail;
        if detail.state != InstanceState::Stopped {
            debug!(instance_id = %detail.instance_id, state = %detail.state, "ignoring state change");
            return Ok(None);
        }
        self.confirm_restart(&detail.instance_id).await.map(Some)
    }
}
