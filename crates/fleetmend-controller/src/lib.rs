//! fleetmend-controller — bounded auto-remediation for a tagged fleet.
//!
//! Unhealthy instances are force-stopped and, once the control plane
//! reports them stopped, started again. At most `max_reboot_instance_num`
//! automatic remediations are in flight at once.
//!
//! # Triggers
//!
//! ```text
//! Sweeper (every interval)   ─┐
//! alarm notification          ├─▶ try_remediate ──▶ force_stop + PendingRestart
//! operator force-stop-start  ─┘   (cap ignored)
//!
//! state change: stopped      ───▶ confirm_restart ──▶ start + delete record
//! ```
//!
//! Only instances this controller stopped are started again; any other
//! stop is left alone.

pub mod controller;
pub mod error;
pub mod events;
pub mod sweep;

pub use controller::{
    ControllerSettings, ManualFailure, ManualReport, RemediationController, RemediationOutcome,
    RestartOutcome, SuppressReason,
};
pub use error::{ControllerError, ControllerResult};
pub use events::{AlarmNotification, StateChangeDetail, StateChangeEvent};
pub use sweep::{SweepReport, SweepSettings, Sweeper};
