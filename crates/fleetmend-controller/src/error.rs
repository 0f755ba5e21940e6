//! Controller error types.

use thiserror::Error;

use fleetmend_core::ProviderError;
use fleetmend_state::StateError;

/// Errors from a single remediation operation.
///
/// Each error concerns one instance (or one manual request); callers log
/// it and carry on with the rest of the fleet.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("record store error: {0}")]
    State(#[from] StateError),

    /// The stop went through but the pending record was not written, so
    /// the instance will not be restarted automatically.
    #[error("instance {instance_id} stopped but not tracked: {source}")]
    UntrackedStop {
        instance_id: String,
        #[source]
        source: StateError,
    },
}

pub type ControllerResult<T> = Result<T, ControllerError>;
