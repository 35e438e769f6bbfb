//! Outbound event types pushed to live client streams.

use serde::{Deserialize, Serialize};

/// A desktop instance state transition, as delivered to subscribers.
///
/// One of these is constructed per processed notification and fanned out to
/// every live stream registered for the owning user. The field names are
/// the wire format of the push-stream frame body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    /// Platform-assigned desktop identifier.
    pub desktop_id: String,

    /// New instance state (e.g. `pending`, `running`, `stopped`).
    pub state: String,

    /// Cloud instance identifier.
    pub instance_id: String,
}

impl StateChangeEvent {
    pub fn new(
        desktop_id: impl Into<String>,
        state: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            desktop_id: desktop_id.into(),
            state: state.into(),
            instance_id: instance_id.into(),
        }
    }
}
