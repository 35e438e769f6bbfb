//! Notification envelope - the two-level encoding used by the upstream
//! topic/queue pair.
//!
//! The topic wraps the original notification before it lands on the queue,
//! so a received message body decodes in two steps: the outer envelope is a
//! JSON object whose `Message` field holds a string, and that string is the
//! notification itself, JSON-encoded a second time.

use serde::Deserialize;

use crate::error::EventError;

/// Discriminator carried by instance state-change notifications.
///
/// Upstream emits this exact string; notifications with any other
/// `detail-type` are ignored.
pub const INSTANCE_STATE_CHANGE: &str = "EC2 Instance State-change Notification";

/// Outer envelope added by the notification topic.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueEnvelope {
    /// The notification payload, JSON-encoded as a string.
    #[serde(rename = "Message")]
    pub message: String,
}

/// The notification payload nested inside the envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    /// Event-type discriminator.
    #[serde(rename = "detail-type")]
    pub detail_type: String,

    /// Type-specific detail block. Interpreted only for state-change
    /// notifications.
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// Detail block of an instance state-change notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StateChangeDetail {
    /// Cloud identifier of the instance that changed state.
    #[serde(rename = "instance-id")]
    pub instance_id: String,

    /// The state the instance transitioned into.
    pub state: String,
}

impl Notification {
    /// Decode a raw queue message body, unwrapping both encoding levels.
    pub fn decode(body: &str) -> Result<Self, EventError> {
        let envelope: QueueEnvelope = serde_json::from_str(body)
            .map_err(|e| EventError::MalformedEnvelope(e.to_string()))?;
        serde_json::from_str(&envelope.message)
            .map_err(|e| EventError::MalformedPayload(e.to_string()))
    }

    /// Whether this notification carries the state-change discriminator.
    pub fn is_state_change(&self) -> bool {
        self.detail_type == INSTANCE_STATE_CHANGE
    }

    /// Extract the state-change detail block.
    ///
    /// Fails with [`EventError::UnexpectedType`] when the discriminator
    /// does not match, so callers cannot misread an unrelated detail shape.
    pub fn state_change_detail(&self) -> Result<StateChangeDetail, EventError> {
        if !self.is_state_change() {
            return Err(EventError::UnexpectedType(self.detail_type.clone()));
        }
        serde_json::from_value(self.detail.clone())
            .map_err(|e| EventError::MalformedDetail(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn wrap(payload: &str) -> String {
        serde_json::to_string(&serde_json::json!({ "Message": payload })).unwrap()
    }

    #[test]
    fn decodes_state_change_notification() {
        let payload = serde_json::json!({
            "detail-type": INSTANCE_STATE_CHANGE,
            "detail": { "instance-id": "i-123", "state": "running" }
        })
        .to_string();

        let notification = Notification::decode(&wrap(&payload)).unwrap();
        assert!(notification.is_state_change());

        let detail = notification.state_change_detail().unwrap();
        assert_eq!(detail.instance_id, "i-123");
        assert_eq!(detail.state, "running");
    }

    #[test]
    fn non_matching_discriminator_is_not_interpreted() {
        let payload = serde_json::json!({
            "detail-type": "EC2 Spot Instance Interruption Warning",
            "detail": { "instance-id": "i-123" }
        })
        .to_string();

        let notification = Notification::decode(&wrap(&payload)).unwrap();
        assert!(!notification.is_state_change());
        assert!(matches!(
            notification.state_change_detail(),
            Err(EventError::UnexpectedType(_))
        ));
    }

    #[rstest]
    #[case::not_json("not json at all")]
    #[case::missing_message(r#"{"Type":"Notification"}"#)]
    fn malformed_envelope_is_rejected(#[case] body: &str) {
        assert!(matches!(
            Notification::decode(body),
            Err(EventError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn malformed_inner_payload_is_rejected() {
        let body = wrap("{not valid json");
        assert!(matches!(
            Notification::decode(&body),
            Err(EventError::MalformedPayload(_))
        ));
    }

    #[rstest]
    #[case::missing_detail(serde_json::json!({ "detail-type": INSTANCE_STATE_CHANGE }))]
    #[case::missing_state(serde_json::json!({
        "detail-type": INSTANCE_STATE_CHANGE,
        "detail": { "instance-id": "i-123" }
    }))]
    fn incomplete_detail_is_rejected(#[case] payload: serde_json::Value) {
        let notification = Notification::decode(&wrap(&payload.to_string())).unwrap();
        assert!(matches!(
            notification.state_change_detail(),
            Err(EventError::MalformedDetail(_))
        ));
    }
}
