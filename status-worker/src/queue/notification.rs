//! Status notification decoding.
//!
//! The pipeline publishes one message per status transition:
//!
//! - routing key: dot-delimited taxonomy whose last segment is the status,
//!   e.g. `requests.status.succeeded`
//! - body: the bare request id as UTF-8 text, no envelope

use std::path::{Component, Path};
use std::str::Utf8Error;

use lapin::message::Delivery;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),

    #[error("notification body is not a usable request id: {0:?}")]
    InvalidRequestId(String),
}

/// A single status notification taken off the worker queue.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Routing key the message was published with
    pub routing_key: String,
    /// Raw message body
    pub body: Vec<u8>,
    /// Broker delivery tag, used for the acknowledgement
    pub delivery_tag: u64,
    /// Whether the broker already delivered this message before
    pub redelivered: bool,
}

impl Notification {
    pub fn new(routing_key: impl Into<String>, body: impl Into<Vec<u8>>, delivery_tag: u64) -> Self {
        Self {
            routing_key: routing_key.into(),
            body: body.into(),
            delivery_tag,
            redelivered: false,
        }
    }

    /// Status token carried by the routing key.
    pub fn status_token(&self) -> &str {
        status_token(&self.routing_key)
    }

    /// Request id carried by the body.
    ///
    /// The id becomes a directory name under the storage root, so it must be
    /// exactly one plain path component.
    pub fn request_id(&self) -> Result<&str, NotificationError> {
        let request_id = std::str::from_utf8(&self.body)?;

        let mut components = Path::new(request_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None)
                if name.to_str() == Some(request_id) && !request_id.contains('\\') =>
            {
                Ok(request_id)
            }
            _ => Err(NotificationError::InvalidRequestId(request_id.to_string())),
        }
    }
}

impl From<Delivery> for Notification {
    fn from(delivery: Delivery) -> Self {
        Self {
            routing_key: delivery.routing_key.as_str().to_string(),
            body: delivery.data,
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
        }
    }
}

/// Everything after the last `.` of a routing key, or the whole key when it
/// has no delimiter.
pub fn status_token(routing_key: &str) -> &str {
    routing_key
        .rsplit_once('.')
        .map_or(routing_key, |(_, token)| token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_token_takes_last_segment() {
        assert_eq!(status_token("job.status.succeeded"), "succeeded");
        assert_eq!(status_token("a.b.c.d.e.running"), "running");
        assert_eq!(status_token("status.failed"), "failed");
    }

    #[test]
    fn test_status_token_edge_cases() {
        assert_eq!(status_token("pending"), "pending");
        assert_eq!(status_token("job.status."), "");
        assert_eq!(status_token(""), "");
        assert_eq!(status_token(".deleted"), "deleted");
    }

    #[test]
    fn test_status_token_any_prefix_depth() {
        for depth in 0..8 {
            let prefix: Vec<String> = (0..depth).map(|i| format!("seg{i}")).collect();
            let mut key = prefix.join(".");
            if depth > 0 {
                key.push('.');
            }
            key.push_str("accepted");

            assert_eq!(status_token(&key), "accepted", "routing key {key}");
        }
    }

    #[test]
    fn test_request_id_plain() {
        let notification = Notification::new("job.status.running", "3f2a-77b1", 1);
        assert_eq!(notification.request_id(), Ok("3f2a-77b1"));
    }

    #[test]
    fn test_request_id_invalid_utf8() {
        let notification = Notification::new("job.status.running", vec![0xffu8, 0xfe], 1);
        assert!(matches!(
            notification.request_id(),
            Err(NotificationError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_request_id_rejects_paths() {
        for body in ["", ".", "..", "../etc", "a/b", "/abs", "a\\b", "abc/"] {
            let notification = Notification::new("job.status.running", body, 1);
            assert_eq!(
                notification.request_id(),
                Err(NotificationError::InvalidRequestId(body.to_string())),
                "body {body:?}"
            );
        }
    }
}
