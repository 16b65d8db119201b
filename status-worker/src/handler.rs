//! Status update handling.
//!
//! Applies one notification to the request store. The handler never talks to
//! the broker; it reports success as an [`Ack`] and the consumer loop decides
//! what to send back.
//!
//! ## Processing Flow
//!
//! ```text
//! Notification → request id + status token → load record → validate status → save → Ack
//! ```

use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::queue::{Notification, NotificationError};
use crate::request::{InvalidStatusError, RequestStatus, RequestStore, StoreError};

/// A status that was applied and persisted. Safe to acknowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub request_id: String,
    pub previous: RequestStatus,
    pub status: RequestStatus,
}

/// Per-message failures. None of them stop the consumer.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("request directory does not exist: {}", .0.display())]
    MissingRecord(PathBuf),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    InvalidStatus(#[from] InvalidStatusError),
}

impl HandleError {
    /// Short machine-readable reason for structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            HandleError::Notification(NotificationError::InvalidUtf8(_)) => "invalid_body",
            HandleError::Notification(NotificationError::InvalidRequestId(_)) => {
                "invalid_request_id"
            }
            HandleError::MissingRecord(_) => "missing_record",
            HandleError::Store(StoreError::Parse { .. }) => "invalid_record",
            HandleError::Store(_) => "storage_error",
            HandleError::InvalidStatus(_) => "invalid_status",
        }
    }
}

impl From<StoreError> for HandleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingDirectory(dir) => HandleError::MissingRecord(dir),
            other => HandleError::Store(other),
        }
    }
}

/// Applies status notifications to the request store.
#[derive(Debug, Clone)]
pub struct StatusHandler {
    store: RequestStore,
}

impl StatusHandler {
    pub fn new(store: RequestStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    /// Set the record's status from the notification and persist it.
    ///
    /// The record is written only after the status token validates, so every
    /// error path leaves the file as it was.
    pub fn handle(&self, notification: &Notification) -> Result<Ack, HandleError> {
        let request_id = notification.request_id()?;
        let token = notification.status_token();

        debug!(request_id = %request_id, status = %token, "status_update_start");

        let mut request = self.store.load(request_id)?;
        let status: RequestStatus = token.parse()?;

        let previous = request.status();
        request.set_status(status);
        self.store.save(request_id, &request)?;

        Ok(Ack {
            request_id: request_id.to_string(),
            previous,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;

    fn handler_with(records: &[(&str, &str)]) -> (TempDir, StatusHandler) {
        let root = tempfile::tempdir().unwrap();
        let store = RequestStore::new(root.path());
        for (request_id, content) in records {
            fs::create_dir_all(store.request_dir(request_id)).unwrap();
            fs::write(store.record_path(request_id), content).unwrap();
        }
        (root, StatusHandler::new(store))
    }

    fn read_record(handler: &StatusHandler, request_id: &str) -> String {
        fs::read_to_string(handler.store().record_path(request_id)).unwrap()
    }

    #[test]
    fn test_handle_applies_status() {
        let (_root, handler) = handler_with(&[("abc", r#"{"id":"abc","status":"pending"}"#)]);

        let ack = handler
            .handle(&Notification::new("job.status.succeeded", "abc", 1))
            .unwrap();

        assert_eq!(
            ack,
            Ack {
                request_id: "abc".to_string(),
                previous: RequestStatus::Pending,
                status: RequestStatus::Succeeded,
            }
        );
        let record: Value = serde_json::from_str(&read_record(&handler, "abc")).unwrap();
        assert_eq!(record["status"], "succeeded");
        assert_eq!(record["id"], "abc");
    }

    #[test]
    fn test_handle_is_idempotent() {
        let (_root, handler) = handler_with(&[("abc", r#"{"id":"abc","status":"pending"}"#)]);
        let notification = Notification::new("job.status.running", "abc", 1);

        handler.handle(&notification).unwrap();
        let first = read_record(&handler, "abc");

        let ack = handler.handle(&notification).unwrap();
        assert_eq!(ack.previous, RequestStatus::Running);
        assert_eq!(ack.status, RequestStatus::Running);
        assert_eq!(read_record(&handler, "abc"), first);
    }

    #[test]
    fn test_handle_missing_record_writes_nothing() {
        let (root, handler) = handler_with(&[]);

        let err = handler
            .handle(&Notification::new("job.status.succeeded", "unknown-id", 1))
            .unwrap_err();

        assert!(matches!(err, HandleError::MissingRecord(_)));
        assert_eq!(err.reason(), "missing_record");
        assert!(!root.path().join("requests").exists());
    }

    #[test]
    fn test_handle_malformed_record_left_untouched() {
        let (_root, handler) = handler_with(&[("abc", "{\"id\": \"abc\", \"status\": ")]);

        let err = handler
            .handle(&Notification::new("job.status.succeeded", "abc", 1))
            .unwrap_err();

        assert_eq!(err.reason(), "invalid_record");
        assert_eq!(read_record(&handler, "abc"), "{\"id\": \"abc\", \"status\": ");
    }

    #[test]
    fn test_handle_unrecognized_status_left_untouched() {
        let original = r#"{"id":"abc","status":"pending"}"#;
        let (_root, handler) = handler_with(&[("abc", original)]);

        let err = handler
            .handle(&Notification::new("job.status.bogus", "abc", 1))
            .unwrap_err();

        assert!(matches!(err, HandleError::InvalidStatus(InvalidStatusError(ref t)) if t == "bogus"));
        assert_eq!(read_record(&handler, "abc"), original);
    }

    #[test]
    fn test_handle_preserves_other_fields() {
        let (_root, handler) = handler_with(&[(
            "abc",
            r#"{"timestamp":"t","id":"abc","status":"pending","big":123456789012345678901234567890,"f":0.1,"output":{"archive":"best.zip"}}"#,
        )]);

        handler
            .handle(&Notification::new("requests.status.succeeded", "abc", 1))
            .unwrap();

        assert_eq!(
            read_record(&handler, "abc"),
            r#"{"timestamp":"t","id":"abc","status":"succeeded","big":123456789012345678901234567890,"f":0.1,"output":{"archive":"best.zip"}}"#
        );
    }

    #[test]
    fn test_handle_record_without_id() {
        let (_root, handler) = handler_with(&[
            ("abc", r#"{"status":"pending"}"#),
            ("def", r#"{"id":null,"status":"running"}"#),
        ]);

        let ack = handler
            .handle(&Notification::new("job.status.succeeded", "abc", 1))
            .unwrap();
        assert_eq!(ack.previous, RequestStatus::Pending);
        assert_eq!(read_record(&handler, "abc"), r#"{"status":"succeeded"}"#);

        handler
            .handle(&Notification::new("job.status.failed", "def", 2))
            .unwrap();
        assert_eq!(read_record(&handler, "def"), r#"{"id":null,"status":"failed"}"#);
    }

    #[test]
    fn test_handle_rejects_traversal() {
        let (_root, handler) = handler_with(&[("abc", r#"{"id":"abc","status":"pending"}"#)]);

        let err = handler
            .handle(&Notification::new("job.status.failed", "../requests/abc", 1))
            .unwrap_err();

        assert_eq!(err.reason(), "invalid_request_id");
    }

    #[test]
    fn test_last_write_wins() {
        let (_root, handler) = handler_with(&[("abc", r#"{"id":"abc","status":"pending"}"#)]);

        handler
            .handle(&Notification::new("job.status.succeeded", "abc", 1))
            .unwrap();
        let ack = handler
            .handle(&Notification::new("job.status.running", "abc", 2))
            .unwrap();

        assert_eq!(ack.previous, RequestStatus::Succeeded);
        assert_eq!(ack.status, RequestStatus::Running);
    }
}
