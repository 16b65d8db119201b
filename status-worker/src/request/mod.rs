//! Request-tracking store access.
//!
//! Each tracked job owns a directory under the storage root:
//!
//! ```text
//! <storage-root>/requests/<request-id>/request.json
//! ```
//!
//! The worker only rewrites the `status` field of records that already exist.

pub mod status;
pub mod store;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use status::{InvalidStatusError, RequestStatus};
pub use store::{RequestStore, StoreError};

const STATUS_FIELD: &str = "status";
const ID_FIELD: &str = "id";

/// Why a JSON object is not a job request record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("missing field `status`")]
    MissingStatus,

    #[error("invalid field `status`: {0}")]
    InvalidStatus(#[source] serde_json::Error),
}

/// A job request record as persisted by the request-tracking store.
///
/// Only `status` is interpreted. The rest of the document, key order and
/// number text included, is written back exactly as it was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct JobRequest {
    status: RequestStatus,
    document: Map<String, Value>,
}

impl JobRequest {
    /// Current lifecycle status
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Request identifier, when the record carries a string `id`
    pub fn id(&self) -> Option<&str> {
        self.document.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Replace the status in place, keeping its position in the document.
    pub fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
        self.document.insert(
            STATUS_FIELD.to_string(),
            Value::String(status.as_str().to_string()),
        );
    }

    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }
}

impl TryFrom<Map<String, Value>> for JobRequest {
    type Error = RecordError;

    fn try_from(document: Map<String, Value>) -> Result<Self, Self::Error> {
        let raw = document
            .get(STATUS_FIELD)
            .cloned()
            .ok_or(RecordError::MissingStatus)?;
        let status = serde_json::from_value(raw).map_err(RecordError::InvalidStatus)?;

        Ok(Self { status, document })
    }
}

impl From<JobRequest> for Map<String, Value> {
    fn from(request: JobRequest) -> Self {
        request.document
    }
}
