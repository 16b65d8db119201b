//! Request status enumeration shared with the request-tracking store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a job request.
///
/// Serialized as the lowercase token the pipeline puts at the end of the
/// routing key, so the same strings appear on the wire and on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Unknown,
    Accepted,
    Pending,
    Running,
    Succeeded,
    Failed,
    Deleted,
}

/// A status token that is not a member of [`RequestStatus`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unrecognized request status: {0:?}")]
pub struct InvalidStatusError(pub String);

impl RequestStatus {
    pub const ALL: [RequestStatus; 7] = [
        RequestStatus::Unknown,
        RequestStatus::Accepted,
        RequestStatus::Pending,
        RequestStatus::Running,
        RequestStatus::Succeeded,
        RequestStatus::Failed,
        RequestStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Unknown => "unknown",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Pending => "pending",
            RequestStatus::Running => "running",
            RequestStatus::Succeeded => "succeeded",
            RequestStatus::Failed => "failed",
            RequestStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = InvalidStatusError;

    /// Exact, case-sensitive match against the lowercase tokens.
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        RequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == token)
            .ok_or_else(|| InvalidStatusError(token.to_string()))
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
