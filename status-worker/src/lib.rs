//! Simod request status worker.
//!
//! Mirrors job status notifications from the pipeline's topic exchange into
//! the request records that the HTTP service serves to clients.
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → <exchange> → status queue → Worker → <storage>/requests/<id>/request.json
//! ```

pub mod config;
pub mod handler;
pub mod queue;
pub mod request;

// Re-export commonly used types
pub use config::{ConfigError, Settings};
pub use handler::{Ack, HandleError, StatusHandler};
pub use queue::{status_token, Notification, NotificationError};
pub use request::{
    InvalidStatusError, JobRequest, RecordError, RequestStatus, RequestStore, StoreError,
};
