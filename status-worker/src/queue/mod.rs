//! Queue module for the status exchange.
//!
//! ## Topology
//!
//! ```text
//! Pipeline → <exchange> (topic, durable) → <binding key> → exclusive queue → Worker
//! ```

pub mod notification;

pub use notification::{status_token, Notification, NotificationError};
