//! Streaming error types.

use thiserror::Error;

use crate::controller::Level;

/// Errors reported by request construction and controller registration.
///
/// Load failures are not errors at this level: they surface as
/// [`RequestStatus::Failed`](crate::RequestStatus::Failed) and
/// [`NodeLoadState::Failed`](crate::NodeLoadState::Failed).
#[derive(Debug, Error)]
pub enum StreamingError {
    /// A resource address was the empty string.
    #[error("resource address is empty")]
    EmptyAddress,
    /// A load request was built with no addresses.
    #[error("load request has no addresses")]
    EmptyRequest,
    /// A high object was registered without any material addresses.
    #[error("high object has no materials")]
    NoMaterials,
    /// The node id was never registered with the controller.
    #[error("unknown {level:?} node id {id}")]
    UnknownNode { level: Level, id: u32 },
}
