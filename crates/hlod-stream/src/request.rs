//! Load requests: the unit of work queued and dispatched by the [`LoadScheduler`](crate::LoadScheduler).

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StreamingError;
use crate::provider::AssetHandle;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque identifier the resource provider uses to locate a loadable resource.
///
/// Cheap to clone: the text is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceAddress(Arc<str>);

impl ResourceAddress {
    /// Creates an address, rejecting the empty string.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::EmptyAddress`] if `address` is empty.
    pub fn new(address: impl AsRef<str>) -> Result<Self, StreamingError> {
        let address = address.as_ref();
        if address.is_empty() {
            return Err(StreamingError::EmptyAddress);
        }
        Ok(Self(Arc::from(address)))
    }

    /// The address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle returned by [`LoadScheduler::submit`](crate::LoadScheduler::submit).
///
/// Handles are never reused for the lifetime of a scheduler, so a stale
/// handle can never alias a newer request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(pub(crate) u64);

impl RequestHandle {
    /// Raw handle value (for logging).
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Identifies the controller that issued a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ControllerId(pub u32);

/// The kind of asset a request fetches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A single mesh.
    Mesh,
    /// One or more materials, in renderer slot order.
    Material,
    /// A prefab that is instantiated into the scene.
    Prefab,
}

/// Lifecycle status of a load request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Queued, not yet handed to the provider.
    Unstarted,
    /// Dispatched, waiting for the provider.
    Pending,
    /// Loaded; the result is available.
    Succeeded,
    /// The provider reported a failure.
    Failed,
}

impl RequestStatus {
    /// Whether the status can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A batched asset load, ordered by `(priority, distance)`.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    addresses: Vec<ResourceAddress>,
    kind: ResourceKind,
    priority: i32,
    distance: f32,
    owner: ControllerId,
}

impl LoadRequest {
    /// Creates a request for one or more addresses of the same kind.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::EmptyRequest`] if `addresses` is empty.
    pub fn new(
        owner: ControllerId,
        kind: ResourceKind,
        addresses: Vec<ResourceAddress>,
        priority: i32,
        distance: f32,
    ) -> Result<Self, StreamingError> {
        if addresses.is_empty() {
            return Err(StreamingError::EmptyRequest);
        }
        Ok(Self {
            addresses,
            kind,
            priority,
            distance,
            owner,
        })
    }

    /// Creates a request for a single address.
    pub fn single(
        owner: ControllerId,
        kind: ResourceKind,
        address: ResourceAddress,
        priority: i32,
        distance: f32,
    ) -> Self {
        Self {
            addresses: vec![address],
            kind,
            priority,
            distance,
            owner,
        }
    }

    pub fn addresses(&self) -> &[ResourceAddress] {
        &self.addresses
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Lower values are serviced first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Secondary ordering key within equal priority; nearer is serviced first.
    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn owner(&self) -> ControllerId {
        self.owner
    }

    /// The queue key for this request, given its submission sequence number.
    pub(crate) fn key(&self, sequence: u64) -> QueueKey {
        QueueKey {
            priority: self.priority,
            distance: self.distance,
            sequence,
        }
    }
}

/// Total order over queued requests: priority, then distance, then submission order.
#[derive(Clone, Copy, Debug)]
pub struct QueueKey {
    pub priority: i32,
    pub distance: f32,
    pub sequence: u64,
}

impl PartialEq for QueueKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueKey {}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.distance.total_cmp(&other.distance))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Notification sent to every listener of a request when it reaches a terminal status.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestCompletion {
    pub handle: RequestHandle,
    pub owner: ControllerId,
    pub kind: ResourceKind,
    /// [`RequestStatus::Succeeded`] or [`RequestStatus::Failed`].
    pub status: RequestStatus,
    /// Loaded assets in address order. Empty unless the request succeeded.
    pub assets: Vec<AssetHandle>,
}

impl RequestCompletion {
    pub fn succeeded(&self) -> bool {
        self.status == RequestStatus::Succeeded
    }
}
