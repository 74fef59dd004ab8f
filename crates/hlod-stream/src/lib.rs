//! HLOD streaming: a shared, admission-controlled asset load scheduler and the per-scene node controllers that feed it.

pub mod address_table;
pub mod controller;
mod error;
pub mod provider;
mod queue;
pub mod request;
pub mod scene;
pub mod scheduler;
pub mod sim;

pub use address_table::{AddressId, AddressTable};
pub use controller::{ControllerConfig, Level, NodeId, NodeLoadController, NodeLoadState, ReadyCallback};
pub use error::StreamingError;
pub use provider::{AssetHandle, ProviderCompletion, ProviderStatus, ProviderTicket, ResourceProvider};
pub use request::{
    ControllerId, LoadRequest, RequestCompletion, RequestHandle, RequestStatus, ResourceAddress,
    ResourceKind,
};
pub use scene::{LayerTag, ObjectId, Placement, SceneGraph};
pub use scheduler::{LoadScheduler, SchedulerConfig};
pub use sim::{SimulatedProvider, SimulatedScene};
