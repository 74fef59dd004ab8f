//! Interface to the asset-loading subsystem that actually fetches resources.

use crate::request::{ResourceAddress, ResourceKind};

/// Provider-side identifier of one dispatched batched load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderTicket(pub u64);

/// A loaded asset, owned by the provider until its ticket is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AssetHandle(pub u64);

/// Status of a provider load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Unknown or released ticket.
    None,
    Pending,
    Succeeded,
    Failed,
}

/// Terminal outcome of a provider load, reported exactly once per ticket.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderCompletion {
    pub ticket: ProviderTicket,
    /// Assets ordered to match the requested addresses, or `None` on failure.
    pub assets: Option<Vec<AssetHandle>>,
}

/// Address-based asynchronous asset fetch/release.
///
/// Loads never complete synchronously from the caller's point of view:
/// completions are collected with [`drain_completions`](Self::drain_completions),
/// normally once per frame by [`LoadScheduler::update`](crate::LoadScheduler::update).
pub trait ResourceProvider {
    /// Begins loading every address as `kind`. The batch succeeds or fails as a unit.
    ///
    /// The returned ticket reports [`ProviderStatus::Pending`] until its completion is drained.
    fn load(&mut self, addresses: &[ResourceAddress], kind: ResourceKind) -> ProviderTicket;

    /// Releases the ticket's assets, cancelling the load if it is still running.
    ///
    /// A released ticket that was still pending may still appear in a later
    /// [`drain_completions`](Self::drain_completions) call.
    fn release(&mut self, ticket: ProviderTicket);

    fn status(&self, ticket: ProviderTicket) -> ProviderStatus;

    /// Returns every load that reached a terminal status since the last call.
    fn drain_completions(&mut self) -> Vec<ProviderCompletion>;
}

/// Lets a scheduler drive a provider it does not own.
impl<P: ResourceProvider + ?Sized> ResourceProvider for &mut P {
    fn load(&mut self, addresses: &[ResourceAddress], kind: ResourceKind) -> ProviderTicket {
        (**self).load(addresses, kind)
    }

    fn release(&mut self, ticket: ProviderTicket) {
        (**self).release(ticket)
    }

    fn status(&self, ticket: ProviderTicket) -> ProviderStatus {
        (**self).status(ticket)
    }

    fn drain_completions(&mut self) -> Vec<ProviderCompletion> {
        (**self).drain_completions()
    }
}
