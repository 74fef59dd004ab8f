//! In-memory resource provider and scene graph.
//!
//! Loads never touch disk: [`SimulatedProvider`] keeps dispatched loads
//! pending until the host completes them (`complete_next`, `complete_all`,
//! `complete`), which makes dispatch order and completion timing fully
//! deterministic. Used by the demo binary and by tests.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::provider::{
    AssetHandle, ProviderCompletion, ProviderStatus, ProviderTicket, ResourceProvider,
};
use crate::request::{ResourceAddress, ResourceKind};
use crate::scene::{LayerTag, ObjectId, Placement, SceneGraph};

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// One call to [`ResourceProvider::load`], as recorded by [`SimulatedProvider`].
#[derive(Clone, Debug)]
pub struct LoadCall {
    pub ticket: ProviderTicket,
    pub kind: ResourceKind,
    pub addresses: Vec<ResourceAddress>,
}

/// Deterministic provider whose loads complete only when told to.
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    next_ticket: u64,
    statuses: FxHashMap<ProviderTicket, ProviderStatus>,
    /// Dispatched and not yet completed, oldest first.
    pending: VecDeque<ProviderTicket>,
    calls: Vec<LoadCall>,
    releases: Vec<ProviderTicket>,
    failing: FxHashSet<String>,
    /// Stable asset per address, so repeated loads yield the same handle.
    assets: FxHashMap<ResourceAddress, AssetHandle>,
    completions: Vec<ProviderCompletion>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every future load that includes `address` fails.
    pub fn fail_address(&mut self, address: &str) {
        self.failing.insert(address.to_string());
    }

    /// The asset handle this provider hands out for `address`.
    pub fn asset_for(&mut self, address: &ResourceAddress) -> AssetHandle {
        let next = AssetHandle(self.assets.len() as u64 + 1);
        *self.assets.entry(address.clone()).or_insert(next)
    }

    /// Completes the oldest pending, unreleased load. Returns `false` if none is pending.
    pub fn complete_next(&mut self) -> bool {
        while let Some(ticket) = self.pending.pop_front() {
            if self.statuses.get(&ticket) == Some(&ProviderStatus::Pending) {
                self.finish(ticket);
                return true;
            }
        }
        false
    }

    /// Completes every pending, unreleased load. Returns how many completed.
    pub fn complete_all(&mut self) -> usize {
        let mut count = 0;
        while self.complete_next() {
            count += 1;
        }
        count
    }

    /// Reports a terminal status for `ticket` even if it was released, the
    /// way a real provider may finish work it could not abort.
    pub fn complete(&mut self, ticket: ProviderTicket, success: bool) {
        self.pending.retain(|&pending| pending != ticket);
        let addresses = self.call(ticket).map(|call| call.addresses.clone());
        let assets = match addresses {
            Some(addresses) if success => Some(
                addresses
                    .iter()
                    .map(|address| self.asset_for(address))
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        };
        if self.statuses.get(&ticket) == Some(&ProviderStatus::Pending) {
            let status = if assets.is_some() {
                ProviderStatus::Succeeded
            } else {
                ProviderStatus::Failed
            };
            self.statuses.insert(ticket, status);
        }
        self.completions.push(ProviderCompletion { ticket, assets });
    }

    fn finish(&mut self, ticket: ProviderTicket) {
        let success = self.call(ticket).is_some_and(|call| {
            !call
                .addresses
                .iter()
                .any(|address| self.failing.contains(address.as_str()))
        });
        self.complete(ticket, success);
    }

    fn call(&self, ticket: ProviderTicket) -> Option<&LoadCall> {
        self.calls.iter().find(|call| call.ticket == ticket)
    }

    /// Every load call in dispatch order.
    pub fn load_calls(&self) -> &[LoadCall] {
        &self.calls
    }

    /// Every released ticket in release order.
    pub fn released(&self) -> &[ProviderTicket] {
        &self.releases
    }

    /// Loads dispatched and neither completed nor released.
    pub fn pending_count(&self) -> usize {
        self.statuses
            .values()
            .filter(|&&status| status == ProviderStatus::Pending)
            .count()
    }
}

impl ResourceProvider for SimulatedProvider {
    fn load(&mut self, addresses: &[ResourceAddress], kind: ResourceKind) -> ProviderTicket {
        let ticket = ProviderTicket(self.next_ticket);
        self.next_ticket += 1;
        self.calls.push(LoadCall {
            ticket,
            kind,
            addresses: addresses.to_vec(),
        });
        self.statuses.insert(ticket, ProviderStatus::Pending);
        self.pending.push_back(ticket);
        ticket
    }

    fn release(&mut self, ticket: ProviderTicket) {
        self.releases.push(ticket);
        self.statuses.remove(&ticket);
    }

    fn status(&self, ticket: ProviderTicket) -> ProviderStatus {
        self.statuses
            .get(&ticket)
            .copied()
            .unwrap_or(ProviderStatus::None)
    }

    fn drain_completions(&mut self) -> Vec<ProviderCompletion> {
        std::mem::take(&mut self.completions)
    }
}

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

/// State of one object in a [`SimulatedScene`].
#[derive(Clone, Debug, PartialEq)]
pub struct SimObject {
    pub name: String,
    pub parent: Option<ObjectId>,
    pub children: Vec<ObjectId>,
    pub active: bool,
    pub layer: LayerTag,
    pub mesh: Option<AssetHandle>,
    pub materials: Vec<AssetHandle>,
    /// Set for objects created by [`SceneGraph::instantiate`].
    pub prefab: Option<AssetHandle>,
    pub placement: Placement,
}

/// Flat object table implementing [`SceneGraph`].
#[derive(Debug, Default)]
pub struct SimulatedScene {
    next_id: u64,
    objects: FxHashMap<ObjectId, SimObject>,
    destroyed: Vec<ObjectId>,
}

impl SimulatedScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an active object, as if authored in the scene.
    pub fn spawn(&mut self, name: &str, parent: Option<ObjectId>) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.insert(
            id,
            SimObject {
                name: name.to_string(),
                parent,
                children: Vec::new(),
                active: true,
                layer: LayerTag(0),
                mesh: None,
                materials: Vec::new(),
                prefab: None,
                placement: Placement::IDENTITY,
            },
        );
        if let Some(parent) = parent.and_then(|p| self.objects.get_mut(&p)) {
            parent.children.push(id);
        }
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&SimObject> {
        self.objects.get(&id)
    }

    /// Objects destroyed so far, in order.
    pub fn destroyed(&self) -> &[ObjectId] {
        &self.destroyed
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl SceneGraph for SimulatedScene {
    fn create_group(&mut self, name: &str, parent: Option<ObjectId>) -> ObjectId {
        self.spawn(name, parent)
    }

    fn assign_mesh(&mut self, object: ObjectId, mesh: AssetHandle) {
        if let Some(obj) = self.objects.get_mut(&object) {
            obj.mesh = Some(mesh);
        }
    }

    fn assign_materials(&mut self, object: ObjectId, materials: &[AssetHandle]) {
        if let Some(obj) = self.objects.get_mut(&object) {
            obj.materials = materials.to_vec();
        }
    }

    fn strip(&mut self, object: ObjectId) {
        if let Some(obj) = self.objects.get_mut(&object) {
            obj.mesh = None;
            obj.materials.clear();
        }
    }

    fn instantiate(&mut self, prefab: AssetHandle, parent: ObjectId, placement: Placement) -> ObjectId {
        let id = self.spawn(&format!("prefab-{}", prefab.0), Some(parent));
        if let Some(obj) = self.objects.get_mut(&id) {
            obj.prefab = Some(prefab);
            obj.placement = placement;
        }
        id
    }

    fn destroy(&mut self, object: ObjectId) {
        let Some(obj) = self.objects.remove(&object) else {
            return;
        };
        if let Some(parent) = obj.parent.and_then(|p| self.objects.get_mut(&p)) {
            parent.children.retain(|&child| child != object);
        }
        self.destroyed.push(object);
        for child in obj.children {
            self.destroy(child);
        }
    }

    fn set_active(&mut self, object: ObjectId, active: bool) {
        if let Some(obj) = self.objects.get_mut(&object) {
            obj.active = active;
        }
    }

    fn set_layer_recursive(&mut self, root: ObjectId, layer: LayerTag) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(obj) = self.objects.get_mut(&id) {
                obj.layer = layer;
                stack.extend(obj.children.iter().copied());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> ResourceAddress {
        ResourceAddress::new(text).unwrap()
    }

    #[test]
    fn test_provider_completes_in_dispatch_order() {
        let mut provider = SimulatedProvider::new();
        let a = provider.load(&[addr("a")], ResourceKind::Mesh);
        let b = provider.load(&[addr("b")], ResourceKind::Mesh);
        assert_eq!(provider.status(a), ProviderStatus::Pending);

        assert!(provider.complete_next());
        let done = provider.drain_completions();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].ticket, a);
        assert_eq!(provider.status(a), ProviderStatus::Succeeded);
        assert_eq!(provider.status(b), ProviderStatus::Pending);
    }

    #[test]
    fn test_provider_batch_fails_as_unit() {
        let mut provider = SimulatedProvider::new();
        provider.fail_address("bad");
        let ticket = provider.load(&[addr("good"), addr("bad")], ResourceKind::Material);
        provider.complete_all();
        let done = provider.drain_completions();
        assert_eq!(done[0].assets, None);
        assert_eq!(provider.status(ticket), ProviderStatus::Failed);
    }

    #[test]
    fn test_provider_assets_follow_address_order() {
        let mut provider = SimulatedProvider::new();
        let x = provider.asset_for(&addr("x"));
        let y = provider.asset_for(&addr("y"));
        provider.load(&[addr("y"), addr("x")], ResourceKind::Material);
        provider.complete_all();
        let done = provider.drain_completions();
        assert_eq!(done[0].assets, Some(vec![y, x]));
    }

    #[test]
    fn test_released_loads_are_not_completed() {
        let mut provider = SimulatedProvider::new();
        let ticket = provider.load(&[addr("a")], ResourceKind::Prefab);
        provider.release(ticket);
        assert_eq!(provider.status(ticket), ProviderStatus::None);
        assert_eq!(provider.complete_all(), 0);
        assert!(provider.drain_completions().is_empty());
    }

    #[test]
    fn test_scene_layer_applies_to_descendants() {
        let mut scene = SimulatedScene::new();
        let root = scene.spawn("root", None);
        let child = scene.spawn("child", Some(root));
        let grandchild = scene.spawn("grandchild", Some(child));
        scene.set_layer_recursive(root, LayerTag(9));
        for id in [root, child, grandchild] {
            assert_eq!(scene.get(id).unwrap().layer, LayerTag(9));
        }
    }

    #[test]
    fn test_scene_destroy_removes_subtree() {
        let mut scene = SimulatedScene::new();
        let root = scene.spawn("root", None);
        let child = scene.spawn("child", Some(root));
        let prefab = scene.instantiate(AssetHandle(4), child, Placement::IDENTITY);
        scene.destroy(child);
        assert!(scene.get(child).is_none());
        assert!(scene.get(prefab).is_none());
        assert!(scene.get(root).unwrap().children.is_empty());
        assert_eq!(scene.len(), 1);
    }
}
