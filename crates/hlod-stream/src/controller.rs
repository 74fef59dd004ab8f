//! Per-scene node controller: swaps high- and low-detail representations in
//! and out by issuing load requests to a shared [`LoadScheduler`].
//!
//! A high representation is an authored scene object whose mesh and
//! materials are streamed in (two requests) and stripped out again on
//! release. A low representation is a prefab streamed in (one request),
//! instantiated under the controller's low root, and destroyed on release.
//!
//! Each node entry resolves only once every one of its requests succeeded;
//! callers waiting on it are then notified exactly once, in registration
//! order. A failed request leaves the node permanently unresolved and
//! [`NodeLoadState::Failed`].

use crossbeam_channel::{Receiver, Sender};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::address_table::{AddressId, AddressTable};
use crate::error::StreamingError;
use crate::provider::ResourceProvider;
use crate::request::{
    ControllerId, LoadRequest, RequestCompletion, RequestHandle, RequestStatus, ResourceKind,
};
use crate::scene::{LayerTag, ObjectId, Placement, SceneGraph};
use crate::scheduler::LoadScheduler;

/// Which representation of a node is requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    High,
    Low,
}

/// Index of a registered node within its level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Load progress of one node representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeLoadState {
    /// At least one request is queued or in flight.
    Loading,
    /// Every request succeeded; the object is available.
    Resolved,
    /// A request failed. The node never resolves; release it to clean up.
    Failed,
}

/// Controller configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Priority of every request this controller issues (lower is sooner).
    pub priority: i32,
    /// Layer assigned to resolved objects and their descendants.
    pub streaming_layer: LayerTag,
    /// Name of the group low representations are instantiated under.
    pub low_root_name: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            priority: 0,
            streaming_layer: LayerTag(31),
            low_root_name: "HLODMeshesRoot".to_string(),
        }
    }
}

/// Callback invoked with the resolved object.
pub type ReadyCallback = Box<dyn FnOnce(ObjectId)>;

#[derive(Debug)]
struct HighObject {
    object: ObjectId,
    mesh: AddressId,
    materials: Vec<AddressId>,
}

#[derive(Clone, Copy, Debug)]
struct RequestSlot {
    handle: RequestHandle,
    status: RequestStatus,
}

/// Reverse index from a request handle to the node slot it feeds.
#[derive(Clone, Copy, Debug)]
struct SlotRef {
    level: Level,
    node: NodeId,
    slot: usize,
}

struct NodeLoadEntry {
    resolved_object: Option<ObjectId>,
    requests: Vec<RequestSlot>,
    pending_callbacks: Vec<ReadyCallback>,
    failed: bool,
}

impl NodeLoadEntry {
    fn state(&self) -> NodeLoadState {
        if self.resolved_object.is_some() {
            NodeLoadState::Resolved
        } else if self.failed {
            NodeLoadState::Failed
        } else {
            NodeLoadState::Loading
        }
    }

    /// Unresolved, with a request the scheduler no longer tracks (cancelled or shut down).
    fn orphaned<P: ResourceProvider>(&self, scheduler: &LoadScheduler<P>) -> bool {
        self.resolved_object.is_none()
            && self
                .requests
                .iter()
                .any(|slot| scheduler.status(slot.handle).is_none())
    }

    fn all_succeeded(&self) -> bool {
        self.requests
            .iter()
            .all(|slot| slot.status == RequestStatus::Succeeded)
    }
}

/// Streams the high and low representations of one scene's nodes.
pub struct NodeLoadController {
    id: ControllerId,
    config: ControllerConfig,
    /// The controller's own scene object.
    root: ObjectId,
    /// Parent of instantiated low representations, created by [`start`](Self::start).
    low_root: Option<ObjectId>,
    addresses: AddressTable,
    high_objects: Vec<HighObject>,
    low_objects: Vec<AddressId>,
    high_entries: FxHashMap<NodeId, NodeLoadEntry>,
    low_entries: FxHashMap<NodeId, NodeLoadEntry>,
    slots: FxHashMap<RequestHandle, SlotRef>,
    completion_tx: Sender<RequestCompletion>,
    completion_rx: Receiver<RequestCompletion>,
    high_observers: Vec<Sender<ObjectId>>,
}

impl NodeLoadController {
    /// Creates a controller for the scene rooted at `root`, registering it as an owner with `scheduler`.
    pub fn new<P: ResourceProvider>(
        scheduler: &mut LoadScheduler<P>,
        root: ObjectId,
        config: ControllerConfig,
    ) -> Self {
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        Self {
            id: scheduler.register_owner(),
            config,
            root,
            low_root: None,
            addresses: AddressTable::new(),
            high_objects: Vec::new(),
            low_objects: Vec::new(),
            high_entries: FxHashMap::default(),
            low_entries: FxHashMap::default(),
            slots: FxHashMap::default(),
            completion_tx,
            completion_rx,
            high_observers: Vec::new(),
        }
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Registers an authored object as a high representation.
    ///
    /// # Errors
    ///
    /// [`StreamingError::EmptyAddress`] if any address is empty,
    /// [`StreamingError::NoMaterials`] if `materials` is empty.
    pub fn add_high_object<S: AsRef<str>>(
        &mut self,
        object: ObjectId,
        mesh: &str,
        materials: &[S],
    ) -> Result<NodeId, StreamingError> {
        if materials.is_empty() {
            return Err(StreamingError::NoMaterials);
        }
        if mesh.is_empty() || materials.iter().any(|m| m.as_ref().is_empty()) {
            return Err(StreamingError::EmptyAddress);
        }

        let mesh = self.addresses.intern(mesh)?;
        let materials = materials
            .iter()
            .map(|m| self.addresses.intern(m.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let id = NodeId(self.high_objects.len() as u32);
        self.high_objects.push(HighObject {
            object,
            mesh,
            materials,
        });
        Ok(id)
    }

    /// Registers a prefab address as a low representation.
    ///
    /// # Errors
    ///
    /// [`StreamingError::EmptyAddress`] if `address` is empty.
    pub fn add_low_object(&mut self, address: &str) -> Result<NodeId, StreamingError> {
        let address = self.addresses.intern(address)?;
        let id = NodeId(self.low_objects.len() as u32);
        self.low_objects.push(address);
        Ok(id)
    }

    pub fn high_object_count(&self) -> usize {
        self.high_objects.len()
    }

    pub fn low_object_count(&self) -> usize {
        self.low_objects.len()
    }

    /// Prefab address of a low node.
    pub fn low_object_address(&self, node: NodeId) -> Option<&str> {
        self.low_objects
            .get(node.0 as usize)
            .map(|&id| self.addresses.get(id).as_str())
    }

    /// The authored object behind a high node.
    pub fn high_object(&self, node: NodeId) -> Option<ObjectId> {
        self.high_objects.get(node.0 as usize).map(|h| h.object)
    }

    /// Distinct addresses across all registered nodes.
    pub fn address_count(&self) -> usize {
        self.addresses.len()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Strips and deactivates every high object so the scene starts unloaded.
    pub fn install<S: SceneGraph>(&self, scene: &mut S) {
        for high in &self.high_objects {
            scene.strip(high.object);
            scene.set_active(high.object, false);
        }
    }

    /// Creates the group low representations are instantiated under.
    pub fn start<S: SceneGraph>(&mut self, scene: &mut S) {
        if self.low_root.is_none() {
            self.low_root = Some(scene.create_group(&self.config.low_root_name, Some(self.root)));
        }
    }

    /// Drops this controller's queued requests from the scheduler.
    ///
    /// Nodes that lost a request this way are released, including any
    /// sibling request still in flight, and their callbacks are dropped.
    /// Nodes whose requests are all in flight keep loading.
    pub fn stop<P, S>(&mut self, scheduler: &mut LoadScheduler<P>, scene: &mut S)
    where
        P: ResourceProvider,
        S: SceneGraph,
    {
        let cancelled = scheduler.cancel_all(self.id);

        let tracked: &LoadScheduler<P> = scheduler;
        let orphaned: Vec<(NodeId, Level)> = [
            (Level::High, &self.high_entries),
            (Level::Low, &self.low_entries),
        ]
        .into_iter()
        .flat_map(|(level, entries)| {
            entries
                .iter()
                .filter(|(_, entry)| entry.orphaned(tracked))
                .map(move |(&node, _)| (node, level))
        })
        .collect();

        if cancelled > 0 {
            tracing::debug!(
                "{:?} stopped: {} queued requests cancelled, {} nodes released",
                self.id,
                cancelled,
                orphaned.len()
            );
        }
        for (node, level) in orphaned {
            self.release_representation(scheduler, scene, node, level);
        }
    }

    /// Observer notified with the object each time a high representation resolves.
    pub fn subscribe_high_objects(&mut self) -> Receiver<ObjectId> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.high_observers.push(tx);
        rx
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Asks for a node representation; `on_ready` receives the object once it is loaded.
    ///
    /// An already resolved node calls `on_ready` before returning. A node
    /// still loading queues `on_ready` behind earlier callers. Otherwise the
    /// node's requests are submitted at this controller's priority and
    /// `distance`. Callbacks for a failed node are dropped.
    ///
    /// # Errors
    ///
    /// [`StreamingError::UnknownNode`] if `node` was never registered at `level`.
    pub fn request_representation<P, F>(
        &mut self,
        scheduler: &mut LoadScheduler<P>,
        node: NodeId,
        level: Level,
        distance: f32,
        on_ready: F,
    ) -> Result<(), StreamingError>
    where
        P: ResourceProvider,
        F: FnOnce(ObjectId) + 'static,
    {
        let registered = match level {
            Level::High => self.high_objects.len(),
            Level::Low => self.low_objects.len(),
        };
        if node.0 as usize >= registered {
            return Err(StreamingError::UnknownNode { level, id: node.0 });
        }

        let tracked: &LoadScheduler<P> = scheduler;
        let stale = self
            .entries(level)
            .get(&node)
            .is_some_and(|entry| entry.orphaned(tracked));
        if stale {
            tracing::debug!("{:?} node {} lost its requests; loading again", level, node.0);
            self.forget_entry(scheduler, node, level);
        }

        let entries = match level {
            Level::High => &mut self.high_entries,
            Level::Low => &mut self.low_entries,
        };
        if let Some(entry) = entries.get_mut(&node) {
            match entry.state() {
                NodeLoadState::Resolved => {
                    if let Some(object) = entry.resolved_object {
                        on_ready(object);
                    }
                }
                NodeLoadState::Loading => entry.pending_callbacks.push(Box::new(on_ready)),
                NodeLoadState::Failed => {
                    tracing::warn!("{:?} node {} failed to load; callback dropped", level, node.0);
                }
            }
            return Ok(());
        }

        let requests = self.build_requests(node, level, distance)?;
        let mut slots = Vec::with_capacity(requests.len());
        for request in requests {
            match scheduler.submit_with_listener(request, self.completion_tx.clone()) {
                Some(handle) => slots.push(RequestSlot {
                    handle,
                    status: RequestStatus::Unstarted,
                }),
                None => {
                    // Scheduler is gone; undo what was submitted and forget the node.
                    for slot in &slots {
                        scheduler.release(slot.handle);
                    }
                    tracing::debug!("{:?} node {} not loaded: scheduler shut down", level, node.0);
                    return Ok(());
                }
            }
        }

        for (index, slot) in slots.iter().enumerate() {
            self.slots.insert(
                slot.handle,
                SlotRef {
                    level,
                    node,
                    slot: index,
                },
            );
        }
        let entry = NodeLoadEntry {
            resolved_object: None,
            requests: slots,
            pending_callbacks: vec![Box::new(on_ready)],
            failed: false,
        };
        match level {
            Level::High => self.high_entries.insert(node, entry),
            Level::Low => self.low_entries.insert(node, entry),
        };
        Ok(())
    }

    fn build_requests(
        &self,
        node: NodeId,
        level: Level,
        distance: f32,
    ) -> Result<Vec<LoadRequest>, StreamingError> {
        let priority = self.config.priority;
        match level {
            Level::High => {
                let high = &self.high_objects[node.0 as usize];
                let mesh = LoadRequest::single(
                    self.id,
                    ResourceKind::Mesh,
                    self.addresses.get(high.mesh).clone(),
                    priority,
                    distance,
                );
                let materials = LoadRequest::new(
                    self.id,
                    ResourceKind::Material,
                    high.materials
                        .iter()
                        .map(|&id| self.addresses.get(id).clone())
                        .collect(),
                    priority,
                    distance,
                )?;
                Ok(vec![mesh, materials])
            }
            Level::Low => {
                let prefab = self.addresses.get(self.low_objects[node.0 as usize]).clone();
                Ok(vec![LoadRequest::single(
                    self.id,
                    ResourceKind::Prefab,
                    prefab,
                    priority,
                    distance,
                )])
            }
        }
    }

    /// Releases a node representation. No-op if it was never requested.
    ///
    /// High objects are stripped and deactivated (they belong to the scene);
    /// low objects are destroyed. Every request of the node is cancelled or
    /// unloaded, whether it is queued, in flight, or complete.
    pub fn release_representation<P, S>(
        &mut self,
        scheduler: &mut LoadScheduler<P>,
        scene: &mut S,
        node: NodeId,
        level: Level,
    ) where
        P: ResourceProvider,
        S: SceneGraph,
    {
        let Some(entry) = self.forget_entry(scheduler, node, level) else {
            return;
        };

        match level {
            Level::High => {
                if let Some(high) = self.high_objects.get(node.0 as usize) {
                    scene.strip(high.object);
                    scene.set_active(high.object, false);
                }
            }
            Level::Low => {
                if let Some(object) = entry.resolved_object {
                    scene.destroy(object);
                }
            }
        }
        tracing::trace!("released {:?} node {}", level, node.0);
    }

    /// Removes a node entry and releases every request behind it.
    fn forget_entry<P: ResourceProvider>(
        &mut self,
        scheduler: &mut LoadScheduler<P>,
        node: NodeId,
        level: Level,
    ) -> Option<NodeLoadEntry> {
        let entry = match level {
            Level::High => self.high_entries.remove(&node),
            Level::Low => self.low_entries.remove(&node),
        }?;

        // Queued siblings go first so freeing an in-flight slot cannot dispatch them.
        let (queued, started): (Vec<RequestHandle>, Vec<RequestHandle>) = entry
            .requests
            .iter()
            .map(|slot| slot.handle)
            .partition(|&handle| scheduler.status(handle) == Some(RequestStatus::Unstarted));
        for handle in queued.into_iter().chain(started) {
            self.slots.remove(&handle);
            scheduler.release(handle);
        }
        Some(entry)
    }

    /// Applies every completion delivered since the last call. Returns how many were applied.
    pub fn update<S: SceneGraph>(&mut self, scene: &mut S) -> usize {
        let mut completions = Vec::new();
        while let Ok(completion) = self.completion_rx.try_recv() {
            completions.push(completion);
        }
        let mut applied = 0;
        for completion in completions {
            if self.apply_completion(scene, completion) {
                applied += 1;
            }
        }
        applied
    }

    fn apply_completion<S: SceneGraph>(&mut self, scene: &mut S, completion: RequestCompletion) -> bool {
        // Released nodes leave no slot behind; their completions are stale.
        let Some(&SlotRef { level, node, slot }) = self.slots.get(&completion.handle) else {
            return false;
        };
        let entry = match level {
            Level::High => self.high_entries.get_mut(&node),
            Level::Low => self.low_entries.get_mut(&node),
        };
        let Some(entry) = entry else {
            return false;
        };
        entry.requests[slot].status = completion.status;

        if !completion.succeeded() {
            tracing::error!(
                "failed to load {:?} for {:?} node {}",
                completion.kind,
                level,
                node.0
            );
            entry.failed = true;
            if !entry.pending_callbacks.is_empty() {
                tracing::warn!(
                    "{} callbacks for {:?} node {} will not be called",
                    entry.pending_callbacks.len(),
                    level,
                    node.0
                );
                entry.pending_callbacks.clear();
            }
            return true;
        }

        let Some(&first) = completion.assets.first() else {
            return true;
        };
        let target = match (level, completion.kind) {
            (Level::High, ResourceKind::Mesh) => {
                let object = self.high_objects[node.0 as usize].object;
                scene.assign_mesh(object, first);
                object
            }
            (Level::High, _) => {
                let object = self.high_objects[node.0 as usize].object;
                scene.assign_materials(object, &completion.assets);
                object
            }
            (Level::Low, _) => {
                let parent = self.low_root.unwrap_or(self.root);
                scene.instantiate(first, parent, Placement::IDENTITY)
            }
        };

        if entry.resolved_object.is_some() || entry.failed || !entry.all_succeeded() {
            return true;
        }

        scene.set_active(target, false);
        scene.set_layer_recursive(target, self.config.streaming_layer);
        entry.resolved_object = Some(target);
        let callbacks = std::mem::take(&mut entry.pending_callbacks);

        if level == Level::High {
            self.high_observers.retain(|observer| observer.send(target).is_ok());
        }
        for callback in callbacks {
            callback(target);
        }
        true
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Load state of a node representation, or `None` if it is not requested.
    pub fn node_state(&self, node: NodeId, level: Level) -> Option<NodeLoadState> {
        self.entries(level).get(&node).map(NodeLoadEntry::state)
    }

    pub fn resolved_object(&self, node: NodeId, level: Level) -> Option<ObjectId> {
        self.entries(level)
            .get(&node)
            .and_then(|entry| entry.resolved_object)
    }

    /// Request handles of a node representation, in slot order.
    pub fn request_handles(&self, node: NodeId, level: Level) -> Vec<RequestHandle> {
        self.entries(level)
            .get(&node)
            .map(|entry| entry.requests.iter().map(|slot| slot.handle).collect())
            .unwrap_or_default()
    }

    /// Number of node representations currently requested at `level`.
    pub fn active_count(&self, level: Level) -> usize {
        self.entries(level).len()
    }

    fn entries(&self, level: Level) -> &FxHashMap<NodeId, NodeLoadEntry> {
        match level {
            Level::High => &self.high_entries,
            Level::Low => &self.low_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::scheduler::SchedulerConfig;
    use crate::sim::{SimulatedProvider, SimulatedScene};

    struct Fixture {
        scheduler: LoadScheduler<SimulatedProvider>,
        scene: SimulatedScene,
        controller: NodeLoadController,
        high: NodeId,
        low: NodeId,
        high_object: ObjectId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut scheduler =
                LoadScheduler::new(SimulatedProvider::new(), SchedulerConfig::default());
            let mut scene = SimulatedScene::new();
            let root = scene.spawn("hlod-root", None);
            let high_object = scene.spawn("rock-01", Some(root));
            let mut controller =
                NodeLoadController::new(&mut scheduler, root, ControllerConfig::default());
            let high = controller
                .add_high_object(high_object, "meshes/rock", &["materials/stone", "materials/moss"])
                .unwrap();
            let low = controller.add_low_object("prefabs/rock_cluster_low").unwrap();
            controller.install(&mut scene);
            controller.start(&mut scene);
            Self {
                scheduler,
                scene,
                controller,
                high,
                low,
                high_object,
            }
        }

        /// Completes every load, one at a time, delivering each to the controller.
        fn run(&mut self) {
            while self.scheduler.provider_mut().complete_next() {
                self.scheduler.update();
                self.controller.update(&mut self.scene);
            }
        }

        fn request(&mut self, node: NodeId, level: Level, log: &Rc<RefCell<Vec<ObjectId>>>) {
            let log = Rc::clone(log);
            self.controller
                .request_representation(&mut self.scheduler, node, level, 10.0, move |object| {
                    log.borrow_mut().push(object)
                })
                .unwrap();
        }

        fn release(&mut self, node: NodeId, level: Level) {
            self.controller
                .release_representation(&mut self.scheduler, &mut self.scene, node, level);
        }
    }

    #[test]
    fn test_install_strips_high_objects() {
        let fx = Fixture::new();
        let object = fx.scene.get(fx.high_object).unwrap();
        assert!(!object.active);
        assert!(object.mesh.is_none());
    }

    #[test]
    fn test_high_issues_mesh_and_material_requests() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.high, Level::High, &log);

        assert_eq!(fx.controller.request_handles(fx.high, Level::High).len(), 2);
        assert_eq!(fx.scheduler.in_flight_len(), 1);
        assert_eq!(fx.scheduler.queued_len(), 1);
        assert_eq!(
            fx.controller.node_state(fx.high, Level::High),
            Some(NodeLoadState::Loading)
        );
    }

    #[test]
    fn test_high_resolves_after_both_requests() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let created = fx.controller.subscribe_high_objects();
        fx.request(fx.high, Level::High, &log);

        // Mesh only: assigned, not resolved yet.
        fx.scheduler.provider_mut().complete_next();
        fx.scheduler.update();
        fx.controller.update(&mut fx.scene);
        assert!(fx.scene.get(fx.high_object).unwrap().mesh.is_some());
        assert_eq!(fx.controller.resolved_object(fx.high, Level::High), None);
        assert!(log.borrow().is_empty());

        fx.run();
        assert_eq!(
            fx.controller.resolved_object(fx.high, Level::High),
            Some(fx.high_object)
        );
        assert_eq!(*log.borrow(), vec![fx.high_object]);
        assert_eq!(created.try_recv().unwrap(), fx.high_object);

        let object = fx.scene.get(fx.high_object).unwrap();
        assert_eq!(object.materials.len(), 2);
        assert_eq!(object.layer, fx.controller.config().streaming_layer);
        assert!(!object.active);
    }

    #[test]
    fn test_low_instantiates_prefab_under_low_root() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.low, Level::Low, &log);
        fx.run();

        let object = fx.controller.resolved_object(fx.low, Level::Low).unwrap();
        assert_eq!(*log.borrow(), vec![object]);
        let sim = fx.scene.get(object).unwrap();
        assert!(sim.prefab.is_some());
        assert_eq!(sim.placement, Placement::IDENTITY);
        let parent = fx.scene.get(sim.parent.unwrap()).unwrap();
        assert_eq!(parent.name, "HLODMeshesRoot");
    }

    #[test]
    fn test_resolved_node_calls_back_immediately() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.low, Level::Low, &log);
        fx.run();
        let loads = fx.scheduler.provider().load_calls().len();

        fx.request(fx.low, Level::Low, &log);
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(fx.scheduler.provider().load_calls().len(), loads);
    }

    #[test]
    fn test_callback_fan_out_while_loading() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..4 {
            fx.request(fx.high, Level::High, &log);
        }
        assert_eq!(fx.scheduler.provider().load_calls().len(), 1);
        fx.run();

        assert_eq!(*log.borrow(), vec![fx.high_object; 4]);
        assert_eq!(fx.scheduler.provider().load_calls().len(), 2);
    }

    #[test]
    fn test_material_failure_never_resolves() {
        let mut fx = Fixture::new();
        fx.scheduler.provider_mut().fail_address("materials/moss");
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.high, Level::High, &log);
        fx.run();

        assert_eq!(fx.controller.resolved_object(fx.high, Level::High), None);
        assert_eq!(
            fx.controller.node_state(fx.high, Level::High),
            Some(NodeLoadState::Failed)
        );
        assert!(log.borrow().is_empty());

        // Later callers are dropped, not queued forever.
        fx.request(fx.high, Level::High, &log);
        assert!(log.borrow().is_empty());

        // Release still unloads the mesh request that succeeded.
        let handles = fx.controller.request_handles(fx.high, Level::High);
        assert_eq!(fx.scheduler.status(handles[0]), Some(RequestStatus::Succeeded));
        fx.release(fx.high, Level::High);
        assert_eq!(fx.scheduler.provider().released().len(), 2);
        assert_eq!(fx.scheduler.status(handles[0]), None);
        assert!(fx.scene.get(fx.high_object).unwrap().mesh.is_none());
    }

    #[test]
    fn test_release_high_strips_but_keeps_object() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.high, Level::High, &log);
        fx.run();
        fx.release(fx.high, Level::High);

        let object = fx.scene.get(fx.high_object).unwrap();
        assert!(object.mesh.is_none());
        assert!(object.materials.is_empty());
        assert!(!object.active);
        assert_eq!(fx.controller.node_state(fx.high, Level::High), None);
        assert_eq!(fx.scheduler.provider().released().len(), 2);
    }

    #[test]
    fn test_release_low_destroys_instance() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.low, Level::Low, &log);
        fx.run();
        let object = fx.controller.resolved_object(fx.low, Level::Low).unwrap();

        fx.release(fx.low, Level::Low);
        assert!(fx.scene.get(object).is_none());
        assert_eq!(fx.scene.destroyed(), &[object]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.release(fx.low, Level::Low);
        fx.request(fx.low, Level::Low, &log);
        fx.run();

        fx.release(fx.low, Level::Low);
        fx.release(fx.low, Level::Low);
        assert_eq!(fx.scheduler.provider().released().len(), 1);
        assert_eq!(fx.scene.destroyed().len(), 1);
    }

    #[test]
    fn test_release_before_dispatch_leaks_nothing() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.high, Level::High, &log);
        fx.request(fx.low, Level::Low, &log);
        assert_eq!(fx.scheduler.queued_len(), 2);

        fx.release(fx.low, Level::Low);
        assert_eq!(fx.scheduler.queued_len(), 1);
        fx.release(fx.high, Level::High);
        assert!(fx.scheduler.is_idle());

        fx.run();
        assert!(log.borrow().is_empty());
        assert_eq!(fx.scheduler.provider().load_calls().len(), 1);
    }

    #[test]
    fn test_completion_after_release_is_ignored() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.low, Level::Low, &log);
        fx.scheduler.provider_mut().complete_next();
        fx.scheduler.update();
        // Completion is in the controller's channel but not yet applied.
        fx.release(fx.low, Level::Low);
        assert_eq!(fx.controller.update(&mut fx.scene), 0);
        assert!(log.borrow().is_empty());
        assert_eq!(fx.scene.len(), 3);
    }

    #[test]
    fn test_rerequest_after_release_loads_again() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.low, Level::Low, &log);
        fx.run();
        fx.release(fx.low, Level::Low);
        fx.request(fx.low, Level::Low, &log);
        fx.run();
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(fx.scheduler.provider().load_calls().len(), 2);
    }

    #[test]
    fn test_unknown_node_is_error() {
        let mut fx = Fixture::new();
        let result = fx.controller.request_representation(
            &mut fx.scheduler,
            NodeId(42),
            Level::Low,
            0.0,
            |_| {},
        );
        assert!(matches!(
            result,
            Err(StreamingError::UnknownNode { level: Level::Low, id: 42 })
        ));
    }

    #[test]
    fn test_shared_addresses_are_interned_once() {
        let mut fx = Fixture::new();
        let other = fx.scene.spawn("rock-02", None);
        fx.controller
            .add_high_object(other, "meshes/rock", &["materials/stone"])
            .unwrap();
        // meshes/rock, materials/stone, materials/moss, prefabs/rock_cluster_low
        assert_eq!(fx.controller.address_count(), 4);
        assert_eq!(fx.controller.high_object_count(), 2);
        assert_eq!(
            fx.controller.low_object_address(fx.low),
            Some("prefabs/rock_cluster_low")
        );
    }

    #[test]
    fn test_registration_rejects_bad_addresses() {
        let mut fx = Fixture::new();
        let object = fx.scene.spawn("bad", None);
        let none: [&str; 0] = [];
        assert!(matches!(
            fx.controller.add_high_object(object, "meshes/x", &none),
            Err(StreamingError::NoMaterials)
        ));
        assert!(matches!(
            fx.controller.add_high_object(object, "", &["materials/x"]),
            Err(StreamingError::EmptyAddress)
        ));
        assert!(matches!(
            fx.controller.add_low_object(""),
            Err(StreamingError::EmptyAddress)
        ));
        assert_eq!(fx.controller.high_object_count(), 1);
    }

    #[test]
    fn test_stop_cancels_queued_requests() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.low, Level::Low, &log);
        fx.request(fx.high, Level::High, &log);
        assert_eq!(fx.scheduler.queued_len(), 2);

        fx.controller.stop(&mut fx.scheduler, &mut fx.scene);
        assert_eq!(fx.scheduler.queued_len(), 0);
        assert_eq!(fx.controller.node_state(fx.high, Level::High), None);
        // The in-flight low load is left alone and still resolves.
        assert_eq!(fx.scheduler.in_flight_len(), 1);
        assert_eq!(
            fx.controller.node_state(fx.low, Level::Low),
            Some(NodeLoadState::Loading)
        );
        fx.run();
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_request_after_stop_loads_again() {
        let mut fx = Fixture::new();
        let second = fx.controller.add_low_object("prefabs/rock_single_low").unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.low, Level::Low, &log);
        fx.request(second, Level::Low, &log);

        fx.controller.stop(&mut fx.scheduler, &mut fx.scene);
        assert_eq!(fx.controller.node_state(second, Level::Low), None);
        fx.run();
        assert_eq!(log.borrow().len(), 1);

        fx.request(second, Level::Low, &log);
        fx.run();
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(
            fx.controller.node_state(second, Level::Low),
            Some(NodeLoadState::Resolved)
        );
        assert_eq!(fx.scheduler.provider().load_calls().len(), 2);
    }

    #[test]
    fn test_stop_strips_partially_loaded_high_object() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.high, Level::High, &log);
        // Nearer than the queued materials, so it takes the slot after the mesh.
        let sink = Rc::clone(&log);
        fx.controller
            .request_representation(&mut fx.scheduler, fx.low, Level::Low, 1.0, move |object| {
                sink.borrow_mut().push(object)
            })
            .unwrap();

        fx.scheduler.provider_mut().complete_next();
        fx.scheduler.update();
        fx.controller.update(&mut fx.scene);
        assert!(fx.scene.get(fx.high_object).unwrap().mesh.is_some());

        fx.controller.stop(&mut fx.scheduler, &mut fx.scene);
        assert!(fx.scene.get(fx.high_object).unwrap().mesh.is_none());
        assert_eq!(fx.scheduler.provider().released().len(), 1);
        assert_eq!(fx.controller.node_state(fx.high, Level::High), None);
        assert_eq!(
            fx.controller.node_state(fx.low, Level::Low),
            Some(NodeLoadState::Loading)
        );
    }

    #[test]
    fn test_request_after_scheduler_shutdown_is_noop() {
        let mut fx = Fixture::new();
        fx.scheduler.shutdown();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.high, Level::High, &log);
        assert_eq!(fx.controller.node_state(fx.high, Level::High), None);
        fx.release(fx.high, Level::High);
        fx.controller.stop(&mut fx.scheduler, &mut fx.scene);
    }

    #[test]
    fn test_shutdown_drops_stale_loading_entries() {
        let mut fx = Fixture::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        fx.request(fx.low, Level::Low, &log);
        fx.scheduler.shutdown();

        // The scheduler forgot the request; asking again must not park the callback.
        fx.request(fx.low, Level::Low, &log);
        assert_eq!(fx.controller.node_state(fx.low, Level::Low), None);
        assert_eq!(fx.controller.active_count(Level::Low), 0);
    }
}
