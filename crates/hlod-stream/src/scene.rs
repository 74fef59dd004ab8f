//! Interface to the scene graph that streamed objects are placed into.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::provider::AssetHandle;

/// Identifies an object in the host scene graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// Render/visibility layer assigned to resolved streaming objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerTag(pub u32);

/// Local transform of an instantiated object relative to its parent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Placement {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };
}

impl Default for Placement {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Scene-graph mutations needed by the node controller.
///
/// High representations are existing scene objects whose mesh and material
/// references are filled in and stripped in place. Low representations are
/// prefabs instantiated for the representation and destroyed on release.
pub trait SceneGraph {
    /// Creates an empty object, optionally parented.
    fn create_group(&mut self, name: &str, parent: Option<ObjectId>) -> ObjectId;

    fn assign_mesh(&mut self, object: ObjectId, mesh: AssetHandle);

    /// Replaces the object's material list (renderer slot order).
    fn assign_materials(&mut self, object: ObjectId, materials: &[AssetHandle]);

    /// Drops the object's mesh and material references without destroying it.
    fn strip(&mut self, object: ObjectId);

    fn instantiate(&mut self, prefab: AssetHandle, parent: ObjectId, placement: Placement) -> ObjectId;

    fn destroy(&mut self, object: ObjectId);

    fn set_active(&mut self, object: ObjectId, active: bool);

    /// Assigns `layer` to `root` and all of its descendants.
    fn set_layer_recursive(&mut self, root: ObjectId, layer: LayerTag);
}
