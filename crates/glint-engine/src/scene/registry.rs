use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::{ClearMask, GraphicsDevice, RenderError, RenderResult};
use crate::render::{ObjectId, RenderableObject};

use super::SceneCamera;

/// Handle through which objects are shared between the caller and registries.
pub type SharedObject = Rc<RefCell<RenderableObject>>;

/// Wraps an object for registration.
#[inline]
pub fn shared(object: RenderableObject) -> SharedObject {
    Rc::new(RefCell::new(object))
}

/// Process-unique identity of a [`SceneRegistry`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegistryId(u64);

impl RegistryId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receipt returned by [`SceneRegistry::register`], redeemed by `deregister`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegistryToken {
    registry: RegistryId,
    object: ObjectId,
}

impl RegistryToken {
    #[inline]
    pub fn object(&self) -> ObjectId {
        self.object
    }
}

#[derive(Debug)]
struct Member {
    id: ObjectId,
    object: SharedObject,
}

/// Ordered set of objects drawn together each frame.
///
/// Members are drawn in insertion order. Each member is stamped with the
/// registry id on registration and only drawn while the stamp matches.
#[derive(Debug)]
pub struct SceneRegistry {
    id: RegistryId,
    members: Vec<Member>,
    camera: SceneCamera,
}

impl Default for SceneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self::with_camera(SceneCamera::default())
    }

    pub fn with_camera(camera: SceneCamera) -> Self {
        Self {
            id: RegistryId::next(),
            members: Vec::new(),
            camera,
        }
    }

    #[inline]
    pub fn id(&self) -> RegistryId {
        self.id
    }

    #[inline]
    pub fn camera(&self) -> &SceneCamera {
        &self.camera
    }

    #[inline]
    pub fn set_camera(&mut self, camera: SceneCamera) {
        self.camera = camera;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    /// Members in draw order.
    pub fn members(&self) -> impl Iterator<Item = &SharedObject> {
        self.members.iter().map(|m| &m.object)
    }

    /// Adds `object` and stamps it with this registry. Registering a member
    /// again returns its existing token.
    pub fn register(&mut self, object: &SharedObject) -> RenderResult<RegistryToken> {
        let mut obj = object.try_borrow_mut().map_err(|_| {
            RenderError::invalid_state("cannot register an object that is currently borrowed")
        })?;
        let token = RegistryToken { registry: self.id, object: obj.id() };

        if self.contains(token.object) {
            return Ok(token);
        }
        if let Some(other) = obj.registry() {
            return Err(RenderError::invalid_state(format!(
                "'{}' is already registered with {other:?}",
                obj.name()
            )));
        }

        obj.set_registry(Some(self.id));
        log::debug!("registered '{}' ({} members)", obj.name(), self.members.len() + 1);
        drop(obj);

        self.members.push(Member { id: token.object, object: Rc::clone(object) });
        Ok(token)
    }

    /// Removes the member behind `token` and clears its stamp. Tokens of
    /// other registries and already redeemed tokens return `None`.
    ///
    /// A member that is currently borrowed cannot be unstamped; it stays
    /// registered and `None` is returned.
    pub fn deregister(&mut self, token: RegistryToken) -> Option<SharedObject> {
        if token.registry != self.id {
            return None;
        }
        let pos = self.members.iter().position(|m| m.id == token.object)?;

        {
            let Ok(mut obj) = self.members[pos].object.try_borrow_mut() else {
                log::warn!("cannot deregister {:?} while it is borrowed", token.object);
                return None;
            };
            obj.set_registry(None);
            log::debug!("deregistered '{}'", obj.name());
        }
        Some(self.members.remove(pos).object)
    }

    /// Clears color and depth, then draws every member stamped with this
    /// registry using the camera's view matrix. The first failure aborts the
    /// frame.
    pub fn draw(&self, dev: &mut dyn GraphicsDevice) -> RenderResult<()> {
        let view = self.camera.view();
        dev.clear(ClearMask::COLOR | ClearMask::DEPTH)?;

        for member in &self.members {
            let mut obj = member.object.try_borrow_mut().map_err(|_| {
                RenderError::invalid_state(format!("{:?} is borrowed during draw", member.id))
            })?;
            if obj.registry() != Some(self.id) {
                continue;
            }
            obj.set_view_mat(view);
            obj.draw_call(dev)?;
        }
        Ok(())
    }
}
