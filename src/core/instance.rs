//! Instance types, handles and the keys instancers are registered under

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::Pod;

use crate::constants::COPY_ALIGNMENT;

/// Layout description of one instance type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceType {
    pub name: &'static str,
    /// Size of one instance in bytes
    pub size: u32,
    /// Distance between records in GPU buffers, `size` rounded up to the copy alignment
    pub stride: u32,
}

impl InstanceType {
    pub const fn of<I: Pod>(name: &'static str) -> Self {
        Self::with_size(name, std::mem::size_of::<I>() as u32)
    }

    pub const fn with_size(name: &'static str, size: u32) -> Self {
        let align = COPY_ALIGNMENT as u32;
        InstanceType {
            name,
            size,
            stride: size.div_ceil(align) * align,
        }
    }
}

/// Plain-old-data instance that can be copied straight into a GPU buffer.
pub trait Instance: Pod + Send + Sync + 'static {
    const TYPE: InstanceType;
}

/// Where a group of instances lives: the world itself or an embedded
/// sub-world with its own transform and light.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Environment {
    #[default]
    Global,
    Embedded(u32),
}

impl Environment {
    pub fn context_shader(self) -> ContextShader {
        match self {
            Environment::Global => ContextShader::Default,
            Environment::Embedded(_) => ContextShader::Embedded,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextShader {
    Default,
    Embedded,
    Crumbling,
}

/// Render stage a visual draws in
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum VisualType {
    #[default]
    Entity,
    BlockEntity,
    Effect,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstancerId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub u64);

/// Key of one instancer inside a draw manager
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstancerKey {
    pub instance_type: InstanceType,
    pub environment: Environment,
    pub model: ModelId,
    pub visual_type: VisualType,
}

impl InstancerKey {
    pub fn group(&self) -> GroupKey {
        GroupKey {
            instance_type: self.instance_type,
            environment: self.environment,
        }
    }
}

/// Key of a culling group: every instancer sharing type and environment
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub instance_type: InstanceType,
    pub environment: Environment,
}

const DELETED: u32 = u32::MAX;

#[derive(Debug)]
struct HandleState {
    manager: u64,
    instancer: InstancerId,
    index: AtomicU32,
}

/// Stable reference to one instance.
///
/// The dense index behind the handle moves when other instances are
/// removed; the owning instancer rewrites it during compaction.
#[derive(Clone, Debug)]
pub struct InstanceHandle {
    state: Arc<HandleState>,
}

impl InstanceHandle {
    pub(crate) fn new(manager: u64, instancer: InstancerId, index: u32) -> Self {
        InstanceHandle {
            state: Arc::new(HandleState {
                manager,
                instancer,
                index: AtomicU32::new(index),
            }),
        }
    }

    /// Current dense index, `None` once deleted
    pub fn index(&self) -> Option<u32> {
        match self.state.index.load(Ordering::Acquire) {
            DELETED => None,
            index => Some(index),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.index().is_none()
    }

    pub fn manager_id(&self) -> u64 {
        self.state.manager
    }

    pub fn instancer_id(&self) -> InstancerId {
        self.state.instancer
    }

    pub(crate) fn set_index(&self, index: u32) {
        self.state.index.store(index, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.state.index.store(DELETED, Ordering::Release);
    }
}

impl PartialEq for InstanceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for InstanceHandle {}
