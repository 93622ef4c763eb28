//! Error types shared across the crate

use thiserror::Error;

use crate::core::instance::InstanceType;

/// Failures reported by a [`RenderBackend`](crate::backend::RenderBackend)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The device refused to allocate a buffer of this size.
    #[error("out of GPU memory: buffer '{label}' needs {size} bytes (limit {limit})")]
    OutOfMemory {
        label: &'static str,
        size: u64,
        limit: u64,
    },

    /// A buffer id was used after it was destroyed.
    #[error("unknown GPU buffer {0}")]
    UnknownBuffer(u32),
}

/// Errors surfaced by the draw manager and its instancers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The handle was created by a different draw manager.
    #[error("instance handle belongs to draw manager {handle_owner}, not {manager}")]
    ForeignHandle { handle_owner: u64, manager: u64 },

    /// The handle's instance was already deleted.
    #[error("instance handle was already deleted")]
    HandleDeleted,

    /// The handle points at an instancer that no longer exists.
    #[error("instancer {0} is not registered with this draw manager")]
    UnknownInstancer(u32),

    /// Typed access with a different instance type than the instancer stores.
    #[error("instancer stores '{expected}' instances, got '{actual}'")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A mesh's vertex stride differs from the shared vertex buffer's.
    #[error("mesh vertices are {actual} bytes wide, the mesh pool stores {expected}")]
    VertexLayout { expected: u32, actual: u32 },

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

impl RenderError {
    pub(crate) fn type_mismatch(expected: InstanceType, actual: InstanceType) -> Self {
        RenderError::TypeMismatch {
            expected: expected.name,
            actual: actual.name,
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
