//! Minimal mesh handle consumed by the coupling core.
//!
//! Mesh storage, vertex distribution and partitioning live outside the core;
//! the scheme only needs a stable identity to key per-mesh field channels.

use std::fmt;

/// Stable integer identity of a coupling mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeshId(pub i32);

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Mesh {
    id: MeshId,
    name: String,
    dimensions: usize,
}

impl Mesh {
    pub fn new(id: MeshId, name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            id,
            name: name.into(),
            dimensions,
        }
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}
