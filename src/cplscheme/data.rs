//! Per-(mesh, field) coupled data records.

use std::collections::BTreeMap;
use std::fmt;

use faer::Mat;

use crate::mesh::MeshId;

/// Stable integer identity of a coupled field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataId(pub i32);

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Field values plus the history columns backing convergence measurement,
/// acceleration and extrapolation.
///
/// Column 0 of `old_values` is the previous iterate; further columns hold
/// older timesteps for extrapolation. Once the scheme is initialized, every
/// column has the height of `values`.
#[derive(Debug, Clone)]
pub struct CouplingData {
    pub values: Vec<f64>,
    pub old_values: Mat<f64>,
    /// Whether the owning participant provides a nonzero initial value.
    pub initialize: bool,
    pub mesh_id: MeshId,
    pub dimension: usize,
}

impl CouplingData {
    pub fn new(values: Vec<f64>, mesh_id: MeshId, dimension: usize, initialize: bool) -> Self {
        Self {
            values,
            old_values: Mat::new(),
            initialize,
            mesh_id,
            dimension,
        }
    }
}

/// Coupled data keyed by id; iteration order is the configured exchange order.
pub type DataMap = BTreeMap<DataId, CouplingData>;
