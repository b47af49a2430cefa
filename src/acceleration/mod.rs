//! Fixed-point iteration accelerators.

use std::collections::BTreeMap;

use crate::cplscheme::data::{DataId, DataMap};
use crate::error::CplError;

/// Capability set shared by all accelerators.
///
/// The coupling scheme owns the accelerator and lends it the data table per
/// call; the accelerator keeps no reference into the scheme.
pub trait Acceleration: Send {
    fn data_ids(&self) -> &[DataId];

    /// Reserve internal buffers against the configured data.
    fn initialize(&mut self, data: &mut DataMap) -> Result<(), CplError>;

    /// Blend the current iterate with the previous one; called once per
    /// non-converged iteration.
    fn perform_acceleration(&mut self, data: &mut DataMap) -> Result<(), CplError>;

    /// The implicit loop converged; reset per-timestep state.
    fn iterations_converged(&mut self, data: &mut DataMap);

    /// Target offsets subtracted from residuals during convergence
    /// measurement, split per data id.
    fn design_specification(&self, data: &DataMap) -> BTreeMap<DataId, Vec<f64>>;

    fn set_design_specification(&mut self, q: Vec<f64>) -> Result<(), CplError>;

    /// Multi-level optimization steering: the scheme passes the current flag
    /// in and adopts the returned value. Identity for single-level methods.
    fn update_coarse_model_optimization(&mut self, active: bool) -> bool {
        active
    }

    /// History columns dropped by filtering in the last converged timestep.
    fn deleted_columns(&self) -> usize {
        0
    }
}

pub mod aitken;
pub use aitken::AitkenAcceleration;
