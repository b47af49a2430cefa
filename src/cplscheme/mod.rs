//! Coupling schemes: data tables, the action protocol, convergence suites
//! and the serial state machine driving one implicit timestep.

pub mod actions;
pub mod convergence;
pub mod data;
pub mod serial;

mod base;

pub use actions::Action;
pub use convergence::ConvergenceMeasure;
pub use data::{CouplingData, DataId, DataMap};
pub use serial::SerialCouplingScheme;

use crate::error::CplError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouplingMode {
    Explicit,
    Implicit,
}

/// Who decides the timestep length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimesteppingMethod {
    /// Both participants are configured with the same fixed length.
    FixedTimestepLength,
    /// The first participant advances with its own timestep; the second
    /// adopts the length received over the wire.
    FirstParticipantSetsTimestepLength,
}

/// Scheme-wide options, validated when the scheme is built.
#[derive(Debug, Clone)]
pub struct SchemeOptions {
    pub max_time: Option<f64>,
    pub max_timesteps: Option<usize>,
    pub timestep_length: Option<f64>,
    pub first_participant: String,
    pub second_participant: String,
    pub local_participant: String,
    pub dt_method: TimesteppingMethod,
    pub mode: CouplingMode,
    /// Forces the convergence verdict when reached; `None` is unbounded.
    pub max_iterations: Option<usize>,
    /// 0 disables extrapolation of converged data in time.
    pub extrapolation_order: usize,
}

/// Solver-facing lifecycle of a coupling scheme.
pub trait CouplingScheme {
    fn initialize(&mut self, start_time: f64, start_timestep: usize) -> Result<(), CplError>;

    /// Exchange solver-provided initial data; valid only after `initialize`.
    fn initialize_data(&mut self) -> Result<(), CplError>;

    /// Account solver progress within the current timestep.
    fn add_computed_time(&mut self, time_to_add: f64) -> Result<(), CplError>;

    /// One coupling iteration attempt.
    fn advance(&mut self) -> Result<(), CplError>;

    fn finalize(&mut self) -> Result<(), CplError>;

    fn is_initialized(&self) -> bool;
    fn is_coupling_ongoing(&self) -> bool;
    fn is_coupling_timestep_complete(&self) -> bool;
    fn has_data_been_exchanged(&self) -> bool;

    fn time(&self) -> f64;
    fn timesteps(&self) -> usize;
    fn next_timestep_max_length(&self) -> f64;

    fn is_action_required(&self, action: Action) -> bool;
    fn mark_action_fulfilled(&mut self, action: Action) -> Result<(), CplError>;

    /// Mutable access to the local values of a send data.
    fn send_values_mut(&mut self, id: DataId) -> Option<&mut Vec<f64>>;

    /// Local values of a receive data.
    fn receive_values(&self, id: DataId) -> Option<&[f64]>;
}
