//! Serial coupling scheme: the participants run one after the other within
//! each coupling iteration.
//!
//! The first participant sends its data, then blocks on the peer's verdict.
//! The second participant receives the newest input, measures convergence on
//! its own send data, accelerates when the iteration has not converged, and
//! broadcasts the verdict back. Checkpoint actions drive the rollback.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, trace};

use super::base::SchemeCore;
use super::convergence::ConvergenceMeasure;
use super::data::{CouplingData, DataId};
use super::{Action, CouplingMode, CouplingScheme, SchemeOptions};
use crate::acceleration::Acceleration;
use crate::error::CplError;
use crate::m2n::M2N;
use crate::mesh::MeshId;
use crate::parallel::IntraComm;
use crate::utils;

const EPS: f64 = utils::NUMERICAL_ZERO_DIFFERENCE;

pub struct SerialCouplingScheme {
    core: SchemeCore,
    mode: CouplingMode,
}

impl SerialCouplingScheme {
    pub fn new(
        options: SchemeOptions,
        m2n: M2N,
        intra: Arc<dyn IntraComm>,
    ) -> Result<Self, CplError> {
        let mode = options.mode;
        if mode == CouplingMode::Explicit {
            if let Some(max_iterations) = options.max_iterations {
                if max_iterations != 1 {
                    return Err(CplError::Config(
                        "an explicit scheme iterates exactly once per timestep".into(),
                    ));
                }
            }
        }
        let core = SchemeCore::new(options, m2n, intra)?;
        Ok(Self { core, mode })
    }

    pub fn does_first_step(&self) -> bool {
        self.core.does_first_step
    }

    pub fn add_send_data(
        &mut self,
        id: DataId,
        mesh_id: MeshId,
        dimension: usize,
        initialize: bool,
        values: Vec<f64>,
    ) -> Result<(), CplError> {
        self.core.add_send_data(id, mesh_id, dimension, initialize, values)
    }

    pub fn add_receive_data(
        &mut self,
        id: DataId,
        mesh_id: MeshId,
        dimension: usize,
        initialize: bool,
        values: Vec<f64>,
    ) -> Result<(), CplError> {
        self.core.add_receive_data(id, mesh_id, dimension, initialize, values)
    }

    /// Only the second participant may accelerate; checked in `initialize`.
    pub fn set_acceleration(&mut self, acceleration: Box<dyn Acceleration>) {
        self.core.acceleration = Some(acceleration);
    }

    pub fn add_convergence_measure(
        &mut self,
        data_id: DataId,
        suffices: bool,
        measure: ConvergenceMeasure,
    ) {
        self.core.add_convergence_measure(data_id, suffices, false, measure);
    }

    /// Measure used while the coarse-model optimization loop is active.
    pub fn add_coarse_convergence_measure(
        &mut self,
        data_id: DataId,
        suffices: bool,
        measure: ConvergenceMeasure,
    ) {
        self.core.add_convergence_measure(data_id, suffices, true, measure);
    }

    pub fn send_data(&self, id: DataId) -> Option<&CouplingData> {
        self.core.send_data.get(&id)
    }

    pub fn receive_data(&self, id: DataId) -> Option<&CouplingData> {
        self.core.receive_data.get(&id)
    }

    pub fn iterations(&self) -> usize {
        self.core.iterations
    }

    pub fn total_iterations(&self) -> usize {
        self.core.total_iterations
    }

    pub fn iterations_coarse_optimization(&self) -> usize {
        self.core.iterations_coarse_optimization
    }

    /// History columns the accelerator filtered out in the last converged
    /// timestep, kept for iteration reporting.
    pub fn deleted_columns(&self) -> usize {
        self.core.deleted_columns_filtering
    }

    fn advance_explicit(&mut self) -> Result<(), CplError> {
        let core = &mut self.core;
        if utils::equals(core.this_timestep_remainder(), 0.0, EPS) {
            core.is_coupling_timestep_complete = true;
            core.timesteps += 1;
            debug!("sending data");
            core.send_dt()?;
            core.send_all_data()?;
            if core.is_coupling_ongoing() || core.does_first_step {
                debug!("receiving data");
                core.receive_and_set_dt()?;
                core.receive_all_data()?;
                core.has_data_been_exchanged = true;
            }
            core.computed_timestep_part = 0.0;
        }
        Ok(())
    }

    fn advance_implicit(&mut self) -> Result<(), CplError> {
        let core = &mut self.core;
        if !utils::equals(core.this_timestep_remainder(), 0.0, EPS) {
            return Ok(()); // solver is still subcycling
        }
        debug!("computed full length of iteration");

        let mut convergence = true;
        let mut convergence_coarse_optimization = true;
        let mut do_only_solver_evaluation = false;

        if core.does_first_step {
            core.send_dt()?;
            core.send_all_data()?;
            convergence = core.m2n.receive_bool()?;
            core.is_coarse_model_optimization_active = core.m2n.receive_bool()?;
            if convergence {
                core.timestep_completed();
            }
            core.receive_all_data()?;
            core.has_data_been_exchanged = true;
        } else {
            // current design specifications, needed by the measures
            let design_specifications = match core.acceleration.as_ref() {
                Some(acceleration) => acceleration.design_specification(&core.send_data),
                None => BTreeMap::new(),
            };

            if core.is_coarse_model_optimization_active {
                debug!("measuring convergence of the coarse model optimization");
                convergence_coarse_optimization =
                    core.measure_convergence(&design_specifications, true)?;
                if core.max_iterations_reached() {
                    convergence_coarse_optimization = true;
                }
                convergence = false;
                // a converged coarse loop hands over to a pure fine-model
                // evaluation before the outer iteration continues
                if convergence_coarse_optimization {
                    core.is_coarse_model_optimization_active = false;
                    do_only_solver_evaluation = true;
                }
            } else {
                debug!("measuring convergence");
                convergence = core.measure_convergence(&design_specifications, false)?;
                if core.max_iterations_reached() {
                    convergence = true;
                }
            }

            // multi-level accelerations may steer the flag further
            if let Some(acceleration) = core.acceleration.as_mut() {
                core.is_coarse_model_optimization_active = acceleration
                    .update_coarse_model_optimization(core.is_coarse_model_optimization_active);
            }

            if !do_only_solver_evaluation {
                if convergence {
                    if let Some(acceleration) = core.acceleration.as_mut() {
                        core.deleted_columns_filtering = acceleration.deleted_columns();
                        acceleration.iterations_converged(&mut core.send_data);
                    }
                    core.new_convergence_measurements();
                    core.timestep_completed();
                } else if let Some(acceleration) = core.acceleration.as_mut() {
                    acceleration.perform_acceleration(&mut core.send_data)?;
                }

                if convergence && core.extrapolation_order > 0 {
                    core.extrapolate_data()?;
                } else {
                    core.copy_values_to_history();
                }
            }

            core.m2n.send_bool(convergence)?;
            core.m2n.send_bool(core.is_coarse_model_optimization_active)?;
            core.send_all_data()?;

            // no new data is wanted in the last iteration of the last timestep
            if core.is_coupling_ongoing() || !convergence {
                core.receive_and_set_dt()?;
                core.receive_all_data()?;
                core.has_data_been_exchanged = true;
            }
        }

        if !convergence {
            debug!("no convergence achieved");
            core.require_action(Action::ReadIterationCheckpoint);
        } else {
            debug!("convergence achieved");
        }
        core.update_time_and_iterations(convergence, convergence_coarse_optimization);
        core.computed_timestep_part = 0.0;
        Ok(())
    }
}

impl CouplingScheme for SerialCouplingScheme {
    fn initialize(&mut self, start_time: f64, start_timestep: usize) -> Result<(), CplError> {
        trace!("initialize(start_time = {start_time}, start_timestep = {start_timestep})");
        if self.core.is_initialized {
            return Err(CplError::Protocol("scheme is already initialized".into()));
        }
        if !utils::greater_equals(start_time, 0.0, EPS) {
            return Err(CplError::Config(format!(
                "start time has to be non-negative, got {start_time}"
            )));
        }
        let mode = self.mode;
        let core = &mut self.core;
        core.time = start_time;
        core.timesteps = start_timestep;

        if mode == CouplingMode::Implicit {
            if core.send_data.is_empty() {
                return Err(CplError::Config(
                    "no send data configured; use an explicit scheme for one-way coupling".into(),
                ));
            }
            if !core.does_first_step {
                core.setup_convergence_measures()?;
                core.setup_data_matrices()?;
                if let Some(acceleration) = core.acceleration.as_mut() {
                    acceleration.initialize(&mut core.send_data)?;
                }
            } else if let Some(acceleration) = core.acceleration.as_ref() {
                if let Some(id) = acceleration.data_ids().first().copied() {
                    if core.send_data.contains_key(&id) {
                        return Err(CplError::Config(format!(
                            "in a serial coupling scheme, acceleration can only be configured \
                             for data of the second participant, got send data {id}"
                        )));
                    }
                }
            }
            core.require_action(Action::WriteIterationCheckpoint);
        }

        for (id, d) in &core.send_data {
            if d.initialize {
                if core.does_first_step {
                    return Err(CplError::Config(format!(
                        "only the second participant can initialize send data, got data {id}"
                    )));
                }
                debug!("data {id} is initialized by this participant");
                core.has_to_send_init_data = true;
                break;
            }
        }
        for (id, d) in &core.receive_data {
            if d.initialize {
                if !core.does_first_step {
                    return Err(CplError::Config(format!(
                        "only the first participant can receive initial data, got data {id}"
                    )));
                }
                debug!("data {id} is received initialized");
                core.has_to_receive_init_data = true;
            }
        }

        // When the second participant initializes data, its first receive
        // moves from initialize() to initialize_data().
        if !core.does_first_step && !core.has_to_send_init_data && core.is_coupling_ongoing() {
            debug!("receiving data");
            core.receive_and_set_dt()?;
            core.receive_all_data()?;
            core.has_data_been_exchanged = true;
        }

        if core.has_to_send_init_data {
            core.require_action(Action::WriteInitialData);
        }

        core.is_initialized = true;
        Ok(())
    }

    fn initialize_data(&mut self) -> Result<(), CplError> {
        trace!("initialize_data()");
        let core = &mut self.core;
        if !core.is_initialized {
            return Err(CplError::Protocol(
                "initialize_data() can be called after initialize() only".into(),
            ));
        }
        if !core.has_to_send_init_data && !core.has_to_receive_init_data {
            info!("initialize_data is skipped since no data has to be initialized");
            return Ok(());
        }
        if core.has_to_send_init_data && core.is_action_required(Action::WriteInitialData) {
            return Err(CplError::Protocol(
                "initial data has to be written to the coupling scheme before calling \
                 initialize_data()"
                    .into(),
            ));
        }
        debug!("initializing data");
        core.has_data_been_exchanged = false;

        if core.has_to_receive_init_data && core.is_coupling_ongoing() {
            debug!("receiving data");
            core.receive_all_data()?;
            core.has_data_been_exchanged = true;
        }

        if core.has_to_send_init_data && core.is_coupling_ongoing() {
            for d in core.send_data.values_mut() {
                if d.old_values.ncols() == 0 {
                    break;
                }
                // the initial value doubles as the previous timestep value
                // for extrapolation
                let values = d.values.clone();
                for i in 0..values.len() {
                    d.old_values[(i, 0)] = values[i];
                }
                utils::shift_set_first(&mut d.old_values, &values);
            }
            // the first participant picks this up in its initialize()
            core.send_all_data()?;
            core.receive_and_set_dt()?;
            // this receive replaces the one skipped in initialize()
            core.receive_all_data()?;
            core.has_data_been_exchanged = true;
        }

        core.has_to_send_init_data = false;
        core.has_to_receive_init_data = false;
        Ok(())
    }

    fn add_computed_time(&mut self, time_to_add: f64) -> Result<(), CplError> {
        self.core.add_computed_time(time_to_add)
    }

    fn advance(&mut self) -> Result<(), CplError> {
        trace!(
            "advance: timestep {}, time {}",
            self.core.timesteps,
            self.core.time
        );
        self.core.check_completeness_required_actions()?;
        if self.core.has_to_receive_init_data || self.core.has_to_send_init_data {
            return Err(CplError::Protocol(
                "initialize_data() needs to be called before advance() if data has to be \
                 initialized"
                    .into(),
            ));
        }
        self.core.has_data_been_exchanged = false;
        self.core.is_coupling_timestep_complete = false;

        match self.mode {
            CouplingMode::Explicit => self.advance_explicit(),
            CouplingMode::Implicit => self.advance_implicit(),
        }
    }

    fn finalize(&mut self) -> Result<(), CplError> {
        trace!("finalize()");
        if !self.core.is_initialized {
            return Err(CplError::Protocol(
                "called finalize() before initialize()".into(),
            ));
        }
        self.core.check_completeness_required_actions()?;
        self.core.m2n.close_connection()
    }

    fn is_initialized(&self) -> bool {
        self.core.is_initialized
    }

    fn is_coupling_ongoing(&self) -> bool {
        self.core.is_coupling_ongoing()
    }

    fn is_coupling_timestep_complete(&self) -> bool {
        self.core.is_coupling_timestep_complete
    }

    fn has_data_been_exchanged(&self) -> bool {
        self.core.has_data_been_exchanged
    }

    fn time(&self) -> f64 {
        self.core.time
    }

    fn timesteps(&self) -> usize {
        self.core.timesteps
    }

    fn next_timestep_max_length(&self) -> f64 {
        self.core.next_timestep_max_length()
    }

    fn is_action_required(&self, action: Action) -> bool {
        self.core.is_action_required(action)
    }

    fn mark_action_fulfilled(&mut self, action: Action) -> Result<(), CplError> {
        self.core.mark_action_fulfilled(action)
    }

    fn send_values_mut(&mut self, id: DataId) -> Option<&mut Vec<f64>> {
        self.core.send_data.get_mut(&id).map(|d| &mut d.values)
    }

    fn receive_values(&self, id: DataId) -> Option<&[f64]> {
        self.core.receive_data.get(&id).map(|d| d.values.as_slice())
    }
}
