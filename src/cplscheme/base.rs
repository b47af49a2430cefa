//! State and helpers shared by the coupling scheme variants: clocks,
//! iteration counters, data tables, the action set, dt negotiation,
//! convergence suites and extrapolation.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::{debug, info};

use super::convergence::{ConvergenceMeasure, MeasureContext};
use super::data::{CouplingData, DataId, DataMap};
use super::{Action, SchemeOptions, TimesteppingMethod};
use crate::acceleration::Acceleration;
use crate::error::CplError;
use crate::m2n::M2N;
use crate::mesh::MeshId;
use crate::parallel::IntraComm;
use crate::utils;

const EPS: f64 = utils::NUMERICAL_ZERO_DIFFERENCE;

pub(crate) struct SchemeCore {
    pub max_time: Option<f64>,
    pub max_timesteps: Option<usize>,
    pub timestep_length: Option<f64>,
    pub dt_method: TimesteppingMethod,
    pub time: f64,
    pub timesteps: usize,
    pub computed_timestep_part: f64,

    pub does_first_step: bool,

    pub max_iterations: Option<usize>,
    /// Non-converged iterations within the current timestep.
    pub iterations: usize,
    pub iterations_coarse_optimization: usize,
    pub total_iterations: usize,
    pub extrapolation_order: usize,

    pub send_data: DataMap,
    pub receive_data: DataMap,
    pub required_actions: HashSet<Action>,
    pub measures: Vec<MeasureContext>,
    pub acceleration: Option<Box<dyn Acceleration>>,

    pub m2n: M2N,
    pub intra: Arc<dyn IntraComm>,

    pub has_to_send_init_data: bool,
    pub has_to_receive_init_data: bool,
    pub is_initialized: bool,
    pub is_coupling_timestep_complete: bool,
    pub has_data_been_exchanged: bool,
    pub is_coarse_model_optimization_active: bool,
    pub deleted_columns_filtering: usize,
}

impl SchemeCore {
    pub fn new(
        options: SchemeOptions,
        m2n: M2N,
        intra: Arc<dyn IntraComm>,
    ) -> Result<Self, CplError> {
        if options.first_participant == options.second_participant {
            return Err(CplError::Config(format!(
                "first and second participant are both '{}'",
                options.first_participant
            )));
        }
        let does_first_step = if options.local_participant == options.first_participant {
            true
        } else if options.local_participant == options.second_participant {
            false
        } else {
            return Err(CplError::Config(format!(
                "local participant '{}' is neither '{}' nor '{}'",
                options.local_participant, options.first_participant, options.second_participant
            )));
        };
        match options.dt_method {
            TimesteppingMethod::FixedTimestepLength => match options.timestep_length {
                Some(length) if length > 0.0 => {}
                _ => {
                    return Err(CplError::Config(
                        "a fixed timestep length has to be positive".into(),
                    ))
                }
            },
            TimesteppingMethod::FirstParticipantSetsTimestepLength => {
                if options.timestep_length.is_some() {
                    return Err(CplError::Config(
                        "a timestep length must not be configured when the first participant \
                         sets it"
                            .into(),
                    ));
                }
            }
        }
        if let Some(max_time) = options.max_time {
            if max_time < 0.0 {
                return Err(CplError::Config("maximum time has to be non-negative".into()));
            }
        }
        if let Some(max_iterations) = options.max_iterations {
            if max_iterations == 0 {
                return Err(CplError::Config(
                    "maximum iteration count has to be at least one".into(),
                ));
            }
        }
        if options.extrapolation_order > 2 {
            return Err(CplError::Config(
                "extrapolation order has to be 0, 1, or 2".into(),
            ));
        }
        Ok(Self {
            max_time: options.max_time,
            max_timesteps: options.max_timesteps,
            timestep_length: options.timestep_length,
            dt_method: options.dt_method,
            time: 0.0,
            timesteps: 0,
            computed_timestep_part: 0.0,
            does_first_step,
            max_iterations: options.max_iterations,
            iterations: 0,
            iterations_coarse_optimization: 0,
            total_iterations: 0,
            extrapolation_order: options.extrapolation_order,
            send_data: DataMap::new(),
            receive_data: DataMap::new(),
            required_actions: HashSet::new(),
            measures: Vec::new(),
            acceleration: None,
            m2n,
            intra,
            has_to_send_init_data: false,
            has_to_receive_init_data: false,
            is_initialized: false,
            is_coupling_timestep_complete: false,
            has_data_been_exchanged: false,
            is_coarse_model_optimization_active: false,
            deleted_columns_filtering: 0,
        })
    }

    pub fn add_send_data(
        &mut self,
        id: DataId,
        mesh_id: MeshId,
        dimension: usize,
        initialize: bool,
        values: Vec<f64>,
    ) -> Result<(), CplError> {
        if self.send_data.contains_key(&id) {
            return Err(CplError::Config(format!(
                "data {id} cannot be added twice for sending"
            )));
        }
        self.send_data
            .insert(id, CouplingData::new(values, mesh_id, dimension, initialize));
        Ok(())
    }

    pub fn add_receive_data(
        &mut self,
        id: DataId,
        mesh_id: MeshId,
        dimension: usize,
        initialize: bool,
        values: Vec<f64>,
    ) -> Result<(), CplError> {
        if self.receive_data.contains_key(&id) {
            return Err(CplError::Config(format!(
                "data {id} cannot be added twice for receiving"
            )));
        }
        self.receive_data
            .insert(id, CouplingData::new(values, mesh_id, dimension, initialize));
        Ok(())
    }

    pub fn get_data(&self, id: DataId) -> Option<&CouplingData> {
        self.send_data.get(&id).or_else(|| self.receive_data.get(&id))
    }

    fn get_data_mut(&mut self, id: DataId) -> Option<&mut CouplingData> {
        if self.send_data.contains_key(&id) {
            self.send_data.get_mut(&id)
        } else {
            self.receive_data.get_mut(&id)
        }
    }

    // --- clocks -----------------------------------------------------------

    /// Zero when the solver has completed its subcycling for this timestep.
    pub fn this_timestep_remainder(&self) -> f64 {
        match self.timestep_length {
            Some(length) => length - self.computed_timestep_part,
            None => 0.0,
        }
    }

    pub fn next_timestep_max_length(&self) -> f64 {
        match self.timestep_length {
            Some(length) => length - self.computed_timestep_part,
            None => match self.max_time {
                Some(max_time) => max_time - self.time,
                None => f64::MAX,
            },
        }
    }

    pub fn is_coupling_ongoing(&self) -> bool {
        let time_left = match self.max_time {
            Some(max_time) => utils::greater(max_time, self.time, EPS),
            None => true,
        };
        let timesteps_left = match self.max_timesteps {
            Some(max_timesteps) => self.timesteps < max_timesteps,
            None => true,
        };
        time_left && timesteps_left
    }

    pub fn add_computed_time(&mut self, time_to_add: f64) -> Result<(), CplError> {
        if !self.is_coupling_ongoing() {
            return Err(CplError::Protocol(
                "invalid call of add_computed_time() after simulation end".into(),
            ));
        }
        if !utils::greater(time_to_add, 0.0, EPS) {
            return Err(CplError::Protocol(format!(
                "computed time has to be larger than zero, got {time_to_add}"
            )));
        }
        self.computed_timestep_part += time_to_add;
        self.time += time_to_add;
        if !utils::greater_equals(self.this_timestep_remainder(), 0.0, EPS) {
            return Err(CplError::Protocol(format!(
                "the computed timestep part of {} exceeds the timestep length of {}",
                self.computed_timestep_part,
                self.timestep_length.unwrap_or(0.0)
            )));
        }
        Ok(())
    }

    // --- actions ----------------------------------------------------------

    pub fn require_action(&mut self, action: Action) {
        debug!("requiring action {action}");
        self.required_actions.insert(action);
    }

    pub fn is_action_required(&self, action: Action) -> bool {
        self.required_actions.contains(&action)
    }

    pub fn mark_action_fulfilled(&mut self, action: Action) -> Result<(), CplError> {
        if !self.required_actions.remove(&action) {
            return Err(CplError::Protocol(format!(
                "action {action} is not required"
            )));
        }
        Ok(())
    }

    pub fn check_completeness_required_actions(&self) -> Result<(), CplError> {
        if self.required_actions.is_empty() {
            return Ok(());
        }
        let mut names: Vec<&str> = self.required_actions.iter().map(Action::name).collect();
        names.sort_unstable();
        Err(CplError::Protocol(format!(
            "unfulfilled required actions: {}",
            names.join(", ")
        )))
    }

    // --- wire helpers -----------------------------------------------------

    /// The first participant announces the timestep length each iteration:
    /// the configured length, or the computed part when it sets the step.
    pub fn send_dt(&mut self) -> Result<(), CplError> {
        if self.does_first_step {
            let dt = match (self.dt_method, self.timestep_length) {
                (TimesteppingMethod::FixedTimestepLength, Some(length)) => length,
                _ => self.computed_timestep_part,
            };
            debug!("sending timestep length {dt}");
            self.m2n.send_double(dt)?;
        }
        Ok(())
    }

    pub fn receive_and_set_dt(&mut self) -> Result<(), CplError> {
        if !self.does_first_step {
            let dt = self.m2n.receive_double()?;
            debug!("received timestep length {dt}");
            self.timestep_length = Some(dt);
        }
        Ok(())
    }

    pub fn send_all_data(&mut self) -> Result<(), CplError> {
        for d in self.send_data.values() {
            self.m2n.send(&d.values, d.mesh_id, d.dimension)?;
        }
        Ok(())
    }

    pub fn receive_all_data(&mut self) -> Result<(), CplError> {
        for d in self.receive_data.values_mut() {
            let (mesh_id, dimension) = (d.mesh_id, d.dimension);
            self.m2n.receive(&mut d.values, mesh_id, dimension)?;
        }
        Ok(())
    }

    // --- convergence ------------------------------------------------------

    pub fn setup_convergence_measures(&mut self) -> Result<(), CplError> {
        if self.measures.is_empty() {
            return Err(CplError::Config(
                "at least one convergence measure has to be defined for an implicit coupling \
                 scheme"
                    .into(),
            ));
        }
        for i in 0..self.measures.len() {
            let id = self.measures[i].data_id;
            if self.get_data(id).is_none() {
                return Err(CplError::Config(format!(
                    "convergence measure configured for unknown data id {id}"
                )));
            }
        }
        Ok(())
    }

    /// Reserve history columns for measured data and for extrapolation.
    pub fn setup_data_matrices(&mut self) -> Result<(), CplError> {
        let measured: Vec<DataId> = self.measures.iter().map(|c| c.data_id).collect();
        for id in measured {
            let d = self
                .get_data_mut(id)
                .ok_or_else(|| CplError::Config(format!("unknown data id {id}")))?;
            if d.old_values.ncols() < 1 {
                let len = d.values.len();
                utils::append_zero_columns(&mut d.old_values, len, 1);
            }
        }
        if self.extrapolation_order > 0 {
            let order = self.extrapolation_order;
            for (id, d) in self.send_data.iter_mut() {
                let cols = d.old_values.ncols();
                if cols > 1 {
                    return Err(CplError::Config(format!(
                        "data {id} already has {cols} history columns"
                    )));
                }
                let len = d.values.len();
                utils::append_zero_columns(&mut d.old_values, len, order + 1 - cols);
            }
        }
        Ok(())
    }

    pub fn new_convergence_measurements(&mut self) {
        for context in &mut self.measures {
            context.measure.new_measurement_series();
        }
    }

    /// Suite verdict over the primary (`coarse = false`) or the
    /// coarse-optimization measures.
    pub fn measure_convergence(
        &mut self,
        design_specifications: &BTreeMap<DataId, Vec<f64>>,
        coarse: bool,
    ) -> Result<bool, CplError> {
        let mut all_converged = true;
        let mut one_suffices = false;
        for i in 0..self.measures.len() {
            if self.measures[i].coarse != coarse {
                continue;
            }
            let data_id = self.measures[i].data_id;
            let (old, new) = {
                let d = self.get_data(data_id).ok_or_else(|| {
                    CplError::Config(format!("convergence measure on unknown data id {data_id}"))
                })?;
                (utils::column(&d.old_values, 0), d.values.clone())
            };
            let q = design_specifications
                .get(&data_id)
                .cloned()
                .unwrap_or_else(|| vec![0.0; new.len()]);
            let context = &mut self.measures[i];
            context.measure.measure(&old, &new, &q, self.intra.as_ref());
            if !context.measure.is_convergence() {
                all_converged = false;
            } else if context.suffices {
                one_suffices = true;
            }
            info!("data {}: {}", data_id, context.measure.state_string());
        }
        Ok(all_converged || one_suffices)
    }

    pub fn max_iterations_reached(&self) -> bool {
        match self.max_iterations {
            Some(max_iterations) => self.iterations + 1 >= max_iterations,
            None => false,
        }
    }

    // --- timestep transitions ----------------------------------------------

    pub fn timestep_completed(&mut self) {
        info!("timestep {} completed", self.timesteps + 1);
        self.is_coupling_timestep_complete = true;
        self.timesteps += 1;
        if self.is_coupling_ongoing() {
            debug!("requiring checkpoint for the next timestep");
            self.require_action(Action::WriteIterationCheckpoint);
        }
    }

    pub fn update_time_and_iterations(
        &mut self,
        convergence: bool,
        convergence_coarse_optimization: bool,
    ) {
        if !convergence {
            // the remainder is zero here, so the computed part equals the
            // timestep length; take it back and iterate again
            self.time -= self.computed_timestep_part;
            if convergence_coarse_optimization {
                self.iterations += 1;
                self.total_iterations += 1;
            } else {
                self.iterations_coarse_optimization += 1;
            }
        } else {
            self.total_iterations += 1;
            self.iterations = 0;
            self.iterations_coarse_optimization = 0;
        }
    }

    // --- data storage ------------------------------------------------------

    /// Copy current values into history column 0 of both tables, so the next
    /// iteration's residual is defined.
    pub fn copy_values_to_history(&mut self) {
        for d in self
            .send_data
            .values_mut()
            .chain(self.receive_data.values_mut())
        {
            if d.old_values.ncols() > 0 && d.old_values.nrows() > 0 {
                for i in 0..d.values.len() {
                    d.old_values[(i, 0)] = d.values[i];
                }
            }
        }
    }

    /// Extrapolate converged send data in time and rotate the history.
    pub fn extrapolate_data(&mut self) -> Result<(), CplError> {
        // only two history levels exist right after the first completed step
        if self.extrapolation_order == 1 || self.timesteps == 1 {
            info!("performing first order extrapolation");
            for (id, d) in self.send_data.iter_mut() {
                debug!("extrapolate data {id}");
                if d.old_values.ncols() < 2 {
                    return Err(CplError::Config(format!(
                        "data {id} has no history columns reserved for extrapolation"
                    )));
                }
                let n = d.values.len();
                for i in 0..n {
                    d.old_values[(i, 0)] = d.values[i]; // = x^t
                }
                let previous = utils::column(&d.old_values, 1);
                for i in 0..n {
                    d.values[i] = 2.0 * d.values[i] - previous[i]; // = 2x^t - x^(t-1)
                }
                let extrapolated = d.values.clone();
                utils::shift_set_first(&mut d.old_values, &extrapolated);
            }
        } else if self.extrapolation_order == 2 {
            info!("performing second order extrapolation");
            for (id, d) in self.send_data.iter_mut() {
                debug!("extrapolate data {id}");
                if d.old_values.ncols() < 3 {
                    return Err(CplError::Config(format!(
                        "data {id} has no history columns reserved for extrapolation"
                    )));
                }
                let n = d.values.len();
                let old1 = utils::column(&d.old_values, 1);
                let old2 = utils::column(&d.old_values, 2);
                for i in 0..n {
                    d.old_values[(i, 0)] = d.values[i];
                    d.values[i] = 2.5 * d.values[i] - 2.0 * old1[i] + 0.5 * old2[i];
                }
                let extrapolated = d.values.clone();
                utils::shift_set_first(&mut d.old_values, &extrapolated);
            }
        } else {
            return Err(CplError::Config(format!(
                "extrapolation order has to be 1 or 2, got {}",
                self.extrapolation_order
            )));
        }
        Ok(())
    }

    pub fn add_convergence_measure(
        &mut self,
        data_id: DataId,
        suffices: bool,
        coarse: bool,
        measure: ConvergenceMeasure,
    ) {
        self.measures.push(MeasureContext {
            data_id,
            suffices,
            coarse,
            measure,
        });
    }
}
