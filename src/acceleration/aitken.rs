//! Aitken dynamic under-relaxation.
//!
//! The relaxation factor ω is recomputed each iteration from the last two
//! residuals of the coupled data; the inner products are reduced over all
//! ranks of the participant.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use super::Acceleration;
use crate::cplscheme::data::{DataId, DataMap};
use crate::error::CplError;
use crate::parallel::IntraComm;
use crate::utils;

pub struct AitkenAcceleration {
    initial_relaxation: f64,
    data_ids: Vec<DataId>,
    aitken_factor: f64,
    iteration_counter: usize,
    // previous residuals; +inf-filled means "no previous iteration"
    residuals: Vec<f64>,
    design_specification: Vec<f64>,
    comm: Arc<dyn IntraComm>,
}

impl AitkenAcceleration {
    pub fn new(
        initial_relaxation: f64,
        data_ids: Vec<DataId>,
        comm: Arc<dyn IntraComm>,
    ) -> Result<Self, CplError> {
        if !(initial_relaxation > 0.0 && initial_relaxation <= 1.0) {
            return Err(CplError::Config(format!(
                "initial relaxation factor for Aitken acceleration has to be larger than zero \
                 and smaller or equal to one, got {initial_relaxation}"
            )));
        }
        Ok(Self {
            initial_relaxation,
            data_ids,
            aitken_factor: initial_relaxation,
            iteration_counter: 0,
            residuals: Vec::new(),
            design_specification: Vec::new(),
            comm,
        })
    }

    pub fn aitken_factor(&self) -> f64 {
        self.aitken_factor
    }

    /// Current values and previous iterates, stacked in id order.
    fn concatenated(&self, data: &DataMap) -> Result<(Vec<f64>, Vec<f64>), CplError> {
        let mut value_parts = Vec::with_capacity(self.data_ids.len());
        let mut old_parts = Vec::with_capacity(self.data_ids.len());
        for id in &self.data_ids {
            let d = data.get(id).ok_or_else(|| {
                CplError::Config(format!("data with id {id} is not contained in the data map"))
            })?;
            value_parts.push(d.values.as_slice());
            old_parts.push(utils::column(&d.old_values, 0));
        }
        Ok((utils::concat(value_parts), utils::concat(old_parts)))
    }
}

impl Acceleration for AitkenAcceleration {
    fn data_ids(&self) -> &[DataId] {
        &self.data_ids
    }

    fn initialize(&mut self, data: &mut DataMap) -> Result<(), CplError> {
        if self.data_ids.is_empty() || self.data_ids.len() > 2 {
            return Err(CplError::Config(format!(
                "Aitken acceleration works on one or two coupled data sets, got {}",
                self.data_ids.len()
            )));
        }
        let mut entries = 0;
        for id in &self.data_ids {
            let d = data.get(id).ok_or_else(|| {
                CplError::Config(format!(
                    "data with id {id} is not contained in data given at initialization"
                ))
            })?;
            entries += d.values.len();
        }
        self.residuals = vec![f64::INFINITY; entries];
        self.design_specification = vec![0.0; entries];

        // Append a history column where the scheme has not reserved one yet.
        for (id, d) in data.iter_mut() {
            if d.old_values.ncols() < 1 {
                if d.values.is_empty() {
                    return Err(CplError::Config(format!(
                        "coupling data {id} has no values allocated"
                    )));
                }
                utils::append_zero_columns(&mut d.old_values, d.values.len(), 1);
            }
        }
        Ok(())
    }

    fn perform_acceleration(&mut self, data: &mut DataMap) -> Result<(), CplError> {
        let (values, old_values) = self.concatenated(data)?;

        let residuals: Vec<f64> = values
            .iter()
            .zip(&old_values)
            .map(|(v, o)| v - o)
            .collect();
        let residual_deltas: Vec<f64> = residuals
            .iter()
            .zip(&self.residuals)
            .map(|(r, p)| r - p)
            .collect();

        if self.iteration_counter == 0 {
            // bound the first step by the configured initial relaxation,
            // keeping the sign of the last converged factor
            self.aitken_factor = utils::sign(self.aitken_factor)
                * self.initial_relaxation.min(self.aitken_factor.abs());
        } else {
            let nominator = self.comm.dot(&self.residuals, &residual_deltas);
            let denominator = self.comm.dot(&residual_deltas, &residual_deltas);
            if denominator == 0.0 {
                return Err(CplError::Numerics(
                    "residual did not change between iterations; the coupling iteration \
                     should have been reported as converged"
                        .into(),
                ));
            }
            self.aitken_factor = -self.aitken_factor * (nominator / denominator);
        }
        debug!("aitken factor: {}", self.aitken_factor);

        let omega = self.aitken_factor;
        let one_minus_omega = 1.0 - omega;
        for d in data.values_mut() {
            for i in 0..d.values.len() {
                d.values[i] = omega * d.values[i] + one_minus_omega * d.old_values[(i, 0)];
            }
        }

        self.residuals = residuals;
        self.iteration_counter += 1;
        Ok(())
    }

    fn iterations_converged(&mut self, _data: &mut DataMap) {
        self.iteration_counter = 0;
        self.residuals.fill(f64::INFINITY);
    }

    fn design_specification(&self, data: &DataMap) -> BTreeMap<DataId, Vec<f64>> {
        let mut specifications = BTreeMap::new();
        let mut offset = 0;
        for id in &self.data_ids {
            let size = data.get(id).map_or(0, |d| d.values.len());
            let q = if self.design_specification.len() >= offset + size {
                self.design_specification[offset..offset + size].to_vec()
            } else {
                vec![0.0; size]
            };
            offset += size;
            specifications.insert(*id, q);
        }
        specifications
    }

    fn set_design_specification(&mut self, q: Vec<f64>) -> Result<(), CplError> {
        if q.iter().any(|v| *v != 0.0) {
            return Err(CplError::Unsupported(
                "a non-zero design specification is not supported for Aitken under-relaxation"
                    .into(),
            ));
        }
        self.design_specification = q;
        Ok(())
    }
}
