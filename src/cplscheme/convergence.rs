//! Convergence measures on coupling-data residuals.
//!
//! A measure examines the pair `(old, new − q)` for one data id, where `q`
//! is the design-specification offset (zero in the base case). Norms are
//! globally reduced over the ranks of the participant.

use crate::cplscheme::data::DataId;
use crate::error::CplError;
use crate::parallel::IntraComm;

/// One measure; state records the last measurement of the current series.
#[derive(Debug, Clone)]
pub enum ConvergenceMeasure {
    /// ‖new − old − q‖₂ ≤ limit
    Absolute {
        limit: f64,
        last_norm: f64,
        converged: bool,
    },
    /// ‖new − old − q‖₂ ≤ limit · ‖new‖₂
    Relative {
        limit: f64,
        last_norm: f64,
        converged: bool,
    },
    /// True once the series saw at least `min` measurements.
    MinIterations {
        min: usize,
        count: usize,
        converged: bool,
    },
}

impl ConvergenceMeasure {
    pub fn absolute(limit: f64) -> Result<Self, CplError> {
        if limit <= 0.0 {
            return Err(CplError::Config(format!(
                "absolute convergence limit has to be larger than zero, got {limit}"
            )));
        }
        Ok(ConvergenceMeasure::Absolute {
            limit,
            last_norm: f64::INFINITY,
            converged: false,
        })
    }

    pub fn relative(limit: f64) -> Result<Self, CplError> {
        if limit <= 0.0 || limit > 1.0 {
            return Err(CplError::Config(format!(
                "relative convergence limit has to be in (0; 1], got {limit}"
            )));
        }
        Ok(ConvergenceMeasure::Relative {
            limit,
            last_norm: f64::INFINITY,
            converged: false,
        })
    }

    pub fn min_iterations(min: usize) -> Self {
        ConvergenceMeasure::MinIterations {
            min,
            count: 0,
            converged: false,
        }
    }

    pub fn measure(&mut self, old: &[f64], new: &[f64], q: &[f64], comm: &dyn IntraComm) {
        match self {
            ConvergenceMeasure::Absolute {
                limit,
                last_norm,
                converged,
            } => {
                let diff: Vec<f64> = new
                    .iter()
                    .zip(old)
                    .zip(q)
                    .map(|((n, o), qi)| n - o - qi)
                    .collect();
                *last_norm = comm.l2_norm(&diff);
                *converged = *last_norm <= *limit;
            }
            ConvergenceMeasure::Relative {
                limit,
                last_norm,
                converged,
            } => {
                let diff: Vec<f64> = new
                    .iter()
                    .zip(old)
                    .zip(q)
                    .map(|((n, o), qi)| n - o - qi)
                    .collect();
                *last_norm = comm.l2_norm(&diff);
                *converged = *last_norm <= *limit * comm.l2_norm(new);
            }
            ConvergenceMeasure::MinIterations {
                min,
                count,
                converged,
            } => {
                *count += 1;
                *converged = *count >= *min;
            }
        }
    }

    pub fn is_convergence(&self) -> bool {
        match self {
            ConvergenceMeasure::Absolute { converged, .. }
            | ConvergenceMeasure::Relative { converged, .. }
            | ConvergenceMeasure::MinIterations { converged, .. } => *converged,
        }
    }

    /// Start a new measurement series (a new timestep).
    pub fn new_measurement_series(&mut self) {
        match self {
            ConvergenceMeasure::Absolute {
                last_norm,
                converged,
                ..
            }
            | ConvergenceMeasure::Relative {
                last_norm,
                converged,
                ..
            } => {
                *last_norm = f64::INFINITY;
                *converged = false;
            }
            ConvergenceMeasure::MinIterations {
                count, converged, ..
            } => {
                *count = 0;
                *converged = false;
            }
        }
    }

    pub fn state_string(&self) -> String {
        match self {
            ConvergenceMeasure::Absolute {
                limit,
                last_norm,
                converged,
            } => format!(
                "absolute convergence measure: two-norm diff = {last_norm:.6e}, limit = {limit:.6e}, conv = {converged}"
            ),
            ConvergenceMeasure::Relative {
                limit,
                last_norm,
                converged,
            } => format!(
                "relative convergence measure: two-norm diff = {last_norm:.6e}, relative limit = {limit:.6e}, conv = {converged}"
            ),
            ConvergenceMeasure::MinIterations {
                min,
                count,
                converged,
            } => format!(
                "min-iteration convergence measure: iterations = {count}, min iterations = {min}, conv = {converged}"
            ),
        }
    }
}

/// Binds a measure to one data id within a suite.
#[derive(Debug, Clone)]
pub(crate) struct MeasureContext {
    pub data_id: DataId,
    /// A sufficing measure that reports true decides the whole suite.
    pub suffices: bool,
    /// Part of the coarse-model-optimization suite instead of the primary one.
    pub coarse: bool,
    pub measure: ConvergenceMeasure,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialComm;

    #[test]
    fn absolute_measure_checks_offset_residual() {
        let mut m = ConvergenceMeasure::absolute(1e-3).unwrap();
        m.measure(&[1.0, 1.0], &[1.0005, 1.0], &[0.0, 0.0], &SerialComm);
        assert!(m.is_convergence());
        m.measure(&[1.0, 1.0], &[1.5, 1.0], &[0.0, 0.0], &SerialComm);
        assert!(!m.is_convergence());
        // offset shifts the target
        m.measure(&[1.0, 1.0], &[1.5, 1.0], &[0.5, 0.0], &SerialComm);
        assert!(m.is_convergence());
    }

    #[test]
    fn relative_measure_scales_with_iterate() {
        let mut m = ConvergenceMeasure::relative(1e-2).unwrap();
        m.measure(&[100.0], &[100.5], &[0.0], &SerialComm);
        assert!(m.is_convergence());
        m.measure(&[1.0], &[1.5], &[0.0], &SerialComm);
        assert!(!m.is_convergence());
    }

    #[test]
    fn min_iterations_counts_series() {
        let mut m = ConvergenceMeasure::min_iterations(2);
        m.measure(&[], &[], &[], &SerialComm);
        assert!(!m.is_convergence());
        m.measure(&[], &[], &[], &SerialComm);
        assert!(m.is_convergence());
        m.new_measurement_series();
        assert!(!m.is_convergence());
    }

    #[test]
    fn limits_are_validated() {
        assert!(ConvergenceMeasure::absolute(0.0).is_err());
        assert!(ConvergenceMeasure::relative(1.5).is_err());
        assert!(ConvergenceMeasure::relative(1.0).is_ok());
    }
}
