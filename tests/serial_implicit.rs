//! Two-participant implicit coupling: checkpoint rollback, Aitken-accelerated
//! fixed-point iteration, forced convergence and initial-data negotiation.

use std::sync::Arc;
use std::thread;

use approx::assert_abs_diff_eq;
use couplet::acceleration::AitkenAcceleration;
use couplet::com::LocalCommunication;
use couplet::cplscheme::{
    Action, ConvergenceMeasure, CouplingMode, CouplingScheme, DataId, SchemeOptions,
    SerialCouplingScheme, TimesteppingMethod,
};
use couplet::error::CplError;
use couplet::m2n::M2N;
use couplet::mesh::MeshId;
use couplet::parallel::{IntraComm, SerialComm};

const MESH: MeshId = MeshId(0);
const FORCES: DataId = DataId(0);
const DISPLACEMENTS: DataId = DataId(1);

fn options(local: &str) -> SchemeOptions {
    SchemeOptions {
        max_time: None,
        max_timesteps: Some(1),
        timestep_length: Some(0.1),
        first_participant: "fluid".into(),
        second_participant: "structure".into(),
        local_participant: local.into(),
        dt_method: TimesteppingMethod::FixedTimestepLength,
        mode: CouplingMode::Implicit,
        max_iterations: Some(20),
        extrapolation_order: 0,
    }
}

fn scheme(end: LocalCommunication, options: SchemeOptions) -> SerialCouplingScheme {
    let accepts = options.local_participant == options.first_participant;
    let intra: Arc<dyn IntraComm> = Arc::new(SerialComm);
    let mut m2n = M2N::new(Box::new(end), intra.clone(), false);
    if accepts {
        m2n.accept_master_connection("fluid", "structure").unwrap();
    } else {
        m2n.request_master_connection("fluid", "structure").unwrap();
    }
    SerialCouplingScheme::new(options, m2n, intra).unwrap()
}

/// Fulfill a pending checkpoint-write, returning the checkpointed time.
fn write_checkpoint(s: &mut SerialCouplingScheme, checkpoint: &mut f64) {
    if s.is_action_required(Action::WriteIterationCheckpoint) {
        *checkpoint = s.time();
        s.mark_action_fulfilled(Action::WriteIterationCheckpoint).unwrap();
    }
}

fn read_checkpoint_if_required(s: &mut SerialCouplingScheme) -> bool {
    if s.is_action_required(Action::ReadIterationCheckpoint) {
        s.mark_action_fulfilled(Action::ReadIterationCheckpoint).unwrap();
        true
    } else {
        false
    }
}

/// The structure solver evaluates `y = 0.4 x + 3`, whose fixed point under
/// the fluid's pass-through is 5. Aitken relaxation recovers it exactly on
/// the second iteration, so the suite converges on the third.
#[test]
fn aitken_accelerated_fixed_point_converges() {
    let (first_end, second_end) = LocalCommunication::pair();

    let first = thread::spawn(move || {
        let mut s = scheme(first_end, options("fluid"));
        s.add_send_data(FORCES, MESH, 1, false, vec![0.0]).unwrap();
        s.add_receive_data(DISPLACEMENTS, MESH, 1, false, vec![0.0]).unwrap();
        s.initialize(0.0, 0).unwrap();

        let mut checkpoint = 0.0;
        let mut advances = 0;
        while s.is_coupling_ongoing() {
            write_checkpoint(&mut s, &mut checkpoint);
            let input = s.receive_values(DISPLACEMENTS).unwrap()[0];
            s.send_values_mut(FORCES).unwrap()[0] = input;
            s.add_computed_time(0.1).unwrap();
            s.advance().unwrap();
            advances += 1;
            if read_checkpoint_if_required(&mut s) {
                // rolled back: the clock is at the checkpoint again and no
                // new checkpoint-write has been raised mid-timestep
                assert_abs_diff_eq!(s.time(), checkpoint);
                assert!(!s.is_action_required(Action::WriteIterationCheckpoint));
                assert!(!s.is_coupling_timestep_complete());
            } else {
                assert!(s.is_coupling_timestep_complete());
            }
        }
        assert_eq!(advances, 3);
        assert_abs_diff_eq!(s.time(), 0.1);
        assert_eq!(s.timesteps(), 1);
        assert_abs_diff_eq!(s.receive_values(DISPLACEMENTS).unwrap()[0], 5.0, epsilon = 1e-9);
        s.finalize().unwrap();
    });

    let second = thread::spawn(move || {
        let mut s = scheme(second_end, options("structure"));
        s.add_send_data(DISPLACEMENTS, MESH, 1, false, vec![0.0]).unwrap();
        s.add_receive_data(FORCES, MESH, 1, false, vec![0.0]).unwrap();
        s.add_convergence_measure(
            DISPLACEMENTS,
            false,
            ConvergenceMeasure::absolute(1e-10).unwrap(),
        );
        s.set_acceleration(Box::new(
            AitkenAcceleration::new(0.5, vec![DISPLACEMENTS], Arc::new(SerialComm)).unwrap(),
        ));
        s.initialize(0.0, 0).unwrap();

        let mut checkpoint = 0.0;
        let mut advances = 0;
        while s.is_coupling_ongoing() {
            write_checkpoint(&mut s, &mut checkpoint);
            let x = s.receive_values(FORCES).unwrap()[0];
            s.send_values_mut(DISPLACEMENTS).unwrap()[0] = 0.4 * x + 3.0;
            s.add_computed_time(0.1).unwrap();
            s.advance().unwrap();
            advances += 1;
            read_checkpoint_if_required(&mut s);
        }
        assert_eq!(advances, 3);
        assert_eq!(s.timesteps(), 1);
        assert_eq!(s.iterations(), 0);
        assert_eq!(s.total_iterations(), 3);
        assert_abs_diff_eq!(
            s.send_data(DISPLACEMENTS).unwrap().values[0],
            5.0,
            epsilon = 1e-9
        );
        s.finalize().unwrap();
    });

    first.join().unwrap();
    second.join().unwrap();
}

/// A measure that can never be satisfied still terminates the iteration:
/// reaching `max_iterations` forces the convergence verdict.
#[test]
fn max_iterations_forces_convergence() {
    let (first_end, second_end) = LocalCommunication::pair();

    let mut opts_first = options("fluid");
    opts_first.max_iterations = Some(2);
    let mut opts_second = options("structure");
    opts_second.max_iterations = Some(2);

    let first = thread::spawn(move || {
        let mut s = scheme(first_end, opts_first);
        s.add_send_data(FORCES, MESH, 1, false, vec![0.0]).unwrap();
        s.add_receive_data(DISPLACEMENTS, MESH, 1, false, vec![0.0]).unwrap();
        s.initialize(0.0, 0).unwrap();

        let mut checkpoint = 0.0;
        let mut advances = 0;
        while s.is_coupling_ongoing() {
            write_checkpoint(&mut s, &mut checkpoint);
            let input = s.receive_values(DISPLACEMENTS).unwrap()[0];
            s.send_values_mut(FORCES).unwrap()[0] = input;
            s.add_computed_time(0.1).unwrap();
            s.advance().unwrap();
            advances += 1;
            read_checkpoint_if_required(&mut s);
        }
        assert_eq!(advances, 2);
        assert!(s.is_coupling_timestep_complete());
        s.finalize().unwrap();
    });

    let second = thread::spawn(move || {
        let mut s = scheme(second_end, opts_second);
        s.add_send_data(DISPLACEMENTS, MESH, 1, false, vec![0.0]).unwrap();
        s.add_receive_data(FORCES, MESH, 1, false, vec![0.0]).unwrap();
        // diverging update, unsatisfiable limit
        s.add_convergence_measure(
            DISPLACEMENTS,
            false,
            ConvergenceMeasure::absolute(1e-30).unwrap(),
        );
        s.initialize(0.0, 0).unwrap();

        let mut checkpoint = 0.0;
        let mut advances = 0;
        while s.is_coupling_ongoing() {
            write_checkpoint(&mut s, &mut checkpoint);
            let x = s.receive_values(FORCES).unwrap()[0];
            s.send_values_mut(DISPLACEMENTS).unwrap()[0] = x + 1.0;
            s.add_computed_time(0.1).unwrap();
            s.advance().unwrap();
            advances += 1;
            read_checkpoint_if_required(&mut s);
        }
        assert_eq!(advances, 2);
        assert!(s.is_coupling_timestep_complete());
        s.finalize().unwrap();
    });

    first.join().unwrap();
    second.join().unwrap();
}

/// The second participant provides nonzero initial displacements; the first
/// receives them before its first iteration.
#[test]
fn second_participant_initializes_the_interface() {
    let (first_end, second_end) = LocalCommunication::pair();

    let first = thread::spawn(move || {
        let mut s = scheme(first_end, options("fluid"));
        s.add_send_data(FORCES, MESH, 1, false, vec![0.0, 0.0]).unwrap();
        s.add_receive_data(DISPLACEMENTS, MESH, 1, true, vec![0.0, 0.0]).unwrap();
        s.initialize(0.0, 0).unwrap();
        s.initialize_data().unwrap();
        assert_eq!(s.receive_values(DISPLACEMENTS).unwrap(), &[7.0, 7.0]);

        let mut checkpoint = 0.0;
        while s.is_coupling_ongoing() {
            write_checkpoint(&mut s, &mut checkpoint);
            let input = s.receive_values(DISPLACEMENTS).unwrap().to_vec();
            s.send_values_mut(FORCES).unwrap().copy_from_slice(&input);
            s.add_computed_time(0.1).unwrap();
            s.advance().unwrap();
            read_checkpoint_if_required(&mut s);
        }
        s.finalize().unwrap();
    });

    let second = thread::spawn(move || {
        let mut s = scheme(second_end, options("structure"));
        s.add_send_data(DISPLACEMENTS, MESH, 1, true, vec![0.0, 0.0]).unwrap();
        s.add_receive_data(FORCES, MESH, 1, false, vec![0.0, 0.0]).unwrap();
        s.add_convergence_measure(
            DISPLACEMENTS,
            false,
            ConvergenceMeasure::absolute(1e-10).unwrap(),
        );
        s.initialize(0.0, 0).unwrap();

        assert!(s.is_action_required(Action::WriteInitialData));
        s.send_values_mut(DISPLACEMENTS).unwrap().copy_from_slice(&[7.0, 7.0]);
        s.mark_action_fulfilled(Action::WriteInitialData).unwrap();
        s.initialize_data().unwrap();
        assert!(s.has_data_been_exchanged());

        let mut checkpoint = 0.0;
        let mut advances = 0;
        while s.is_coupling_ongoing() {
            write_checkpoint(&mut s, &mut checkpoint);
            // stationary solution: converges on the first iteration
            s.send_values_mut(DISPLACEMENTS).unwrap().copy_from_slice(&[7.0, 7.0]);
            s.add_computed_time(0.1).unwrap();
            s.advance().unwrap();
            advances += 1;
            read_checkpoint_if_required(&mut s);
        }
        assert_eq!(advances, 1);
        s.finalize().unwrap();
    });

    first.join().unwrap();
    second.join().unwrap();
}

/// On a converged timestep with extrapolation order 1, the sent data is the
/// first-order prediction and the history keeps the converged iterate.
#[test]
fn converged_data_is_extrapolated_in_time() {
    let (first_end, second_end) = LocalCommunication::pair();

    let first = thread::spawn(move || {
        let mut s = scheme(first_end, options("fluid"));
        s.add_send_data(FORCES, MESH, 1, false, vec![0.0]).unwrap();
        s.add_receive_data(DISPLACEMENTS, MESH, 1, false, vec![0.0]).unwrap();
        s.initialize(0.0, 0).unwrap();

        let mut checkpoint = 0.0;
        while s.is_coupling_ongoing() {
            write_checkpoint(&mut s, &mut checkpoint);
            let input = s.receive_values(DISPLACEMENTS).unwrap()[0];
            s.send_values_mut(FORCES).unwrap()[0] = input;
            s.add_computed_time(0.1).unwrap();
            s.advance().unwrap();
            read_checkpoint_if_required(&mut s);
        }
        // the converged value was 5; the received prediction is 2·5 − 0
        assert_abs_diff_eq!(s.receive_values(DISPLACEMENTS).unwrap()[0], 10.0, epsilon = 1e-9);
        s.finalize().unwrap();
    });

    let second = thread::spawn(move || {
        let mut opts = options("structure");
        opts.extrapolation_order = 1;
        let mut s = scheme(second_end, opts);
        s.add_send_data(DISPLACEMENTS, MESH, 1, false, vec![0.0]).unwrap();
        s.add_receive_data(FORCES, MESH, 1, false, vec![0.0]).unwrap();
        s.add_convergence_measure(
            DISPLACEMENTS,
            false,
            ConvergenceMeasure::absolute(1e-10).unwrap(),
        );
        s.set_acceleration(Box::new(
            AitkenAcceleration::new(0.5, vec![DISPLACEMENTS], Arc::new(SerialComm)).unwrap(),
        ));
        s.initialize(0.0, 0).unwrap();

        let mut checkpoint = 0.0;
        while s.is_coupling_ongoing() {
            write_checkpoint(&mut s, &mut checkpoint);
            let x = s.receive_values(FORCES).unwrap()[0];
            s.send_values_mut(DISPLACEMENTS).unwrap()[0] = 0.4 * x + 3.0;
            s.add_computed_time(0.1).unwrap();
            s.advance().unwrap();
            read_checkpoint_if_required(&mut s);
        }
        let d = s.send_data(DISPLACEMENTS).unwrap();
        // column 0 carries the prediction, column 1 the converged iterate
        assert_abs_diff_eq!(d.values[0], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(d.old_values[(0, 0)], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(d.old_values[(0, 1)], 5.0, epsilon = 1e-9);
        s.finalize().unwrap();
    });

    first.join().unwrap();
    second.join().unwrap();
}

/// `initialize_data` insists on the solver having written the initial data.
#[test]
fn writing_initial_data_must_precede_initialize_data() {
    let (end, _peer) = LocalCommunication::pair();
    let mut s = scheme(end, options("structure"));
    s.add_send_data(DISPLACEMENTS, MESH, 1, true, vec![0.0]).unwrap();
    s.add_receive_data(FORCES, MESH, 1, false, vec![0.0]).unwrap();
    s.add_convergence_measure(
        DISPLACEMENTS,
        false,
        ConvergenceMeasure::absolute(1e-10).unwrap(),
    );
    s.initialize(0.0, 0).unwrap();

    assert!(s.is_action_required(Action::WriteInitialData));
    let err = s.initialize_data().unwrap_err();
    assert!(matches!(err, CplError::Protocol(_)));

    // advance is equally off limits until the handshake happened
    s.mark_action_fulfilled(Action::WriteIterationCheckpoint).unwrap();
    s.add_computed_time(0.1).unwrap();
    let err = s.advance().unwrap_err();
    assert!(matches!(err, CplError::Protocol(_)));
}
