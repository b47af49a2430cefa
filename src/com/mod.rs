//! Leader-to-leader transport contract.
//!
//! The core assumes nothing about the medium beyond an ordered, reliable,
//! bidirectional stream between the two leader ranks. Socket or MPI-port
//! based implementations live outside the crate; [`pair::LocalCommunication`]
//! provides an in-process implementation for tests and demos.

use crate::error::CplError;

/// Two-sided operations on a stream-ordered point-to-point channel.
///
/// Every operation is blocking and FIFO per direction. Any transport failure
/// is fatal to the coupled run; nothing is retried.
pub trait Communication: Send {
    fn is_connected(&self) -> bool;

    /// Wait for the named peer to connect.
    fn accept_connection(&mut self, acceptor_name: &str, requester_name: &str)
        -> Result<(), CplError>;

    /// Connect to the named acceptor.
    fn request_connection(
        &mut self,
        acceptor_name: &str,
        requester_name: &str,
    ) -> Result<(), CplError>;

    /// Idempotent; further sends fail once closed.
    fn close_connection(&mut self) -> Result<(), CplError>;

    fn send_doubles(&mut self, items: &[f64]) -> Result<(), CplError>;

    /// Receive exactly `items.len()` values; both sides know the length.
    fn receive_doubles(&mut self, items: &mut [f64]) -> Result<(), CplError>;

    fn send_double(&mut self, item: f64) -> Result<(), CplError>;
    fn receive_double(&mut self) -> Result<f64, CplError>;

    fn send_int(&mut self, item: i32) -> Result<(), CplError>;
    fn receive_int(&mut self) -> Result<i32, CplError>;

    fn send_bool(&mut self, item: bool) -> Result<(), CplError>;
    fn receive_bool(&mut self) -> Result<bool, CplError>;
}

pub mod pair;
pub use pair::LocalCommunication;
