//! In-process duplex channel: two FIFO pipes, one end per participant.

use std::sync::mpsc::{channel, Receiver, Sender};

use super::Communication;
use crate::error::CplError;

#[derive(Debug)]
enum Frame {
    Doubles(Vec<f64>),
    Double(f64),
    Int(i32),
    Bool(bool),
}

/// One end of an in-process leader channel. Create both ends with [`pair`].
///
/// [`pair`]: LocalCommunication::pair
pub struct LocalCommunication {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    connected: bool,
}

impl LocalCommunication {
    /// A connected pair of channel ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = channel();
        let (b_tx, a_rx) = channel();
        (
            Self {
                tx: a_tx,
                rx: a_rx,
                connected: true,
            },
            Self {
                tx: b_tx,
                rx: b_rx,
                connected: true,
            },
        )
    }

    fn push(&self, frame: Frame) -> Result<(), CplError> {
        if !self.connected {
            return Err(CplError::Transport("channel is closed".into()));
        }
        self.tx
            .send(frame)
            .map_err(|_| CplError::Transport("peer endpoint is gone".into()))
    }

    fn pull(&self) -> Result<Frame, CplError> {
        if !self.connected {
            return Err(CplError::Transport("channel is closed".into()));
        }
        self.rx
            .recv()
            .map_err(|_| CplError::Transport("peer endpoint is gone".into()))
    }
}

impl Communication for LocalCommunication {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn accept_connection(
        &mut self,
        _acceptor_name: &str,
        _requester_name: &str,
    ) -> Result<(), CplError> {
        self.connected = true;
        Ok(())
    }

    fn request_connection(
        &mut self,
        _acceptor_name: &str,
        _requester_name: &str,
    ) -> Result<(), CplError> {
        self.connected = true;
        Ok(())
    }

    fn close_connection(&mut self) -> Result<(), CplError> {
        self.connected = false;
        Ok(())
    }

    fn send_doubles(&mut self, items: &[f64]) -> Result<(), CplError> {
        self.push(Frame::Doubles(items.to_vec()))
    }

    fn receive_doubles(&mut self, items: &mut [f64]) -> Result<(), CplError> {
        match self.pull()? {
            Frame::Doubles(values) if values.len() == items.len() => {
                items.copy_from_slice(&values);
                Ok(())
            }
            Frame::Doubles(values) => Err(CplError::Transport(format!(
                "expected {} values, peer sent {}",
                items.len(),
                values.len()
            ))),
            other => Err(CplError::Transport(format!(
                "expected a float array frame, got {other:?}"
            ))),
        }
    }

    fn send_double(&mut self, item: f64) -> Result<(), CplError> {
        self.push(Frame::Double(item))
    }

    fn receive_double(&mut self) -> Result<f64, CplError> {
        match self.pull()? {
            Frame::Double(value) => Ok(value),
            other => Err(CplError::Transport(format!(
                "expected a float frame, got {other:?}"
            ))),
        }
    }

    fn send_int(&mut self, item: i32) -> Result<(), CplError> {
        self.push(Frame::Int(item))
    }

    fn receive_int(&mut self) -> Result<i32, CplError> {
        match self.pull()? {
            Frame::Int(value) => Ok(value),
            other => Err(CplError::Transport(format!(
                "expected an int frame, got {other:?}"
            ))),
        }
    }

    fn send_bool(&mut self, item: bool) -> Result<(), CplError> {
        self.push(Frame::Bool(item))
    }

    fn receive_bool(&mut self) -> Result<bool, CplError> {
        match self.pull()? {
            Frame::Bool(value) => Ok(value),
            other => Err(CplError::Transport(format!(
                "expected a bool frame, got {other:?}"
            ))),
        }
    }
}
