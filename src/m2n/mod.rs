//! Two-level exchange between participants: a leader channel for control
//! scalars and per-mesh distributed channels for field data.
//!
//! In *coupling mode* (single-rank participants) everything flows over the
//! leader channel. In *parallel mode* (leader + slaves) field data is routed
//! through per-mesh worker-to-worker channels while control scalars stay on
//! the leader channel and are broadcast to the slave ranks.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::com::Communication;
use crate::error::CplError;
use crate::mesh::{Mesh, MeshId};
use crate::parallel::IntraComm;

/// Per-mesh worker-to-worker field channel.
///
/// The contract is "deliver a locally-indexed subset of a float vector to the
/// matching remote ranks, preserving per-rank ordering"; the routing tables
/// behind it are built outside the core.
pub trait DistributedChannel: Send {
    fn accept_connection(&mut self, acceptor_name: &str, requester_name: &str)
        -> Result<(), CplError>;
    fn request_connection(
        &mut self,
        acceptor_name: &str,
        requester_name: &str,
    ) -> Result<(), CplError>;
    fn is_connected(&self) -> bool;
    fn send(&mut self, items: &[f64], value_dimension: usize) -> Result<(), CplError>;
    fn receive(&mut self, items: &mut [f64], value_dimension: usize) -> Result<(), CplError>;
    fn close_connection(&mut self) -> Result<(), CplError>;
}

pub trait DistributedChannelFactory: Send {
    fn new_channel(&self, mesh: &Mesh) -> Box<dyn DistributedChannel>;
}

pub struct M2N {
    master_com: Box<dyn Communication>,
    factory: Option<Box<dyn DistributedChannelFactory>>,
    channels: HashMap<MeshId, Box<dyn DistributedChannel>>,
    intra: Arc<dyn IntraComm>,
    // captured at construction; serializes field transfers against the
    // control channel for deterministic event instrumentation
    sync_mode: bool,
    master_connected: bool,
    slaves_connected: bool,
}

impl M2N {
    pub fn new(master_com: Box<dyn Communication>, intra: Arc<dyn IntraComm>, sync_mode: bool) -> Self {
        Self {
            master_com,
            factory: None,
            channels: HashMap::new(),
            intra,
            sync_mode,
            master_connected: false,
            slaves_connected: false,
        }
    }

    pub fn set_distributed_factory(&mut self, factory: Box<dyn DistributedChannelFactory>) {
        self.factory = Some(factory);
    }

    pub fn is_connected(&self) -> bool {
        self.master_connected
    }

    /// Establish the leader-to-leader channel on the accepting side and
    /// propagate the connected bit to local slaves.
    pub fn accept_master_connection(
        &mut self,
        acceptor_name: &str,
        requester_name: &str,
    ) -> Result<(), CplError> {
        if !self.intra.is_slave() {
            debug!("accept master-master connection");
            self.master_com
                .accept_connection(acceptor_name, requester_name)?;
            self.master_connected = self.master_com.is_connected();
        }
        self.master_connected = self.intra.broadcast_bool(self.master_connected);
        Ok(())
    }

    pub fn request_master_connection(
        &mut self,
        acceptor_name: &str,
        requester_name: &str,
    ) -> Result<(), CplError> {
        if !self.intra.is_slave() {
            debug!("request master-master connection");
            self.master_com
                .request_connection(acceptor_name, requester_name)?;
            self.master_connected = self.master_com.is_connected();
        }
        self.master_connected = self.intra.broadcast_bool(self.master_connected);
        Ok(())
    }

    /// Construct the per-mesh worker channel, keyed by the mesh id.
    pub fn create_distributed_channel(&mut self, mesh: &Mesh) -> Result<(), CplError> {
        let factory = self.factory.as_ref().ok_or_else(|| {
            CplError::Config("no distributed channel factory configured".into())
        })?;
        debug!(
            "creating distributed channel for mesh '{}' ({}d, id {})",
            mesh.name(),
            mesh.dimensions(),
            mesh.id()
        );
        let channel = factory.new_channel(mesh);
        self.channels.insert(mesh.id(), channel);
        Ok(())
    }

    /// Bring up all per-mesh channels; the connected flag is set only if
    /// every channel comes up.
    pub fn accept_slaves_connection(
        &mut self,
        acceptor_name: &str,
        requester_name: &str,
    ) -> Result<(), CplError> {
        let mut all_connected = true;
        for channel in self.channels.values_mut() {
            debug!("accept slaves-slaves connections");
            channel.accept_connection(acceptor_name, requester_name)?;
            all_connected = all_connected && channel.is_connected();
        }
        self.slaves_connected = all_connected;
        if !all_connected {
            return Err(CplError::Transport(
                "not all distributed channels connected".into(),
            ));
        }
        Ok(())
    }

    pub fn request_slaves_connection(
        &mut self,
        acceptor_name: &str,
        requester_name: &str,
    ) -> Result<(), CplError> {
        let mut all_connected = true;
        for channel in self.channels.values_mut() {
            debug!("request slaves-slaves connections");
            channel.request_connection(acceptor_name, requester_name)?;
            all_connected = all_connected && channel.is_connected();
        }
        self.slaves_connected = all_connected;
        if !all_connected {
            return Err(CplError::Transport(
                "not all distributed channels connected".into(),
            ));
        }
        Ok(())
    }

    /// Send field values for one mesh. Parallel mode routes through the mesh
    /// channel, coupling mode through the leader channel.
    pub fn send(
        &mut self,
        items: &[f64],
        mesh_id: MeshId,
        value_dimension: usize,
    ) -> Result<(), CplError> {
        if self.intra.is_parallel() {
            if !self.slaves_connected {
                return Err(CplError::Protocol(
                    "distributed channels are not connected".into(),
                ));
            }
            if self.sync_mode && !self.intra.is_slave() {
                self.master_com.send_bool(true)?;
                let ack = self.master_com.receive_bool()?;
                self.master_com.send_bool(ack)?;
            }
            let channel = self.channels.get_mut(&mesh_id).ok_or_else(|| {
                CplError::Config(format!("no distributed channel for mesh {mesh_id}"))
            })?;
            channel.send(items, value_dimension)
        } else {
            if !self.master_connected {
                return Err(CplError::Protocol("master channel is not connected".into()));
            }
            self.master_com.send_doubles(items)
        }
    }

    /// Receive field values for one mesh; mirror of [`send`](Self::send).
    pub fn receive(
        &mut self,
        items: &mut [f64],
        mesh_id: MeshId,
        value_dimension: usize,
    ) -> Result<(), CplError> {
        if self.intra.is_parallel() {
            if !self.slaves_connected {
                return Err(CplError::Protocol(
                    "distributed channels are not connected".into(),
                ));
            }
            if self.sync_mode && !self.intra.is_slave() {
                let ack = self.master_com.receive_bool()?;
                self.master_com.send_bool(ack)?;
                let _ = self.master_com.receive_bool()?;
            }
            let channel = self.channels.get_mut(&mesh_id).ok_or_else(|| {
                CplError::Config(format!("no distributed channel for mesh {mesh_id}"))
            })?;
            channel.receive(items, value_dimension)
        } else {
            if !self.master_connected {
                return Err(CplError::Protocol("master channel is not connected".into()));
            }
            self.master_com.receive_doubles(items)
        }
    }

    /// Leader-only control scalar.
    pub fn send_bool(&mut self, item: bool) -> Result<(), CplError> {
        if !self.intra.is_slave() {
            self.master_com.send_bool(item)?;
        }
        Ok(())
    }

    pub fn send_double(&mut self, item: f64) -> Result<(), CplError> {
        if !self.intra.is_slave() {
            self.master_com.send_double(item)?;
        }
        Ok(())
    }

    /// Leader receives, then every rank observes the same value.
    pub fn receive_bool(&mut self) -> Result<bool, CplError> {
        let mut item = false;
        if !self.intra.is_slave() {
            item = self.master_com.receive_bool()?;
        }
        item = self.intra.broadcast_bool(item);
        debug!("received bool {item}");
        Ok(item)
    }

    pub fn receive_double(&mut self) -> Result<f64, CplError> {
        let mut item = 0.0;
        if !self.intra.is_slave() {
            item = self.master_com.receive_double()?;
        }
        item = self.intra.broadcast_double(item);
        debug!("received double {item}");
        Ok(item)
    }

    /// Idempotent; closes the leader channel and all per-mesh channels.
    pub fn close_connection(&mut self) -> Result<(), CplError> {
        if !self.intra.is_slave() && self.master_com.is_connected() {
            self.master_com.close_connection()?;
            self.master_connected = false;
        }
        self.master_connected = self.intra.broadcast_bool(self.master_connected);
        if self.intra.is_parallel() {
            for channel in self.channels.values_mut() {
                channel.close_connection()?;
            }
            self.slaves_connected = false;
        }
        Ok(())
    }
}

impl Drop for M2N {
    fn drop(&mut self) {
        if self.is_connected() {
            let _ = self.close_connection();
        }
    }
}
