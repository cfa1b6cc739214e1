use iore_core::comm::Collective;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

/// Collective primitives over an MPI communicator.
pub struct MpiComm {
    comm: SimpleCommunicator,
}

impl MpiComm {
    pub fn new(comm: SimpleCommunicator) -> Self {
        Self { comm }
    }

    pub fn raw(&self) -> &SimpleCommunicator {
        &self.comm
    }
}

impl Collective for MpiComm {
    fn task_id(&self) -> u32 {
        self.comm.rank() as u32
    }

    fn num_tasks(&self) -> u32 {
        self.comm.size() as u32
    }

    fn barrier(&self) {
        self.comm.barrier();
    }

    fn broadcast_u32(&self, value: u32, root: u32) -> u32 {
        let mut value = value;
        self.comm
            .process_at_rank(root as i32)
            .broadcast_into(&mut value);
        value
    }

    fn broadcast_f64(&self, value: f64, root: u32) -> f64 {
        let mut value = value;
        self.comm
            .process_at_rank(root as i32)
            .broadcast_into(&mut value);
        value
    }
}
