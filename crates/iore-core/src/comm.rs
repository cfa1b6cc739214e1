/// Rank of the task that samples shared seeds and writes test-level reports.
pub const MASTER_TASK: u32 = 0;

/// Task identity and the collective primitives the partitioners rely on.
///
/// Every call is a rendezvous across the whole test group: all tasks must
/// make the same sequence of collective calls.
pub trait Collective {
    fn task_id(&self) -> u32;

    fn num_tasks(&self) -> u32;

    fn barrier(&self);

    /// Broadcast `value` from `root`; every task returns root's value.
    fn broadcast_u32(&self, value: u32, root: u32) -> u32;

    fn broadcast_f64(&self, value: f64, root: u32) -> f64;

    fn is_master(&self) -> bool {
        self.task_id() == MASTER_TASK
    }
}

/// In-process stand-in for one task of a group.
///
/// Barriers return immediately. Broadcasts return the pinned value when one
/// is set, which simulates every task receiving the same seed from task 0.
#[derive(Debug, Clone, Copy)]
pub struct LocalComm {
    task_id: u32,
    num_tasks: u32,
    pinned: Option<u32>,
}

impl LocalComm {
    pub fn new(task_id: u32, num_tasks: u32) -> Self {
        Self {
            task_id,
            num_tasks,
            pinned: None,
        }
    }

    /// Single-task group.
    pub fn solo() -> Self {
        Self::new(0, 1)
    }

    pub fn with_pinned_seed(mut self, seed: u32) -> Self {
        self.pinned = Some(seed);
        self
    }
}

impl Collective for LocalComm {
    fn task_id(&self) -> u32 {
        self.task_id
    }

    fn num_tasks(&self) -> u32 {
        self.num_tasks
    }

    fn barrier(&self) {}

    fn broadcast_u32(&self, value: u32, _root: u32) -> u32 {
        self.pinned.unwrap_or(value)
    }

    fn broadcast_f64(&self, value: f64, _root: u32) -> f64 {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_comm_broadcast() {
        let comm = LocalComm::new(2, 4);
        assert_eq!(comm.broadcast_u32(17, MASTER_TASK), 17);
        assert!(!comm.is_master());

        let pinned = LocalComm::new(3, 4).with_pinned_seed(99);
        assert_eq!(pinned.broadcast_u32(17, MASTER_TASK), 99);
        assert_eq!(pinned.task_id(), 3);
        assert_eq!(pinned.num_tasks(), 4);
    }
}
