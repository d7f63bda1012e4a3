//! Post-commit repair work, drained by the host between transactions.

use std::collections::VecDeque;

use voxcel_primitives::{Anchor, ArrayId, Size3};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Replay emitters whose emitted cells were cleared by hand.
    RestoreEmission(Vec<Anchor>),
    /// Replay emitters with blank emitted cells inside a freshly grown area.
    RefillExpansion { arr: ArrayId, old: Size3, new: Size3 },
}

impl Task {
    pub fn origin(&self) -> &'static str {
        match self {
            Self::RestoreEmission(_) => "emit.restore",
            Self::RefillExpansion { .. } => "expand.refill",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn push(&mut self, task: Task) {
        if !self.tasks.contains(&task) {
            self.tasks.push_back(task);
        }
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}

/// Re-entrancy state for the repair drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairState {
    #[default]
    Idle,
    Repairing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxcel_primitives::CellKey;

    #[test]
    fn test_duplicate_tasks_collapse() {
        let anchor = Anchor::from(CellKey::at(1, 0, 0, 0));
        let mut queue = TaskQueue::default();
        queue.push(Task::RestoreEmission(vec![anchor]));
        queue.push(Task::RestoreEmission(vec![anchor]));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().map(|t| t.origin()), Some("emit.restore"));
        assert!(queue.is_empty());
    }
}
