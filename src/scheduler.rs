/*
    ALICE-Sim
    Copyright (C) 2026 Moroya Sakamoto

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as
    published by the Free Software Foundation, either version 3 of the
    License, or (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Per-tick task graph
//!
//! Each system is a task. Dependencies are explicit edges; by default a
//! task depends on the one registered before it. The graph is compiled
//! once into a flat order (Kahn's algorithm, ties broken by registration
//! order) so every peer runs systems in exactly the same sequence.
//! Parallel systems fan out inside their own task, which ends with a join.

use crate::frame::{Frame, SystemId};
use crate::session::SimContext;
use crate::system::{SystemKind, SystemSet};
use crate::{Result, SimError};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(pub(crate) usize);

/// Where a task's work runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// On the calling thread
    MainThread,
    /// Split across the worker pool, joined before the next task
    ParallelSafe,
}

#[derive(Debug, Clone)]
struct Task {
    name: &'static str,
    system: SystemId,
    kind: TaskKind,
    deps: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        name: &'static str,
        system: SystemId,
        kind: TaskKind,
        deps: &[TaskHandle],
    ) -> TaskHandle {
        self.tasks.push(Task {
            name,
            system,
            kind,
            deps: deps.iter().map(|d| d.0).collect(),
        });
        TaskHandle(self.tasks.len() - 1)
    }

    /// `task` runs after `on`.
    pub fn add_dependency(&mut self, task: TaskHandle, on: TaskHandle) {
        if let Some(t) = self.tasks.get_mut(task.0) {
            if !t.deps.contains(&on.0) {
                t.deps.push(on.0);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Topological order. A cycle or a dangling edge is a
    /// [`SimError::SchedulerDeadlock`] naming the tasks that never became
    /// ready.
    pub fn compile(&self) -> Result<Schedule> {
        let n = self.tasks.len();
        let mut pending = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, task) in self.tasks.iter().enumerate() {
            for &dep in &task.deps {
                if dep >= n {
                    return Err(SimError::SchedulerDeadlock {
                        tasks: vec![task.name.to_string()],
                    });
                }
                pending[i] += 1;
                dependents[dep].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &next in &dependents[i] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < n {
            let stuck: Vec<String> = (0..n)
                .filter(|&i| pending[i] > 0)
                .map(|i| self.tasks[i].name.to_string())
                .collect();
            log::error!("task graph cycle: {stuck:?}");
            return Err(SimError::SchedulerDeadlock { tasks: stuck });
        }

        Ok(Schedule {
            order: order
                .into_iter()
                .map(|i| (self.tasks[i].system, self.tasks[i].kind))
                .collect(),
        })
    }
}

/// Compiled, immutable run order
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    order: Vec<(SystemId, TaskKind)>,
}

impl Schedule {
    pub fn order(&self) -> impl Iterator<Item = SystemId> + '_ {
        self.order.iter().map(|(id, _)| *id)
    }

    /// Runs one tick. Disabled and signal-only systems are skipped.
    pub fn run(&self, systems: &SystemSet, frame: &mut Frame, ctx: &SimContext) -> Result<()> {
        for &(id, kind) in &self.order {
            let Some(system) = systems.get(id) else {
                continue;
            };
            if system.kind() == SystemKind::SignalsOnly || !frame.is_system_enabled(id) {
                continue;
            }
            log::trace!("tick {}: {} ({kind:?})", frame.number(), system.name());
            system.update(frame, ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_order_without_edges() {
        let mut graph = TaskGraph::new();
        for i in 0..4 {
            graph.add("t", SystemId(i), TaskKind::MainThread, &[]);
        }
        let order: Vec<u16> = graph.compile().unwrap().order().map(|s| s.0).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_dependencies_reorder() {
        let mut graph = TaskGraph::new();
        let a = graph.add("a", SystemId(0), TaskKind::MainThread, &[]);
        let b = graph.add("b", SystemId(1), TaskKind::ParallelSafe, &[]);
        let c = graph.add("c", SystemId(2), TaskKind::MainThread, &[]);
        graph.add_dependency(a, c);
        graph.add_dependency(b, a);
        let order: Vec<u16> = graph.compile().unwrap().order().map(|s| s.0).collect();
        assert_eq!(order, vec![2, 0, 1]);
    }

    #[test]
    fn test_cycle_is_deadlock() {
        let mut graph = TaskGraph::new();
        let a = graph.add("physics", SystemId(0), TaskKind::MainThread, &[]);
        let b = graph.add("movement", SystemId(1), TaskKind::MainThread, &[a]);
        graph.add("ui", SystemId(2), TaskKind::MainThread, &[]);
        graph.add_dependency(a, b);

        match graph.compile() {
            Err(SimError::SchedulerDeadlock { tasks }) => {
                assert_eq!(tasks, vec!["physics".to_string(), "movement".to_string()]);
            }
            other => panic!("expected deadlock, got {other:?}"),
        }
    }

    #[test]
    fn test_dangling_edge() {
        let mut graph = TaskGraph::new();
        graph.add("a", SystemId(0), TaskKind::MainThread, &[TaskHandle(7)]);
        assert!(matches!(
            graph.compile(),
            Err(SimError::SchedulerDeadlock { .. })
        ));
    }
}
