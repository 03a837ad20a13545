//! Kahn-style layering of operation batches into execution stages.
//!
//! Operations are mapped to dense indices; in-degree bookkeeping and the
//! reverse edge lists are plain vectors over those indices. Every stage is
//! collected in input order, so a given input always yields the same plan.

use crate::stage::{ExecutionPlan, ExecutionStage};
use crate::validate::{find_cycle, join_ids};
use indexmap::IndexMap;
use strata_core::{Operation, OperationId};

/// Planning error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Two operations in the batch share an id
    #[error("Duplicate operation id: {id}")]
    DuplicateOperation {
        /// The repeated id
        id: OperationId,
    },

    /// Some operations can never become ready
    #[error("{}", describe_unresolved(unresolved, missing, cycle.as_deref()))]
    CyclicDependency {
        /// Operations left unresolved, in input order
        unresolved: Vec<OperationId>,
        /// `(operation, dependency)` pairs naming ids absent from the batch
        missing: Vec<(OperationId, OperationId)>,
        /// One concrete cycle, when the graph has one
        cycle: Option<Vec<OperationId>>,
    },
}

impl PlanError {
    /// Whether this error reports a dependency cycle or unresolved dependency
    #[must_use]
    pub fn is_cyclic(&self) -> bool {
        matches!(self, Self::CyclicDependency { .. })
    }
}

fn describe_unresolved(
    unresolved: &[OperationId],
    missing: &[(OperationId, OperationId)],
    cycle: Option<&[OperationId]>,
) -> String {
    let mut message = format!(
        "Cyclic or unresolved dependencies among {} operation(s): {}",
        unresolved.len(),
        unresolved
            .iter()
            .map(OperationId::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    if let Some(path) = cycle {
        message.push_str(&format!("; cycle: {}", join_ids(path)));
    }
    for (operation, dependency) in missing {
        message.push_str(&format!("; {} depends on unknown {}", operation, dependency));
    }
    message
}

/// Builds execution plans from operation batches
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationPlanner;

impl OperationPlanner {
    /// Create a new planner
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Layer the batch into stages
    ///
    /// A stage holds every operation whose dependencies all sit in strictly
    /// earlier stages.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::DuplicateOperation`] when ids repeat, and
    /// [`PlanError::CyclicDependency`] when the dependency graph has a cycle
    /// or names an id that is not in the batch. No stages are produced in
    /// either case.
    pub fn create_execution_plan(&self, operations: &[Operation]) -> Result<ExecutionPlan, PlanError> {
        let mut index: IndexMap<&OperationId, usize> = IndexMap::with_capacity(operations.len());
        for (i, op) in operations.iter().enumerate() {
            if index.insert(&op.id, i).is_some() {
                return Err(PlanError::DuplicateOperation { id: op.id.clone() });
            }
        }

        let mut in_degree = vec![0usize; operations.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); operations.len()];
        let mut missing = Vec::new();

        for (i, op) in operations.iter().enumerate() {
            for dep in &op.depends_on {
                in_degree[i] += 1;
                match index.get(dep) {
                    Some(&d) => dependents[d].push(i),
                    // Never decremented, so the operation stays unresolved
                    None => missing.push((op.id.clone(), dep.clone())),
                }
            }
        }

        let mut placed = vec![false; operations.len()];
        let mut remaining = operations.len();
        let mut stages = Vec::new();
        let mut ready: Vec<usize> = (0..operations.len()).filter(|&i| in_degree[i] == 0).collect();

        while !ready.is_empty() {
            let mut next = Vec::new();
            for &i in &ready {
                placed[i] = true;
                for &dependent in &dependents[i] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            remaining -= ready.len();
            next.sort_unstable();

            stages.push(ExecutionStage::new(
                ready.iter().map(|&i| operations[i].clone()).collect(),
            ));
            ready = next;
        }

        if remaining > 0 {
            let unresolved: Vec<OperationId> = operations
                .iter()
                .zip(&placed)
                .filter(|(_, placed)| !**placed)
                .map(|(op, _)| op.id.clone())
                .collect();
            let cycle = find_cycle(operations);
            tracing::debug!(
                unresolved = unresolved.len(),
                missing = missing.len(),
                "dependency graph did not resolve"
            );
            return Err(PlanError::CyclicDependency {
                unresolved,
                missing,
                cycle,
            });
        }

        tracing::debug!(
            operations = operations.len(),
            stages = stages.len(),
            "execution plan created"
        );
        Ok(ExecutionPlan::new(stages))
    }
}
