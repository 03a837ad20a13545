//! Execution stages and plans.
//!
//! A plan is produced once per run and never mutated afterwards.

use serde::{Deserialize, Serialize};
use strata_core::{Operation, OperationId};

/// Operations whose dependencies are all satisfied by earlier stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStage {
    /// Operations in input order
    pub operations: Vec<Operation>,
    /// True when the stage holds more than one operation
    pub can_run_in_parallel: bool,
}

impl ExecutionStage {
    /// Create a stage; parallelism follows from the operation count
    #[must_use]
    pub fn new(operations: Vec<Operation>) -> Self {
        let can_run_in_parallel = operations.len() > 1;
        Self {
            operations,
            can_run_in_parallel,
        }
    }

    /// Number of operations in the stage
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the stage holds no operations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Whether the stage contains the given operation
    #[must_use]
    pub fn contains(&self, id: &OperationId) -> bool {
        self.operations.iter().any(|op| &op.id == id)
    }

    /// Operation ids in stage order
    pub fn operation_ids(&self) -> impl Iterator<Item = &OperationId> {
        self.operations.iter().map(|op| &op.id)
    }
}

/// Ordered sequence of stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    stages: Vec<ExecutionStage>,
}

impl ExecutionPlan {
    /// Create a plan from already-layered stages
    #[must_use]
    pub fn new(stages: Vec<ExecutionStage>) -> Self {
        Self { stages }
    }

    /// All stages in execution order
    #[must_use]
    pub fn stages(&self) -> &[ExecutionStage] {
        &self.stages
    }

    /// Number of stages
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Total operations across all stages
    #[must_use]
    pub fn total_operations(&self) -> usize {
        self.stages.iter().map(ExecutionStage::len).sum()
    }

    /// Size of the widest stage
    #[must_use]
    pub fn max_parallelism(&self) -> usize {
        self.stages.iter().map(ExecutionStage::len).max().unwrap_or(0)
    }

    /// Index of the stage holding the given operation
    #[must_use]
    pub fn stage_of(&self, id: &OperationId) -> Option<usize> {
        self.stages.iter().position(|stage| stage.contains(id))
    }

    /// Whether the plan has no stages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Consume the plan, yielding its stages
    #[must_use]
    pub fn into_stages(self) -> Vec<ExecutionStage> {
        self.stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::OperationKind;

    fn op(id: &str) -> Operation {
        Operation::new(id, OperationKind::Analyze)
    }

    #[test]
    fn test_stage_single_is_sequential() {
        let stage = ExecutionStage::new(vec![op("a")]);
        assert_eq!(stage.len(), 1);
        assert!(!stage.can_run_in_parallel);
    }

    #[test]
    fn test_stage_multiple_is_parallel() {
        let stage = ExecutionStage::new(vec![op("a"), op("b")]);
        assert!(stage.can_run_in_parallel);
        assert!(stage.contains(&OperationId::from("b")));
        let ids: Vec<_> = stage.operation_ids().map(OperationId::as_str).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_plan_queries() {
        let plan = ExecutionPlan::new(vec![
            ExecutionStage::new(vec![op("a"), op("b"), op("c")]),
            ExecutionStage::new(vec![op("d")]),
        ]);

        assert_eq!(plan.stage_count(), 2);
        assert_eq!(plan.total_operations(), 4);
        assert_eq!(plan.max_parallelism(), 3);
        assert_eq!(plan.stage_of(&OperationId::from("d")), Some(1));
        assert_eq!(plan.stage_of(&OperationId::from("zz")), None);
    }

    #[test]
    fn test_plan_empty() {
        let plan = ExecutionPlan::default();
        assert!(plan.is_empty());
        assert_eq!(plan.max_parallelism(), 0);
        assert_eq!(plan.total_operations(), 0);
    }

    #[test]
    fn test_stage_serializes_camel_case() {
        let stage = ExecutionStage::new(vec![op("a"), op("b")]);
        let encoded = serde_json::to_value(&stage).unwrap();
        assert_eq!(encoded["canRunInParallel"], true);
    }
}
