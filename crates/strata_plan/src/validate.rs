//! Dependency validation for operation batches.
//!
//! These checks are normally run by the caller before submission; the
//! planner re-runs them so a bad batch never reaches the worker pool.

use indexmap::{IndexMap, IndexSet};
use strata_core::{Operation, OperationId};

/// Problem found in a batch's dependency declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyIssue {
    /// Two operations share an id
    Duplicate {
        /// The repeated id
        id: OperationId,
    },
    /// An operation depends on an id not present in the batch
    Missing {
        /// The declaring operation
        operation: OperationId,
        /// The id it names
        dependency: OperationId,
    },
    /// The dependency graph contains a cycle
    Cycle {
        /// Operations along the cycle, first element repeated at the end
        path: Vec<OperationId>,
    },
}

impl std::fmt::Display for DependencyIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate { id } => write!(f, "Duplicate operation id: {}", id),
            Self::Missing {
                operation,
                dependency,
            } => write!(f, "Operation {} depends on unknown operation {}", operation, dependency),
            Self::Cycle { path } => write!(f, "Cycle detected: {}", join_ids(path)),
        }
    }
}

pub(crate) fn join_ids(ids: &[OperationId]) -> String {
    ids.iter()
        .map(OperationId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Collect every dependency issue in a batch
///
/// Returns an empty list for a valid batch.
#[must_use]
pub fn validate_dependencies(operations: &[Operation]) -> Vec<DependencyIssue> {
    let mut issues = Vec::new();
    let mut seen = IndexSet::new();

    for op in operations {
        if !seen.insert(&op.id) {
            issues.push(DependencyIssue::Duplicate { id: op.id.clone() });
        }
    }

    for op in operations {
        for dep in &op.depends_on {
            if !seen.contains(dep) {
                issues.push(DependencyIssue::Missing {
                    operation: op.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    if let Some(path) = find_cycle(operations) {
        issues.push(DependencyIssue::Cycle { path });
    }

    issues
}

/// Find one dependency cycle, if any
///
/// References to ids outside the batch are ignored here; they are
/// reported as [`DependencyIssue::Missing`] instead.
#[must_use]
pub fn find_cycle(operations: &[Operation]) -> Option<Vec<OperationId>> {
    let index: IndexMap<&OperationId, usize> = operations
        .iter()
        .enumerate()
        .map(|(i, op)| (&op.id, i))
        .collect();

    let edges: Vec<Vec<usize>> = operations
        .iter()
        .map(|op| {
            op.depends_on
                .iter()
                .filter_map(|dep| index.get(dep).copied())
                .collect()
        })
        .collect();

    let mut visited = vec![false; operations.len()];
    let mut rec_stack: IndexSet<usize> = IndexSet::new();

    for start in 0..operations.len() {
        if let Some(at) = dfs_cycle(start, &edges, &mut visited, &mut rec_stack) {
            let from = rec_stack.get_index_of(&at).unwrap_or(0);
            let mut path: Vec<OperationId> = rec_stack
                .iter()
                .skip(from)
                .map(|&i| operations[i].id.clone())
                .collect();
            path.push(operations[at].id.clone());
            return Some(path);
        }
    }

    None
}

/// DFS cycle detection; returns the node that closed the cycle
fn dfs_cycle(
    node: usize,
    edges: &[Vec<usize>],
    visited: &mut [bool],
    rec_stack: &mut IndexSet<usize>,
) -> Option<usize> {
    if rec_stack.contains(&node) {
        return Some(node);
    }
    if visited[node] {
        return None;
    }

    visited[node] = true;
    rec_stack.insert(node);

    for &dep in &edges[node] {
        if let Some(at) = dfs_cycle(dep, edges, visited, rec_stack) {
            return Some(at);
        }
    }

    rec_stack.pop();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::OperationKind;

    fn op(id: &str, deps: &[&str]) -> Operation {
        deps.iter()
            .fold(Operation::new(id, OperationKind::Edit), |op, dep| op.depends_on(*dep))
    }

    #[test]
    fn test_validate_clean_batch() {
        let ops = vec![op("a", &[]), op("b", &["a"]), op("c", &["a", "b"])];
        assert!(validate_dependencies(&ops).is_empty());
    }

    #[test]
    fn test_validate_duplicate() {
        let ops = vec![op("a", &[]), op("a", &[])];
        let issues = validate_dependencies(&ops);
        assert_eq!(issues, vec![DependencyIssue::Duplicate { id: "a".into() }]);
    }

    #[test]
    fn test_validate_missing() {
        let ops = vec![op("a", &["ghost"])];
        let issues = validate_dependencies(&ops);
        assert_eq!(
            issues,
            vec![DependencyIssue::Missing {
                operation: "a".into(),
                dependency: "ghost".into(),
            }]
        );
        assert!(issues[0].to_string().contains("ghost"));
    }

    #[test]
    fn test_find_cycle_self() {
        let ops = vec![op("a", &["a"])];
        let path = find_cycle(&ops).unwrap();
        assert_eq!(path, vec![OperationId::from("a"), OperationId::from("a")]);
    }

    #[test]
    fn test_find_cycle_three() {
        let ops = vec![
            op("root", &[]),
            op("a", &["c", "root"]),
            op("b", &["a"]),
            op("c", &["b"]),
        ];
        let path = find_cycle(&ops).unwrap();
        assert_eq!(path.first(), path.last());
        assert_eq!(path.len(), 4);
        assert!(!path.contains(&OperationId::from("root")));
    }

    #[test]
    fn test_find_cycle_none_in_diamond() {
        let ops = vec![
            op("a", &[]),
            op("b", &["a"]),
            op("c", &["a"]),
            op("d", &["b", "c"]),
        ];
        assert!(find_cycle(&ops).is_none());
    }

    #[test]
    fn test_cycle_issue_display() {
        let issue = DependencyIssue::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(issue.to_string(), "Cycle detected: a -> b -> a");
    }
}
