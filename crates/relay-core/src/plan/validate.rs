//! Plan validation.
//!
//! Checks a [`PlanSpec`] before insertion:
//! - local ids are well-formed and unique,
//! - `depends_on` references point to local ids in the same spec,
//! - the dependency graph is acyclic (topological sort).
//!
//! Partial insertion of a cyclic plan would be a permanent corruption the
//! scheduler cannot self-repair, so validation happens before any task
//! document is written.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use super::PlanSpec;

/// Errors that can occur during plan validation.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan must contain at least one task")]
    NoTasks,

    #[error("invalid local id {0:?} (expected [A-Za-z0-9_-]+)")]
    InvalidLocalId(String),

    #[error("duplicate local id: {0:?}")]
    DuplicateLocalId(String),

    #[error("task {task:?} depends on unknown task {dependency:?}")]
    UnknownDependency { task: String, dependency: String },

    #[error("task {0:?} depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle detected involving tasks: {0}")]
    CycleDetected(String),
}

/// Validate a plan and return the insertion order (indices into
/// `spec.tasks`, dependencies before dependents).
pub fn validate(spec: &PlanSpec) -> Result<Vec<usize>, PlanError> {
    if spec.tasks.is_empty() {
        return Err(PlanError::NoTasks);
    }

    // Collect local ids and check for well-formedness and duplicates.
    let mut seen = HashSet::new();
    for task in &spec.tasks {
        if task.local_id.is_empty()
            || !task
                .local_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(PlanError::InvalidLocalId(task.local_id.clone()));
        }
        if !seen.insert(task.local_id.as_str()) {
            return Err(PlanError::DuplicateLocalId(task.local_id.clone()));
        }
    }

    // Check dependency references.
    for task in &spec.tasks {
        for dep in &task.depends_on {
            if dep == &task.local_id {
                return Err(PlanError::SelfDependency(task.local_id.clone()));
            }
            if !seen.contains(dep.as_str()) {
                return Err(PlanError::UnknownDependency {
                    task: task.local_id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    topological_order(spec)
}

/// Kahn's algorithm: produce a topological order, or report the cycle.
fn topological_order(spec: &PlanSpec) -> Result<Vec<usize>, PlanError> {
    let ids: Vec<&str> = spec.tasks.iter().map(|t| t.local_id.as_str()).collect();
    let id_to_idx: HashMap<&str, usize> =
        ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let n = ids.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![vec![]; n];

    for task in &spec.tasks {
        let task_idx = id_to_idx[task.local_id.as_str()];
        for dep in &task.depends_on {
            let dep_idx = id_to_idx[dep.as_str()];
            // Edge: dep -> task (dep must complete before task).
            adj[dep_idx].push(task_idx);
            in_degree[task_idx] += 1;
        }
    }

    let mut queue: VecDeque<usize> = VecDeque::new();
    for (i, deg) in in_degree.iter().enumerate() {
        if *deg == 0 {
            queue.push_back(i);
        }
    }

    let mut order = Vec::with_capacity(n);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &neighbor in &adj[node] {
            in_degree[neighbor] -= 1;
            if in_degree[neighbor] == 0 {
                queue.push_back(neighbor);
            }
        }
    }

    if order.len() != n {
        // Collect the ids of tasks still carrying an in-degree: the cycle
        // participants (and anything downstream of them).
        let cycle_tasks: Vec<&str> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg > 0)
            .map(|(i, _)| ids[i])
            .collect();
        return Err(PlanError::CycleDetected(cycle_tasks.join(", ")));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlannedTask;
    use relay_db::models::TaskType;

    fn planned(local_id: &str, depends_on: &[&str]) -> PlannedTask {
        PlannedTask {
            local_id: local_id.to_string(),
            task_type: TaskType::Search,
            input_context: serde_json::json!({}),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            max_retries: None,
        }
    }

    fn spec(tasks: Vec<PlannedTask>) -> PlanSpec {
        PlanSpec { tasks }
    }

    #[test]
    fn accepts_single_task() {
        let order = validate(&spec(vec![planned("a", &[])])).expect("should validate");
        assert_eq!(order, vec![0]);
    }

    #[test]
    fn rejects_empty_plan() {
        let err = validate(&spec(vec![])).unwrap_err();
        assert!(matches!(err, PlanError::NoTasks));
    }

    #[test]
    fn rejects_bad_local_id() {
        let err = validate(&spec(vec![planned("has space", &[])])).unwrap_err();
        assert!(matches!(err, PlanError::InvalidLocalId(_)));

        let err = validate(&spec(vec![planned("", &[])])).unwrap_err();
        assert!(matches!(err, PlanError::InvalidLocalId(_)));
    }

    #[test]
    fn rejects_duplicate_local_ids() {
        let err = validate(&spec(vec![planned("a", &[]), planned("a", &[])])).unwrap_err();
        assert!(
            matches!(err, PlanError::DuplicateLocalId(ref id) if id == "a"),
            "expected DuplicateLocalId, got: {err}"
        );
    }

    #[test]
    fn rejects_unknown_dependency() {
        let err = validate(&spec(vec![planned("a", &["ghost"])])).unwrap_err();
        assert!(matches!(err, PlanError::UnknownDependency { .. }));
    }

    #[test]
    fn rejects_self_dependency() {
        let err = validate(&spec(vec![planned("a", &["a"])])).unwrap_err();
        assert!(matches!(err, PlanError::SelfDependency(_)));
    }

    #[test]
    fn rejects_direct_cycle() {
        let err =
            validate(&spec(vec![planned("a", &["b"]), planned("b", &["a"])])).unwrap_err();
        assert!(matches!(err, PlanError::CycleDetected(_)));
    }

    #[test]
    fn rejects_transitive_cycle() {
        let err = validate(&spec(vec![
            planned("a", &["c"]),
            planned("b", &["a"]),
            planned("c", &["b"]),
        ]))
        .unwrap_err();
        assert!(matches!(err, PlanError::CycleDetected(_)));
    }

    #[test]
    fn orders_diamond_dag() {
        // a -> b, a -> c, {b, c} -> d
        let order = validate(&spec(vec![
            planned("d", &["b", "c"]),
            planned("b", &["a"]),
            planned("c", &["a"]),
            planned("a", &[]),
        ]))
        .expect("diamond should validate");

        let position = |idx: usize| order.iter().position(|&i| i == idx).unwrap();
        // a (index 3) before b (1) and c (2); both before d (0).
        assert!(position(3) < position(1));
        assert!(position(3) < position(2));
        assert!(position(1) < position(0));
        assert!(position(2) < position(0));
    }
}
