use std::collections::HashMap;

use crate::models::{Plan, TaskFailure, TaskStatus};

/// Settle the plan after completions: promote every `PENDING` task whose
/// dependencies are all `DONE` to `WAITING`, and fail every `PENDING`
/// task with a `FAILED` dependency. Runs to fixpoint so upstream failure
/// reaches transitive dependents in one call. Returns the number of
/// tasks that changed status.
pub fn settle(plan: &mut Plan) -> usize {
    let mut changed_total = 0;
    loop {
        let status: HashMap<String, TaskStatus> = plan
            .tasks
            .iter()
            .map(|t| (t.id.clone(), t.status))
            .collect();

        let mut changed = 0;
        for task in &mut plan.tasks {
            if task.status != TaskStatus::Pending {
                continue;
            }
            let failed_dep = task
                .deps
                .iter()
                .any(|d| status.get(d) == Some(&TaskStatus::Failed));
            if failed_dep {
                task.status = TaskStatus::Failed;
                task.error = Some(TaskFailure::upstream());
                changed += 1;
                continue;
            }
            let all_done = task
                .deps
                .iter()
                .all(|d| status.get(d) == Some(&TaskStatus::Done));
            if all_done {
                task.status = TaskStatus::Waiting;
                changed += 1;
            }
        }

        changed_total += changed;
        if changed == 0 {
            return changed_total;
        }
    }
}

/// Ids of up to `n` `WAITING` tasks, in plan order. Plan order already
/// encodes descriptor order and binding order, so no further tie-break
/// is needed.
pub fn select_waiting(plan: &Plan, n: usize) -> Vec<String> {
    plan.tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Waiting)
        .take(n)
        .map(|t| t.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, Task};

    fn plan_of(tasks: Vec<Task>) -> Plan {
        Plan::new("digest".to_string(), tasks)
    }

    fn task(id: &str, status: TaskStatus, deps: &[&str]) -> Task {
        let mut t = Task::new(id, "Cat", vec![], vec![], Default::default());
        t.status = status;
        t.deps = deps.iter().map(|d| d.to_string()).collect();
        if status == TaskStatus::Failed {
            t.error = Some(TaskFailure::new(FailureKind::IoError, "boom"));
        }
        t
    }

    #[test]
    fn promotes_when_deps_done() {
        let mut plan = plan_of(vec![
            task("a", TaskStatus::Done, &[]),
            task("b", TaskStatus::Pending, &["a"]),
        ]);
        assert_eq!(settle(&mut plan), 1);
        assert_eq!(plan.tasks[1].status, TaskStatus::Waiting);
    }

    #[test]
    fn leaves_pending_while_deps_unfinished() {
        let mut plan = plan_of(vec![
            task("a", TaskStatus::Waiting, &[]),
            task("b", TaskStatus::Pending, &["a"]),
        ]);
        assert_eq!(settle(&mut plan), 0);
        assert_eq!(plan.tasks[1].status, TaskStatus::Pending);
    }

    #[test]
    fn failure_reaches_transitive_dependents() {
        let mut plan = plan_of(vec![
            task("a", TaskStatus::Failed, &[]),
            task("b", TaskStatus::Pending, &["a"]),
            task("c", TaskStatus::Pending, &["b"]),
        ]);
        assert_eq!(settle(&mut plan), 2);
        for t in &plan.tasks[1..] {
            assert_eq!(t.status, TaskStatus::Failed);
            let err = t.error.as_ref().expect("error recorded");
            assert_eq!(err.kind, FailureKind::Upstream);
            assert_eq!(err.message, "upstream failure");
        }
    }

    #[test]
    fn selection_respects_plan_order_and_limit() {
        let plan = plan_of(vec![
            task("a", TaskStatus::Waiting, &[]),
            task("b", TaskStatus::Done, &[]),
            task("c", TaskStatus::Waiting, &[]),
            task("d", TaskStatus::Waiting, &[]),
        ]);
        assert_eq!(select_waiting(&plan, 2), vec!["a", "c"]);
    }
}
