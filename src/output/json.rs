use serde_json::{json, Value};

use crate::error::EngineError;
use crate::models::{Plan, PlanProgress, Task};

pub fn error(e: &EngineError) -> Value {
    json!({
        "success": false,
        "error": {
            "code": e.code.as_str(),
            "message": e.message,
        }
    })
}

pub fn plan_summary(plan: &Plan) -> Value {
    let tasks: Vec<Value> = plan.tasks.iter().map(task_summary).collect();
    json!({
        "success": true,
        "data": {
            "scenario_sha256": plan.header.scenario_sha256,
            "created": plan.header.created,
            "tasks": tasks,
            "progress": progress_json(&plan.progress()),
        }
    })
}

pub fn task_summary(t: &Task) -> Value {
    json!({
        "id": t.id,
        "class": t.class_name,
        "status": t.status.as_str(),
        "attempt": t.attempt,
        "deps": t.deps,
        "inputs": t.inputs,
        "outputs": t.outputs,
        "error": t.error.as_ref().map(|f| json!({
            "kind": f.kind.as_str(),
            "message": f.message,
        })),
    })
}

pub fn run_report(progress: &PlanProgress) -> Value {
    json!({
        "success": progress.failed == 0,
        "data": {
            "progress": progress_json(progress),
        }
    })
}

pub fn progress_json(p: &PlanProgress) -> Value {
    json!({
        "total": p.total,
        "pending": p.pending,
        "waiting": p.waiting,
        "in_progress": p.in_progress,
        "done": p.done,
        "failed": p.failed,
        "percentage": p.percentage,
    })
}
