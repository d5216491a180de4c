use crate::models::{Plan, PlanProgress, Task};

pub fn print_plan(plan: &Plan) {
    println!("Plan: {} tasks", plan.tasks.len());
    println!("  Scenario digest: {}", plan.header.scenario_sha256);
    println!("  Created: {}", plan.header.created);
    print_task_list(&plan.tasks);
}

pub fn print_task_list(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    for t in tasks {
        let deps = if t.deps.is_empty() {
            String::new()
        } else {
            format!(
                " after {}",
                t.deps.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        };
        println!(
            "  [{}] {} ({}) in={} out={}{}",
            t.status.as_str(),
            t.id,
            t.class_name,
            t.inputs.len(),
            t.outputs.len(),
            deps
        );
    }
}

pub fn print_progress(p: &PlanProgress) {
    println!("Progress: {:.1}% ({}/{})", p.percentage, p.done, p.total);
    println!(
        "  pending={} waiting={} in_progress={} done={} failed={}",
        p.pending, p.waiting, p.in_progress, p.done, p.failed
    );
}
