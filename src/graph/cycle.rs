use std::collections::HashMap;

use crate::error::EngineError;
use crate::models::Task;

const WHITE: u8 = 0;
const GRAY: u8 = 1;
const BLACK: u8 = 2;

/// Reject plans whose dependency graph contains a cycle.
///
/// Edges run task → dependency. DFS 3-color; a back edge to a gray node
/// is a cycle. Runs once at build time; the plan is frozen afterwards,
/// so the scheduler never re-checks.
pub fn detect_cycle(tasks: &[Task]) -> Result<(), EngineError> {
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();

    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (i, task) in tasks.iter().enumerate() {
        for dep in &task.deps {
            if let Some(&j) = index.get(dep.as_str()) {
                adj[i].push(j);
            }
        }
    }

    let mut color = vec![WHITE; tasks.len()];
    for start in 0..tasks.len() {
        if color[start] == WHITE {
            if let Some(offender) = visit(start, &adj, &mut color) {
                return Err(EngineError::cyclic_plan(&tasks[offender].id));
            }
        }
    }
    Ok(())
}

fn visit(node: usize, adj: &[Vec<usize>], color: &mut [u8]) -> Option<usize> {
    color[node] = GRAY;
    for &next in &adj[node] {
        match color[next] {
            GRAY => return Some(next),
            WHITE => {
                if let Some(offender) = visit(next, adj, color) {
                    return Some(offender);
                }
            }
            _ => {}
        }
    }
    color[node] = BLACK;
    None
}
