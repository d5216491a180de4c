use std::collections::BTreeMap;

use crate::scenario::pattern::Pattern;

/// Scenario-level task specification, before wildcard expansion.
/// Descriptors keep their textual order; the expander relies on it.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub id: String,
    pub class_name: String,
    pub inputs: Vec<Pattern>,
    pub outputs: Vec<Pattern>,
    pub params: BTreeMap<String, String>,
}
