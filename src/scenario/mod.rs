pub mod pattern;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::EngineError;
use crate::models::TaskDescriptor;
use crate::scenario::pattern::Pattern;

/// Digest of the scenario text, stored in the plan header so cooperating
/// processes can detect an edited scenario.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([\w.-]+)\s*:\s*([\w.]+)\s*$").expect("header regex"))
}

fn param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([\w.-]+)\s*=\s*(.*)$").expect("param regex"))
}

enum Mode {
    TopLevel,
    Block,
    Params,
}

struct OpenBlock {
    id: String,
    class_name: String,
    inputs: Option<Vec<Pattern>>,
    outputs: Option<Vec<Pattern>>,
    params: BTreeMap<String, String>,
}

impl OpenBlock {
    fn finish(self) -> TaskDescriptor {
        TaskDescriptor {
            id: self.id,
            class_name: self.class_name,
            inputs: self.inputs.unwrap_or_default(),
            outputs: self.outputs.unwrap_or_default(),
            params: self.params,
        }
    }
}

/// Parse scenario text into descriptors, preserving textual order.
/// `path` is used for diagnostics only.
pub fn parse_str(text: &str, path: &Path) -> Result<Vec<TaskDescriptor>, EngineError> {
    let mut descriptors: Vec<TaskDescriptor> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut mode = Mode::TopLevel;
    let mut open: Option<OpenBlock> = None;

    for (index, raw_line) in text.lines().enumerate() {
        let lineno = index + 1;
        let line = strip_comment(raw_line).trim_end();

        if line.trim().is_empty() {
            // A comment-only line is not a block separator.
            if !raw_line.trim().is_empty() {
                continue;
            }
            if let Some(block) = open.take() {
                push_block(block, &mut seen, &mut descriptors)?;
            }
            mode = Mode::TopLevel;
            continue;
        }

        match mode {
            Mode::TopLevel => {
                let caps = header_regex().captures(line).ok_or_else(|| {
                    EngineError::syntax(path, lineno, "expected `<task_id> : <class_name>`")
                })?;
                let id = caps[1].to_string();
                let class_name = caps[2].to_string();
                open = Some(OpenBlock {
                    id,
                    class_name,
                    inputs: None,
                    outputs: None,
                    params: BTreeMap::new(),
                });
                mode = Mode::Block;
            }
            Mode::Block => {
                let block = open.as_mut().ok_or_else(|| {
                    EngineError::syntax(path, lineno, "internal: no open block")
                })?;
                let body = line.trim_start();
                if let Some(rest) = body.strip_prefix("in:") {
                    if block.inputs.is_some() {
                        return Err(EngineError::syntax(path, lineno, "duplicate `in:` line"));
                    }
                    block.inputs = Some(parse_patterns(rest, path, lineno)?);
                } else if let Some(rest) = body.strip_prefix("out:") {
                    if block.outputs.is_some() {
                        return Err(EngineError::syntax(path, lineno, "duplicate `out:` line"));
                    }
                    block.outputs = Some(parse_patterns(rest, path, lineno)?);
                } else if body == "params:" {
                    mode = Mode::Params;
                } else {
                    return Err(EngineError::syntax(
                        path,
                        lineno,
                        "expected `in:`, `out:` or `params:`",
                    ));
                }
            }
            Mode::Params => {
                let block = open.as_mut().ok_or_else(|| {
                    EngineError::syntax(path, lineno, "internal: no open block")
                })?;
                let caps = param_regex().captures(line).ok_or_else(|| {
                    EngineError::syntax(path, lineno, "expected `<key> = <value>`")
                })?;
                let key = caps[1].to_string();
                let value = caps[2].to_string();
                if block.params.insert(key.clone(), value).is_some() {
                    return Err(EngineError::syntax(
                        path,
                        lineno,
                        format!("duplicate parameter `{key}`"),
                    ));
                }
            }
        }
    }

    if let Some(block) = open.take() {
        push_block(block, &mut seen, &mut descriptors)?;
    }

    debug!(
        scenario = %path.display(),
        descriptors = descriptors.len(),
        "scenario parsed"
    );
    Ok(descriptors)
}

fn push_block(
    block: OpenBlock,
    seen: &mut BTreeSet<String>,
    descriptors: &mut Vec<TaskDescriptor>,
) -> Result<(), EngineError> {
    if !seen.insert(block.id.clone()) {
        return Err(EngineError::duplicate_task_id(&block.id));
    }
    descriptors.push(block.finish());
    Ok(())
}

fn parse_patterns(rest: &str, path: &Path, lineno: usize) -> Result<Vec<Pattern>, EngineError> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let mut patterns = Vec::new();
    for piece in rest.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            return Err(EngineError::syntax(path, lineno, "empty pattern in list"));
        }
        let pattern =
            Pattern::parse(piece).map_err(|e| EngineError::syntax(path, lineno, &e.message))?;
        patterns.push(pattern);
    }
    Ok(patterns)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(text: &str) -> Vec<TaskDescriptor> {
        parse_str(text, Path::new("test.scen")).expect("parse")
    }

    #[test]
    fn parses_full_block() {
        let descriptors = parse_ok(
            "extract : Copy\n  in: data/*.txt, headers.txt\n  out: out/*.txt\n  params:\n    encoding = utf-8\n    label = has spaces inside\n",
        );
        assert_eq!(descriptors.len(), 1);
        let d = &descriptors[0];
        assert_eq!(d.id, "extract");
        assert_eq!(d.class_name, "Copy");
        assert_eq!(d.inputs.len(), 2);
        assert_eq!(d.inputs[0].as_str(), "data/*.txt");
        assert_eq!(d.outputs[0].as_str(), "out/*.txt");
        assert_eq!(d.params["encoding"], "utf-8");
        assert_eq!(d.params["label"], "has spaces inside");
    }

    #[test]
    fn blocks_separated_by_blank_lines_keep_order() {
        let descriptors = parse_ok(
            "a : Cat\n  in: a.txt\n  out: b.txt\n\nb : Cat\n  in: b.txt\n  out: c.txt\n",
        );
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].id, "a");
        assert_eq!(descriptors[1].id, "b");
    }

    #[test]
    fn comments_and_missing_in_line() {
        let descriptors = parse_ok(
            "# sources come first\nsrc : Fail   # always fails\n  out: a.txt\n",
        );
        assert_eq!(descriptors.len(), 1);
        assert!(descriptors[0].inputs.is_empty());
        assert_eq!(descriptors[0].outputs[0].as_str(), "a.txt");
    }

    #[test]
    fn comment_line_does_not_split_a_block() {
        let descriptors = parse_ok(
            "a : Cat\n  in: a.txt\n  # the interesting part\n  out: b.txt\n",
        );
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].outputs[0].as_str(), "b.txt");
    }

    #[test]
    fn empty_scenario_is_empty_plan() {
        assert!(parse_ok("\n# nothing here\n\n").is_empty());
    }

    #[test]
    fn rejects_stray_text() {
        let err = parse_str("not a header line\n", Path::new("s")).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ScenarioSyntax);
        assert!(err.message.starts_with("s:1:"), "{}", err.message);
    }

    #[test]
    fn rejects_duplicate_id() {
        let err = parse_str(
            "a : Cat\n  out: x.txt\n\na : Cat\n  out: y.txt\n",
            Path::new("s"),
        )
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::DuplicateTaskId);
    }

    #[test]
    fn rejects_duplicate_in_line() {
        let err = parse_str(
            "a : Cat\n  in: x.txt\n  in: y.txt\n  out: z.txt\n",
            Path::new("s"),
        )
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ScenarioSyntax);
    }

    #[test]
    fn rejects_duplicate_param() {
        let err = parse_str(
            "a : Cat\n  out: x.txt\n  params:\n    k = 1\n    k = 2\n",
            Path::new("s"),
        )
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ScenarioSyntax);
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(sha256_hex("x"), sha256_hex("x"));
        assert_ne!(sha256_hex("x"), sha256_hex("y"));
    }
}
