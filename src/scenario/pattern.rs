use regex::Regex;

use crate::error::{EngineError, ErrorCode};

/// A file pattern from a scenario: a literal path optionally containing
/// `*` (one path segment) and `**` (any prefix, may span segments).
///
/// Matching a path yields the pattern's *binding*: the tuple of
/// substrings captured by the wildcards, in pattern order.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    regex: Regex,
    wildcards: usize,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let mut source = String::from("^");
        let mut wildcards = 0;
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '*' {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'*') {
                        return Err(EngineError::new(
                            ErrorCode::ScenarioSyntax,
                            format!("pattern `{raw}`: `***` is not a valid wildcard"),
                        ));
                    }
                    source.push_str("(.*)");
                } else {
                    source.push_str("([^/]*)");
                }
                wildcards += 1;
            } else {
                source.push_str(&regex::escape(&c.to_string()));
            }
        }
        source.push('$');
        let regex = Regex::new(&source).map_err(|e| {
            EngineError::new(
                ErrorCode::ScenarioSyntax,
                format!("pattern `{raw}`: {e}"),
            )
        })?;
        Ok(Self {
            raw: raw.to_string(),
            regex,
            wildcards,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn has_wildcards(&self) -> bool {
        self.wildcards > 0
    }

    pub fn wildcard_count(&self) -> usize {
        self.wildcards
    }

    /// Match a path, returning the captured binding. A literal pattern
    /// matches only the identical path and yields an empty binding.
    pub fn match_path(&self, path: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(path)?;
        let mut binding = Vec::with_capacity(self.wildcards);
        for i in 1..=self.wildcards {
            binding.push(caps.get(i)?.as_str().to_string());
        }
        Some(binding)
    }

    /// Materialize the pattern by substituting binding values for its
    /// wildcards, in order. The binding may be longer than the wildcard
    /// count; values are consumed from the front.
    pub fn substitute(&self, binding: &[String]) -> Result<String, EngineError> {
        if self.wildcards > binding.len() {
            return Err(EngineError::new(
                ErrorCode::BindingMismatch,
                format!(
                    "pattern `{}` needs {} wildcard values, binding has {}",
                    self.raw,
                    self.wildcards,
                    binding.len()
                ),
            ));
        }
        let mut out = String::with_capacity(self.raw.len());
        let mut values = binding.iter();
        let mut chars = self.raw.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '*' {
                if chars.peek() == Some(&'*') {
                    chars.next();
                }
                if let Some(v) = values.next() {
                    out.push_str(v);
                }
            } else {
                out.push(c);
            }
        }
        Ok(out)
    }
}
