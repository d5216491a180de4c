//! Line-oriented plan file codec.
//!
//! Line 1: `PLAN v1 scenario_sha256=<hex> created=<iso8601>`.
//! One tab-separated record per task:
//! `id  status  attempt  owner|-  expiry|-  class  deps  inputs  outputs  params  error|-`.
//! List fields are `|`-separated; `%` escapes `\t`, `\n`, `\r`, `|` and
//! itself so arbitrary paths and messages survive. Params are urlencoded
//! `k=v` pairs joined with `&`, keys sorted. Encoding is canonical:
//! decode-then-encode reproduces the input bytes.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::EngineError;
use crate::models::{
    FailureKind, Plan, PlanHeader, Task, TaskFailure, TaskStatus, PLAN_FORMAT_VERSION,
};

pub fn encode(plan: &Plan) -> String {
    let mut out = format!(
        "PLAN v{} scenario_sha256={} created={}\n",
        plan.header.version, plan.header.scenario_sha256, plan.header.created
    );
    for task in &plan.tasks {
        out.push_str(&encode_task(task));
        out.push('\n');
    }
    out
}

pub fn decode(text: &str) -> Result<Plan, EngineError> {
    let mut lines = text.lines();
    let header_line = lines
        .next()
        .ok_or_else(|| EngineError::plan_corrupt(1, "empty plan file"))?;
    let header = decode_header(header_line)?;

    let mut tasks = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for (index, line) in lines.enumerate() {
        let lineno = index + 2;
        let task = decode_task(line, lineno)?;
        if !seen.insert(task.id.clone()) {
            return Err(EngineError::plan_corrupt(
                lineno,
                format!("duplicate task id `{}`", task.id),
            ));
        }
        tasks.push(task);
    }
    Ok(Plan { header, tasks })
}

fn encode_task(task: &Task) -> String {
    let owner = match task.owner.as_deref() {
        Some(o) => escape(o),
        None => "-".to_string(),
    };
    let expiry = match task.expiry {
        Some(e) => e.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => "-".to_string(),
    };
    let error = match &task.error {
        Some(f) => escape(&format!("{}: {}", f.kind.as_str(), f.message)),
        None => "-".to_string(),
    };
    [
        escape(&task.id),
        task.status.as_str().to_string(),
        task.attempt.to_string(),
        owner,
        expiry,
        escape(&task.class_name),
        encode_list(task.deps.iter()),
        encode_list(task.inputs.iter()),
        encode_list(task.outputs.iter()),
        encode_params(&task.params),
        error,
    ]
    .join("\t")
}

fn decode_header(line: &str) -> Result<PlanHeader, EngineError> {
    let mut parts = line.split(' ');
    if parts.next() != Some("PLAN") {
        return Err(EngineError::plan_corrupt(1, "expected `PLAN` header"));
    }
    let version = parts
        .next()
        .and_then(|t| t.strip_prefix('v'))
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(|| EngineError::plan_corrupt(1, "malformed version token"))?;
    if version != PLAN_FORMAT_VERSION {
        return Err(EngineError::plan_corrupt(
            1,
            format!("unsupported plan version {version}"),
        ));
    }
    let scenario_sha256 = parts
        .next()
        .and_then(|t| t.strip_prefix("scenario_sha256="))
        .ok_or_else(|| EngineError::plan_corrupt(1, "missing scenario_sha256"))?
        .to_string();
    let created = parts
        .next()
        .and_then(|t| t.strip_prefix("created="))
        .ok_or_else(|| EngineError::plan_corrupt(1, "missing created timestamp"))?
        .to_string();
    if parts.next().is_some() {
        return Err(EngineError::plan_corrupt(1, "trailing header tokens"));
    }
    Ok(PlanHeader {
        version,
        scenario_sha256,
        created,
    })
}

fn decode_task(line: &str, lineno: usize) -> Result<Task, EngineError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 11 {
        return Err(EngineError::plan_corrupt(
            lineno,
            format!("expected 11 fields, found {}", fields.len()),
        ));
    }
    let id = unescape(fields[0], lineno)?;
    let status = TaskStatus::from_str(fields[1]).ok_or_else(|| {
        EngineError::plan_corrupt(lineno, format!("unknown status `{}`", fields[1]))
    })?;
    let attempt = fields[2].parse::<u32>().map_err(|_| {
        EngineError::plan_corrupt(lineno, format!("malformed attempt `{}`", fields[2]))
    })?;
    let owner = match fields[3] {
        "-" => None,
        s => Some(unescape(s, lineno)?),
    };
    let expiry = match fields[4] {
        "-" => None,
        s => Some(decode_expiry(s, lineno)?),
    };
    let class_name = unescape(fields[5], lineno)?;
    let deps: BTreeSet<String> = decode_list(fields[6], lineno)?.into_iter().collect();
    let inputs = decode_list(fields[7], lineno)?;
    let outputs = decode_list(fields[8], lineno)?;
    let params = decode_params(fields[9], lineno)?;
    let error = match fields[10] {
        "-" => None,
        s => Some(decode_failure(s, lineno)?),
    };
    Ok(Task {
        id,
        class_name,
        status,
        attempt,
        owner,
        expiry,
        deps,
        inputs,
        outputs,
        params,
        error,
    })
}

fn decode_expiry(field: &str, lineno: usize) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(field)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::plan_corrupt(lineno, format!("malformed expiry: {e}")))
}

fn encode_list<'a>(items: impl Iterator<Item = &'a String>) -> String {
    items.map(|s| escape(s)).collect::<Vec<_>>().join("|")
}

fn decode_list(field: &str, lineno: usize) -> Result<Vec<String>, EngineError> {
    if field.is_empty() {
        return Ok(Vec::new());
    }
    field.split('|').map(|s| unescape(s, lineno)).collect()
}

fn encode_params(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_params(field: &str, lineno: usize) -> Result<BTreeMap<String, String>, EngineError> {
    let mut params = BTreeMap::new();
    if field.is_empty() {
        return Ok(params);
    }
    for pair in field.split('&') {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| EngineError::plan_corrupt(lineno, format!("malformed param `{pair}`")))?;
        let k = urlencoding::decode(k)
            .map_err(|e| EngineError::plan_corrupt(lineno, format!("malformed param key: {e}")))?;
        let v = urlencoding::decode(v)
            .map_err(|e| EngineError::plan_corrupt(lineno, format!("malformed param value: {e}")))?;
        params.insert(k.into_owned(), v.into_owned());
    }
    Ok(params)
}

fn decode_failure(field: &str, lineno: usize) -> Result<TaskFailure, EngineError> {
    let text = unescape(field, lineno)?;
    let (kind, message) = text
        .split_once(": ")
        .ok_or_else(|| EngineError::plan_corrupt(lineno, "malformed error field"))?;
    let kind = FailureKind::from_str(kind).ok_or_else(|| {
        EngineError::plan_corrupt(lineno, format!("unknown failure kind `{kind}`"))
    })?;
    Ok(TaskFailure {
        kind,
        message: message.to_string(),
    })
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '\t' => out.push_str("%09"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            '|' => out.push_str("%7C"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(s: &str, lineno: usize) -> Result<String, EngineError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match (chars.next(), chars.next()) {
            (Some('2'), Some('5')) => out.push('%'),
            (Some('0'), Some('9')) => out.push('\t'),
            (Some('0'), Some('A')) => out.push('\n'),
            (Some('0'), Some('D')) => out.push('\r'),
            (Some('7'), Some('C')) => out.push('|'),
            _ => {
                return Err(EngineError::plan_corrupt(
                    lineno,
                    format!("invalid escape in `{s}`"),
                ))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_plan() -> Plan {
        let mut done = Task::new(
            "a",
            "Cat",
            vec!["in put.txt".to_string()],
            vec!["weird|name.txt".to_string()],
            BTreeMap::from([("label".to_string(), "two words & more".to_string())]),
        );
        done.status = TaskStatus::Done;

        let mut leased = Task::new("b#p", "Copy", vec!["weird|name.txt".to_string()], vec![], Default::default());
        leased.status = TaskStatus::InProgress;
        leased.attempt = 2;
        leased.owner = Some("host:42:0".to_string());
        leased.expiry = Some(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap());
        leased.deps = BTreeSet::from(["a".to_string()]);

        let mut failed = Task::new("c", "Fail", vec![], vec!["x.txt".to_string()], Default::default());
        failed.status = TaskStatus::Failed;
        failed.error = Some(TaskFailure::new(
            FailureKind::DataError,
            "bad header: line 3\tcolumn 4",
        ));

        Plan {
            header: PlanHeader {
                version: PLAN_FORMAT_VERSION,
                scenario_sha256: "ab12".to_string(),
                created: "2026-08-01T00:00:00Z".to_string(),
            },
            tasks: vec![done, leased, failed],
        }
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let text = encode(&sample_plan());
        let decoded = decode(&text).expect("decode");
        assert_eq!(encode(&decoded), text);
    }

    #[test]
    fn decode_recovers_fields() {
        let plan = decode(&encode(&sample_plan())).expect("decode");
        assert_eq!(plan.header.scenario_sha256, "ab12");
        let leased = plan.task("b#p").expect("task");
        assert_eq!(leased.status, TaskStatus::InProgress);
        assert_eq!(leased.attempt, 2);
        assert_eq!(leased.owner.as_deref(), Some("host:42:0"));
        assert_eq!(leased.deps.len(), 1);
        let failed = plan.task("c").expect("task");
        let err = failed.error.as_ref().expect("error");
        assert_eq!(err.kind, FailureKind::DataError);
        assert_eq!(err.message, "bad header: line 3\tcolumn 4");
    }

    #[test]
    fn pipe_and_percent_survive_in_paths() {
        let plan = decode(&encode(&sample_plan())).expect("decode");
        assert_eq!(plan.tasks[0].outputs[0], "weird|name.txt");
        assert_eq!(plan.tasks[0].inputs[0], "in put.txt");
    }

    #[test]
    fn params_with_reserved_chars_survive() {
        let plan = decode(&encode(&sample_plan())).expect("decode");
        assert_eq!(plan.tasks[0].params["label"], "two words & more");
    }

    #[test]
    fn rejects_wrong_field_count() {
        let text = "PLAN v1 scenario_sha256=x created=t\nonly\tthree\tfields\n";
        let err = decode(text).unwrap_err();
        assert!(err.message.contains("line 2"));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = decode("PLAN v9 scenario_sha256=x created=t\n").unwrap_err();
        assert!(err.message.contains("version 9"));
    }

    #[test]
    fn rejects_bad_escape() {
        let text = "PLAN v1 scenario_sha256=x created=t\na%zz\tWAITING\t0\t-\t-\tCat\t\t\t\t\t-\n";
        assert!(decode(text).is_err());
    }
}
